//! USB backend abstraction
//!
//! The service talks to the platform USB stack through the [`UsbBackend`]
//! trait, so the production libusb implementation and the mock used in tests
//! are interchangeable at construction time.

use thiserror::Error;

pub mod libusb;

/// Identity of one physical device as seen by the backend.
///
/// Derived from the device's position on the bus, not from its descriptor, so
/// two devices reporting the same vendor/product pair still get distinct
/// keys. This is the registry's map key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceKey(pub u64);

impl std::fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// The slice of the device descriptor needed for identity matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub vendor_id: u16,
    pub product_id: u16,
}

/// Failures reported by backend primitives.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to initialize USB context: {0}")]
    Init(String),

    #[error("failed to enumerate devices: {0}")]
    Enumerate(String),

    #[error("failed to read device descriptor: {0}")]
    Descriptor(String),

    #[error("failed to open device: {0}")]
    Open(String),

    #[error("failed to service USB events: {0}")]
    Events(String),
}

/// Low-level USB primitives consumed by the service.
///
/// `DeviceRef` is a reference-counted identity token for one physical device:
/// cloning it must keep the underlying device object alive even after the
/// backend has released its own enumeration buffer, and dropping the last
/// clone releases it.
pub trait UsbBackend: Send + Sync + 'static {
    /// Reference-counted device identity token.
    type DeviceRef: Clone + Send + Sync + 'static;

    /// An opened device, as handed out by [`open`](Self::open).
    type NativeHandle: Send + Sync + 'static;

    /// Snapshot the current device list.
    ///
    /// The returned tokens stay valid independently of any backend-internal
    /// list buffer. A fresh call is required to observe hot-plug changes.
    fn list_devices(&self) -> Result<Vec<Self::DeviceRef>, BackendError>;

    /// Stable map identity for `device`.
    fn device_key(&self, device: &Self::DeviceRef) -> DeviceKey;

    /// Read the vendor/product identity from the device descriptor.
    fn read_descriptor(&self, device: &Self::DeviceRef) -> Result<DeviceDescriptor, BackendError>;

    /// Open `device` for I/O.
    fn open(&self, device: &Self::DeviceRef) -> Result<Self::NativeHandle, BackendError>;

    /// Close an opened device.
    fn close(&self, handle: Self::NativeHandle);

    /// Service pending backend events, blocking until work arrives or
    /// [`interrupt`](Self::interrupt) forces an early return.
    fn service_events(&self) -> Result<(), BackendError>;

    /// Force a currently blocked [`service_events`](Self::service_events)
    /// call to return. The blocking call has no native cancellation, so this
    /// is the only way to unpark it when no work is pending.
    fn interrupt(&self);
}
