//! libusb-backed USB backend
//!
//! Maps [`UsbBackend`] onto `rusb`. `rusb::Device` already carries libusb's
//! reference count (clone refs, drop unrefs), so it serves directly as the
//! identity token, and dropping a `rusb::DeviceHandle` closes it.

use rusb::{Context, Device, UsbContext};

use super::{BackendError, DeviceDescriptor, DeviceKey, UsbBackend};

/// Production backend over the system libusb.
pub struct LibusbBackend {
    context: Context,
}

impl LibusbBackend {
    /// Create a fresh libusb context.
    ///
    /// Each backend instance owns exactly one context; it is torn down when
    /// the backend is dropped, after the event pump has stopped.
    pub fn new() -> Result<Self, BackendError> {
        let context = Context::new().map_err(|e| BackendError::Init(e.to_string()))?;
        Ok(Self { context })
    }
}

impl UsbBackend for LibusbBackend {
    type DeviceRef = Device<Context>;
    type NativeHandle = rusb::DeviceHandle<Context>;

    fn list_devices(&self) -> Result<Vec<Device<Context>>, BackendError> {
        let devices = self
            .context
            .devices()
            .map_err(|e| BackendError::Enumerate(e.to_string()))?;
        Ok(devices.iter().collect())
    }

    fn device_key(&self, device: &Device<Context>) -> DeviceKey {
        DeviceKey((u64::from(device.bus_number()) << 8) | u64::from(device.address()))
    }

    fn read_descriptor(&self, device: &Device<Context>) -> Result<DeviceDescriptor, BackendError> {
        let descriptor = device
            .device_descriptor()
            .map_err(|e| BackendError::Descriptor(e.to_string()))?;
        Ok(DeviceDescriptor {
            vendor_id: descriptor.vendor_id(),
            product_id: descriptor.product_id(),
        })
    }

    fn open(&self, device: &Device<Context>) -> Result<Self::NativeHandle, BackendError> {
        device.open().map_err(|e| BackendError::Open(e.to_string()))
    }

    fn close(&self, handle: Self::NativeHandle) {
        // rusb closes the underlying libusb handle on drop
        drop(handle);
    }

    fn service_events(&self) -> Result<(), BackendError> {
        match self.context.handle_events(None) {
            // An interrupt is the expected shutdown wakeup, not a failure
            Ok(()) | Err(rusb::Error::Interrupted) => Ok(()),
            Err(e) => Err(BackendError::Events(e.to_string())),
        }
    }

    fn interrupt(&self) {
        self.context.interrupt_handle_events();
    }
}
