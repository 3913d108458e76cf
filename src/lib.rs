//! USB device service
//!
//! A process-wide service that discovers, opens, and tracks USB devices while
//! a dedicated background thread services asynchronous USB I/O events.
//!
//! The service is built from three injected pieces:
//! - a [`backend::UsbBackend`] providing the platform USB primitives (the
//!   production implementation is [`backend::libusb::LibusbBackend`] over
//!   `rusb`),
//! - a [`broker::AccessBroker`] gating filtered lookups on platforms with
//!   mediated hardware access ([`broker::AutoGrantBroker`] elsewhere),
//! - the [`service::UsbService`] facade tying them to the event pump and the
//!   device registry.
//!
//! Injecting the backend and broker keeps the service constructible against
//! the mocks in [`test_utils`], so the full request flow is testable without
//! hardware.

pub mod backend;
pub mod broker;
pub mod enumerate;
pub mod error;
pub mod logging;
pub mod pump;
pub mod registry;
pub mod service;
pub mod test_utils;

pub use backend::libusb::LibusbBackend;
pub use backend::{BackendError, DeviceDescriptor, DeviceKey, UsbBackend};
pub use broker::{AccessBroker, AutoGrantBroker};
pub use error::{Error, Result};
pub use logging::setup_logging;
pub use registry::{DeviceRegistry, OpenDevice, SharedDeviceHandle};
pub use service::UsbService;
