//! USB device service
//!
//! Top-level facade tying the event pump, access broker, enumeration, and the
//! device registry together. One service instance owns one backend context;
//! construction starts the event pump and [`UsbService::shutdown`] stops it,
//! after which no device operation may touch the backend again.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::backend::UsbBackend;
use crate::broker::AccessBroker;
use crate::enumerate;
use crate::error::Result;
use crate::pump::EventPump;
use crate::registry::{DeviceRegistry, SharedDeviceHandle};

/// Completion callback for [`UsbService::find_devices`]. Invoked exactly once.
pub type FindCallback<B> = Box<dyn FnOnce(Vec<SharedDeviceHandle<B>>) + Send + 'static>;

/// Process-wide USB device service.
pub struct UsbService<B: UsbBackend> {
    backend: Arc<B>,
    broker: Arc<dyn AccessBroker>,
    registry: Arc<DeviceRegistry<B>>,
    pump: Option<EventPump<B>>,
}

impl<B: UsbBackend> UsbService<B> {
    /// Construct the service and start its event pump.
    ///
    /// Returns only once the pump thread is confirmed running, so a
    /// constructed service always has live event servicing behind it. The
    /// backend and broker are injected so hosts can substitute the mocks in
    /// [`crate::test_utils`].
    pub fn new(backend: B, broker: Arc<dyn AccessBroker>) -> Result<Self> {
        let backend = Arc::new(backend);
        let registry = Arc::new(DeviceRegistry::new(backend.clone()));
        let pump = EventPump::start(backend.clone())?;
        info!("USB service started");

        Ok(Self {
            backend,
            broker,
            registry,
            pump: Some(pump),
        })
    }

    /// Whether [`shutdown`](Self::shutdown) has not yet been called.
    pub fn is_running(&self) -> bool {
        self.pump.is_some()
    }

    /// The injected backend.
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Reject device operations issued after shutdown. Fails loudly in debug
    /// builds; in release the operation degrades to an empty result.
    fn guard_running(&self, operation: &str) -> bool {
        if self.pump.is_some() {
            return true;
        }
        debug_assert!(false, "{} called after shutdown", operation);
        warn!("{} called after shutdown; ignoring", operation);
        false
    }

    /// Find opened handles for all devices matching `vendor_id`/`product_id`.
    ///
    /// The result is delivered through `on_done`, which fires exactly once on
    /// every path. The lookup first passes the access gate: when the broker
    /// denies (or is unreachable), the callback receives an empty list and
    /// the backend is never queried. On grant, matching devices are opened or
    /// reused through the registry.
    pub fn find_devices(
        &self,
        vendor_id: u16,
        product_id: u16,
        interface_id: i32,
        on_done: FindCallback<B>,
    ) {
        if !self.guard_running("find_devices") {
            on_done(Vec::new());
            return;
        }

        let backend = self.backend.clone();
        let registry = self.registry.clone();
        self.broker.request_access(
            vendor_id,
            product_id,
            interface_id,
            Box::new(move |granted| {
                if !granted {
                    debug!(
                        "access denied for devices matching {:04x}:{:04x}",
                        vendor_id, product_id
                    );
                    on_done(Vec::new());
                    return;
                }

                let mut found = Vec::new();
                for device in enumerate::snapshot(backend.as_ref()) {
                    if enumerate::matches(backend.as_ref(), &device, vendor_id, product_id)
                        && let Some(handle) = registry.open_or_get(&device)
                    {
                        found.push(handle);
                    }
                }
                debug!(
                    "found {} devices matching {:04x}:{:04x}",
                    found.len(),
                    vendor_id,
                    product_id
                );
                on_done(found);
            }),
        );
    }

    /// Async convenience wrapper around [`find_devices`](Self::find_devices)
    /// for tokio hosts.
    pub async fn find_devices_async(
        &self,
        vendor_id: u16,
        product_id: u16,
        interface_id: i32,
    ) -> Vec<SharedDeviceHandle<B>> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.find_devices(
            vendor_id,
            product_id,
            interface_id,
            Box::new(move |handles| {
                let _ = tx.send(handles);
            }),
        );
        rx.await.unwrap_or_default()
    }

    /// Open-or-reuse handles for every device currently visible to the
    /// backend.
    ///
    /// Skips the access gate. Each call takes a fresh snapshot, so hot-plug
    /// changes show up on the next call; devices that fail to open are
    /// skipped.
    pub fn enumerate_devices(&self) -> Vec<SharedDeviceHandle<B>> {
        if !self.guard_running("enumerate_devices") {
            return Vec::new();
        }

        enumerate::snapshot(self.backend.as_ref())
            .iter()
            .filter_map(|device| self.registry.open_or_get(device))
            .collect()
    }

    /// Stop tracking `handle`'s device and release the backend resource once
    /// the last caller reference is dropped.
    pub fn close_device(&self, handle: &SharedDeviceHandle<B>) {
        if !self.guard_running("close_device") {
            return;
        }
        self.registry.close(handle);
    }

    /// Number of devices currently tracked with open handles.
    pub fn open_device_count(&self) -> usize {
        self.registry.len()
    }

    /// Stop the event pump.
    ///
    /// Must be called exactly once before the service is dropped; device
    /// operations issued afterwards are rejected. Once this returns, no
    /// backend call will occur from the pump thread again.
    pub fn shutdown(&mut self) {
        match self.pump.take() {
            Some(mut pump) => {
                pump.stop();
                info!("USB service shut down");
            }
            None => {
                debug_assert!(false, "shutdown called twice");
                warn!("shutdown called twice; ignoring");
            }
        }
    }
}

impl<B: UsbBackend> Drop for UsbService<B> {
    fn drop(&mut self) {
        if let Some(mut pump) = self.pump.take() {
            warn!("USB service dropped without shutdown; stopping event pump");
            pump.stop();
        }
    }
}
