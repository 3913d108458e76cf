//! Test utilities
//!
//! Mock backend and broker implementations for exercising the service
//! without hardware.
//!
//! # Example
//!
//! ```
//! use usb_service::test_utils::MockBackend;
//! use usb_service::{DeviceKey, UsbBackend};
//!
//! let backend = MockBackend::with_devices(&[(1, 0x1234, 0x5678)]);
//! let devices = backend.list_devices().unwrap();
//! assert_eq!(devices.len(), 1);
//! assert_eq!(devices[0].key, DeviceKey(1));
//! ```

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use crate::backend::{BackendError, DeviceDescriptor, DeviceKey, UsbBackend};
use crate::broker::{AccessBroker, AccessCallback};

/// One simulated device on the mock bus.
#[derive(Debug)]
pub struct MockDevice {
    pub key: DeviceKey,
    pub vendor_id: u16,
    pub product_id: u16,
}

/// Identity token for a mock device. The `Arc` provides the same
/// reference-counting semantics the real backend's token carries.
pub type MockDeviceRef = Arc<MockDevice>;

/// An "opened" mock device.
#[derive(Debug)]
pub struct MockHandle {
    pub key: DeviceKey,
}

#[derive(Default)]
struct MockTopology {
    devices: Vec<MockDeviceRef>,
    fail_list: bool,
    fail_descriptor: HashSet<DeviceKey>,
    fail_open: HashSet<DeviceKey>,
}

/// In-memory USB backend.
///
/// Counts backend calls, supports failure injection per primitive, and allows
/// topology changes between enumerations to simulate hot-plug. Its
/// `service_events` parks on a condition variable until `interrupt` fires,
/// matching a real backend with no pending events.
#[derive(Default)]
pub struct MockBackend {
    topology: Mutex<MockTopology>,
    open_calls: AtomicUsize,
    close_calls: AtomicUsize,
    list_calls: AtomicUsize,
    interrupt_calls: AtomicUsize,
    interrupted: Mutex<bool>,
    wakeup: Condvar,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend pre-populated with `(key, vendor_id, product_id)`
    /// devices.
    pub fn with_devices(devices: &[(u64, u16, u16)]) -> Self {
        let backend = Self::new();
        for &(key, vendor_id, product_id) in devices {
            backend.add_device(key, vendor_id, product_id);
        }
        backend
    }

    fn topology(&self) -> MutexGuard<'_, MockTopology> {
        self.topology.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Plug in a device.
    pub fn add_device(&self, key: u64, vendor_id: u16, product_id: u16) {
        self.topology().devices.push(Arc::new(MockDevice {
            key: DeviceKey(key),
            vendor_id,
            product_id,
        }));
    }

    /// Unplug a device.
    pub fn remove_device(&self, key: DeviceKey) {
        self.topology().devices.retain(|d| d.key != key);
    }

    /// Identity token for the device with `key`. Panics if absent.
    pub fn device(&self, key: DeviceKey) -> MockDeviceRef {
        self.topology()
            .devices
            .iter()
            .find(|d| d.key == key)
            .cloned()
            .unwrap_or_else(|| panic!("no mock device with key {}", key))
    }

    /// Make `list_devices` fail until cleared.
    pub fn set_fail_list(&self, fail: bool) {
        self.topology().fail_list = fail;
    }

    /// Make descriptor reads for `key` fail.
    pub fn fail_descriptor(&self, key: DeviceKey) {
        self.topology().fail_descriptor.insert(key);
    }

    /// Make opens of `key` fail.
    pub fn fail_open(&self, key: DeviceKey) {
        self.topology().fail_open.insert(key);
    }

    /// Number of open attempts (successful or not).
    pub fn open_count(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    /// Number of closed handles.
    pub fn close_count(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Number of device-list queries (successful or not).
    pub fn list_count(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Number of interrupt calls.
    pub fn interrupt_count(&self) -> usize {
        self.interrupt_calls.load(Ordering::SeqCst)
    }
}

impl UsbBackend for MockBackend {
    type DeviceRef = MockDeviceRef;
    type NativeHandle = MockHandle;

    fn list_devices(&self) -> Result<Vec<MockDeviceRef>, BackendError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let topology = self.topology();
        if topology.fail_list {
            return Err(BackendError::Enumerate("simulated list failure".to_string()));
        }
        Ok(topology.devices.clone())
    }

    fn device_key(&self, device: &MockDeviceRef) -> DeviceKey {
        device.key
    }

    fn read_descriptor(&self, device: &MockDeviceRef) -> Result<DeviceDescriptor, BackendError> {
        if self.topology().fail_descriptor.contains(&device.key) {
            return Err(BackendError::Descriptor(
                "simulated descriptor failure".to_string(),
            ));
        }
        Ok(DeviceDescriptor {
            vendor_id: device.vendor_id,
            product_id: device.product_id,
        })
    }

    fn open(&self, device: &MockDeviceRef) -> Result<MockHandle, BackendError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        if self.topology().fail_open.contains(&device.key) {
            return Err(BackendError::Open("simulated open failure".to_string()));
        }
        Ok(MockHandle { key: device.key })
    }

    fn close(&self, handle: MockHandle) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        drop(handle);
    }

    fn service_events(&self) -> Result<(), BackendError> {
        let mut interrupted = self.interrupted.lock().unwrap_or_else(|e| e.into_inner());
        while !*interrupted {
            interrupted = self
                .wakeup
                .wait(interrupted)
                .unwrap_or_else(|e| e.into_inner());
        }
        // Consume the interrupt so the next call parks again
        *interrupted = false;
        Ok(())
    }

    fn interrupt(&self) {
        self.interrupt_calls.fetch_add(1, Ordering::SeqCst);
        *self.interrupted.lock().unwrap_or_else(|e| e.into_inner()) = true;
        self.wakeup.notify_all();
    }
}

/// Broker that answers every request immediately with a fixed decision and
/// records what was asked.
pub struct MockBroker {
    grant: bool,
    requests: Mutex<Vec<(u16, u16, i32)>>,
}

impl MockBroker {
    pub fn granting(grant: bool) -> Self {
        Self {
            grant,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Requests seen so far, as `(vendor_id, product_id, interface_id)`.
    pub fn requests(&self) -> Vec<(u16, u16, i32)> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests().len()
    }
}

impl AccessBroker for MockBroker {
    fn request_access(
        &self,
        vendor_id: u16,
        product_id: u16,
        interface_id: i32,
        on_result: AccessCallback,
    ) {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((vendor_id, product_id, interface_id));
        on_result(self.grant);
    }
}

/// Broker that parks every request until the test resolves it, for driving
/// the awaiting-grant state explicitly.
#[derive(Default)]
pub struct DeferredBroker {
    pending: Mutex<Vec<AccessCallback>>,
}

impl DeferredBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests currently awaiting a decision.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Answer every pending request with `granted`. Each callback fires
    /// exactly once.
    pub fn resolve_all(&self, granted: bool) {
        let pending = std::mem::take(&mut *self.pending.lock().unwrap_or_else(|e| e.into_inner()));
        for on_result in pending {
            on_result(granted);
        }
    }
}

impl AccessBroker for DeferredBroker {
    fn request_access(
        &self,
        _vendor_id: u16,
        _product_id: u16,
        _interface_id: i32,
        on_result: AccessCallback,
    ) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(on_result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_backend_topology_changes() {
        let backend = MockBackend::with_devices(&[(1, 0x1234, 0x5678)]);
        assert_eq!(backend.list_devices().unwrap().len(), 1);

        backend.add_device(2, 0xabcd, 0xef01);
        assert_eq!(backend.list_devices().unwrap().len(), 2);

        backend.remove_device(DeviceKey(1));
        let devices = backend.list_devices().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].key, DeviceKey(2));
    }

    #[test]
    fn test_mock_backend_interrupt_unblocks_service_events() {
        let backend = Arc::new(MockBackend::new());
        let blocked = backend.clone();
        let thread = std::thread::spawn(move || blocked.service_events());

        backend.interrupt();
        assert!(thread.join().unwrap().is_ok());
        assert_eq!(backend.interrupt_count(), 1);
    }

    #[test]
    fn test_mock_broker_records_requests() {
        let broker = MockBroker::granting(true);
        broker.request_access(0x1234, 0x5678, 2, Box::new(|granted| assert!(granted)));

        assert_eq!(broker.requests(), vec![(0x1234, 0x5678, 2)]);
    }

    #[test]
    fn test_deferred_broker_parks_until_resolved() {
        let broker = DeferredBroker::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_in_callback = fired.clone();

        broker.request_access(
            0x1234,
            0x5678,
            0,
            Box::new(move |granted| {
                assert!(!granted);
                fired_in_callback.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert_eq!(broker.pending_count(), 1);
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        broker.resolve_all(false);
        assert_eq!(broker.pending_count(), 0);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
