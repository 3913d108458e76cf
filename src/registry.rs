//! Device registry
//!
//! Maps platform device identities to opened handles and guarantees at most
//! one open backend handle per physical device, under any number of
//! concurrent callers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::backend::{DeviceKey, UsbBackend};

/// Shared reference to an opened device.
pub type SharedDeviceHandle<B> = Arc<OpenDevice<B>>;

/// An opened device, shared between the registry and any callers.
///
/// The backend handle is closed once the registry has evicted the entry and
/// the last caller reference is dropped, so a caller can never observe a
/// handle whose backing resource was already released.
pub struct OpenDevice<B: UsbBackend> {
    backend: Arc<B>,
    device: B::DeviceRef,
    key: DeviceKey,
    handle: Option<B::NativeHandle>,
}

impl<B: UsbBackend> OpenDevice<B> {
    /// Identity of the underlying device.
    pub fn key(&self) -> DeviceKey {
        self.key
    }

    /// The backend's identity token for this device.
    pub fn device(&self) -> &B::DeviceRef {
        &self.device
    }

    /// The opened backend handle, for transfer operations.
    pub fn native(&self) -> &B::NativeHandle {
        // Some from construction until drop
        self.handle.as_ref().expect("handle present until drop")
    }
}

impl<B: UsbBackend> Drop for OpenDevice<B> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.backend.close(handle);
            debug!("released backend handle for device {}", self.key);
        }
    }
}

/// Registry of opened devices, keyed by platform identity.
pub struct DeviceRegistry<B: UsbBackend> {
    backend: Arc<B>,
    devices: Mutex<HashMap<DeviceKey, SharedDeviceHandle<B>>>,
}

impl<B: UsbBackend> DeviceRegistry<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            devices: Mutex::new(HashMap::new()),
        }
    }

    fn devices(&self) -> MutexGuard<'_, HashMap<DeviceKey, SharedDeviceHandle<B>>> {
        // The map stays consistent even if a holder panicked mid-operation
        self.devices.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Return the tracked handle for `device`, opening it on first use.
    ///
    /// This is the single choke point for opening devices: the map lock is
    /// held across the lookup and the backend open, so concurrent callers for
    /// the same device always converge on one handle. An open failure is
    /// logged and yields `None` without mutating the map.
    pub fn open_or_get(&self, device: &B::DeviceRef) -> Option<SharedDeviceHandle<B>> {
        let key = self.backend.device_key(device);
        let mut devices = self.devices();

        if let Some(existing) = devices.get(&key) {
            return Some(existing.clone());
        }

        let handle = match self.backend.open(device) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("could not open device {}: {}", key, e);
                return None;
            }
        };

        let opened = Arc::new(OpenDevice {
            backend: self.backend.clone(),
            device: device.clone(),
            key,
            handle: Some(handle),
        });
        devices.insert(key, opened.clone());
        debug!("opened device {}", key);
        Some(opened)
    }

    /// Evict `handle` from the registry.
    ///
    /// Closing an untracked device is a caller error: it is logged and the
    /// registry is left unchanged. The tracked entry must also be the same
    /// session as `handle` — a stale handle whose device has since been
    /// closed and reopened by another caller is rejected instead of tearing
    /// down the newer session.
    pub fn close(&self, handle: &SharedDeviceHandle<B>) {
        let key = handle.key();
        let mut devices = self.devices();

        match devices.get(&key) {
            None => {
                warn!("close requested for untracked device {}", key);
            }
            Some(tracked) if !Arc::ptr_eq(tracked, handle) => {
                warn!("close requested with stale handle for device {}", key);
            }
            Some(_) => {
                devices.remove(&key);
                debug!("closed device {}", key);
            }
        }
    }

    /// Whether `key` currently maps to an open handle.
    pub fn contains(&self, key: DeviceKey) -> bool {
        self.devices().contains_key(&key)
    }

    /// Number of tracked open devices.
    pub fn len(&self) -> usize {
        self.devices().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockBackend;

    fn registry_with_devices(devices: &[(u64, u16, u16)]) -> (Arc<MockBackend>, DeviceRegistry<MockBackend>) {
        let backend = Arc::new(MockBackend::with_devices(devices));
        let registry = DeviceRegistry::new(backend.clone());
        (backend, registry)
    }

    #[test]
    fn test_open_or_get_reuses_existing_handle() {
        let (backend, registry) = registry_with_devices(&[(1, 0x1234, 0x5678)]);
        let device = backend.device(DeviceKey(1));

        let first = registry.open_or_get(&device).expect("open should succeed");
        let second = registry.open_or_get(&device).expect("lookup should succeed");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(backend.open_count(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_open_failure_leaves_no_entry() {
        let (backend, registry) = registry_with_devices(&[(1, 0x1234, 0x5678)]);
        backend.fail_open(DeviceKey(1));
        let device = backend.device(DeviceKey(1));

        assert!(registry.open_or_get(&device).is_none());
        assert!(registry.is_empty());
        assert_eq!(backend.open_count(), 1);
    }

    #[test]
    fn test_close_then_reopen_performs_fresh_open() {
        let (backend, registry) = registry_with_devices(&[(1, 0x1234, 0x5678)]);
        let device = backend.device(DeviceKey(1));

        let handle = registry.open_or_get(&device).expect("open should succeed");
        registry.close(&handle);
        assert!(!registry.contains(DeviceKey(1)));
        drop(handle);
        assert_eq!(backend.close_count(), 1);

        let reopened = registry.open_or_get(&device).expect("reopen should succeed");
        assert_eq!(backend.open_count(), 2);
        assert!(registry.contains(reopened.key()));
    }

    #[test]
    fn test_close_untracked_is_a_warned_noop() {
        let (backend, registry) = registry_with_devices(&[(1, 0x1234, 0x5678)]);
        let device = backend.device(DeviceKey(1));

        let handle = registry.open_or_get(&device).expect("open should succeed");
        registry.close(&handle);
        // Second close of the same handle: identity no longer tracked
        registry.close(&handle);

        assert!(registry.is_empty());
        drop(handle);
        assert_eq!(backend.close_count(), 1);
    }

    #[test]
    fn test_close_with_stale_handle_keeps_newer_session() {
        let (backend, registry) = registry_with_devices(&[(1, 0x1234, 0x5678)]);
        let device = backend.device(DeviceKey(1));

        let stale = registry.open_or_get(&device).expect("open should succeed");
        registry.close(&stale);
        let fresh = registry.open_or_get(&device).expect("reopen should succeed");

        // The stale handle must not evict the session opened after it
        registry.close(&stale);
        assert!(registry.contains(DeviceKey(1)));

        registry.close(&fresh);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_open_or_get_opens_once() {
        let (backend, registry) = registry_with_devices(&[(1, 0x1234, 0x5678)]);
        let registry = Arc::new(registry);

        let mut threads = Vec::new();
        for _ in 0..8 {
            let backend = backend.clone();
            let registry = registry.clone();
            threads.push(std::thread::spawn(move || {
                let device = backend.device(DeviceKey(1));
                registry.open_or_get(&device).expect("open should succeed")
            }));
        }

        let handles: Vec<_> = threads
            .into_iter()
            .map(|t| t.join().expect("thread should not panic"))
            .collect();

        assert_eq!(backend.open_count(), 1);
        for handle in &handles[1..] {
            assert!(Arc::ptr_eq(&handles[0], handle));
        }
    }
}
