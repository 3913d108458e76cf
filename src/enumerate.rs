//! Device enumeration
//!
//! Snapshots of the backend's live device list plus vendor/product identity
//! matching. Both operations absorb backend failures: a failed enumeration is
//! transient and yields an empty snapshot, and a device whose descriptor
//! cannot be read is treated as non-matching.

use tracing::warn;

use crate::backend::UsbBackend;

/// Take a snapshot of the backend's current device list.
///
/// Each returned token keeps its device alive independently of the backend's
/// own list buffer. The snapshot is not live: a fresh call is required to
/// observe hot-plug changes.
pub fn snapshot<B: UsbBackend>(backend: &B) -> Vec<B::DeviceRef> {
    match backend.list_devices() {
        Ok(devices) => devices,
        Err(e) => {
            warn!("device enumeration failed: {}", e);
            Vec::new()
        }
    }
}

/// Whether `device` reports exactly the given vendor and product IDs.
pub fn matches<B: UsbBackend>(
    backend: &B,
    device: &B::DeviceRef,
    vendor_id: u16,
    product_id: u16,
) -> bool {
    match backend.read_descriptor(device) {
        Ok(descriptor) => {
            descriptor.vendor_id == vendor_id && descriptor.product_id == product_id
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DeviceKey;
    use crate::test_utils::MockBackend;

    #[test]
    fn test_snapshot_failure_yields_empty_list() {
        let backend = MockBackend::with_devices(&[(1, 0x1234, 0x5678)]);
        backend.set_fail_list(true);

        assert!(snapshot(&backend).is_empty());

        backend.set_fail_list(false);
        assert_eq!(snapshot(&backend).len(), 1);
    }

    #[test]
    fn test_matches_exact_identity_only() {
        let backend = MockBackend::with_devices(&[(1, 0x1234, 0x5678)]);
        let device = backend.device(DeviceKey(1));

        assert!(matches(&backend, &device, 0x1234, 0x5678));
        assert!(!matches(&backend, &device, 0x1234, 0x9999));
        assert!(!matches(&backend, &device, 0x9999, 0x5678));
    }

    #[test]
    fn test_matches_fails_closed_on_descriptor_error() {
        let backend = MockBackend::with_devices(&[(1, 0x1234, 0x5678)]);
        backend.fail_descriptor(DeviceKey(1));
        let device = backend.device(DeviceKey(1));

        assert!(!matches(&backend, &device, 0x1234, 0x5678));
    }
}
