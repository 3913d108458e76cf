//! Access broker gate
//!
//! Some platforms mediate hardware access through an external broker that
//! must grant permission before a filtered device lookup may touch the USB
//! stack. The gate is a constructor-injected capability so the request flow
//! is identical everywhere: platforms without a broker use
//! [`AutoGrantBroker`], which grants synchronously.

/// Completion callback for an access request. Invoked exactly once.
pub type AccessCallback = Box<dyn FnOnce(bool) + Send + 'static>;

/// Asynchronous access-grant oracle.
pub trait AccessBroker: Send + Sync + 'static {
    /// Request access to devices matching `vendor_id`/`product_id` on
    /// `interface_id`.
    ///
    /// Fire-and-forget: `on_result` must be invoked exactly once, with `true`
    /// when access is granted. The call itself must not block on the broker's
    /// decision.
    fn request_access(
        &self,
        vendor_id: u16,
        product_id: u16,
        interface_id: i32,
        on_result: AccessCallback,
    );
}

/// Broker for platforms without mediated access: every request is granted
/// immediately on the calling thread.
pub struct AutoGrantBroker;

impl AccessBroker for AutoGrantBroker {
    fn request_access(
        &self,
        _vendor_id: u16,
        _product_id: u16,
        _interface_id: i32,
        on_result: AccessCallback,
    ) {
        on_result(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_auto_grant_fires_callback_once_with_grant() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_callback = calls.clone();

        AutoGrantBroker.request_access(
            0x1234,
            0x5678,
            0,
            Box::new(move |granted| {
                assert!(granted);
                calls_in_callback.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
