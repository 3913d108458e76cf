//! USB event pump
//!
//! Dedicated thread that repeatedly services backend I/O events. The blocking
//! event-service primitive has no native cancellation and may park
//! indefinitely when no work is pending, so shutdown is a two-phase protocol:
//! clear the running flag, force the blocked call to return via the backend's
//! interrupt primitive, then join the thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::backend::UsbBackend;
use crate::error::{Error, Result};

/// Background thread servicing backend events until stopped.
///
/// Started at service construction, stopped exactly once at shutdown. After
/// [`stop`](EventPump::stop) returns, the thread has fully exited and no
/// backend call will occur from the pump again.
pub struct EventPump<B: UsbBackend> {
    backend: Arc<B>,
    running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl<B: UsbBackend> EventPump<B> {
    /// Launch the pump thread and wait until its loop is running.
    ///
    /// Blocks the caller on a startup rendezvous, so a returned pump always
    /// has live event servicing behind it.
    pub fn start(backend: Arc<B>) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let (started_tx, started_rx) = mpsc::channel();

        let loop_backend = backend.clone();
        let loop_running = running.clone();
        let thread = thread::Builder::new()
            .name("usb-event-pump".to_string())
            .spawn(move || {
                debug!("event pump started");
                let _ = started_tx.send(());
                while loop_running.load(Ordering::Acquire) {
                    if let Err(e) = loop_backend.service_events() {
                        warn!("error servicing USB events: {}", e);
                        // Back off so a persistently failing backend does not
                        // spin the thread
                        thread::sleep(Duration::from_millis(100));
                    }
                }
                debug!("event pump shutting down");
            })
            .map_err(|e| Error::Thread(format!("failed to spawn event pump: {}", e)))?;

        started_rx
            .recv()
            .map_err(|_| Error::Thread("event pump exited before signaling startup".to_string()))?;

        Ok(Self {
            backend,
            running,
            thread: Some(thread),
        })
    }

    /// Stop the pump and wait for the thread to exit.
    ///
    /// The flag store alone cannot unpark a blocked event-service call, so it
    /// is followed by an explicit interrupt before the join. Safe to call at
    /// most once; later calls are no-ops.
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.running.store(false, Ordering::Release);
        self.backend.interrupt();
        if thread.join().is_err() {
            warn!("event pump thread panicked");
        }
    }

    /// Whether the pump thread is still running.
    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }
}

impl<B: UsbBackend> Drop for EventPump<B> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockBackend;

    #[test]
    fn test_start_then_immediate_stop_returns() {
        // The mock's service_events parks until interrupted, matching a
        // backend with zero pending events.
        let backend = Arc::new(MockBackend::new());
        let mut pump = EventPump::start(backend).expect("pump should start");

        assert!(pump.is_running());
        pump.stop();
        assert!(!pump.is_running());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let backend = Arc::new(MockBackend::new());
        let mut pump = EventPump::start(backend).expect("pump should start");

        pump.stop();
        pump.stop();
        assert!(!pump.is_running());
    }

    #[test]
    fn test_drop_without_stop_joins_thread() {
        let backend = Arc::new(MockBackend::new());
        let pump = EventPump::start(backend.clone()).expect("pump should start");

        drop(pump);
        // The interrupt flag was consumed by the exiting pump loop
        assert!(backend.interrupt_count() >= 1);
    }
}
