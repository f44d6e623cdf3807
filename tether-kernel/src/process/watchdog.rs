//! Deadline enforcement.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Sender, after, select};

/// A cancellable timer that runs a kill action when it expires.
pub struct Watchdog {
    /// Dropping the sender disarms the timer.
    cancel: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    fired: Arc<AtomicBool>,
}

impl Watchdog {
    pub fn arm<F>(timeout: Duration, on_expiry: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let (cancel, cancelled) = crossbeam_channel::bounded::<()>(1);
        let fired = Arc::new(AtomicBool::new(false));

        let fired_clone = fired.clone();
        let handle = std::thread::Builder::new()
            .name("tether-watchdog".into())
            .spawn(move || {
                select! {
                    recv(cancelled) -> _ => {}
                    recv(after(timeout)) -> _ => {
                        fired_clone.store(true, Ordering::SeqCst);
                        tracing::warn!("deadline of {:?} elapsed, terminating subprocess", timeout);
                        on_expiry();
                    }
                }
            });

        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                // The drivers still check the deadline themselves.
                tracing::error!("failed to start watchdog thread: {}", e);
                None
            }
        };

        Self {
            cancel: Some(cancel),
            handle,
            fired,
        }
    }

    /// Whether the deadline elapsed and the kill action ran.
    pub fn fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Cancel the timer and wait for its thread.
    pub fn disarm(&mut self) {
        self.cancel.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.disarm();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_fires_after_timeout() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let start = Instant::now();
        let watchdog = Watchdog::arm(Duration::from_millis(50), move || {
            let _ = tx.send(Instant::now());
        });

        let fired_at = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(fired_at - start >= Duration::from_millis(50));
        assert!(watchdog.fired());
    }

    #[test]
    fn test_disarm_prevents_firing() {
        let (tx, rx) = crossbeam_channel::bounded::<()>(1);
        let mut watchdog = Watchdog::arm(Duration::from_secs(60), move || {
            let _ = tx.send(());
        });

        let start = Instant::now();
        watchdog.disarm();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(!watchdog.fired());
        // The closure was dropped without running.
        assert!(rx.recv_timeout(Duration::from_millis(20)).is_err());
    }
}
