use crate::error::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::info;

/// Background thread that logs a liveness line every `interval` until stopped.
///
/// Stopping happens on [`Heartbeat::stop`] or on drop, so a heartbeat bound to a
/// scope ends on every exit path of that scope, including `?` returns.
pub struct Heartbeat {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    beats: Arc<AtomicU64>,
}

impl Heartbeat {
    pub fn start(interval: Duration) -> Result<Self> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let beats = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&beats);

        let handle = thread::Builder::new()
            .name("heartbeat".into())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        counter.fetch_add(1, Ordering::Relaxed);
                        info!("... still working (heartbeat) ...");
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
            beats,
        })
    }

    /// Number of liveness lines emitted so far.
    #[must_use]
    pub fn beats(&self) -> u64 {
        self.beats.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the thread and wait for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Dropping the sender wakes the thread even mid-wait.
        self.stop_tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.shutdown();
    }
}
