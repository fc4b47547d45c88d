//! # Periodic Background Tasks
//!
//! The WAL flusher, the checkpointer and the garbage collector all share one
//! shape: run a closure every period until told to stop. `PeriodicTask`
//! packages that shape with cooperative shutdown: the worker waits on a
//! condvar with a timeout, so stopping wakes it immediately instead of
//! waiting out the period.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::error;

struct Shared {
    shutdown: Mutex<bool>,
    wake: Condvar,
}

pub struct PeriodicTask {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    /// Runs `tick` every `period` on a dedicated thread until `stop`.
    /// Errors are logged and the loop continues; a tick that must halt the
    /// task should do so through its own channels.
    pub fn spawn<F>(period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> eyre::Result<()> + Send + 'static,
    {
        let shared = Arc::new(Shared {
            shutdown: Mutex::new(false),
            wake: Condvar::new(),
        });
        let worker_shared = Arc::clone(&shared);
        let handle = std::thread::spawn(move || loop {
            {
                let mut shutdown = worker_shared.shutdown.lock();
                if *shutdown {
                    break;
                }
                worker_shared.wake.wait_for(&mut shutdown, period);
                if *shutdown {
                    break;
                }
            }
            if let Err(e) = tick() {
                error!("background task failed: {e:#}");
            }
        });
        Self {
            shared,
            handle: Some(handle),
        }
    }

    /// Signals shutdown and joins the worker.
    pub fn stop(mut self) {
        self.signal_and_join();
    }

    fn signal_and_join(&mut self) {
        *self.shared.shutdown.lock() = true;
        self.shared.wake.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.signal_and_join();
    }
}
