//! Wall-clock epoch advancement.
//!
//! The inline advancer (every `epoch_frequency` retires) stalls when no one
//! retires; a ticker keeps epochs moving so read-mostly workloads still make
//! reclamation progress. The thread stops and is joined when the ticker is
//! dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use super::Engine;

/// Background thread advancing an engine's global epoch at a fixed cadence.
pub struct EpochTicker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EpochTicker {
    /// Spawn a ticker advancing `engine`'s epoch every `period`.
    pub fn spawn(engine: Arc<Engine>, period: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name("ibr-epoch-ticker".into())
            .spawn(move || {
                while !flag.load(Ordering::Relaxed) {
                    std::thread::sleep(period);
                    engine.advance_epoch();
                }
            })
            .expect("failed to spawn the epoch ticker thread");
        Self {
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for EpochTicker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
