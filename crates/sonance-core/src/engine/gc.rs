//! Deferred teardown for retired graphs
//!
//! Dropping a finished graph runs every element's `shutdown`, which may
//! close files, join proxy workers or free large decode buffers. None of
//! that may happen inside a render. Graphs (and sources queued at runtime)
//! therefore cross to the audio side wrapped in `basedrop::Owned`: dropping
//! one there only enqueues a pointer, and the real drop runs wherever the
//! `Collector` lives.
//!
//! Each player owns one [`Reclaimer`]. It either keeps the collector on a
//! background thread that collects periodically, or holds it inline so the
//! host can collect from `Player::pump_once` when no threads are available.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use basedrop::{Collector, Handle};

/// Collection interval of the background thread unless configured
pub const DEFAULT_RECLAIM_INTERVAL: Duration = Duration::from_millis(100);

enum Mode {
    Thread {
        stop: Arc<AtomicBool>,
        thread: Option<JoinHandle<()>>,
    },
    Inline(Collector),
}

/// Owner of the collector that runs deferred drops
pub struct Reclaimer {
    handle: Handle,
    mode: Mode,
}

impl Reclaimer {
    /// Start a collector on its own `audio-gc` thread
    pub fn spawn(interval: Duration) -> std::io::Result<Self> {
        // Channel to send the handle from the GC thread back here
        let (tx, rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();

        let thread = thread::Builder::new()
            .name("audio-gc".to_string())
            .spawn(move || {
                // Collector is !Sync, keep it on this thread
                let mut collector = Collector::new();
                if tx.send(collector.handle()).is_err() {
                    return;
                }
                log::info!("Audio GC thread started");

                while !thread_stop.load(Ordering::Acquire) {
                    collector.collect();
                    thread::park_timeout(interval);
                }
                // final pass for everything retired before shutdown
                collector.collect();
                log::info!("Audio GC thread stopped");
            })?;

        let handle = rx.recv().map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::Other, "audio GC thread exited during startup")
        })?;
        Ok(Self {
            handle,
            mode: Mode::Thread {
                stop,
                thread: Some(thread),
            },
        })
    }

    /// Keep the collector here; drops run only on [`Reclaimer::collect`]
    pub fn inline() -> Self {
        let collector = Collector::new();
        Self {
            handle: collector.handle(),
            mode: Mode::Inline(collector),
        }
    }

    /// Handle for wrapping values in `Owned`
    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    pub fn is_inline(&self) -> bool {
        matches!(self.mode, Mode::Inline(_))
    }

    /// Run pending drops now (inline mode); the thread mode collects on its own
    pub fn collect(&mut self) {
        match &mut self.mode {
            Mode::Inline(collector) => collector.collect(),
            Mode::Thread { thread, .. } => {
                if let Some(thread) = thread {
                    thread.thread().unpark();
                }
            }
        }
    }

    /// Stop the background thread after a final collection
    pub fn shutdown(&mut self) {
        match &mut self.mode {
            Mode::Inline(collector) => collector.collect(),
            Mode::Thread { stop, thread } => {
                stop.store(true, Ordering::Release);
                if let Some(handle) = thread.take() {
                    handle.thread().unpark();
                    if handle.join().is_err() {
                        log::error!("Audio GC thread panicked");
                    }
                }
            }
        }
    }
}

impl Drop for Reclaimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    struct Noisy(Arc<AtomicUsize>);

    impl Drop for Noisy {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_inline_drop_waits_for_collect() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut reclaimer = Reclaimer::inline();
        assert!(reclaimer.is_inline());

        let owned = basedrop::Owned::new(&reclaimer.handle(), Noisy(drops.clone()));
        drop(owned);
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        reclaimer.collect();
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_thread_collects_in_background() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut reclaimer = Reclaimer::spawn(Duration::from_millis(5)).unwrap();
        assert!(!reclaimer.is_inline());

        drop(basedrop::Owned::new(&reclaimer.handle(), Noisy(drops.clone())));
        let deadline = Instant::now() + Duration::from_secs(5);
        while drops.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        reclaimer.shutdown();
    }

    #[test]
    fn test_shutdown_runs_final_collection() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut reclaimer = Reclaimer::spawn(Duration::from_secs(60)).unwrap();
        // give the thread time to park on its long interval
        thread::sleep(Duration::from_millis(20));
        drop(basedrop::Owned::new(&reclaimer.handle(), Noisy(drops.clone())));
        reclaimer.shutdown();
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }
}
