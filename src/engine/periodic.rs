use crate::containment::contain;
use crate::engine::{MonitoringEngine, WeakEngine};
use log::{debug, warn};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Task that records monitors on a fixed interval while the engine is started
pub trait PeriodicEmitter: Send + Sync {
    fn name(&self) -> &str;

    fn interval(&self) -> Duration;

    fn emit(&self, engine: &MonitoringEngine);
}

/// Running emitter thread with its stop signal
pub(crate) struct EmitterHandle {
    name: String,
    stop: Sender<()>,
    stopped: Receiver<()>,
    thread: Option<JoinHandle<()>>,
}

impl EmitterHandle {
    pub(crate) fn spawn(emitter: Arc<dyn PeriodicEmitter>, engine: WeakEngine) -> Option<Self> {
        let name = emitter.name().to_string();
        let interval = emitter.interval();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (stopped_tx, stopped_rx) = mpsc::channel::<()>();
        let thread_name = name.clone();

        let spawned = thread::Builder::new()
            .name(format!("monitrace-emitter-{}", name))
            .spawn(move || {
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            let Some(engine) = engine.upgrade() else {
                                break;
                            };
                            contain(&thread_name, "emit", || emitter.emit(&engine));
                        }
                        // Stop requested or handle dropped
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                let _ = stopped_tx.send(());
            });

        match spawned {
            Ok(thread) => {
                debug!("Started periodic emitter '{}' every {:?}", name, interval);
                Some(Self {
                    name,
                    stop: stop_tx,
                    stopped: stopped_rx,
                    thread: Some(thread),
                })
            }
            Err(e) => {
                warn!("Failed to start periodic emitter '{}': {}", name, e);
                None
            }
        }
    }

    /// Signal the thread and wait up to `timeout` for it to finish
    ///
    /// Returns false if the emitter was still running when the wait ended.
    pub(crate) fn stop(mut self, timeout: Duration) -> bool {
        let _ = self.stop.send(());
        match self.stopped.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(thread) = self.thread.take() {
                    let _ = thread.join();
                }
                debug!("Stopped periodic emitter '{}'", self.name);
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Periodic emitter '{}' did not stop within {:?}; detaching it",
                    self.name, timeout
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        ticks: AtomicUsize,
        interval: Duration,
        delay: Duration,
    }

    impl PeriodicEmitter for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        fn interval(&self) -> Duration {
            self.interval
        }

        fn emit(&self, _engine: &MonitoringEngine) {
            thread::sleep(self.delay);
            self.ticks.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counter(interval_ms: u64, delay_ms: u64) -> Arc<Counter> {
        Arc::new(Counter {
            ticks: AtomicUsize::new(0),
            interval: Duration::from_millis(interval_ms),
            delay: Duration::from_millis(delay_ms),
        })
    }

    #[test]
    fn test_emitter_ticks_until_stopped() {
        let engine = MonitoringEngine::new();
        let emitter = counter(10, 0);
        let handle = EmitterHandle::spawn(emitter.clone(), engine.downgrade()).unwrap();
        thread::sleep(Duration::from_millis(100));
        assert!(handle.stop(Duration::from_secs(1)));

        let after_stop = emitter.ticks.load(Ordering::SeqCst);
        assert!(after_stop >= 2);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(emitter.ticks.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn test_slow_emitter_is_detached_after_timeout() {
        let engine = MonitoringEngine::new();
        let handle = EmitterHandle::spawn(counter(1, 500), engine.downgrade()).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert!(!handle.stop(Duration::from_millis(20)));
    }

    #[test]
    fn test_emitter_exits_when_engine_is_dropped() {
        let engine = MonitoringEngine::new();
        let emitter = counter(5, 0);
        let handle = EmitterHandle::spawn(emitter.clone(), engine.downgrade()).unwrap();
        drop(engine);
        thread::sleep(Duration::from_millis(30));
        assert!(handle.stop(Duration::from_millis(100)));
        assert_eq!(emitter.ticks.load(Ordering::SeqCst), 0);
    }
}
