use crate::config::{DispatchConfig, DispatchMode};
use crate::containment::{contain, contain_result};
use crate::engine::RateLimiter;
use crate::lock;
use crate::monitor::Monitor;
use crate::routing::ProcessorFactory;
use log::{debug, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Counters shared by every dispatcher an engine creates
#[derive(Debug, Default)]
pub(crate) struct DispatchCounters {
    submitted: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

impl DispatchCounters {
    pub(crate) fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Dispatch totals since the engine was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    /// Monitors handed to dispatch
    pub submitted: u64,
    /// Monitors dropped because the queue was full or closed
    pub dropped: u64,
    /// Processor calls that returned an error or panicked
    pub failed: u64,
}

/// Route one monitor and invoke each selected processor, isolating failures
fn deliver(factory: &dyn ProcessorFactory, monitor: &Monitor, counters: &DispatchCounters) {
    let processors = contain("processor factory", "processors_for_monitor", || {
        factory.processors_for_monitor(monitor)
    })
    .unwrap_or_default();
    for processor in processors {
        if !contain_result(processor.name(), "process", || processor.process(monitor)) {
            counters.failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Delivers completed monitors to processors
pub(crate) enum Dispatcher {
    /// On the completing thread
    Inline {
        factory: Arc<dyn ProcessorFactory>,
        counters: Arc<DispatchCounters>,
    },
    /// Through a bounded queue served by worker threads
    Background(BackgroundDispatcher),
}

impl Dispatcher {
    pub(crate) fn start(
        config: &DispatchConfig,
        factory: Arc<dyn ProcessorFactory>,
        counters: Arc<DispatchCounters>,
    ) -> Self {
        match config.mode {
            DispatchMode::Inline => Dispatcher::Inline { factory, counters },
            DispatchMode::Background => {
                Dispatcher::Background(BackgroundDispatcher::start(config, factory, counters))
            }
        }
    }

    pub(crate) fn dispatch(&self, monitor: &Monitor) {
        match self {
            Dispatcher::Inline { factory, counters } => {
                counters.submitted.fetch_add(1, Ordering::Relaxed);
                deliver(factory.as_ref(), monitor, counters);
            }
            Dispatcher::Background(background) => background.dispatch(monitor),
        }
    }

    /// Number of queue overflow warnings logged so far
    pub(crate) fn overflow_warnings(&self) -> u64 {
        match self {
            Dispatcher::Inline { .. } => 0,
            Dispatcher::Background(background) => background.warnings.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting work and drain within the configured window
    pub(crate) fn shutdown(&self) {
        if let Dispatcher::Background(background) = self {
            background.shutdown();
        }
    }
}

/// Worker pool fed by a bounded channel
///
/// Producers never block: when the queue is full the monitor is dropped and a
/// rate-limited warning is logged.
pub(crate) struct BackgroundDispatcher {
    sender: RwLock<Option<SyncSender<Monitor>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    finished: Mutex<Receiver<()>>,
    abandon: Arc<AtomicBool>,
    limiter: Mutex<RateLimiter>,
    /// Overflow warnings actually logged
    warnings: AtomicU64,
    counters: Arc<DispatchCounters>,
    drain_timeout: Duration,
}

impl BackgroundDispatcher {
    fn start(
        config: &DispatchConfig,
        factory: Arc<dyn ProcessorFactory>,
        counters: Arc<DispatchCounters>,
    ) -> Self {
        let (sender, receiver) = mpsc::sync_channel::<Monitor>(config.queue_capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        let (finished_tx, finished_rx) = mpsc::channel();
        let abandon = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(config.workers);
        for index in 0..config.workers {
            let receiver = Arc::clone(&receiver);
            let factory = Arc::clone(&factory);
            let counters = Arc::clone(&counters);
            let abandon = Arc::clone(&abandon);
            let finished = finished_tx.clone();
            let spawned = thread::Builder::new()
                .name(format!("monitrace-dispatch-{}", index))
                .spawn(move || {
                    loop {
                        // Hold the receiver lock only while waiting for the next job
                        let job = lock(&receiver).recv();
                        match job {
                            Ok(monitor) => {
                                if abandon.load(Ordering::Acquire) {
                                    continue;
                                }
                                deliver(factory.as_ref(), &monitor, &counters);
                            }
                            Err(_) => break,
                        }
                    }
                    let _ = finished.send(());
                });
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => warn!("Failed to spawn dispatch worker {}: {}", index, e),
            }
        }
        debug!(
            "Background dispatch started with {} worker(s), queue capacity {}",
            workers.len(),
            config.queue_capacity
        );

        Self {
            sender: RwLock::new(Some(sender)),
            workers: Mutex::new(workers),
            finished: Mutex::new(finished_rx),
            abandon,
            limiter: Mutex::new(RateLimiter::new(
                config.overflow_warnings_per_window,
                config.overflow_warning_window(),
            )),
            warnings: AtomicU64::new(0),
            counters,
            drain_timeout: config.drain_timeout(),
        }
    }

    fn dispatch(&self, monitor: &Monitor) {
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        let sender = self.sender.read().unwrap_or_else(PoisonError::into_inner);
        let outcome = match sender.as_ref() {
            Some(sender) => sender.try_send(monitor.clone()),
            None => Err(TrySendError::Disconnected(monitor.clone())),
        };
        drop(sender);

        if let Err(e) = outcome {
            let dropped = self.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            // Never wait on the limiter from a producing thread
            if let Ok(mut limiter) = self.limiter.try_lock() {
                if limiter.try_acquire() {
                    self.warnings.fetch_add(1, Ordering::Relaxed);
                    let reason = match e {
                        TrySendError::Full(_) => "queue full",
                        TrySendError::Disconnected(_) => "dispatcher stopped",
                    };
                    warn!(
                        "Dropped monitor '{}' ({}); {} dropped so far",
                        monitor.name(),
                        reason,
                        dropped
                    );
                }
            }
        }
    }

    fn shutdown(&self) {
        // Closing the channel lets idle workers exit once the queue is empty
        self.sender
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let mut workers = lock(&self.workers);
        let expected = workers.len();
        let deadline = Instant::now() + self.drain_timeout;
        let finished = lock(&self.finished);
        let mut done = 0;
        while done < expected {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match finished.recv_timeout(remaining) {
                Ok(()) => done += 1,
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        if done == expected {
            for handle in workers.drain(..) {
                let _ = handle.join();
            }
            debug!("Background dispatch drained");
        } else {
            self.abandon.store(true, Ordering::Release);
            warn!(
                "Dispatch did not drain within {:?}; abandoning queued monitors ({} of {} workers still busy)",
                self.drain_timeout,
                expected - done,
                expected
            );
            // Detach the stragglers
            workers.clear();
        }
    }
}
