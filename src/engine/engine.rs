use crate::attributes::{AttributeValue, Value};
use crate::config::{DispatchConfig, EngineConfig, PathConfig};
use crate::containment::{contain, contain_result};
use crate::decompose::{Decomposed, DecomposedGraph, Decomposer, ReflectiveDecomposer};
use crate::engine::dispatch::{DispatchCounters, DispatchStats, Dispatcher};
use crate::engine::periodic::{EmitterHandle, PeriodicEmitter};
use crate::engine::LevelOverrides;
use crate::error::{ConfigError, DecomposeError};
use crate::level::Level;
use crate::lock;
use crate::monitor::Monitor;
use crate::path::{LevelGatedStrategy, PathStrategy};
use crate::routing::{GroupedProcessorFactory, ProcessorFactory, ProcessorRegistry};
use arc_swap::ArcSwapOption;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};

/// Engine lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineState {
    Unstarted,
    Started,
    Stopped,
}

/// Collaborators in use between a startup and the matching shutdown
struct Runtime {
    strategy: Arc<dyn PathStrategy>,
    factory: Arc<dyn ProcessorFactory>,
    decomposer: Arc<dyn Decomposer>,
    dispatcher: Dispatcher,
}

/// Settings and collaborators picked up by the next startup
struct Pending {
    strategy: Option<Arc<dyn PathStrategy>>,
    factory: Option<Arc<dyn ProcessorFactory>>,
    decomposer: Arc<dyn Decomposer>,
    emitters: Vec<Arc<dyn PeriodicEmitter>>,
    dispatch: DispatchConfig,
    path: PathConfig,
    shutdown_timeout: Duration,
}

impl Default for Pending {
    fn default() -> Self {
        let config = EngineConfig::default();
        Self {
            strategy: None,
            factory: None,
            decomposer: Arc::new(ReflectiveDecomposer::new()),
            emitters: Vec::new(),
            dispatch: config.dispatch.clone(),
            path: config.path.clone(),
            shutdown_timeout: config.shutdown_timeout(),
        }
    }
}

struct EngineInner {
    state: Mutex<EngineState>,
    // Serializes startup and shutdown without blocking state() readers
    lifecycle: Mutex<()>,
    enabled: AtomicBool,
    runtime: ArcSwapOption<Runtime>,
    pending: Mutex<Pending>,
    emitters: Mutex<Vec<EmitterHandle>>,
    monitor_levels: Arc<LevelOverrides>,
    processor_levels: Arc<LevelOverrides>,
    counters: Arc<DispatchCounters>,
}

/// The instrumentation runtime
///
/// Cloning yields another handle to the same engine. Instrumented code only
/// ever calls into the engine through monitors; every collaborator call made
/// on its behalf is isolated, so a failing strategy, factory or processor is
/// logged and skipped instead of reaching the caller.
#[derive(Clone)]
pub struct MonitoringEngine {
    inner: Arc<EngineInner>,
}

/// Non-owning engine handle held by monitors and emitter threads
#[derive(Clone)]
pub struct WeakEngine {
    inner: Weak<EngineInner>,
}

impl WeakEngine {
    /// The engine, if it has not been dropped
    pub fn upgrade(&self) -> Option<MonitoringEngine> {
        self.inner.upgrade().map(|inner| MonitoringEngine { inner })
    }
}

impl fmt::Debug for WeakEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakEngine")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl Default for MonitoringEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitoringEngine {
    /// Create an unstarted engine with default configuration
    ///
    /// Until [`startup`](Self::startup) runs, monitors can be created and
    /// completed but nothing is tracked or dispatched.
    ///
    /// # Example
    /// ```
    /// use monitrace::{MonitoringEngine, TransactionMonitor};
    ///
    /// let engine = MonitoringEngine::new();
    /// engine.startup();
    /// let request = TransactionMonitor::new(&engine, "request");
    /// request.succeeded();
    /// request.done();
    /// engine.shutdown();
    /// ```
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EngineInner {
                state: Mutex::new(EngineState::Unstarted),
                lifecycle: Mutex::new(()),
                enabled: AtomicBool::new(true),
                runtime: ArcSwapOption::empty(),
                pending: Mutex::new(Pending::default()),
                emitters: Mutex::new(Vec::new()),
                monitor_levels: Arc::new(LevelOverrides::new()),
                processor_levels: Arc::new(LevelOverrides::new()),
                counters: Arc::new(DispatchCounters::default()),
            }),
        }
    }

    /// Create an unstarted engine from configuration without routing groups
    ///
    /// # Errors
    ///
    /// Fails validation, or with `ConfigError::UnknownProcessor` when the
    /// configuration declares groups, since no processors are registered.
    pub fn from_config(config: &EngineConfig) -> Result<Self, ConfigError> {
        Self::from_config_with_registry(config, &ProcessorRegistry::new())
    }

    /// Create an unstarted engine, resolving `[[groups]]` processors in `registry`
    ///
    /// # Arguments
    ///
    /// * `config` - Validated before anything is applied
    /// * `registry` - Processors that `[[groups]]` entries refer to by name
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` for unusable values and
    /// `ConfigError::UnknownProcessor` when a group names a processor missing
    /// from `registry`.
    pub fn from_config_with_registry(
        config: &EngineConfig,
        registry: &ProcessorRegistry,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let engine = Self::new();
        engine
            .inner
            .enabled
            .store(config.monitoring_enabled, Ordering::Release);
        engine
            .inner
            .monitor_levels
            .replace(config.monitor_levels.clone());
        engine
            .inner
            .processor_levels
            .replace(config.processor_levels.clone());

        {
            let mut pending = lock(&engine.inner.pending);
            pending.dispatch = config.dispatch.clone();
            pending.path = config.path.clone();
            pending.shutdown_timeout = config.shutdown_timeout();
            if !config.groups.is_empty() {
                let factory = GroupedProcessorFactory::from_config(
                    &config.groups,
                    registry,
                    Arc::clone(&engine.inner.processor_levels),
                )?;
                pending.factory = Some(Arc::new(factory));
            }
        }
        debug!(
            "Engine configured: {} group(s), {} monitor level override(s), dispatch {:?}",
            config.groups.len(),
            config.monitor_levels.len(),
            config.dispatch.mode
        );
        Ok(engine)
    }

    /// Handle that does not keep the engine alive
    pub fn downgrade(&self) -> WeakEngine {
        WeakEngine {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn state(&self) -> EngineState {
        *lock(&self.inner.state)
    }

    fn set_state(&self, state: EngineState) {
        *lock(&self.inner.state) = state;
    }

    /// Start the engine; does nothing if it is already started
    ///
    /// A stopped engine can be started again. Collaborators injected since the
    /// last startup take effect here.
    pub fn startup(&self) {
        let _lifecycle = lock(&self.inner.lifecycle);
        if self.state() == EngineState::Started {
            debug!("Engine already started");
            return;
        }

        let (strategy, factory, decomposer, dispatch, emitters) = {
            let pending = lock(&self.inner.pending);
            let strategy = match &pending.strategy {
                Some(strategy) => Arc::clone(strategy),
                None => build_strategy(&pending.path),
            };
            let factory: Arc<dyn ProcessorFactory> = match &pending.factory {
                Some(factory) => Arc::clone(factory),
                None => Arc::new(GroupedProcessorFactory::new(Arc::clone(
                    &self.inner.processor_levels,
                ))),
            };
            (
                strategy,
                factory,
                Arc::clone(&pending.decomposer),
                pending.dispatch.clone(),
                pending.emitters.clone(),
            )
        };

        contain("path strategy", "startup", || strategy.startup());
        contain("processor factory", "startup", || factory.startup());
        let dispatcher = Dispatcher::start(
            &dispatch,
            Arc::clone(&factory),
            Arc::clone(&self.inner.counters),
        );
        self.inner.runtime.store(Some(Arc::new(Runtime {
            strategy,
            factory,
            decomposer,
            dispatcher,
        })));

        let handles: Vec<EmitterHandle> = emitters
            .into_iter()
            .filter_map(|emitter| EmitterHandle::spawn(emitter, self.downgrade()))
            .collect();
        let emitter_count = handles.len();
        lock(&self.inner.emitters).extend(handles);

        self.set_state(EngineState::Started);
        info!(
            "Monitoring engine started ({:?} dispatch, {} periodic emitter(s))",
            dispatch.mode, emitter_count
        );
    }

    /// Stop the engine
    ///
    /// Queued monitors are drained within the dispatch drain window and
    /// processor shutdown is bounded by the shutdown timeout, so this returns
    /// and the state reaches `Stopped` even when a processor hangs.
    pub fn shutdown(&self) {
        let _lifecycle = lock(&self.inner.lifecycle);
        if self.state() != EngineState::Started {
            debug!("Engine not started, nothing to shut down");
            return;
        }
        let timeout = lock(&self.inner.pending).shutdown_timeout;
        let deadline = Instant::now() + timeout;

        let runtime = self.inner.runtime.swap(None);

        if let Some(runtime) = &runtime {
            runtime.dispatcher.shutdown();
        }

        let handles: Vec<EmitterHandle> = lock(&self.inner.emitters).drain(..).collect();
        for handle in handles {
            handle.stop(deadline.saturating_duration_since(Instant::now()));
        }

        if let Some(runtime) = runtime {
            contain("path strategy", "shutdown", || runtime.strategy.shutdown());
            shutdown_factory(
                Arc::clone(&runtime.factory),
                deadline.saturating_duration_since(Instant::now()),
            );
        }

        self.set_state(EngineState::Stopped);
        info!("Monitoring engine stopped");
    }

    /// Shut down, then start with the collaborators currently configured
    pub fn restart(&self) {
        info!("Restarting monitoring engine");
        self.shutdown();
        self.startup();
    }

    /// Global switch, effective immediately
    ///
    /// While disabled, new monitors reach neither the path strategy nor any
    /// processor. Composites opened before disabling still leave the path
    /// when they complete.
    pub fn set_monitoring_enabled(&self, enabled: bool) {
        let previous = self.inner.enabled.swap(enabled, Ordering::AcqRel);
        if previous != enabled {
            info!(
                "Monitoring {}",
                if enabled { "enabled" } else { "disabled" }
            );
        }
    }

    pub fn is_monitoring_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    fn runtime(&self) -> Option<Arc<Runtime>> {
        self.inner.runtime.load_full()
    }

    /// Runtime to notify, or None when stopped or disabled
    fn active(&self) -> Option<Arc<Runtime>> {
        if !self.is_monitoring_enabled() {
            return None;
        }
        self.runtime()
    }

    pub(crate) fn monitor_level_override(&self, name: &str) -> Option<Level> {
        self.inner.monitor_levels.resolve(name)
    }

    pub(crate) fn monitor_created(&self, monitor: &Monitor) {
        let Some(runtime) = self.active() else {
            return;
        };
        contain("path strategy", "monitor_created", || {
            runtime.strategy.monitor_created(monitor)
        });
        let processors = contain("processor factory", "processors_for_monitor", || {
            runtime.factory.processors_for_monitor(monitor)
        })
        .unwrap_or_default();
        for processor in processors {
            contain_result(processor.name(), "monitor_created", || {
                processor.monitor_created(monitor)
            });
        }
    }

    pub(crate) fn monitor_started(&self, monitor: &Monitor) {
        let Some(runtime) = self.active() else {
            return;
        };
        if monitor.is_composite() {
            contain("path strategy", "composite_monitor_started", || {
                runtime.strategy.composite_monitor_started(monitor)
            });
        }
        let processors = contain("processor factory", "processors_for_monitor", || {
            runtime.factory.processors_for_monitor(monitor)
        })
        .unwrap_or_default();
        for processor in processors {
            contain_result(processor.name(), "monitor_started", || {
                processor.monitor_started(monitor)
            });
        }
    }

    /// Link a completed monitor into its path and hand it to dispatch
    ///
    /// A composite is always popped from the path, even while monitoring is
    /// disabled, so a frame opened before disabling cannot outlive it.
    pub(crate) fn process(&self, monitor: &Monitor) {
        let Some(runtime) = self.runtime() else {
            return;
        };
        if monitor.is_composite() {
            contain("path strategy", "composite_monitor_completed", || {
                runtime.strategy.composite_monitor_completed(monitor)
            });
            if !self.is_monitoring_enabled() {
                return;
            }
        } else {
            if !self.is_monitoring_enabled() {
                return;
            }
            contain("path strategy", "monitor_processed", || {
                runtime.strategy.monitor_processed(monitor)
            });
        }
        runtime.dispatcher.dispatch(monitor);
    }

    pub(crate) fn set_inheritable(&self, monitor: &Monitor, key: &str, holder: &AttributeValue) {
        let Some(runtime) = self.active() else {
            return;
        };
        contain("path strategy", "set_inheritable", || {
            runtime.strategy.set_inheritable(monitor, key, holder)
        });
    }

    /// Force the level of monitors whose name starts with `prefix`
    pub fn add_monitor_level(&self, prefix: &str, level: Level) {
        self.inner.monitor_levels.set(prefix, level);
    }

    /// Remove a monitor override, returning the level it held
    pub fn remove_monitor_level(&self, prefix: &str) -> Option<Level> {
        self.inner.monitor_levels.remove(prefix)
    }

    pub fn monitor_levels(&self) -> BTreeMap<String, Level> {
        self.inner.monitor_levels.snapshot()
    }

    /// Raise the threshold of processors whose name starts with `prefix`
    pub fn add_processor_level(&self, prefix: &str, level: Level) {
        self.inner.processor_levels.set(prefix, level);
    }

    /// Remove a processor override, returning the level it held
    pub fn remove_processor_level(&self, prefix: &str) -> Option<Level> {
        self.inner.processor_levels.remove(prefix)
    }

    pub fn processor_levels(&self) -> BTreeMap<String, Level> {
        self.inner.processor_levels.snapshot()
    }

    /// Shared overrides for factories built outside the engine
    pub fn processor_level_overrides(&self) -> Arc<LevelOverrides> {
        Arc::clone(&self.inner.processor_levels)
    }

    /// Use `strategy` from the next startup on
    pub fn set_path_strategy(&self, strategy: Arc<dyn PathStrategy>) {
        lock(&self.inner.pending).strategy = Some(strategy);
    }

    /// Use `factory` from the next startup on
    pub fn set_processor_factory(&self, factory: Arc<dyn ProcessorFactory>) {
        lock(&self.inner.pending).factory = Some(factory);
    }

    /// Use `decomposer` from the next startup on
    pub fn set_decomposer(&self, decomposer: Arc<dyn Decomposer>) {
        lock(&self.inner.pending).decomposer = decomposer;
    }

    /// Run `emitter` while the engine is started, beginning with the next startup
    pub fn add_periodic_emitter(&self, emitter: Arc<dyn PeriodicEmitter>) {
        lock(&self.inner.pending).emitters.push(emitter);
    }

    /// Innermost open composite on the calling path with the given name
    pub fn composite_monitor_named(&self, name: &str) -> Option<Monitor> {
        let runtime = self.runtime()?;
        contain("path strategy", "composite_monitor_named", || {
            runtime.strategy.composite_monitor_named(name)
        })
        .flatten()
    }

    /// Attributes a monitor created now on the calling path would inherit
    pub fn inheritable_attributes(&self) -> HashMap<String, AttributeValue> {
        let Some(runtime) = self.runtime() else {
            return HashMap::new();
        };
        contain("path strategy", "inheritable_attributes", || {
            runtime.strategy.inheritable_attributes()
        })
        .unwrap_or_default()
    }

    /// Drop the open composites of the calling path
    ///
    /// # Returns
    ///
    /// The number of composites removed; 0 when the engine is not started.
    pub fn clear_current_thread(&self) -> usize {
        let Some(runtime) = self.runtime() else {
            return 0;
        };
        let cleared = contain("path strategy", "clear_current_thread", || {
            runtime.strategy.clear_current_thread()
        })
        .unwrap_or(0);
        if cleared > 0 {
            debug!("Cleared {} open monitor(s) from the current path", cleared);
        }
        cleared
    }

    /// Decomposer of the running engine, or the one the next startup will use
    pub fn decomposer(&self) -> Arc<dyn Decomposer> {
        match self.runtime() {
            Some(runtime) => Arc::clone(&runtime.decomposer),
            None => Arc::clone(&lock(&self.inner.pending).decomposer),
        }
    }

    /// Decompose `value` with the current decomposer
    ///
    /// A panicking decomposer yields a null graph carrying one failure.
    pub fn decompose(&self, value: &Value) -> DecomposedGraph {
        let decomposer = self.decomposer();
        contain("decomposer", "decompose", || decomposer.decompose(value)).unwrap_or_else(|| {
            DecomposedGraph::new(
                Decomposed::Null,
                Vec::new(),
                vec![DecomposeError::Inspection {
                    type_name: value.kind().name().to_string(),
                    reason: "decomposer panicked".to_string(),
                }],
            )
        })
    }

    /// Totals across every startup of this engine
    pub fn dispatch_stats(&self) -> DispatchStats {
        self.inner.counters.snapshot()
    }
}

impl fmt::Debug for MonitoringEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitoringEngine")
            .field("state", &self.state())
            .field("enabled", &self.is_monitoring_enabled())
            .field("stats", &self.dispatch_stats())
            .finish()
    }
}

/// Configured strategy, gated when the event pattern level is above debug
fn build_strategy(path: &PathConfig) -> Arc<dyn PathStrategy> {
    let strategy = path.strategy.build();
    if path.event_pattern_level > Level::Debug {
        Arc::new(LevelGatedStrategy::new(strategy, path.event_pattern_level))
    } else {
        Arc::from(strategy)
    }
}

/// Run factory shutdown on a helper thread and wait at most `timeout`
fn shutdown_factory(factory: Arc<dyn ProcessorFactory>, timeout: Duration) {
    let (done_tx, done_rx) = mpsc::channel::<()>();
    let worker_factory = Arc::clone(&factory);
    let spawned = thread::Builder::new()
        .name("monitrace-shutdown".to_string())
        .spawn(move || {
            contain("processor factory", "shutdown", || worker_factory.shutdown());
            let _ = done_tx.send(());
        });

    match spawned {
        Ok(_) => {
            if done_rx.recv_timeout(timeout).is_err() {
                warn!(
                    "Processor shutdown did not finish within {:?}; continuing without it",
                    timeout
                );
            }
        }
        Err(e) => {
            warn!("Failed to spawn shutdown thread ({}); shutting processors down inline", e);
            contain("processor factory", "shutdown", || factory.shutdown());
        }
    }
}
