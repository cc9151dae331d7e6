use crate::attributes::{sanitize_name, AttributeMap, AttributeValue, Timestamp, Value};
use crate::decompose::{DecomposedGraph, Decomposer, ReflectiveDecomposer};
use crate::engine::{MonitoringEngine, WeakEngine};
use crate::error::AttributeError;
use crate::level::Level;
use crate::lock;
use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

static NEXT_MONITOR_ID: AtomicU64 = AtomicU64::new(1);

/// What a monitor records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorKind {
    Event,
    Transaction,
    Value,
}

impl MonitorKind {
    /// Composite monitors own children and take part in path tracking
    pub fn is_composite(self) -> bool {
        matches!(self, MonitorKind::Transaction)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MonitorKind::Event => "event",
            MonitorKind::Transaction => "transaction",
            MonitorKind::Value => "value",
        }
    }
}

#[derive(Default)]
struct CompositeState {
    children: Vec<Monitor>,
    /// Inheritable attributes visible from the path when this monitor started
    inherited: HashMap<String, AttributeValue>,
    inheritable_keys: BTreeSet<String>,
}

struct MonitorInner {
    id: u64,
    kind: MonitorKind,
    name: String,
    created_at: Timestamp,
    started: Instant,
    level: AtomicU8,
    attributes: Mutex<AttributeMap>,
    composite: Option<Mutex<CompositeState>>,
    completed: AtomicBool,
    engine: WeakEngine,
}

/// Shared handle to a recorded unit of work
///
/// Clones refer to the same monitor. Attribute writes keep working whether or
/// not the owning engine is started; an idle engine simply records nothing.
#[derive(Clone)]
pub struct Monitor {
    inner: Arc<MonitorInner>,
}

impl Monitor {
    /// Build a monitor and announce it to the engine
    pub(crate) fn create(
        engine: &MonitoringEngine,
        kind: MonitorKind,
        name: &str,
        level: Level,
    ) -> Self {
        let name = sanitize_name(name);
        let level = engine.monitor_level_override(&name).unwrap_or(level);
        let created_at = Utc::now();

        // Keys below are static and always valid; they are locked so no
        // later write can disagree with the monitor's identity.
        let mut attributes = AttributeMap::new();
        let _ = attributes.set_holder("name", AttributeValue::new(name.as_str()).locked());
        let _ = attributes.set_holder("createdAt", AttributeValue::new(created_at).locked());
        if let Some(thread_name) = std::thread::current().name() {
            let _ = attributes.set_holder("threadName", AttributeValue::new(thread_name).locked());
        }

        let monitor = Monitor {
            inner: Arc::new(MonitorInner {
                id: NEXT_MONITOR_ID.fetch_add(1, Ordering::Relaxed),
                kind,
                name,
                created_at,
                started: Instant::now(),
                level: AtomicU8::new(level.as_u8()),
                attributes: Mutex::new(attributes),
                composite: kind
                    .is_composite()
                    .then(|| Mutex::new(CompositeState::default())),
                completed: AtomicBool::new(false),
                engine: engine.downgrade(),
            }),
        };
        engine.monitor_created(&monitor);
        monitor
    }

    fn engine(&self) -> Option<MonitoringEngine> {
        self.inner.engine.upgrade()
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn kind(&self) -> MonitorKind {
        self.inner.kind
    }

    /// Sanitized name given at construction
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn level(&self) -> Level {
        Level::from_u8(self.inner.level.load(Ordering::Relaxed))
    }

    pub fn set_level(&self, level: Level) {
        self.inner.level.store(level.as_u8(), Ordering::Relaxed);
    }

    pub fn created_at(&self) -> Timestamp {
        self.inner.created_at
    }

    /// Time since construction
    pub fn elapsed(&self) -> Duration {
        self.inner.started.elapsed()
    }

    pub fn is_composite(&self) -> bool {
        self.inner.composite.is_some()
    }

    pub fn is_completed(&self) -> bool {
        self.inner.completed.load(Ordering::Acquire)
    }

    /// True when both handles refer to the same monitor
    pub fn ptr_eq(&self, other: &Monitor) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<AttributeValue, AttributeError> {
        lock(&self.inner.attributes).set(key, value)
    }

    /// Set and lock in one step; later writes to `key` are ignored
    pub fn set_locked(
        &self,
        key: &str,
        value: impl Into<Value>,
    ) -> Result<AttributeValue, AttributeError> {
        lock(&self.inner.attributes).set_holder(key, AttributeValue::new(value).locked())
    }

    pub fn set_holder(
        &self,
        key: &str,
        holder: AttributeValue,
    ) -> Result<AttributeValue, AttributeError> {
        lock(&self.inner.attributes).set_holder(key, holder)
    }

    /// Set an attribute that monitors started beneath this one will inherit
    ///
    /// Only composite monitors carry inheritable attributes. Children that
    /// already started do not see the new value.
    pub fn set_inheritable(
        &self,
        key: &str,
        value: impl Into<Value>,
    ) -> Result<AttributeValue, AttributeError> {
        let composite = self
            .inner
            .composite
            .as_ref()
            .ok_or_else(|| AttributeError::NotComposite(self.name().to_string()))?;
        let holder = self.set(key, value)?;
        lock(composite).inheritable_keys.insert(key.to_string());
        if let Some(engine) = self.engine() {
            engine.set_inheritable(self, key, &holder);
        }
        Ok(holder)
    }

    pub fn set_serializable(&self, key: &str, serializable: bool) -> Result<(), AttributeError> {
        lock(&self.inner.attributes).set_serializable(key, serializable)
    }

    pub fn lock(&self, key: &str) -> Result<(), AttributeError> {
        lock(&self.inner.attributes).lock(key)
    }

    pub fn get(&self, key: &str) -> Option<AttributeValue> {
        lock(&self.inner.attributes).get(key).cloned()
    }

    pub fn value(&self, key: &str) -> Option<Value> {
        lock(&self.inner.attributes).value(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        lock(&self.inner.attributes).contains(key)
    }

    pub fn get_string(&self, key: &str) -> Result<String, AttributeError> {
        lock(&self.inner.attributes).get_str(key).map(str::to_string)
    }

    pub fn get_i64(&self, key: &str) -> Result<i64, AttributeError> {
        lock(&self.inner.attributes).get_i64(key)
    }

    pub fn get_f64(&self, key: &str) -> Result<f64, AttributeError> {
        lock(&self.inner.attributes).get_f64(key)
    }

    pub fn get_bool(&self, key: &str) -> Result<bool, AttributeError> {
        lock(&self.inner.attributes).get_bool(key)
    }

    pub fn get_timestamp(&self, key: &str) -> Result<Timestamp, AttributeError> {
        lock(&self.inner.attributes).get_timestamp(key)
    }

    /// Run `f` against the live attributes without copying them
    ///
    /// The attribute lock is held for the duration of `f`, which must not
    /// touch this monitor.
    pub(crate) fn with_attributes<R>(&self, f: impl FnOnce(&AttributeMap) -> R) -> R {
        f(&lock(&self.inner.attributes))
    }

    /// Snapshot of all attributes
    pub fn attributes(&self) -> AttributeMap {
        lock(&self.inner.attributes).clone()
    }

    /// Snapshot of the attributes flagged serializable
    pub fn serializable_attributes(&self) -> AttributeMap {
        lock(&self.inner.attributes)
            .iter()
            .filter(|(_, holder)| holder.is_serializable())
            .map(|(key, holder)| (key.clone(), holder.clone()))
            .collect()
    }

    /// Inherited view merged with this monitor's own inheritable attributes
    ///
    /// Own values win over inherited ones. Leaves return an empty map.
    pub fn inheritable_attributes(&self) -> HashMap<String, AttributeValue> {
        let Some(composite) = &self.inner.composite else {
            return HashMap::new();
        };
        let mut merged = lock(composite).inherited.clone();
        merged.extend(self.own_inheritable());
        merged
    }

    /// Children attached by the path strategy, in start order
    pub fn children(&self) -> Vec<Monitor> {
        match &self.inner.composite {
            Some(composite) => lock(composite).children.clone(),
            None => Vec::new(),
        }
    }

    /// Render the subtree as `name[child, child]`
    pub fn render_tree(&self) -> String {
        let children = self.children();
        if children.is_empty() {
            return self.name().to_string();
        }
        let rendered: Vec<String> = children.iter().map(Monitor::render_tree).collect();
        format!("{}[{}]", self.name(), rendered.join(", "))
    }

    /// Decompose every attribute value with the engine's decomposer
    pub fn decomposed_attributes(&self) -> BTreeMap<String, DecomposedGraph> {
        let attributes = self.attributes();
        let decomposer: Arc<dyn Decomposer> = match self.engine() {
            Some(engine) => engine.decomposer(),
            None => Arc::new(ReflectiveDecomposer::new()),
        };
        attributes
            .iter()
            .map(|(key, holder)| (key.clone(), decomposer.decompose(holder.value())))
            .collect()
    }

    /// Mark completed and hand to the engine; later calls do nothing
    pub(crate) fn complete(&self) -> bool {
        if self.inner.completed.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Some(engine) = self.engine() {
            engine.process(self);
        }
        true
    }

    pub(crate) fn announce_started(&self) {
        if let Some(engine) = self.engine() {
            engine.monitor_started(self);
        }
    }

    pub(crate) fn add_child(&self, child: &Monitor) {
        if let Some(composite) = &self.inner.composite {
            let mut state = lock(composite);
            if !state.children.iter().any(|c| c.ptr_eq(child)) {
                state.children.push(child.clone());
            }
        }
    }

    pub(crate) fn set_inherited(&self, inherited: HashMap<String, AttributeValue>) {
        if let Some(composite) = &self.inner.composite {
            lock(composite).inherited = inherited;
        }
    }

    /// This monitor's own inheritable attributes, excluding inherited ones
    pub(crate) fn own_inheritable(&self) -> HashMap<String, AttributeValue> {
        let Some(composite) = &self.inner.composite else {
            return HashMap::new();
        };
        let keys = lock(composite).inheritable_keys.clone();
        let attributes = lock(&self.inner.attributes);
        keys.into_iter()
            .filter_map(|key| attributes.get(&key).cloned().map(|holder| (key, holder)))
            .collect()
    }

    /// Copy inherited attributes in without replacing keys already present
    pub(crate) fn apply_inherited(&self, inherited: &HashMap<String, AttributeValue>) {
        let mut attributes = lock(&self.inner.attributes);
        for (key, holder) in inherited {
            if !attributes.contains(key) {
                let _ = attributes.set_holder(key, holder.clone());
            }
        }
    }
}

impl fmt::Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .field("name", &self.name())
            .field("level", &self.level())
            .field("completed", &self.is_completed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> MonitoringEngine {
        let engine = MonitoringEngine::new();
        engine.startup();
        engine
    }

    #[test]
    fn test_construction_sets_standard_attributes() {
        let engine = engine();
        let monitor = Monitor::create(&engine, MonitorKind::Event, "user login!", Level::Info);
        assert_eq!(monitor.name(), "userlogin");
        assert_eq!(monitor.get_string("name").unwrap(), "userlogin");
        assert!(monitor.get_timestamp("createdAt").is_ok());
        assert_eq!(monitor.level(), Level::Info);
        assert!(!monitor.is_composite());
    }

    #[test]
    fn test_standard_attributes_cannot_be_overwritten() {
        let engine = engine();
        let monitor = Monitor::create(&engine, MonitorKind::Event, "checkout", Level::Info);
        let created = monitor.get_timestamp("createdAt").unwrap();

        let kept = monitor.set("name", "spoofed").unwrap();
        assert_eq!(kept.value(), &Value::from("checkout"));
        monitor.set("createdAt", 0).unwrap();

        assert_eq!(monitor.get_string("name").unwrap(), monitor.name());
        assert_eq!(monitor.get_timestamp("createdAt").unwrap(), created);
        assert!(monitor.attributes().get("name").unwrap().is_locked());
    }

    #[test]
    fn test_thread_name_recorded_for_named_threads() {
        let engine = engine();
        let handle = std::thread::Builder::new()
            .name("worker1".to_string())
            .spawn(move || Monitor::create(&engine, MonitorKind::Event, "e", Level::Info))
            .unwrap();
        let monitor = handle.join().unwrap();
        assert_eq!(monitor.get_string("threadName").unwrap(), "worker1");
    }

    #[test]
    fn test_level_override_applies_at_construction() {
        let engine = engine();
        engine.add_monitor_level("db.", Level::Debug);
        let monitor = Monitor::create(&engine, MonitorKind::Event, "db.query", Level::Essential);
        assert_eq!(monitor.level(), Level::Debug);
        monitor.set_level(Level::Info);
        assert_eq!(monitor.level(), Level::Info);
    }

    #[test]
    fn test_leaf_rejects_inheritable_attributes() {
        let engine = engine();
        let monitor = Monitor::create(&engine, MonitorKind::Event, "leaf", Level::Info);
        assert_eq!(
            monitor.set_inheritable("tenant", "acme"),
            Err(AttributeError::NotComposite("leaf".to_string()))
        );
        assert!(monitor.inheritable_attributes().is_empty());
    }

    #[test]
    fn test_complete_is_idempotent() {
        let engine = engine();
        let monitor = Monitor::create(&engine, MonitorKind::Event, "once", Level::Info);
        assert!(monitor.complete());
        assert!(!monitor.complete());
        assert!(monitor.is_completed());
    }

    #[test]
    fn test_monitor_outlives_engine() {
        let monitor = {
            let engine = engine();
            Monitor::create(&engine, MonitorKind::Transaction, "orphan", Level::Info)
        };
        monitor.set("still", "works").unwrap();
        assert!(monitor.set_inheritable("k", 1).is_ok());
        assert!(monitor.complete());
        assert!(monitor.decomposed_attributes().contains_key("still"));
    }

    #[test]
    fn test_serializable_attributes_filter() {
        let engine = engine();
        let monitor = Monitor::create(&engine, MonitorKind::Event, "m", Level::Info);
        monitor.set("items", Value::list([1, 2])).unwrap();
        monitor.set("status", 200).unwrap();
        monitor.set_serializable("status", false).unwrap();
        let serializable = monitor.serializable_attributes();
        assert!(!serializable.contains("items"));
        assert!(!serializable.contains("status"));
        assert!(serializable.contains("name"));
    }

    #[test]
    fn test_render_tree_of_leaf_is_name() {
        let engine = engine();
        let monitor = Monitor::create(&engine, MonitorKind::Value, "gauge", Level::Info);
        assert_eq!(monitor.render_tree(), "gauge");
    }
}
