use crate::level::Level;
use crate::monitor::Monitor;
use crate::routing::{Predicate, Processor};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Processors that share a level threshold and an optional predicate
pub struct ProcessorGroup {
    name: String,
    processors: Vec<Arc<dyn Processor>>,
    level: Level,
    predicate: Option<Predicate>,
    active: AtomicBool,
}

impl ProcessorGroup {
    /// Active group at the default level, matching every monitor
    pub fn new(name: impl Into<String>, processors: Vec<Arc<dyn Processor>>) -> Self {
        Self {
            name: name.into(),
            processors,
            level: Level::default(),
            predicate: None,
            active: AtomicBool::new(true),
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn with_active(self, active: bool) -> Self {
        self.active.store(active, Ordering::Relaxed);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn predicate(&self) -> Option<&Predicate> {
        self.predicate.as_ref()
    }

    pub fn processors(&self) -> &[Arc<dyn Processor>] {
        &self.processors
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    /// Toggle the group at runtime
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    /// Active, at or above the group level, and predicate satisfied
    pub fn accepts(&self, monitor: &Monitor) -> bool {
        if !self.is_active() || monitor.level() < self.level {
            return false;
        }
        self.predicate
            .as_ref()
            .map_or(true, |predicate| predicate.matches(monitor))
    }
}

impl std::fmt::Debug for ProcessorGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.processors.iter().map(|p| p.name()).collect();
        f.debug_struct("ProcessorGroup")
            .field("name", &self.name)
            .field("processors", &names)
            .field("level", &self.level)
            .field("predicate", &self.predicate)
            .field("active", &self.is_active())
            .finish()
    }
}
