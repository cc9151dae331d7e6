use crate::attributes::Value;
use crate::engine::MonitoringEngine;
use crate::level::Level;
use crate::monitor::{Monitor, MonitorKind};
use std::ops::Deref;

/// A single measured value, stored under the `value` attribute
#[derive(Debug, Clone)]
pub struct ValueMonitor {
    monitor: Monitor,
}

impl ValueMonitor {
    pub fn new(engine: &MonitoringEngine, name: &str, value: impl Into<Value>) -> Self {
        Self::with_level(engine, name, value, Level::default())
    }

    pub fn with_level(
        engine: &MonitoringEngine,
        name: &str,
        value: impl Into<Value>,
        level: Level,
    ) -> Self {
        let monitor = Monitor::create(engine, MonitorKind::Value, name, level);
        // "value" is a valid key
        let _ = monitor.set("value", value);
        Self { monitor }
    }

    pub fn value(&self) -> Option<Value> {
        self.monitor.value("value")
    }

    pub fn fire(&self) {
        self.monitor.complete();
    }

    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }
}

impl Deref for ValueMonitor {
    type Target = Monitor;

    fn deref(&self) -> &Monitor {
        &self.monitor
    }
}
