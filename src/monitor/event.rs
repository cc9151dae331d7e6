use crate::engine::MonitoringEngine;
use crate::level::Level;
use crate::monitor::{Monitor, MonitorKind};
use std::ops::Deref;

/// A point-in-time occurrence
#[derive(Debug, Clone)]
pub struct EventMonitor {
    monitor: Monitor,
}

impl EventMonitor {
    pub fn new(engine: &MonitoringEngine, name: &str) -> Self {
        Self::with_level(engine, name, Level::default())
    }

    pub fn with_level(engine: &MonitoringEngine, name: &str, level: Level) -> Self {
        Self {
            monitor: Monitor::create(engine, MonitorKind::Event, name, level),
        }
    }

    /// Complete the event; firing twice records it once
    pub fn fire(&self) {
        self.monitor.complete();
    }

    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }
}

impl Deref for EventMonitor {
    type Target = Monitor;

    fn deref(&self) -> &Monitor {
        &self.monitor
    }
}
