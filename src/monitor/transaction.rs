use crate::engine::MonitoringEngine;
use crate::level::Level;
use crate::monitor::{Monitor, MonitorKind};
use chrono::Utc;
use std::error::Error;
use std::ops::Deref;

/// A timed unit of work that owns the monitors started while it is open
///
/// The transaction is started on construction and becomes the parent of
/// monitors created on the same path until [`TransactionMonitor::done`].
#[derive(Debug, Clone)]
pub struct TransactionMonitor {
    monitor: Monitor,
}

impl TransactionMonitor {
    pub fn new(engine: &MonitoringEngine, name: &str) -> Self {
        Self::with_level(engine, name, Level::default())
    }

    pub fn with_level(engine: &MonitoringEngine, name: &str, level: Level) -> Self {
        let monitor = Monitor::create(engine, MonitorKind::Transaction, name, level);
        monitor.announce_started();
        Self { monitor }
    }

    pub fn succeeded(&self) {
        let _ = self.monitor.set("failed", false);
    }

    pub fn failed(&self) {
        let _ = self.monitor.set("failed", true);
    }

    /// Mark failed and record the error text under `failureReason`
    pub fn failed_due_to(&self, error: &dyn Error) {
        self.failed();
        let _ = self.monitor.set("failureReason", error.to_string());
    }

    /// Record latency, end time and outcome, then complete
    ///
    /// A transaction not marked succeeded counts as failed.
    pub fn done(&self) {
        if self.monitor.is_completed() {
            return;
        }
        let _ = self
            .monitor
            .set("latency", self.monitor.elapsed().as_millis() as u64);
        let _ = self.monitor.set("endTime", Utc::now());
        if !self.monitor.contains("failed") {
            self.failed();
        }
        self.monitor.complete();
    }

    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }
}

impl Deref for TransactionMonitor {
    type Target = Monitor;

    fn deref(&self) -> &Monitor {
        &self.monitor
    }
}
