use crate::attributes::AttributeValue;
use crate::level::Level;
use crate::monitor::Monitor;
use crate::path::PathStrategy;
use std::collections::HashMap;

/// Skips path tracking for monitors below a threshold
///
/// Monitors under the event pattern level at creation or start never enter
/// the tree: they are not pushed, not attached and do not inherit attributes.
/// Completion is always forwarded so a frame pushed at an eligible level is
/// popped even if the monitor's level was lowered in between.
pub struct LevelGatedStrategy<S> {
    inner: S,
    threshold: Level,
}

impl<S: PathStrategy> LevelGatedStrategy<S> {
    pub fn new(inner: S, threshold: Level) -> Self {
        Self { inner, threshold }
    }

    pub fn threshold(&self) -> Level {
        self.threshold
    }

    fn tracks(&self, monitor: &Monitor) -> bool {
        monitor.level() >= self.threshold
    }
}

impl<S: PathStrategy> PathStrategy for LevelGatedStrategy<S> {
    fn startup(&self) {
        self.inner.startup();
    }

    fn shutdown(&self) {
        self.inner.shutdown();
    }

    fn monitor_created(&self, monitor: &Monitor) {
        if self.tracks(monitor) {
            self.inner.monitor_created(monitor);
        }
    }

    fn composite_monitor_started(&self, monitor: &Monitor) {
        if self.tracks(monitor) {
            self.inner.composite_monitor_started(monitor);
        }
    }

    // The level may have changed since start; completing an untracked
    // monitor is a no-op for the inner strategy.
    fn composite_monitor_completed(&self, monitor: &Monitor) {
        self.inner.composite_monitor_completed(monitor);
    }

    fn monitor_processed(&self, monitor: &Monitor) {
        if self.tracks(monitor) {
            self.inner.monitor_processed(monitor);
        }
    }

    // Only the open top frame is updated, and untracked monitors never open one
    fn set_inheritable(&self, monitor: &Monitor, key: &str, holder: &AttributeValue) {
        self.inner.set_inheritable(monitor, key, holder);
    }

    fn composite_monitor_named(&self, name: &str) -> Option<Monitor> {
        self.inner.composite_monitor_named(name)
    }

    fn clear_current_thread(&self) -> usize {
        self.inner.clear_current_thread()
    }

    fn inheritable_attributes(&self) -> HashMap<String, AttributeValue> {
        self.inner.inheritable_attributes()
    }
}
