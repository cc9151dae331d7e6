use crate::attributes::AttributeValue;
use crate::monitor::Monitor;
use crate::path::PathStrategy;
use std::collections::HashMap;

/// Strategy used when hierarchy tracking is disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpPathStrategy;

impl PathStrategy for NoOpPathStrategy {
    fn monitor_created(&self, _monitor: &Monitor) {}

    fn composite_monitor_started(&self, _monitor: &Monitor) {}

    fn composite_monitor_completed(&self, _monitor: &Monitor) {}

    fn monitor_processed(&self, _monitor: &Monitor) {}

    fn set_inheritable(&self, _monitor: &Monitor, _key: &str, _holder: &AttributeValue) {}

    fn composite_monitor_named(&self, _name: &str) -> Option<Monitor> {
        None
    }

    fn clear_current_thread(&self) -> usize {
        0
    }

    fn inheritable_attributes(&self) -> HashMap<String, AttributeValue> {
        HashMap::new()
    }
}
