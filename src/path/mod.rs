//! Path strategies
//!
//! A path is an independent line of execution: a thread, or an async task
//! when [`TaskPathStrategy`] is used. Each path keeps a stack of open
//! composite monitors. The strategy links monitors into a tree as they
//! complete and propagates inheritable attributes down the stack.

pub mod frames;
pub mod gated;
pub mod map;
pub mod noop;
pub mod stack;
pub mod task;

pub use frames::PathStack;
pub use gated::LevelGatedStrategy;
pub use map::MapPathStrategy;
pub use noop::NoOpPathStrategy;
pub use stack::StackPathStrategy;
pub use task::TaskPathStrategy;

use crate::attributes::AttributeValue;
use crate::monitor::Monitor;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_STRATEGY_ID: AtomicU64 = AtomicU64::new(1);

/// Unique key separating the path-local stacks of independent strategy instances
pub(crate) fn next_strategy_id() -> u64 {
    NEXT_STRATEGY_ID.fetch_add(1, Ordering::Relaxed)
}

/// Builds the monitor tree for each path of execution
#[cfg_attr(test, mockall::automock)]
pub trait PathStrategy: Send + Sync {
    fn startup(&self) {}

    fn shutdown(&self) {}

    /// Seed a new monitor with the inheritable attributes of the current path
    fn monitor_created(&self, monitor: &Monitor) {
        let inherited = self.inheritable_attributes();
        if !inherited.is_empty() {
            monitor.apply_inherited(&inherited);
        }
    }

    fn composite_monitor_started(&self, monitor: &Monitor);

    fn composite_monitor_completed(&self, monitor: &Monitor);

    /// Attach a completed leaf monitor to the current composite
    fn monitor_processed(&self, monitor: &Monitor);

    fn set_inheritable(&self, monitor: &Monitor, key: &str, holder: &AttributeValue);

    /// Nearest open composite monitor called `name` on the current path
    fn composite_monitor_named(&self, name: &str) -> Option<Monitor>;

    /// Drop the current path's stack, returning how many monitors were open
    fn clear_current_thread(&self) -> usize;

    /// Inheritable attributes visible at the top of the current path
    fn inheritable_attributes(&self) -> HashMap<String, AttributeValue>;
}

/// Strategy selected by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    #[default]
    Stack,
    Map,
    Task,
    Noop,
    Disabled,
}

impl StrategyKind {
    /// Instantiate the strategy without level gating
    pub fn build(self) -> Box<dyn PathStrategy> {
        match self {
            StrategyKind::Stack => Box::new(StackPathStrategy::new()),
            StrategyKind::Map => Box::new(MapPathStrategy::new()),
            StrategyKind::Task => Box::new(TaskPathStrategy::new()),
            StrategyKind::Noop | StrategyKind::Disabled => Box::new(NoOpPathStrategy),
        }
    }
}

impl PathStrategy for Box<dyn PathStrategy> {
    fn startup(&self) {
        (**self).startup()
    }

    fn shutdown(&self) {
        (**self).shutdown()
    }

    fn monitor_created(&self, monitor: &Monitor) {
        (**self).monitor_created(monitor)
    }

    fn composite_monitor_started(&self, monitor: &Monitor) {
        (**self).composite_monitor_started(monitor)
    }

    fn composite_monitor_completed(&self, monitor: &Monitor) {
        (**self).composite_monitor_completed(monitor)
    }

    fn monitor_processed(&self, monitor: &Monitor) {
        (**self).monitor_processed(monitor)
    }

    fn set_inheritable(&self, monitor: &Monitor, key: &str, holder: &AttributeValue) {
        (**self).set_inheritable(monitor, key, holder)
    }

    fn composite_monitor_named(&self, name: &str) -> Option<Monitor> {
        (**self).composite_monitor_named(name)
    }

    fn clear_current_thread(&self) -> usize {
        (**self).clear_current_thread()
    }

    fn inheritable_attributes(&self) -> HashMap<String, AttributeValue> {
        (**self).inheritable_attributes()
    }
}
