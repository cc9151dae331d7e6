use crate::attributes::AttributeValue;
use crate::monitor::Monitor;
use crate::path::{next_strategy_id, PathStack, PathStrategy};
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;

tokio::task_local! {
    static TASK_PATHS: RefCell<HashMap<u64, PathStack>>;
}

/// Run `future` with a fresh path for [`TaskPathStrategy`]
///
/// Monitors created inside the future (and not inside a nested scope) share
/// one stack, regardless of which worker thread polls the task.
pub async fn scope<F: Future>(future: F) -> F::Output {
    TASK_PATHS.scope(RefCell::new(HashMap::new()), future).await
}

/// Synchronous counterpart of [`scope`]
pub fn sync_scope<R>(f: impl FnOnce() -> R) -> R {
    TASK_PATHS.sync_scope(RefCell::new(HashMap::new()), f)
}

/// Path tracking in tokio task-local storage
///
/// Outside a [`scope`] nothing is tracked.
#[derive(Debug)]
pub struct TaskPathStrategy {
    id: u64,
}

impl Default for TaskPathStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskPathStrategy {
    pub fn new() -> Self {
        Self {
            id: next_strategy_id(),
        }
    }

    fn with_stack<R>(&self, f: impl FnOnce(&mut PathStack) -> R) -> Option<R> {
        TASK_PATHS
            .try_with(|paths| {
                let mut paths = paths.borrow_mut();
                f(paths.entry(self.id).or_default())
            })
            .ok()
    }
}

impl PathStrategy for TaskPathStrategy {
    fn composite_monitor_started(&self, monitor: &Monitor) {
        self.with_stack(|stack| stack.push(monitor));
    }

    fn composite_monitor_completed(&self, monitor: &Monitor) {
        self.with_stack(|stack| stack.complete(monitor));
    }

    fn monitor_processed(&self, monitor: &Monitor) {
        self.with_stack(|stack| stack.attach(monitor));
    }

    fn set_inheritable(&self, monitor: &Monitor, key: &str, holder: &AttributeValue) {
        self.with_stack(|stack| stack.set_inheritable(monitor, key, holder));
    }

    fn composite_monitor_named(&self, name: &str) -> Option<Monitor> {
        self.with_stack(|stack| stack.named(name)).flatten()
    }

    fn clear_current_thread(&self) -> usize {
        self.with_stack(PathStack::clear).unwrap_or(0)
    }

    fn inheritable_attributes(&self) -> HashMap<String, AttributeValue> {
        self.with_stack(|stack| stack.inheritable())
            .unwrap_or_default()
    }
}
