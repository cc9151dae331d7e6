use crate::attributes::AttributeValue;
use crate::lock;
use crate::monitor::Monitor;
use crate::path::{PathStack, PathStrategy};
use std::collections::HashMap;
use std::sync::Mutex;
use std::thread::{self, ThreadId};

/// Path tracking in one shared map keyed by thread
///
/// Same contract as [`super::StackPathStrategy`], but every operation takes
/// a single lock. Shutdown can clear the stacks of all threads.
#[derive(Default)]
pub struct MapPathStrategy {
    stacks: Mutex<HashMap<ThreadId, PathStack>>,
}

impl MapPathStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_stack<R>(&self, f: impl FnOnce(&mut PathStack) -> R) -> R {
        let mut stacks = lock(&self.stacks);
        let id = thread::current().id();
        let stack = stacks.entry(id).or_default();
        let result = f(stack);
        if stack.is_empty() {
            stacks.remove(&id);
        }
        result
    }

    /// Number of threads with open monitors
    pub fn active_paths(&self) -> usize {
        lock(&self.stacks).len()
    }
}

impl PathStrategy for MapPathStrategy {
    fn shutdown(&self) {
        lock(&self.stacks).clear();
    }

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
        self.with_stack(|stack| stack.named(name))
    }

    fn clear_current_thread(&self) -> usize {
        self.with_stack(PathStack::clear)
    }

    fn inheritable_attributes(&self) -> HashMap<String, AttributeValue> {
        self.with_stack(|stack| stack.inheritable())
    }
}
