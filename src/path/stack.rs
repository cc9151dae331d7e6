use crate::attributes::AttributeValue;
use crate::monitor::Monitor;
use crate::path::{next_strategy_id, PathStack, PathStrategy};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

thread_local! {
    /// Strategy id to (generation, stack)
    static STACKS: RefCell<HashMap<u64, (u64, PathStack)>> = RefCell::new(HashMap::new());
}

/// Thread-local path tracking, the default strategy
///
/// Each thread has its own stack, so push and pop never contend. Stacks are
/// keyed by strategy instance: two engines on the same thread do not share.
///
/// Shutdown cannot reach other threads' storage, so it bumps a generation
/// instead; a stack left behind by an earlier generation reads as empty and
/// is replaced on the next write.
#[derive(Debug)]
pub struct StackPathStrategy {
    id: u64,
    generation: AtomicU64,
}

impl Default for StackPathStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl StackPathStrategy {
    pub fn new() -> Self {
        Self {
            id: next_strategy_id(),
            generation: AtomicU64::new(0),
        }
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Run `f` on this thread's stack; `None` once thread-local storage is torn down
    fn with_stack<R>(&self, f: impl FnOnce(&mut PathStack) -> R) -> Option<R> {
        STACKS
            .try_with(|stacks| {
                let generation = self.generation();
                let mut stacks = stacks.borrow_mut();
                let entry = stacks.entry(self.id).or_default();
                if entry.0 != generation {
                    *entry = (generation, PathStack::default());
                }
                let result = f(&mut entry.1);
                if entry.1.is_empty() {
                    stacks.remove(&self.id);
                }
                result
            })
            .ok()
    }

    fn peek<R>(&self, f: impl FnOnce(&PathStack) -> R) -> Option<R> {
        let generation = self.generation();
        STACKS
            .try_with(|stacks| {
                stacks
                    .borrow()
                    .get(&self.id)
                    .filter(|(stamp, _)| *stamp == generation)
                    .map(|(_, stack)| f(stack))
            })
            .ok()
            .flatten()
    }
}

impl PathStrategy for StackPathStrategy {
    fn shutdown(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        // Drops this thread's stale entry
        self.with_stack(|_| ());
    }

    fn composite_monitor_started(&self, monitor: &Monitor) {
        self.with_stack(|stack| stack.push(monitor));
    }

    fn composite_monitor_completed(&self, monitor: &Monitor) {
        self.with_stack(|stack| stack.complete(monitor));
    }

    fn monitor_processed(&self, monitor: &Monitor) {
        self.peek(|stack| stack.attach(monitor));
    }

    fn set_inheritable(&self, monitor: &Monitor, key: &str, holder: &AttributeValue) {
        self.with_stack(|stack| stack.set_inheritable(monitor, key, holder));
    }

    fn composite_monitor_named(&self, name: &str) -> Option<Monitor> {
        self.peek(|stack| stack.named(name)).flatten()
    }

    fn clear_current_thread(&self) -> usize {
        self.with_stack(PathStack::clear).unwrap_or(0)
    }

    fn inheritable_attributes(&self) -> HashMap<String, AttributeValue> {
        self.peek(PathStack::inheritable).unwrap_or_default()
    }
}
