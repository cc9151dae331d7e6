use crate::error::ProcessorError;
use crate::monitor::Monitor;
use std::collections::HashMap;
use std::sync::Arc;

/// A backend consumer of monitors
///
/// Every callback is invoked with failures isolated per call: an `Err` or a
/// panic is logged by the engine and never reaches instrumented code.
/// Processors must treat monitors handed to [`Processor::process`] as read-only.
pub trait Processor: Send + Sync {
    fn name(&self) -> &str;

    fn startup(&self) -> Result<(), ProcessorError> {
        Ok(())
    }

    fn shutdown(&self) -> Result<(), ProcessorError> {
        Ok(())
    }

    fn monitor_created(&self, _monitor: &Monitor) -> Result<(), ProcessorError> {
        Ok(())
    }

    fn monitor_started(&self, _monitor: &Monitor) -> Result<(), ProcessorError> {
        Ok(())
    }

    /// Handle a completed monitor
    fn process(&self, monitor: &Monitor) -> Result<(), ProcessorError>;
}

/// Identity comparison that ignores vtable pointers
pub fn same_processor(a: &Arc<dyn Processor>, b: &Arc<dyn Processor>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Push `processor` unless the same instance is already present
pub(crate) fn push_unique(list: &mut Vec<Arc<dyn Processor>>, processor: &Arc<dyn Processor>) {
    if !list.iter().any(|p| same_processor(p, processor)) {
        list.push(Arc::clone(processor));
    }
}

/// Processors available to routing configuration, by name
#[derive(Default, Clone)]
pub struct ProcessorRegistry {
    processors: HashMap<String, Arc<dyn Processor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under the processor's own name, replacing any previous entry
    pub fn register(&mut self, processor: Arc<dyn Processor>) -> &mut Self {
        self.processors
            .insert(processor.name().to_string(), processor);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Processor>> {
        self.processors.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.processors.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}
