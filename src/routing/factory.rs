use crate::config::GroupConfig;
use crate::containment::{contain, contain_result};
use crate::engine::LevelOverrides;
use crate::error::ConfigError;
use crate::monitor::Monitor;
use crate::routing::processor::push_unique;
use crate::routing::{Processor, ProcessorGroup, ProcessorRegistry};
use log::debug;
use std::sync::Arc;

/// Source of the processors that should see a monitor
#[cfg_attr(test, mockall::automock)]
pub trait ProcessorFactory: Send + Sync {
    fn startup(&self);

    fn shutdown(&self);

    /// Ordered, duplicate-free processors for `monitor`
    fn processors_for_monitor(&self, monitor: &Monitor) -> Vec<Arc<dyn Processor>>;

    fn all_processors(&self) -> Vec<Arc<dyn Processor>>;

    fn processors_by_name(&self, name: &str) -> Vec<Arc<dyn Processor>>;
}

/// Routes monitors through an ordered list of processor groups
///
/// A processor is selected when its group accepts the monitor and the monitor
/// level reaches the processor's effective level: the group level, raised by a
/// processor-specific override when one applies. Overrides never lower it.
pub struct GroupedProcessorFactory {
    groups: Vec<Arc<ProcessorGroup>>,
    overrides: Arc<LevelOverrides>,
}

impl GroupedProcessorFactory {
    pub fn new(overrides: Arc<LevelOverrides>) -> Self {
        Self {
            groups: Vec::new(),
            overrides,
        }
    }

    pub fn with_group(mut self, group: ProcessorGroup) -> Self {
        self.groups.push(Arc::new(group));
        self
    }

    pub fn add_group(&mut self, group: ProcessorGroup) -> Arc<ProcessorGroup> {
        let group = Arc::new(group);
        self.groups.push(Arc::clone(&group));
        group
    }

    /// Build groups from configuration, resolving processor names in `registry`
    pub fn from_config(
        groups: &[GroupConfig],
        registry: &ProcessorRegistry,
        overrides: Arc<LevelOverrides>,
    ) -> Result<Self, ConfigError> {
        let mut factory = Self::new(overrides);
        for (index, config) in groups.iter().enumerate() {
            let processors = config
                .processors
                .iter()
                .map(|name| {
                    registry
                        .get(name)
                        .ok_or_else(|| ConfigError::UnknownProcessor(name.clone()))
                })
                .collect::<Result<Vec<_>, _>>()?;
            let name = config
                .name
                .clone()
                .unwrap_or_else(|| format!("group{}", index));
            let mut group = ProcessorGroup::new(name, processors)
                .with_level(config.level)
                .with_active(config.active);
            if let Some(predicate) = &config.predicate {
                group = group.with_predicate(predicate.clone());
            }
            factory.add_group(group);
        }
        Ok(factory)
    }

    pub fn groups(&self) -> &[Arc<ProcessorGroup>] {
        &self.groups
    }

    pub fn group_named(&self, name: &str) -> Option<Arc<ProcessorGroup>> {
        self.groups.iter().find(|g| g.name() == name).cloned()
    }
}

impl ProcessorFactory for GroupedProcessorFactory {
    fn startup(&self) {
        for processor in self.all_processors() {
            contain_result(processor.name(), "startup", || processor.startup());
        }
    }

    fn shutdown(&self) {
        for processor in self.all_processors() {
            contain_result(processor.name(), "shutdown", || processor.shutdown());
        }
    }

    fn processors_for_monitor(&self, monitor: &Monitor) -> Vec<Arc<dyn Processor>> {
        let level = monitor.level();
        let mut selected = Vec::new();
        for group in &self.groups {
            let accepted = contain(group.name(), "predicate", || group.accepts(monitor));
            if accepted != Some(true) {
                continue;
            }
            for processor in group.processors() {
                let effective = self
                    .overrides
                    .resolve(processor.name())
                    .map_or(group.level(), |raised| raised.max(group.level()));
                if level >= effective {
                    push_unique(&mut selected, processor);
                }
            }
        }
        debug!(
            "Routed monitor '{}' to {} processor(s)",
            monitor.name(),
            selected.len()
        );
        selected
    }

    fn all_processors(&self) -> Vec<Arc<dyn Processor>> {
        let mut all = Vec::new();
        for group in &self.groups {
            for processor in group.processors() {
                push_unique(&mut all, processor);
            }
        }
        all
    }

    fn processors_by_name(&self, name: &str) -> Vec<Arc<dyn Processor>> {
        self.all_processors()
            .into_iter()
            .filter(|p| p.name() == name)
            .collect()
    }
}
