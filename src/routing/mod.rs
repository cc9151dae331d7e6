//! Processor routing
//!
//! Completed monitors fan out to [`Processor`] plugins. A [`ProcessorFactory`]
//! decides which processors see a monitor; [`GroupedProcessorFactory`] does it
//! with level-gated, predicate-filtered [`ProcessorGroup`]s.

pub mod factory;
pub mod group;
pub mod predicate;
pub mod processor;

pub use factory::{GroupedProcessorFactory, ProcessorFactory};
pub use group::ProcessorGroup;
pub use predicate::{Literal, Predicate};
pub use processor::{same_processor, Processor, ProcessorRegistry};

#[cfg(test)]
pub(crate) use processor::testing;

#[cfg(test)]
pub use factory::MockProcessorFactory;
