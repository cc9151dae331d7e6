/// Error types for the instrumentation runtime
pub mod error;

/// Monitor severity levels
pub mod level;

/// Attribute values and keyed attribute storage
pub mod attributes;

/// Monitors, composite monitors and their typed front ends
pub mod monitor;

/// Per-path stacks that build the monitor tree
pub mod path;

/// Processor plugins and level/predicate routing
pub mod routing;

/// Cycle-safe flattening of attribute values
pub mod decompose;

/// Engine lifecycle, dispatch and runtime overrides
pub mod engine;

/// Engine configuration
pub mod config;

/// Failure isolation for collaborator calls
pub(crate) mod containment;

// Re-export commonly used types
pub use attributes::{AttributeMap, AttributeValue, Inspect, Property, Value};
pub use config::EngineConfig;
pub use decompose::{DecomposedGraph, Decomposer, ReflectiveDecomposer};
pub use engine::{EngineState, MonitoringEngine};
pub use error::{AttributeError, ConfigError, DecomposeError, LevelError, ProcessorError};
pub use level::Level;
pub use monitor::{EventMonitor, Monitor, MonitorKind, TransactionMonitor, ValueMonitor};
pub use path::PathStrategy;
pub use routing::{Processor, ProcessorFactory};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a panicking holder poisoned it
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
