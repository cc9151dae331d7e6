//! The monitoring engine
//!
//! [`MonitoringEngine`] owns the collaborators (path strategy, processor
//! factory, decomposer), the dispatch pipeline and the runtime level
//! overrides. Monitors reach it through a [`WeakEngine`] handle.

pub mod dispatch;
#[allow(clippy::module_inception)]
pub mod engine;
pub mod overrides;
pub mod periodic;
pub mod rate_limiter;

pub use dispatch::DispatchStats;
pub use engine::{EngineState, MonitoringEngine, WeakEngine};
pub use overrides::LevelOverrides;
pub use periodic::PeriodicEmitter;
pub use rate_limiter::RateLimiter;
