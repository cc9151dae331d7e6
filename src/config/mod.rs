//! Engine configuration
//!
//! Loaded from TOML with `serde`; see [`EngineConfig`] for the layout.

#[allow(clippy::module_inception)]
pub mod config;

pub use config::{
    DispatchConfig, DispatchMode, EngineConfig, GroupConfig, PathConfig,
    MAX_OVERFLOW_WARNING_WINDOW_SECS, MAX_TIMEOUT_MS,
};
