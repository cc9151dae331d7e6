//! Monitor model
//!
//! A [`Monitor`] is a shared handle to one recorded unit of work. The typed
//! front ends wrap it: [`EventMonitor`] and [`ValueMonitor`] are leaves,
//! [`TransactionMonitor`] is composite and collects children started beneath it.

pub mod event;
pub mod handle;
pub mod transaction;
pub mod value;

pub use event::EventMonitor;
pub use handle::{Monitor, MonitorKind};
pub use transaction::TransactionMonitor;
pub use value::ValueMonitor;
