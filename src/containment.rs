//! Isolation boundary for collaborator calls
//!
//! Strategies, factories, processors and emitters are user code. Each call into
//! them goes through one of these helpers so a returned error or a panic is
//! logged and the caller carries on.

use crate::error::ProcessorError;
use log::error;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

/// Render a panic payload as text
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Run `f`, returning `None` if it panicked
pub(crate) fn contain<T>(collaborator: &str, hook: &str, f: impl FnOnce() -> T) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            error!(
                "{} panicked in {}: {}",
                collaborator,
                hook,
                panic_message(payload.as_ref())
            );
            None
        }
    }
}

/// Run a fallible processor hook; returns true when it completed without error or panic
pub(crate) fn contain_result(
    collaborator: &str,
    hook: &str,
    f: impl FnOnce() -> Result<(), ProcessorError>,
) -> bool {
    match contain(collaborator, hook, f) {
        Some(Ok(())) => true,
        Some(Err(e)) => {
            error!("{} failed in {}: {}", collaborator, hook, e);
            false
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contain_passes_value_through() {
        assert_eq!(contain("test", "hook", || 42), Some(42));
    }

    #[test]
    fn test_contain_catches_panic() {
        let result: Option<()> = contain("test", "hook", || panic!("boom"));
        assert!(result.is_none());
    }

    #[test]
    fn test_contain_result_reports_errors() {
        assert!(contain_result("p", "process", || Ok(())));
        assert!(!contain_result("p", "process", || Err(
            ProcessorError::Failed("down".to_string())
        )));
        assert!(!contain_result("p", "process", || panic!("boom")));
    }

    #[test]
    fn test_panic_message_formats() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let borrowed: Box<dyn Any + Send> = Box::new("borrowed");
        let other: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(borrowed.as_ref()), "borrowed");
        assert_eq!(panic_message(other.as_ref()), "unknown panic payload");
    }
}
