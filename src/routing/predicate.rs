//! Group matching expressions
//!
//! A [`Predicate`] is a small closed expression over a monitor's attributes
//! and level. It deserializes from configuration, e.g. in TOML:
//!
//! ```toml
//! [groups.predicate]
//! op = "and"
//! predicates = [
//!     { op = "starts_with", key = "name", prefix = "http." },
//!     { op = "equals", key = "failed", value = true },
//! ]
//! ```

use crate::attributes::{AttributeMap, Value};
use crate::level::Level;
use crate::monitor::Monitor;
use serde::{Deserialize, Serialize};

/// Literal operand of [`Predicate::Equals`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Literal {
    fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (Literal::Bool(expected), Value::Bool(actual)) => expected == actual,
            (Literal::Int(expected), Value::Int(actual)) => expected == actual,
            (Literal::Int(expected), Value::Float(actual)) => (*expected as f64) == *actual,
            (Literal::Float(expected), _) => value.as_f64() == Some(*expected),
            (Literal::Str(expected), _) => text_of(value).as_deref() == Some(expected.as_str()),
            _ => false,
        }
    }
}

/// String form of textual attribute values
fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::Str(s) => Some(s.clone()),
        Value::Text(t) => Some(t.to_string()),
        Value::Attribute(holder) => text_of(holder.value()),
        _ => None,
    }
}

/// Boolean expression evaluated against a monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    Always,
    Exists { key: String },
    Equals { key: String, value: Literal },
    StartsWith { key: String, prefix: String },
    EndsWith { key: String, suffix: String },
    Contains { key: String, needle: String },
    LevelAtLeast { level: Level },
    Not { predicate: Box<Predicate> },
    And { predicates: Vec<Predicate> },
    Or { predicates: Vec<Predicate> },
}

impl Predicate {
    pub fn evaluate(&self, attributes: &AttributeMap, level: Level) -> bool {
        match self {
            Predicate::Always => true,
            Predicate::Exists { key } => attributes.contains(key),
            Predicate::Equals { key, value } => attributes
                .value(key)
                .map_or(false, |actual| value.matches(actual)),
            Predicate::StartsWith { key, prefix } => {
                Self::text(attributes, key).map_or(false, |s| s.starts_with(prefix.as_str()))
            }
            Predicate::EndsWith { key, suffix } => {
                Self::text(attributes, key).map_or(false, |s| s.ends_with(suffix.as_str()))
            }
            Predicate::Contains { key, needle } => {
                Self::text(attributes, key).map_or(false, |s| s.contains(needle.as_str()))
            }
            Predicate::LevelAtLeast { level: threshold } => level >= *threshold,
            Predicate::Not { predicate } => !predicate.evaluate(attributes, level),
            Predicate::And { predicates } => {
                predicates.iter().all(|p| p.evaluate(attributes, level))
            }
            Predicate::Or { predicates } => predicates.iter().any(|p| p.evaluate(attributes, level)),
        }
    }

    /// Evaluate against the monitor's current attributes and level
    pub fn matches(&self, monitor: &Monitor) -> bool {
        let level = monitor.level();
        monitor.with_attributes(|attributes| self.evaluate(attributes, level))
    }

    fn text(attributes: &AttributeMap, key: &str) -> Option<String> {
        attributes.value(key).and_then(text_of)
    }
}
