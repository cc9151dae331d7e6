use crate::attributes::Value;
use std::hash::{Hash, Hasher};

/// An attribute value together with its lock and serialization flags
///
/// Two holders are equal when their values are equal; the flags are ignored.
#[derive(Debug, Clone)]
pub struct AttributeValue {
    value: Value,
    locked: bool,
    serializable: bool,
}

impl AttributeValue {
    pub fn new(value: impl Into<Value>) -> Self {
        let value = value.into();
        let serializable = value.is_serializable_by_default();
        Self {
            value,
            locked: false,
            serializable,
        }
    }

    /// Same value, locked against later writes
    pub fn locked(mut self) -> Self {
        self.locked = true;
        self
    }

    pub fn with_serializable(mut self, serializable: bool) -> Self {
        self.serializable = serializable;
        self
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn is_serializable(&self) -> bool {
        self.serializable
    }

    pub(crate) fn lock(&mut self) {
        self.locked = true;
    }

    pub(crate) fn set_serializable(&mut self, serializable: bool) {
        self.serializable = serializable;
    }
}

impl PartialEq for AttributeValue {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Hash for AttributeValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}
