//! Attribute storage
//!
//! Monitors carry a keyed set of [`AttributeValue`] holders. Keys are restricted
//! to `[A-Za-z0-9._]+`; locked keys ignore later writes.

pub mod holder;
pub mod map;
pub mod value;

pub use holder::AttributeValue;
pub use map::{is_valid_key, sanitize_name, AttributeMap};
pub use value::{
    Inspect, ObjectRef, Property, Shared, TextBuffer, Timestamp, TypeDescriptor, Value, ValueKind,
};
