//! Runtime attribute values
//!
//! [`Value`] is what instrumented code hands to a monitor. Scalars are stored
//! inline; containers, text buffers and opaque objects are shared handles with
//! identity, so a value graph can alias and even contain itself.

use crate::attributes::AttributeValue;
use chrono::{DateTime, Utc};
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Timestamp type for consistent time handling across the crate
pub type Timestamp = DateTime<Utc>;

/// Discriminant of a [`Value`], used for type errors and decomposition dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    Bool,
    Int,
    Float,
    Str,
    Timestamp,
    Text,
    Type,
    List,
    Set,
    Map,
    Array,
    Attribute,
    Object,
}

impl ValueKind {
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "boolean",
            ValueKind::Int => "integer",
            ValueKind::Float => "float",
            ValueKind::Str => "string",
            ValueKind::Timestamp => "timestamp",
            ValueKind::Text => "text buffer",
            ValueKind::Type => "type",
            ValueKind::List => "list",
            ValueKind::Set => "set",
            ValueKind::Map => "map",
            ValueKind::Array => "array",
            ValueKind::Attribute => "attribute",
            ValueKind::Object => "object",
        }
    }
}

/// Shared, interior-mutable container with reference identity
pub struct Shared<T>(Arc<RwLock<T>>);

impl<T> Shared<T> {
    pub fn new(inner: T) -> Self {
        Self(Arc::new(RwLock::new(inner)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Address of the shared allocation; stable for the container's lifetime
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<T: Clone> Shared<T> {
    /// Clone the current contents without holding the lock afterwards
    pub fn snapshot(&self) -> T {
        self.read().clone()
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shared({:#x})", self.identity())
    }
}

/// Mutable text buffer; decomposes to its current string form
#[derive(Clone, Debug)]
pub struct TextBuffer(Shared<String>);

impl TextBuffer {
    pub fn new(initial: impl Into<String>) -> Self {
        Self(Shared::new(initial.into()))
    }

    pub fn push_str(&self, text: &str) {
        self.0.write().push_str(text);
    }

    pub fn identity(&self) -> usize {
        self.0.identity()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.0.ptr_eq(&other.0)
    }
}

impl fmt::Display for TextBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.read())
    }
}

/// Reference to a Rust type, carried as an attribute value
#[derive(Clone, Copy, Debug)]
pub struct TypeDescriptor {
    name: &'static str,
    id: TypeId,
}

impl TypeDescriptor {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            name: std::any::type_name::<T>(),
            id: TypeId::of::<T>(),
        }
    }

    /// Canonical type name
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.id
    }
}

/// Property enumeration for opaque structured objects
///
/// Implementors expose their readable fields so the generic decomposition step
/// can flatten them. Everything except [`Inspect::properties`] has a default.
pub trait Inspect: Send + Sync + 'static {
    /// Name reported in decomposed records and error messages
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Readable properties, in the order they should appear
    fn properties(&self) -> Vec<Property>;

    /// Objects that are not serializable are skipped when reached through a property
    fn is_serializable(&self) -> bool {
        true
    }

    /// Textual capability: objects that render as text decompose to this string
    fn as_text(&self) -> Option<String> {
        None
    }
}

/// One named property of an inspected object
#[derive(Debug, Clone)]
pub struct Property {
    pub name: String,
    /// `Err` carries the reason the property could not be read
    pub value: Result<Value, String>,
    /// Transient properties are never decomposed
    pub transient: bool,
}

impl Property {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: Ok(value.into()),
            transient: false,
        }
    }

    pub fn failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Err(reason.into()),
            transient: false,
        }
    }

    pub fn transient(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: Ok(value.into()),
            transient: true,
        }
    }
}

/// Handle to an opaque object, keeping both its inspection view and its concrete type
#[derive(Clone)]
pub struct ObjectRef {
    inspect: Arc<dyn Inspect>,
    any: Arc<dyn Any + Send + Sync>,
    type_id: TypeId,
}

impl ObjectRef {
    pub fn new<T: Inspect>(object: Arc<T>) -> Self {
        Self {
            inspect: object.clone(),
            any: object,
            type_id: TypeId::of::<T>(),
        }
    }

    pub fn inspect(&self) -> &dyn Inspect {
        self.inspect.as_ref()
    }

    pub fn downcast_ref<T: Inspect>(&self) -> Option<&T> {
        (*self.any).downcast_ref::<T>()
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.inspect.type_name()
    }

    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.any) as *const () as usize
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:#x}", self.type_name(), self.identity())
    }
}

/// A dynamically typed attribute value
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Timestamp(Timestamp),
    Text(TextBuffer),
    Type(TypeDescriptor),
    List(Shared<Vec<Value>>),
    /// Unordered collection without duplicates
    Set(Shared<Vec<Value>>),
    Map(Shared<BTreeMap<String, Value>>),
    /// Fixed-size sequence
    Array(Arc<[Value]>),
    Attribute(Box<AttributeValue>),
    Object(ObjectRef),
}

impl Value {
    pub fn list<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Value::List(Shared::new(items.into_iter().map(Into::into).collect()))
    }

    /// Build a set, dropping values equal to one already present
    pub fn set<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let mut unique: Vec<Value> = Vec::new();
        for item in items {
            let item = item.into();
            if !unique.contains(&item) {
                unique.push(item);
            }
        }
        Value::Set(Shared::new(unique))
    }

    pub fn map<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Value::Map(Shared::new(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ))
    }

    pub fn array<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Value::Array(items.into_iter().map(Into::into).collect())
    }

    pub fn object<T: Inspect>(object: Arc<T>) -> Self {
        Value::Object(ObjectRef::new(object))
    }

    pub fn type_of<T: ?Sized + 'static>() -> Self {
        Value::Type(TypeDescriptor::of::<T>())
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Str(_) => ValueKind::Str,
            Value::Timestamp(_) => ValueKind::Timestamp,
            Value::Text(_) => ValueKind::Text,
            Value::Type(_) => ValueKind::Type,
            Value::List(_) => ValueKind::List,
            Value::Set(_) => ValueKind::Set,
            Value::Map(_) => ValueKind::Map,
            Value::Array(_) => ValueKind::Array,
            Value::Attribute(_) => ValueKind::Attribute,
            Value::Object(_) => ValueKind::Object,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Primitives, strings and timestamps serialize as-is; everything else needs decomposition
    pub fn is_serializable_by_default(&self) -> bool {
        matches!(
            self,
            Value::Null
                | Value::Bool(_)
                | Value::Int(_)
                | Value::Float(_)
                | Value::Str(_)
                | Value::Timestamp(_)
        )
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Integers widen to floats
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<Timestamp> {
        match self {
            Value::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    /// Short human-readable form used in logs and rendered trees
    pub fn summary(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Str(s) => s.clone(),
            Value::Timestamp(t) => t.to_rfc3339(),
            Value::Text(t) => t.to_string(),
            Value::Type(t) => t.name().to_string(),
            Value::List(l) => format!("list[{}]", l.read().len()),
            Value::Set(s) => format!("set[{}]", s.read().len()),
            Value::Map(m) => format!("map[{}]", m.read().len()),
            Value::Array(a) => format!("array[{}]", a.len()),
            Value::Attribute(a) => a.value().summary(),
            Value::Object(o) => format!("{:?}", o),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Int(i) => write!(f, "Int({})", i),
            Value::Float(x) => write!(f, "Float({})", x),
            Value::Str(s) => write!(f, "Str({:?})", s),
            Value::Timestamp(t) => write!(f, "Timestamp({})", t.to_rfc3339()),
            Value::Text(t) => write!(f, "Text({:?})", t.to_string()),
            Value::Type(t) => write!(f, "Type({})", t.name()),
            // Containers print identity only; they may contain themselves
            Value::List(l) => write!(f, "List{:?}", l),
            Value::Set(s) => write!(f, "Set{:?}", s),
            Value::Map(m) => write!(f, "Map{:?}", m),
            Value::Array(a) => write!(f, "Array(len={})", a.len()),
            Value::Attribute(a) => write!(f, "Attribute({:?})", a.value()),
            Value::Object(o) => write!(f, "Object({:?})", o),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        let mut seen = HashSet::new();
        values_equal(self, other, &mut seen)
    }
}

/// Structural equality; a container pair met again during one comparison counts as equal
///
/// Pairs still to compare are kept on an explicit stack, so deep nesting does
/// not grow the call stack. Set members are matched through a nested
/// comparison per candidate, so only sets nested in sets add call depth.
fn values_equal(a: &Value, b: &Value, seen: &mut HashSet<(usize, usize)>) -> bool {
    let mut pending = vec![(a.clone(), b.clone())];
    while let Some((a, b)) = pending.pop() {
        let matched = match (&a, &b) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(x), Value::Bool(y)) => x == y,
            (Value::Int(x), Value::Int(y)) => x == y,
            (Value::Float(x), Value::Float(y)) => x == y,
            (Value::Str(x), Value::Str(y)) => x == y,
            (Value::Timestamp(x), Value::Timestamp(y)) => x == y,
            (Value::Text(x), Value::Text(y)) => x.ptr_eq(y) || x.to_string() == y.to_string(),
            (Value::Type(x), Value::Type(y)) => x.type_id() == y.type_id(),
            (Value::List(x), Value::List(y)) => {
                if x.ptr_eq(y) || !seen.insert((x.identity(), y.identity())) {
                    continue;
                }
                let (xs, ys) = (x.snapshot(), y.snapshot());
                let same_len = xs.len() == ys.len();
                if same_len {
                    pending.extend(xs.into_iter().zip(ys));
                }
                same_len
            }
            (Value::Set(x), Value::Set(y)) => {
                if x.ptr_eq(y) || !seen.insert((x.identity(), y.identity())) {
                    continue;
                }
                let (xs, ys) = (x.snapshot(), y.snapshot());
                xs.len() == ys.len()
                    && xs.iter().all(|p| {
                        ys.iter().any(|q| {
                            let mut trial = seen.clone();
                            values_equal(p, q, &mut trial)
                        })
                    })
            }
            (Value::Map(x), Value::Map(y)) => {
                if x.ptr_eq(y) || !seen.insert((x.identity(), y.identity())) {
                    continue;
                }
                let (xs, mut ys) = (x.snapshot(), y.snapshot());
                if xs.len() != ys.len() {
                    false
                } else {
                    let mut all_keys = true;
                    for (key, p) in xs {
                        match ys.remove(&key) {
                            Some(q) => pending.push((p, q)),
                            None => {
                                all_keys = false;
                                break;
                            }
                        }
                    }
                    all_keys
                }
            }
            (Value::Array(x), Value::Array(y)) => {
                if Arc::ptr_eq(x, y) {
                    continue;
                }
                let same_len = x.len() == y.len();
                if same_len {
                    pending.extend(x.iter().cloned().zip(y.iter().cloned()));
                }
                same_len
            }
            (Value::Attribute(x), Value::Attribute(y)) => {
                pending.push((x.value().clone(), y.value().clone()));
                true
            }
            (Value::Object(x), Value::Object(y)) => x.ptr_eq(y),
            _ => false,
        };
        if !matched {
            return false;
        }
    }
    true
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            // 0.0 and -0.0 compare equal, so they must hash alike
            Value::Float(f) => {
                if *f == 0.0 {
                    0u64.hash(state)
                } else {
                    f.to_bits().hash(state)
                }
            }
            Value::Str(s) => s.hash(state),
            Value::Timestamp(t) => t.hash(state),
            Value::Text(t) => t.to_string().hash(state),
            Value::Type(t) => t.type_id().hash(state),
            Value::List(l) => l.read().len().hash(state),
            Value::Set(s) => s.read().len().hash(state),
            Value::Map(m) => m.read().len().hash(state),
            Value::Array(a) => a.len().hash(state),
            Value::Attribute(a) => a.value().hash(state),
            Value::Object(o) => o.identity().hash(state),
        }
    }
}

macro_rules! value_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::Int(i64::from(v))
            }
        })*
    };
}

value_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        match i64::try_from(v) {
            Ok(i) => Value::Int(i),
            Err(_) => Value::Float(v as f64),
        }
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::from(v as u64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::Str(v.clone())
    }
}

impl From<Timestamp> for Value {
    fn from(v: Timestamp) -> Self {
        Value::Timestamp(v)
    }
}

impl From<TextBuffer> for Value {
    fn from(v: TextBuffer) -> Self {
        Value::Text(v)
    }
}

impl From<TypeDescriptor> for Value {
    fn from(v: TypeDescriptor) -> Self {
        Value::Type(v)
    }
}

impl From<AttributeValue> for Value {
    fn from(v: AttributeValue) -> Self {
        Value::Attribute(Box::new(v))
    }
}

impl From<ObjectRef> for Value {
    fn from(v: ObjectRef) -> Self {
        Value::Object(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::list(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    struct Point {
        x: i64,
        y: i64,
    }

    impl Inspect for Point {
        fn properties(&self) -> Vec<Property> {
            vec![Property::new("x", self.x), Property::new("y", self.y)]
        }
    }

    fn hash_of(value: &Value) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_scalar_conversions() {
        assert_eq!(Value::from(5i32), Value::Int(5));
        assert_eq!(Value::from(u64::MAX).kind(), ValueKind::Float);
        assert_eq!(Value::from("a"), Value::Str("a".to_string()));
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some(true)), Value::Bool(true));
    }

    #[test]
    fn test_default_serializability() {
        assert!(Value::from(1).is_serializable_by_default());
        assert!(Value::from(Utc::now()).is_serializable_by_default());
        assert!(!Value::list([1, 2]).is_serializable_by_default());
        assert!(!Value::object(Arc::new(Point { x: 1, y: 2 })).is_serializable_by_default());
    }

    #[test]
    fn test_distinct_lists_with_equal_content_are_equal() {
        let a = Value::list([1, 2, 3]);
        let b = Value::list([1, 2, 3]);
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_ne!(a, Value::list([1, 2]));
    }

    #[test]
    fn test_set_deduplicates_and_ignores_order() {
        let a = Value::set([1, 2, 2, 3]);
        let b = Value::set([3, 1, 2]);
        if let Value::Set(inner) = &a {
            assert_eq!(inner.read().len(), 3);
        }
        assert_eq!(a, b);
    }

    #[test]
    fn test_self_containing_lists_compare_without_looping() {
        let a = Shared::new(Vec::new());
        a.write().push(Value::List(a.clone()));
        let b = Shared::new(Vec::new());
        b.write().push(Value::List(b.clone()));
        assert_eq!(Value::List(a), Value::List(b));
    }

    #[test]
    fn test_deep_chains_compare_without_exhausting_the_stack() {
        const DEPTH: usize = 100_000;
        fn chain(bottom: Value) -> Vec<Shared<Vec<Value>>> {
            let lists: Vec<Shared<Vec<Value>>> =
                (0..DEPTH).map(|_| Shared::new(Vec::new())).collect();
            for pair in lists.windows(2) {
                pair[0].write().push(Value::List(pair[1].clone()));
            }
            lists[DEPTH - 1].write().push(bottom);
            lists
        }

        let a = chain(Value::map([("k", 1)]));
        let b = chain(Value::map([("k", 1)]));
        let c = chain(Value::map([("k", 2)]));
        assert_eq!(Value::List(a[0].clone()), Value::List(b[0].clone()));
        assert_ne!(Value::List(a[0].clone()), Value::List(c[0].clone()));

        // Unlink so dropping the chains stays shallow
        for list in a.iter().chain(&b).chain(&c) {
            list.write().clear();
        }
    }

    #[test]
    fn test_objects_compare_by_identity() {
        let p = Arc::new(Point { x: 1, y: 2 });
        let same = Value::object(p.clone());
        assert_eq!(same, Value::object(p));
        assert_ne!(same, Value::object(Arc::new(Point { x: 1, y: 2 })));
    }

    #[test]
    fn test_object_downcast_and_type_name() {
        let obj = ObjectRef::new(Arc::new(Point { x: 3, y: 4 }));
        assert_eq!(obj.downcast_ref::<Point>().map(|p| p.x + p.y), Some(7));
        assert!(obj.type_name().ends_with("Point"));
        assert_eq!(obj.type_id(), TypeId::of::<Point>());
    }

    #[test]
    fn test_text_buffer_is_mutable_through_clones() {
        let buffer = TextBuffer::new("abc");
        let alias = buffer.clone();
        alias.push_str("def");
        assert_eq!(buffer.to_string(), "abcdef");
        assert_eq!(Value::from(buffer.clone()), Value::Text(TextBuffer::new("abcdef")));
    }

    #[test]
    fn test_float_zero_hashes_consistently() {
        assert_eq!(Value::Float(0.0), Value::Float(-0.0));
        assert_eq!(hash_of(&Value::Float(0.0)), hash_of(&Value::Float(-0.0)));
    }

    #[test]
    fn test_debug_does_not_recurse_into_containers() {
        let list = Shared::new(Vec::new());
        list.write().push(Value::List(list.clone()));
        let rendered = format!("{:?}", Value::List(list));
        assert!(rendered.starts_with("ListShared("));
    }
}
