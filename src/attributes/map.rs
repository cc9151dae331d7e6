use crate::attributes::{AttributeValue, Timestamp, Value};
use crate::error::AttributeError;
use std::collections::HashMap;

/// Returns true for characters allowed in attribute keys and monitor names
fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '.' || c == '_'
}

/// Check a key against `[A-Za-z0-9._]+`
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty() && key.chars().all(is_key_char)
}

/// Strip characters that are not allowed in keys
pub fn sanitize_name(name: &str) -> String {
    name.chars().filter(|c| is_key_char(*c)).collect()
}

/// Keyed attribute storage for a single monitor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeMap {
    entries: HashMap<String, AttributeValue>,
}

impl AttributeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`
    ///
    /// Writes to a locked key are ignored and the existing holder is returned.
    pub fn set(
        &mut self,
        key: &str,
        value: impl Into<Value>,
    ) -> Result<AttributeValue, AttributeError> {
        self.set_holder(key, AttributeValue::new(value))
    }

    pub fn set_holder(
        &mut self,
        key: &str,
        holder: AttributeValue,
    ) -> Result<AttributeValue, AttributeError> {
        if !is_valid_key(key) {
            return Err(AttributeError::InvalidKey(key.to_string()));
        }
        if let Some(existing) = self.entries.get(key) {
            if existing.is_locked() {
                return Ok(existing.clone());
            }
        }
        self.entries.insert(key.to_string(), holder.clone());
        Ok(holder)
    }

    pub fn lock(&mut self, key: &str) -> Result<(), AttributeError> {
        self.entries
            .get_mut(key)
            .map(AttributeValue::lock)
            .ok_or_else(|| AttributeError::Missing(key.to_string()))
    }

    pub fn set_serializable(&mut self, key: &str, serializable: bool) -> Result<(), AttributeError> {
        self.entries
            .get_mut(key)
            .map(|holder| holder.set_serializable(serializable))
            .ok_or_else(|| AttributeError::Missing(key.to_string()))
    }

    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.entries.get(key)
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.entries.get(key).map(AttributeValue::value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Remove an unlocked key; locked keys stay and `None` is returned
    pub fn remove(&mut self, key: &str) -> Option<AttributeValue> {
        match self.entries.get(key) {
            Some(holder) if !holder.is_locked() => self.entries.remove(key),
            _ => None,
        }
    }

    /// Keys in sorted order
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttributeValue)> {
        self.entries.iter()
    }

    /// Copy every entry of `other` into this map, honoring locks
    pub fn merge_from<'a, I>(&mut self, other: I)
    where
        I: IntoIterator<Item = (&'a String, &'a AttributeValue)>,
    {
        for (key, holder) in other {
            // Keys in other maps were validated on insert
            let _ = self.set_holder(key, holder.clone());
        }
    }

    fn require(&self, key: &str) -> Result<&Value, AttributeError> {
        self.value(key)
            .ok_or_else(|| AttributeError::Missing(key.to_string()))
    }

    pub fn get_str(&self, key: &str) -> Result<&str, AttributeError> {
        let value = self.require(key)?;
        value.as_str().ok_or_else(|| wrong_type(key, "string", value))
    }

    pub fn get_i64(&self, key: &str) -> Result<i64, AttributeError> {
        let value = self.require(key)?;
        value.as_i64().ok_or_else(|| wrong_type(key, "integer", value))
    }

    pub fn get_f64(&self, key: &str) -> Result<f64, AttributeError> {
        let value = self.require(key)?;
        value.as_f64().ok_or_else(|| wrong_type(key, "float", value))
    }

    pub fn get_bool(&self, key: &str) -> Result<bool, AttributeError> {
        let value = self.require(key)?;
        value.as_bool().ok_or_else(|| wrong_type(key, "boolean", value))
    }

    pub fn get_timestamp(&self, key: &str) -> Result<Timestamp, AttributeError> {
        let value = self.require(key)?;
        value
            .as_timestamp()
            .ok_or_else(|| wrong_type(key, "timestamp", value))
    }
}

fn wrong_type(key: &str, expected: &'static str, found: &Value) -> AttributeError {
    AttributeError::WrongType {
        key: key.to_string(),
        expected,
        found: found.kind().name(),
    }
}

impl FromIterator<(String, AttributeValue)> for AttributeMap {
    fn from_iter<I: IntoIterator<Item = (String, AttributeValue)>>(iter: I) -> Self {
        let mut map = AttributeMap::new();
        for (key, holder) in iter {
            let _ = map.set_holder(&key, holder);
        }
        map
    }
}

impl IntoIterator for AttributeMap {
    type Item = (String, AttributeValue);
    type IntoIter = std::collections::hash_map::IntoIter<String, AttributeValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_key_validation() {
        assert!(is_valid_key("http.status_code"));
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("has space"));
        assert!(!is_valid_key("dash-ed"));

        let mut map = AttributeMap::new();
        let err = map.set("bad key", 1).unwrap_err();
        assert_eq!(err, AttributeError::InvalidKey("bad key".to_string()));
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("db query/users #1"), "dbqueryusers1");
        assert_eq!(sanitize_name("already.ok_name"), "already.ok_name");
    }

    #[test]
    fn test_locked_key_ignores_writes() {
        let mut map = AttributeMap::new();
        map.set("user", "alice").unwrap();
        map.lock("user").unwrap();

        let returned = map.set("user", "mallory").unwrap();
        assert_eq!(returned.value(), &Value::from("alice"));
        assert_eq!(map.get_str("user").unwrap(), "alice");
        assert!(map.remove("user").is_none());
        assert!(map.contains("user"));
    }

    #[test]
    fn test_lock_missing_key() {
        let mut map = AttributeMap::new();
        assert_eq!(
            map.lock("nope"),
            Err(AttributeError::Missing("nope".to_string()))
        );
    }

    #[test]
    fn test_typed_getters() {
        let now = Utc::now();
        let mut map = AttributeMap::new();
        map.set("count", 3).unwrap();
        map.set("ratio", 0.5).unwrap();
        map.set("ok", true).unwrap();
        map.set("at", now).unwrap();

        assert_eq!(map.get_i64("count").unwrap(), 3);
        assert_eq!(map.get_f64("count").unwrap(), 3.0);
        assert_eq!(map.get_f64("ratio").unwrap(), 0.5);
        assert!(map.get_bool("ok").unwrap());
        assert_eq!(map.get_timestamp("at").unwrap(), now);

        assert_eq!(
            map.get_str("count"),
            Err(AttributeError::WrongType {
                key: "count".to_string(),
                expected: "string",
                found: "integer",
            })
        );
        assert_eq!(
            map.get_i64("missing"),
            Err(AttributeError::Missing("missing".to_string()))
        );
    }

    #[test]
    fn test_keys_are_sorted_and_remove_works() {
        let mut map = AttributeMap::new();
        map.set("b", 1).unwrap();
        map.set("a", 2).unwrap();
        assert_eq!(map.keys(), vec!["a".to_string(), "b".to_string()]);
        assert!(map.remove("a").is_some());
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_merge_honors_locks() {
        let mut target = AttributeMap::new();
        target.set("tenant", "acme").unwrap();
        target.lock("tenant").unwrap();

        let mut source = AttributeMap::new();
        source.set("tenant", "other").unwrap();
        source.set("region", "eu").unwrap();

        target.merge_from(source.iter());
        assert_eq!(target.get_str("tenant").unwrap(), "acme");
        assert_eq!(target.get_str("region").unwrap(), "eu");
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[quickcheck]
    fn locked_attribute_never_changes(initial: i64, writes: Vec<i64>) -> bool {
        let mut map = AttributeMap::new();
        map.set("key", initial).unwrap();
        map.lock("key").unwrap();
        for w in writes {
            let _ = map.set("key", w);
            let _ = map.remove("key");
        }
        map.get_i64("key") == Ok(initial)
    }

    #[quickcheck]
    fn sanitized_names_are_valid_or_empty(name: String) -> bool {
        let clean = sanitize_name(&name);
        clean.is_empty() || is_valid_key(&clean)
    }
}
