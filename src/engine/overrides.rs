use crate::level::Level;
use arc_swap::ArcSwap;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Runtime level overrides keyed by name prefix
///
/// Readers take a lock-free snapshot; writers publish a fresh copy of the
/// map. A name resolves to the override with the longest matching prefix, so
/// an exact name always beats a shorter prefix.
///
/// # Example
/// ```
/// use monitrace::engine::LevelOverrides;
/// use monitrace::Level;
///
/// let overrides = LevelOverrides::new();
/// overrides.set("http", Level::Debug);
/// overrides.set("http.health", Level::Essential);
/// assert_eq!(overrides.resolve("http.health.ping"), Some(Level::Essential));
/// assert_eq!(overrides.resolve("http.get"), Some(Level::Debug));
/// assert_eq!(overrides.resolve("db.query"), None);
/// ```
#[derive(Debug)]
pub struct LevelOverrides {
    entries: ArcSwap<BTreeMap<String, Level>>,
}

impl Default for LevelOverrides {
    fn default() -> Self {
        Self::new()
    }
}

impl LevelOverrides {
    pub fn new() -> Self {
        Self {
            entries: ArcSwap::from_pointee(BTreeMap::new()),
        }
    }

    pub fn from_map(entries: BTreeMap<String, Level>) -> Self {
        Self {
            entries: ArcSwap::from_pointee(entries),
        }
    }

    /// Add or replace the override for `prefix`
    pub fn set(&self, prefix: &str, level: Level) {
        self.entries.rcu(|current| {
            let mut next = BTreeMap::clone(current);
            next.insert(prefix.to_string(), level);
            next
        });
    }

    /// Remove an override, returning the level it held
    pub fn remove(&self, prefix: &str) -> Option<Level> {
        let previous = self.entries.rcu(|current| {
            let mut next = BTreeMap::clone(current);
            next.remove(prefix);
            next
        });
        previous.get(prefix).copied()
    }

    /// Replace every override at once
    pub fn replace(&self, entries: BTreeMap<String, Level>) {
        self.entries.store(Arc::new(entries));
    }

    /// Level of the longest prefix of `name`, if any matches
    pub fn resolve(&self, name: &str) -> Option<Level> {
        self.entries
            .load()
            .iter()
            .filter(|(prefix, _)| name.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, level)| *level)
    }

    pub fn snapshot(&self) -> BTreeMap<String, Level> {
        BTreeMap::clone(&self.entries.load_full())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.load().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_longest_prefix_wins() {
        let overrides = LevelOverrides::new();
        overrides.set("db", Level::Debug);
        overrides.set("db.query", Level::Essential);
        overrides.set("db.query.users", Level::Info);

        assert_eq!(overrides.resolve("db.connect"), Some(Level::Debug));
        assert_eq!(overrides.resolve("db.query.orders"), Some(Level::Essential));
        assert_eq!(overrides.resolve("db.query.users"), Some(Level::Info));
        assert_eq!(overrides.resolve("http.get"), None);
    }

    #[test]
    fn test_remove_and_snapshot() {
        let overrides = LevelOverrides::new();
        overrides.set("a", Level::Debug);
        overrides.set("b", Level::Info);
        assert_eq!(overrides.remove("a"), Some(Level::Debug));
        assert_eq!(overrides.remove("a"), None);
        let snapshot = overrides.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get("b"), Some(&Level::Info));
    }

    #[test]
    fn test_concurrent_writers_do_not_lose_updates() {
        let overrides = Arc::new(LevelOverrides::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let overrides = overrides.clone();
                thread::spawn(move || {
                    for j in 0..50 {
                        overrides.set(&format!("w{}.{}", i, j), Level::Essential);
                        let _ = overrides.resolve("w0.0");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(overrides.snapshot().len(), 400);
    }

    #[test]
    fn test_replace() {
        let overrides = LevelOverrides::from_map(BTreeMap::from([("x".to_string(), Level::Debug)]));
        overrides.replace(BTreeMap::new());
        assert!(overrides.is_empty());
    }
}
