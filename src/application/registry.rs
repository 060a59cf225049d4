use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::hash::Hash;

/// Concurrency-safe key-value registry for process-wide in-memory state
/// (busy chairs, identity caches, notification queues).
///
/// Last write wins on collision. Entries are never evicted; callers remove
/// them explicitly when the underlying fact stops being true.
pub struct Registry<K, V> {
    entries: DashMap<K, V>,
}

impl<K: Eq + Hash, V: Clone> Registry<K, V> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn insert(&self, key: K, value: V) {
        self.entries.insert(key, value);
    }

    /// Stores `value` and returns what it replaced, as one atomic step.
    pub fn replace(&self, key: K, value: V) -> Option<V> {
        self.entries.insert(key, value)
    }

    /// Stores `value` only if `key` is vacant. Returns whether it was stored.
    pub fn insert_if_absent(&self, key: K, value: V) -> bool {
        match self.entries.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(value);
                true
            }
        }
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, value)| value)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Returns the current value, creating it first if absent. Creation is
    /// atomic per key: concurrent callers all observe the same value.
    pub fn get_or_insert_with(&self, key: K, create: impl FnOnce() -> V) -> V {
        self.entries.entry(key).or_insert_with(create).value().clone()
    }

    pub fn values(&self) -> Vec<V> {
        self.entries.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Eq + Hash, V: Clone> Default for Registry<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_last_write_wins() {
        let registry = Registry::new();
        registry.insert("chair", 1);
        registry.insert("chair", 2);
        assert_eq!(registry.get(&"chair"), Some(2));
        assert_eq!(registry.remove(&"chair"), Some(2));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_replace_returns_previous_value() {
        let registry = Registry::new();
        assert_eq!(registry.replace("chair", 1), None);
        assert_eq!(registry.replace("chair", 2), Some(1));
        assert_eq!(registry.get(&"chair"), Some(2));
    }

    #[test]
    fn test_insert_if_absent_keeps_first_value() {
        let registry = Registry::new();
        assert!(registry.insert_if_absent("ride", 1));
        assert!(!registry.insert_if_absent("ride", 2));
        assert_eq!(registry.get(&"ride"), Some(1));
    }

    #[tokio::test]
    async fn test_get_or_insert_with_creates_once() {
        let registry: Arc<Registry<String, Arc<u64>>> = Arc::new(Registry::new());
        let mut handles = Vec::new();
        for i in 0..16u64 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.get_or_insert_with("queue".to_string(), || Arc::new(i))
            }));
        }
        let mut seen = Vec::new();
        for handle in handles {
            seen.push(handle.await.unwrap());
        }
        assert!(seen.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(registry.len(), 1);
    }
}
