use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;

/// The entries this node currently holds.
///
/// Every operation is atomic per key. There is no global lock: a scan may
/// observe concurrent writes to keys it has not reached yet.
#[derive(Debug)]
pub struct LocalStore<K, V>
where
    K: Hash + Eq,
{
    data: Arc<DashMap<K, V>>,
}

impl<K, V> Default for LocalStore<K, V>
where
    K: Hash + Eq,
{
    fn default() -> Self {
        Self {
            data: Arc::new(DashMap::new()),
        }
    }
}

impl<K, V> LocalStore<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.data.get(key).map(|entry| entry.value().clone())
    }

    /// Stores `value`, returning the value it replaced.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.data.insert(key, value)
    }

    /// Stores `value` only if `key` is vacant. Returns whether it was stored.
    pub fn insert_if_absent(&self, key: K, value: V) -> bool {
        match self.data.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
        }
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.data.remove(key).map(|(_, value)| value)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.data.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn keys(&self) -> Vec<K> {
        self.data.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn snapshot(&self) -> Vec<(K, V)> {
        self.data
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Last writer wins: incoming entries overwrite local ones.
    pub fn merge(&self, entries: impl IntoIterator<Item = (K, V)>) -> usize {
        let mut merged = 0;
        for (key, value) in entries {
            self.data.insert(key, value);
            merged += 1;
        }
        merged
    }

    pub fn clear(&self) {
        self.data.clear();
    }
}
