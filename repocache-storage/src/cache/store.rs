//! Key-value cache stores.

use parking_lot::RwLock;
use repocache_core::{RepoKey, RepoValue};
use std::collections::HashMap;

/// In-memory key-value cache store.
///
/// Operations are synchronous and infallible: they only touch local memory
/// and never reach the backing store. `get` answers honestly with `None` for
/// a key it does not hold; deciding whether that means "does not exist" or
/// "not loaded yet" is up to the decorator using the store.
pub trait KvCacheStore<K, V>: Send + Sync
where
    K: RepoKey,
    V: RepoValue,
{
    /// Cached value for `key`, if any.
    fn get(&self, key: &K) -> Option<V>;

    /// Store `value` under `key`.
    fn set(&self, key: K, value: V);

    /// Forget `key`.
    fn unset(&self, key: &K);

    /// Store every entry.
    fn set_all<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
    {
        for (key, value) in entries {
            self.set(key, value);
        }
    }

    /// Forget everything.
    fn clear(&self);
}

/// Plain hash map cache store.
#[derive(Debug)]
pub struct KvCache<K, V> {
    entries: RwLock<HashMap<K, V>>,
}

impl<K, V> KvCache<K, V>
where
    K: RepoKey,
    V: RepoValue,
{
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl<K, V> Default for KvCache<K, V>
where
    K: RepoKey,
    V: RepoValue,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> KvCacheStore<K, V> for KvCache<K, V>
where
    K: RepoKey,
    V: RepoValue,
{
    fn get(&self, key: &K) -> Option<V> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: K, value: V) {
        self.entries.write().insert(key, value);
    }

    fn unset(&self, key: &K) {
        self.entries.write().remove(key);
    }

    fn set_all<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
    {
        self.entries.write().extend(entries);
    }

    fn clear(&self) {
        self.entries.write().clear();
    }
}
