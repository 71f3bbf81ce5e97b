//! Flat key-value repo traits.

use crate::events::{ChangeStream, KeyValueChange};
use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use indexmap::IndexMap;
use repocache_core::{
    get_all_paged, Pagination, PaginationResult, RepoKey, RepoResult, RepoValue, DEFAULT_PAGE_SIZE,
};
use std::future::ready;

/// Read half of a key-value repo.
#[async_trait]
pub trait ReadKeyValueRepo<K, V>: Send + Sync
where
    K: RepoKey,
    V: RepoValue + PartialEq,
{
    /// Get the value stored under `key`.
    async fn get(&self, key: &K) -> RepoResult<Option<V>>;

    /// One page of values in repo order.
    async fn values(&self, pagination: Pagination, reversed: bool) -> RepoResult<PaginationResult<V>>;

    /// One page of keys in repo order.
    async fn keys(&self, pagination: Pagination, reversed: bool) -> RepoResult<PaginationResult<K>>;

    /// One page of the keys currently mapped to `value`.
    async fn keys_by_value(
        &self,
        value: &V,
        pagination: Pagination,
        reversed: bool,
    ) -> RepoResult<PaginationResult<K>>;

    /// Whether `key` exists.
    async fn contains(&self, key: &K) -> RepoResult<bool>;

    /// Number of stored keys.
    async fn count(&self) -> RepoResult<u64>;

    /// Every entry in repo order, loaded key page by key page.
    async fn get_all(&self) -> RepoResult<IndexMap<K, V>> {
        let keys = get_all_paged(DEFAULT_PAGE_SIZE, |pagination| self.keys(pagination, false)).await?;

        let mut all = IndexMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get(&key).await? {
                all.insert(key, value);
            }
        }
        Ok(all)
    }
}

/// Write half of a key-value repo.
#[async_trait]
pub trait WriteKeyValueRepo<K, V>: Send + Sync
where
    K: RepoKey,
    V: RepoValue + PartialEq,
{
    /// Store every entry, overwriting existing keys in place.
    async fn set(&self, entries: Vec<(K, V)>) -> RepoResult<()>;

    /// Remove these keys. Unknown keys are ignored.
    async fn unset(&self, keys: Vec<K>) -> RepoResult<()>;

    /// Remove every key mapped to one of these values.
    async fn unset_with_values(&self, values: Vec<V>) -> RepoResult<()>;

    /// Subscribe to every accepted write, sets and removals interleaved in
    /// the order the repo applied them.
    fn changes(&self) -> ChangeStream<KeyValueChange<K, V>>;

    /// Only the `(key, value)` pairs that were set.
    ///
    /// Lag is dropped silently here; use [`changes`](Self::changes) when
    /// missing an update matters.
    fn on_new_value(&self) -> BoxStream<'static, (K, V)> {
        self.changes()
            .filter_map(|change| {
                ready(match change {
                    Ok(KeyValueChange::Set(key, value)) => Some((key, value)),
                    _ => None,
                })
            })
            .boxed()
    }

    /// Only the keys that were removed.
    fn on_value_removed(&self) -> BoxStream<'static, K> {
        self.changes()
            .filter_map(|change| {
                ready(match change {
                    Ok(KeyValueChange::Removed(key)) => Some(key),
                    _ => None,
                })
            })
            .boxed()
    }
}

/// A key-value repo with both halves.
pub trait KeyValueRepo<K, V>: ReadKeyValueRepo<K, V> + WriteKeyValueRepo<K, V>
where
    K: RepoKey,
    V: RepoValue + PartialEq,
{
}

impl<T, K, V> KeyValueRepo<K, V> for T
where
    T: ReadKeyValueRepo<K, V> + WriteKeyValueRepo<K, V>,
    K: RepoKey,
    V: RepoValue + PartialEq,
{
}
