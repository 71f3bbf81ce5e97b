//! Full-snapshot cache decorators for key-value repos.
//!
//! Reads follow the same rules as the CRUD decorators: the cache answers
//! aggregates only while it mirrors the whole store, and an aggregate miss
//! rebuilds the mirror. Writes are never applied at the call site. Instead
//! [`FullWriteKeyValueCacheRepo`] follows the store's change stream and
//! replays every accepted write into the cache, in the order the store
//! applied them.

use super::full_store::FullKvCache;
use super::protocol::{aggregate, do_or_take_and_actualize, point, trusted_contains};
use super::scope::SubscriptionScope;
use super::store::KvCacheStore;
use crate::events::{ChangeStream, KeyValueChange, MissedChanges};
use crate::key_value::{ReadKeyValueRepo, WriteKeyValueRepo};
use async_trait::async_trait;
use futures_util::StreamExt;
use indexmap::IndexMap;
use repocache_core::{
    get_all_paged, CacheConfig, Pagination, PaginationResult, RepoKey, RepoResult, RepoValue,
};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

// ============================================================================
// READ
// ============================================================================

/// Read-through cache in front of a [`ReadKeyValueRepo`].
pub struct FullReadKeyValueCacheRepo<K, V, R: ?Sized> {
    parent: Arc<R>,
    cache: Arc<FullKvCache<K, V>>,
    config: CacheConfig,
}

impl<K, V, R> Clone for FullReadKeyValueCacheRepo<K, V, R>
where
    R: ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            parent: Arc::clone(&self.parent),
            cache: Arc::clone(&self.cache),
            config: self.config.clone(),
        }
    }
}

impl<K, V, R> FullReadKeyValueCacheRepo<K, V, R>
where
    K: RepoKey,
    V: RepoValue + PartialEq,
    R: ReadKeyValueRepo<K, V> + ?Sized,
{
    pub fn new(parent: Arc<R>, cache: Arc<FullKvCache<K, V>>) -> Self {
        Self::from_parts(parent, cache, CacheConfig::default())
    }

    /// Fails with `RepoError::Config` if `config` does not validate.
    pub fn with_config(
        parent: Arc<R>,
        cache: Arc<FullKvCache<K, V>>,
        config: CacheConfig,
    ) -> RepoResult<Self> {
        config.validate()?;
        Ok(Self::from_parts(parent, cache, config))
    }

    fn from_parts(parent: Arc<R>, cache: Arc<FullKvCache<K, V>>, config: CacheConfig) -> Self {
        Self {
            parent,
            cache,
            config,
        }
    }

    pub fn parent(&self) -> &Arc<R> {
        &self.parent
    }

    pub fn cache(&self) -> &Arc<FullKvCache<K, V>> {
        &self.cache
    }

    /// Rebuild the cache from the backing repo.
    pub async fn actualize_all(&self) -> RepoResult<()> {
        self.rebuild_from(|| self.fetch_all()).await.map(|_| ())
    }

    /// Walks the keys in pages of `config.resync_page_size`, then loads each
    /// value. Keys removed in between are skipped.
    async fn fetch_all(&self) -> RepoResult<IndexMap<K, V>> {
        let page_size = self.config.resync_page_size;
        let keys = get_all_paged(page_size, |pagination| self.parent.keys(pagination, false)).await?;
        let mut entries = IndexMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.parent.get(&key).await? {
                entries.insert(key, value);
            }
        }
        Ok(entries)
    }

    /// Drop whatever the cache believes and rebuild it from the repo.
    pub async fn invalidate(&self) -> RepoResult<()> {
        self.actualize_all().await
    }

    async fn rebuild_from<F, Fut>(&self, fetch: F) -> RepoResult<IndexMap<K, V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RepoResult<IndexMap<K, V>>>,
    {
        let rebuild = self.cache.begin_rebuild().await;
        let entries = fetch().await?;
        let count = entries.len();

        if rebuild.commit(entries.clone()) {
            tracing::debug!(
                entries = count,
                page_size = self.config.resync_page_size,
                "Key-value cache resynchronized"
            );
        } else {
            tracing::debug!("Key-value cache cleared during resynchronization, result dropped");
        }
        Ok(entries)
    }

    async fn resync_if<T>(&self, needed: bool, value: T) -> RepoResult<T> {
        if needed {
            self.actualize_all().await?;
        }
        Ok(value)
    }
}

#[async_trait]
impl<K, V, R> ReadKeyValueRepo<K, V> for FullReadKeyValueCacheRepo<K, V, R>
where
    K: RepoKey,
    V: RepoValue + PartialEq,
    R: ReadKeyValueRepo<K, V> + ?Sized,
{
    async fn get(&self, key: &K) -> RepoResult<Option<V>> {
        let (cached, ticket) = self
            .cache
            .read(|view| (point(view, key).map(Some), view.fill_ticket()));
        do_or_take_and_actualize(
            "get",
            cached,
            || self.parent.get(key),
            |found| async move {
                if let Some(value) = &found {
                    self.cache.remember(ticket, key.clone(), value.clone());
                }
                Ok(found)
            },
        )
        .await
    }

    async fn values(&self, pagination: Pagination, reversed: bool) -> RepoResult<PaginationResult<V>> {
        let cached = self
            .cache
            .read(|view| aggregate(view, |v| v.values(pagination, reversed)));
        do_or_take_and_actualize(
            "values",
            cached,
            || self.parent.values(pagination, reversed),
            |page| self.resync_if(!page.is_empty(), page),
        )
        .await
    }

    async fn keys(&self, pagination: Pagination, reversed: bool) -> RepoResult<PaginationResult<K>> {
        let cached = self
            .cache
            .read(|view| aggregate(view, |v| v.keys(pagination, reversed)));
        do_or_take_and_actualize(
            "keys",
            cached,
            || self.parent.keys(pagination, reversed),
            |page| self.resync_if(!page.is_empty(), page),
        )
        .await
    }

    async fn keys_by_value(
        &self,
        value: &V,
        pagination: Pagination,
        reversed: bool,
    ) -> RepoResult<PaginationResult<K>> {
        let cached = self
            .cache
            .read(|view| aggregate(view, |v| v.keys_by_value(value, pagination, reversed)));
        do_or_take_and_actualize(
            "keys_by_value",
            cached,
            || self.parent.keys_by_value(value, pagination, reversed),
            |page| self.resync_if(!page.is_empty(), page),
        )
        .await
    }

    async fn contains(&self, key: &K) -> RepoResult<bool> {
        let (cached, ticket) = self
            .cache
            .read(|view| (trusted_contains(view, key), view.fill_ticket()));
        do_or_take_and_actualize(
            "contains",
            cached,
            || self.parent.contains(key),
            |exists| async move {
                if exists {
                    if let Some(value) = self.parent.get(key).await? {
                        self.cache.remember(ticket, key.clone(), value);
                    }
                }
                Ok(exists)
            },
        )
        .await
    }

    async fn count(&self) -> RepoResult<u64> {
        let cached = self.cache.read(|view| aggregate(view, |v| v.count()));
        do_or_take_and_actualize(
            "count",
            cached,
            || self.parent.count(),
            |count| self.resync_if(count != 0, count),
        )
        .await
    }

    async fn get_all(&self) -> RepoResult<IndexMap<K, V>> {
        let cached = self.cache.read(|view| aggregate(view, |v| v.get_all()));
        if let Some(all) = cached.into_option() {
            return Ok(all);
        }
        tracing::debug!(operation = "get_all", "Cache miss, reading backing store");
        self.rebuild_from(|| self.fetch_all()).await
    }
}

// ============================================================================
// WRITE
// ============================================================================

/// Write path of a key-value cache.
///
/// Writes pass straight through to the backing repo. The cache learns about
/// them from the repo's change stream, which is subscribed in the
/// constructor so no write accepted after construction can be missed.
pub struct FullWriteKeyValueCacheRepo<K, V, R: ?Sized, C> {
    parent: Arc<R>,
    cache: Arc<C>,
    _entries: PhantomData<fn(K, V)>,
}

impl<K, V, R, C> Clone for FullWriteKeyValueCacheRepo<K, V, R, C>
where
    R: ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            parent: Arc::clone(&self.parent),
            cache: Arc::clone(&self.cache),
            _entries: PhantomData,
        }
    }
}

impl<K, V, R, C> FullWriteKeyValueCacheRepo<K, V, R, C>
where
    K: RepoKey,
    V: RepoValue + PartialEq,
    R: WriteKeyValueRepo<K, V> + ?Sized,
    C: KvCacheStore<K, V> + 'static,
{
    /// Wrap `parent` and start mirroring its writes into `cache`.
    ///
    /// The mirroring task lives on `scope` and stops with it. Must be called
    /// from within a Tokio runtime.
    pub fn new(parent: Arc<R>, cache: Arc<C>, scope: &SubscriptionScope) -> Self {
        let changes = parent.changes();
        scope.spawn("key_value_write_through", follow_changes(changes, Arc::clone(&cache)));
        Self {
            parent,
            cache,
            _entries: PhantomData,
        }
    }

    pub fn parent(&self) -> &Arc<R> {
        &self.parent
    }

    pub fn cache(&self) -> &Arc<C> {
        &self.cache
    }
}

async fn follow_changes<K, V, C>(mut changes: ChangeStream<KeyValueChange<K, V>>, cache: Arc<C>)
where
    K: RepoKey,
    V: RepoValue,
    C: KvCacheStore<K, V>,
{
    while let Some(change) = changes.next().await {
        match change {
            Ok(change) => apply_change(cache.as_ref(), change),
            Err(MissedChanges(missed)) => {
                tracing::warn!(missed, "Cache fell behind its store's changes, clearing it");
                cache.clear();
            }
        }
    }
}

fn apply_change<K, V, C>(cache: &C, change: KeyValueChange<K, V>)
where
    K: RepoKey,
    V: RepoValue,
    C: KvCacheStore<K, V> + ?Sized,
{
    match change {
        KeyValueChange::Set(key, value) => cache.set(key, value),
        KeyValueChange::Removed(key) => cache.unset(&key),
    }
}

#[async_trait]
impl<K, V, R, C> WriteKeyValueRepo<K, V> for FullWriteKeyValueCacheRepo<K, V, R, C>
where
    K: RepoKey,
    V: RepoValue + PartialEq,
    R: WriteKeyValueRepo<K, V> + ?Sized,
    C: KvCacheStore<K, V> + 'static,
{
    async fn set(&self, entries: Vec<(K, V)>) -> RepoResult<()> {
        self.parent.set(entries).await
    }

    async fn unset(&self, keys: Vec<K>) -> RepoResult<()> {
        self.parent.unset(keys).await
    }

    async fn unset_with_values(&self, values: Vec<V>) -> RepoResult<()> {
        self.parent.unset_with_values(values).await
    }

    fn changes(&self) -> ChangeStream<KeyValueChange<K, V>> {
        self.parent.changes()
    }
}

// ============================================================================
// COMBINED
// ============================================================================

/// Read-through cache over a writable key-value repo, kept current by the
/// repo's change stream.
pub struct FullKeyValueCacheRepo<K, V, R: ?Sized> {
    read: FullReadKeyValueCacheRepo<K, V, R>,
    write: FullWriteKeyValueCacheRepo<K, V, R, FullKvCache<K, V>>,
}

impl<K, V, R> Clone for FullKeyValueCacheRepo<K, V, R>
where
    R: ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            read: self.read.clone(),
            write: self.write.clone(),
        }
    }
}

impl<K, V, R> FullKeyValueCacheRepo<K, V, R>
where
    K: RepoKey,
    V: RepoValue + PartialEq,
    R: ReadKeyValueRepo<K, V> + WriteKeyValueRepo<K, V> + ?Sized,
{
    /// Must be called from within a Tokio runtime.
    pub fn new(parent: Arc<R>, cache: Arc<FullKvCache<K, V>>, scope: &SubscriptionScope) -> Self {
        Self::from_parts(parent, cache, scope, CacheConfig::default())
    }

    /// Must be called from within a Tokio runtime. Fails with
    /// `RepoError::Config` before subscribing if `config` does not validate.
    pub fn with_config(
        parent: Arc<R>,
        cache: Arc<FullKvCache<K, V>>,
        scope: &SubscriptionScope,
        config: CacheConfig,
    ) -> RepoResult<Self> {
        config.validate()?;
        Ok(Self::from_parts(parent, cache, scope, config))
    }

    fn from_parts(
        parent: Arc<R>,
        cache: Arc<FullKvCache<K, V>>,
        scope: &SubscriptionScope,
        config: CacheConfig,
    ) -> Self {
        Self {
            write: FullWriteKeyValueCacheRepo::new(Arc::clone(&parent), Arc::clone(&cache), scope),
            read: FullReadKeyValueCacheRepo::from_parts(parent, cache, config),
        }
    }

    pub fn cache(&self) -> &Arc<FullKvCache<K, V>> {
        self.read.cache()
    }

    pub fn parent(&self) -> &Arc<R> {
        self.read.parent()
    }

    /// Rebuild the cache from the backing repo.
    pub async fn invalidate(&self) -> RepoResult<()> {
        self.read.invalidate().await
    }
}

#[async_trait]
impl<K, V, R> ReadKeyValueRepo<K, V> for FullKeyValueCacheRepo<K, V, R>
where
    K: RepoKey,
    V: RepoValue + PartialEq,
    R: ReadKeyValueRepo<K, V> + WriteKeyValueRepo<K, V> + ?Sized,
{
    async fn get(&self, key: &K) -> RepoResult<Option<V>> {
        self.read.get(key).await
    }

    async fn values(&self, pagination: Pagination, reversed: bool) -> RepoResult<PaginationResult<V>> {
        self.read.values(pagination, reversed).await
    }

    async fn keys(&self, pagination: Pagination, reversed: bool) -> RepoResult<PaginationResult<K>> {
        self.read.keys(pagination, reversed).await
    }

    async fn keys_by_value(
        &self,
        value: &V,
        pagination: Pagination,
        reversed: bool,
    ) -> RepoResult<PaginationResult<K>> {
        self.read.keys_by_value(value, pagination, reversed).await
    }

    async fn contains(&self, key: &K) -> RepoResult<bool> {
        self.read.contains(key).await
    }

    async fn count(&self) -> RepoResult<u64> {
        self.read.count().await
    }

    async fn get_all(&self) -> RepoResult<IndexMap<K, V>> {
        self.read.get_all().await
    }
}

#[async_trait]
impl<K, V, R> WriteKeyValueRepo<K, V> for FullKeyValueCacheRepo<K, V, R>
where
    K: RepoKey,
    V: RepoValue + PartialEq,
    R: ReadKeyValueRepo<K, V> + WriteKeyValueRepo<K, V> + ?Sized,
{
    async fn set(&self, entries: Vec<(K, V)>) -> RepoResult<()> {
        self.write.set(entries).await
    }

    async fn unset(&self, keys: Vec<K>) -> RepoResult<()> {
        self.write.unset(keys).await
    }

    async fn unset_with_values(&self, values: Vec<V>) -> RepoResult<()> {
        self.write.unset_with_values(values).await
    }

    fn changes(&self) -> ChangeStream<KeyValueChange<K, V>> {
        self.write.changes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::KvCache;
    use crate::events::ChangeSender;
    use crate::in_memory::MapKeyValueRepo;
    use std::time::Duration;

    async fn settle(mut done: impl FnMut() -> bool) {
        for _ in 0..200 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_reads_resync_and_then_stay_local() {
        let parent = Arc::new(MapKeyValueRepo::from_entries([(1, "a"), (2, "b"), (3, "a")]));
        let repo = FullReadKeyValueCacheRepo::new(Arc::clone(&parent), Arc::new(FullKvCache::new()));

        let keys = repo.keys_by_value(&"a", Pagination::new(0, 10), false).await.unwrap();
        assert_eq!(keys.results, vec![1, 3]);
        assert!(repo.cache().is_actualized());

        // Reversed pages come from the cache and match the repo.
        let local = repo.values(Pagination::new(0, 2), true).await.unwrap();
        let remote = parent.values(Pagination::new(0, 2), true).await.unwrap();
        assert_eq!(local, remote);
    }

    #[tokio::test]
    async fn test_get_point_fills_without_actualizing() {
        let parent = Arc::new(MapKeyValueRepo::from_entries([(1, "a")]));
        let repo = FullReadKeyValueCacheRepo::new(parent, Arc::new(FullKvCache::new()));

        assert_eq!(repo.get(&1).await.unwrap(), Some("a"));
        assert_eq!(repo.get(&2).await.unwrap(), None);
        assert_eq!(repo.cache().get(&1), Some("a"));
        assert!(!repo.cache().is_actualized());
    }

    #[tokio::test]
    async fn test_write_through_follows_store_order() {
        let scope = SubscriptionScope::new();
        let parent = Arc::new(MapKeyValueRepo::<i32, &str>::new());
        let repo = FullKeyValueCacheRepo::new(Arc::clone(&parent), Arc::new(FullKvCache::new()), &scope);

        repo.set(vec![(1, "a"), (2, "b")]).await.unwrap();
        repo.unset(vec![1]).await.unwrap();
        repo.set(vec![(1, "c")]).await.unwrap();
        repo.unset_with_values(vec!["b"]).await.unwrap();

        let cache = Arc::clone(repo.cache());
        settle(|| cache.get(&1) == Some("c") && cache.get(&2).is_none()).await;
        scope.shutdown().await;
    }

    #[tokio::test]
    async fn test_write_through_into_plain_cache() {
        let scope = SubscriptionScope::new();
        let parent = Arc::new(MapKeyValueRepo::<String, i32>::new());
        let cache = Arc::new(KvCache::new());
        let writer = FullWriteKeyValueCacheRepo::new(Arc::clone(&parent), Arc::clone(&cache), &scope);

        writer.set(vec![("k".to_string(), 1)]).await.unwrap();
        settle(|| cache.get(&"k".to_string()) == Some(1)).await;

        // Writes made directly on the store are mirrored too.
        parent.unset(vec!["k".to_string()]).await.unwrap();
        settle(|| cache.is_empty()).await;
        scope.shutdown().await;
    }

    #[tokio::test]
    async fn test_lag_clears_cache() {
        let sender = ChangeSender::new(1);
        let cache = Arc::new(FullKvCache::new());
        cache.begin_rebuild().await.commit([(0, 0)]);

        let changes = sender.subscribe();
        sender.emit(KeyValueChange::Set(1, 1));
        sender.emit(KeyValueChange::Set(2, 2));
        sender.emit(KeyValueChange::Set(3, 3));
        drop(sender);

        follow_changes(changes, Arc::clone(&cache)).await;

        assert!(!cache.is_actualized());
        assert_eq!(cache.get(&0), None);
        assert_eq!(cache.get(&3), Some(3));
    }

    #[tokio::test]
    async fn test_cancelled_scope_stops_mirroring() {
        let scope = SubscriptionScope::new();
        let parent = Arc::new(MapKeyValueRepo::<i32, i32>::new());
        let cache = Arc::new(KvCache::new());
        let _writer = FullWriteKeyValueCacheRepo::new(Arc::clone(&parent), Arc::clone(&cache), &scope);

        scope.shutdown().await;
        parent.set(vec![(1, 1)]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_zero_page_size_is_rejected() {
        let config = CacheConfig::new().with_resync_page_size(0);
        let parent = Arc::new(MapKeyValueRepo::<i32, i32>::new());

        let read: RepoResult<FullReadKeyValueCacheRepo<i32, i32, _>> = FullReadKeyValueCacheRepo::with_config(
            Arc::clone(&parent),
            Arc::new(FullKvCache::new()),
            config.clone(),
        );
        assert!(matches!(read, Err(repocache_core::RepoError::Config(_))));

        let scope = SubscriptionScope::new();
        let full: RepoResult<FullKeyValueCacheRepo<i32, i32, _>> =
            FullKeyValueCacheRepo::with_config(parent, Arc::new(FullKvCache::new()), &scope, config);
        assert!(matches!(full, Err(repocache_core::RepoError::Config(_))));
        scope.shutdown().await;
    }
}
