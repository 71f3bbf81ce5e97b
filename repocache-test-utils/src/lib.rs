//! repocache Test Utilities
//!
//! Shared test infrastructure for the repocache workspace:
//! - Instrumented repos (call counting, always failing, panic on touch)
//! - Proptest generators for datasets, page requests and write sequences
//! - Test fixtures for common scenarios
//! - Custom assertions

// Re-export the in-memory repos tests are built on
pub use repocache_storage::{MapCrudRepo, MapKeyValueRepo};

// Re-export core types for convenience
pub use repocache_core::{
    CacheConfig, Optional, Pagination, PaginationResult, RepoError, RepoResult, StoreError,
};

use async_trait::async_trait;
use indexmap::IndexMap;
use repocache_core::{RepoKey, RepoValue};
use repocache_storage::{
    ChangeSender, ChangeStream, CrudChange, KeyValueChange, ReadCrudRepo, ReadKeyValueRepo,
    WriteCrudRepo, WriteKeyValueRepo,
};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// ============================================================================
// INSTRUMENTED REPOS
// ============================================================================

/// Counts read calls reaching a wrapped repo.
///
/// Writes and change subscriptions are forwarded without being counted, so
/// the counter answers "how often did the cache fall through to the store".
pub struct CountingRepo<R: ?Sized> {
    inner: Arc<R>,
    reads: AtomicUsize,
}

impl<R: ?Sized> CountingRepo<R> {
    pub fn new(inner: Arc<R>) -> Self {
        Self {
            inner,
            reads: AtomicUsize::new(0),
        }
    }

    /// Number of reads forwarded so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.reads.store(0, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &Arc<R> {
        &self.inner
    }

    fn hit(&self) -> &R {
        self.reads.fetch_add(1, Ordering::SeqCst);
        &self.inner
    }
}

#[async_trait]
impl<K, V, R> ReadKeyValueRepo<K, V> for CountingRepo<R>
where
    K: RepoKey,
    V: RepoValue + PartialEq,
    R: ReadKeyValueRepo<K, V> + ?Sized,
{
    async fn get(&self, key: &K) -> RepoResult<Option<V>> {
        self.hit().get(key).await
    }

    async fn values(&self, pagination: Pagination, reversed: bool) -> RepoResult<PaginationResult<V>> {
        self.hit().values(pagination, reversed).await
    }

    async fn keys(&self, pagination: Pagination, reversed: bool) -> RepoResult<PaginationResult<K>> {
        self.hit().keys(pagination, reversed).await
    }

    async fn keys_by_value(
        &self,
        value: &V,
        pagination: Pagination,
        reversed: bool,
    ) -> RepoResult<PaginationResult<K>> {
        self.hit().keys_by_value(value, pagination, reversed).await
    }

    async fn contains(&self, key: &K) -> RepoResult<bool> {
        self.hit().contains(key).await
    }

    async fn count(&self) -> RepoResult<u64> {
        self.hit().count().await
    }

    async fn get_all(&self) -> RepoResult<IndexMap<K, V>> {
        self.hit().get_all().await
    }
}

#[async_trait]
impl<K, V, R> WriteKeyValueRepo<K, V> for CountingRepo<R>
where
    K: RepoKey,
    V: RepoValue + PartialEq,
    R: WriteKeyValueRepo<K, V> + ?Sized,
{
    async fn set(&self, entries: Vec<(K, V)>) -> RepoResult<()> {
        self.inner.set(entries).await
    }

    async fn unset(&self, keys: Vec<K>) -> RepoResult<()> {
        self.inner.unset(keys).await
    }

    async fn unset_with_values(&self, values: Vec<V>) -> RepoResult<()> {
        self.inner.unset_with_values(values).await
    }

    fn changes(&self) -> ChangeStream<KeyValueChange<K, V>> {
        self.inner.changes()
    }
}

#[async_trait]
impl<O, Id, R> ReadCrudRepo<O, Id> for CountingRepo<R>
where
    O: RepoValue,
    Id: RepoKey,
    R: ReadCrudRepo<O, Id> + ?Sized,
{
    async fn get_by_id(&self, id: &Id) -> RepoResult<Option<O>> {
        self.hit().get_by_id(id).await
    }

    async fn get_by_pagination(&self, pagination: Pagination) -> RepoResult<PaginationResult<O>> {
        self.hit().get_by_pagination(pagination).await
    }

    async fn get_ids_by_pagination(&self, pagination: Pagination) -> RepoResult<PaginationResult<Id>> {
        self.hit().get_ids_by_pagination(pagination).await
    }

    async fn count(&self) -> RepoResult<u64> {
        self.hit().count().await
    }

    async fn contains(&self, id: &Id) -> RepoResult<bool> {
        self.hit().contains(id).await
    }

    async fn get_all(&self) -> RepoResult<IndexMap<Id, O>> {
        self.hit().get_all().await
    }
}

#[async_trait]
impl<O, Id, I, R> WriteCrudRepo<O, Id, I> for CountingRepo<R>
where
    O: RepoValue,
    Id: RepoKey,
    I: Send + 'static,
    R: WriteCrudRepo<O, Id, I> + ?Sized,
{
    async fn create(&self, values: Vec<I>) -> RepoResult<Vec<O>> {
        self.inner.create(values).await
    }

    async fn update(&self, id: Id, value: I) -> RepoResult<Option<O>> {
        self.inner.update(id, value).await
    }

    async fn delete_by_ids(&self, ids: Vec<Id>) -> RepoResult<()> {
        self.inner.delete_by_ids(ids).await
    }

    fn changes(&self) -> ChangeStream<CrudChange<O, Id>> {
        self.inner.changes()
    }
}

/// A repo whose every call fails with [`StoreError::Unavailable`].
pub struct FailingRepo<K, V> {
    reason: String,
    changes_kv: ChangeSender<KeyValueChange<K, V>>,
    changes_crud: ChangeSender<CrudChange<V, K>>,
    _entries: PhantomData<fn() -> (K, V)>,
}

impl<K, V> FailingRepo<K, V>
where
    K: RepoKey,
    V: RepoValue,
{
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            changes_kv: ChangeSender::new(1),
            changes_crud: ChangeSender::new(1),
            _entries: PhantomData,
        }
    }

    /// The error every call returns.
    pub fn error(&self) -> RepoError {
        StoreError::unavailable(self.reason.clone()).into()
    }

    fn fail<T>(&self) -> RepoResult<T> {
        Err(self.error())
    }
}

#[async_trait]
impl<K, V> ReadKeyValueRepo<K, V> for FailingRepo<K, V>
where
    K: RepoKey,
    V: RepoValue + PartialEq,
{
    async fn get(&self, _key: &K) -> RepoResult<Option<V>> {
        self.fail()
    }

    async fn values(&self, _pagination: Pagination, _reversed: bool) -> RepoResult<PaginationResult<V>> {
        self.fail()
    }

    async fn keys(&self, _pagination: Pagination, _reversed: bool) -> RepoResult<PaginationResult<K>> {
        self.fail()
    }

    async fn keys_by_value(
        &self,
        _value: &V,
        _pagination: Pagination,
        _reversed: bool,
    ) -> RepoResult<PaginationResult<K>> {
        self.fail()
    }

    async fn contains(&self, _key: &K) -> RepoResult<bool> {
        self.fail()
    }

    async fn count(&self) -> RepoResult<u64> {
        self.fail()
    }
}

#[async_trait]
impl<K, V> WriteKeyValueRepo<K, V> for FailingRepo<K, V>
where
    K: RepoKey,
    V: RepoValue + PartialEq,
{
    async fn set(&self, _entries: Vec<(K, V)>) -> RepoResult<()> {
        self.fail()
    }

    async fn unset(&self, _keys: Vec<K>) -> RepoResult<()> {
        self.fail()
    }

    async fn unset_with_values(&self, _values: Vec<V>) -> RepoResult<()> {
        self.fail()
    }

    fn changes(&self) -> ChangeStream<KeyValueChange<K, V>> {
        self.changes_kv.subscribe()
    }
}

#[async_trait]
impl<K, V> ReadCrudRepo<V, K> for FailingRepo<K, V>
where
    K: RepoKey,
    V: RepoValue,
{
    async fn get_by_id(&self, _id: &K) -> RepoResult<Option<V>> {
        self.fail()
    }

    async fn get_by_pagination(&self, _pagination: Pagination) -> RepoResult<PaginationResult<V>> {
        self.fail()
    }

    async fn get_ids_by_pagination(&self, _pagination: Pagination) -> RepoResult<PaginationResult<K>> {
        self.fail()
    }

    async fn count(&self) -> RepoResult<u64> {
        self.fail()
    }

    async fn contains(&self, _id: &K) -> RepoResult<bool> {
        self.fail()
    }
}

#[async_trait]
impl<K, V, I> WriteCrudRepo<V, K, I> for FailingRepo<K, V>
where
    K: RepoKey,
    V: RepoValue,
    I: Send + 'static,
{
    async fn create(&self, _values: Vec<I>) -> RepoResult<Vec<V>> {
        self.fail()
    }

    async fn update(&self, _id: K, _value: I) -> RepoResult<Option<V>> {
        self.fail()
    }

    async fn delete_by_ids(&self, _ids: Vec<K>) -> RepoResult<()> {
        self.fail()
    }

    fn changes(&self) -> ChangeStream<CrudChange<V, K>> {
        self.changes_crud.subscribe()
    }
}

/// A read-only repo that panics if touched.
///
/// Put it behind a cache to prove an answer came from the cache alone.
pub struct PanickingRepo<K, V> {
    _entries: PhantomData<fn() -> (K, V)>,
}

impl<K, V> PanickingRepo<K, V> {
    pub fn new() -> Self {
        Self {
            _entries: PhantomData,
        }
    }
}

impl<K, V> Default for PanickingRepo<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

fn touched(operation: &str) -> ! {
    panic!("backing store touched: {operation}")
}

#[async_trait]
impl<K, V> ReadKeyValueRepo<K, V> for PanickingRepo<K, V>
where
    K: RepoKey,
    V: RepoValue + PartialEq,
{
    async fn get(&self, _key: &K) -> RepoResult<Option<V>> {
        touched("get")
    }

    async fn values(&self, _pagination: Pagination, _reversed: bool) -> RepoResult<PaginationResult<V>> {
        touched("values")
    }

    async fn keys(&self, _pagination: Pagination, _reversed: bool) -> RepoResult<PaginationResult<K>> {
        touched("keys")
    }

    async fn keys_by_value(
        &self,
        _value: &V,
        _pagination: Pagination,
        _reversed: bool,
    ) -> RepoResult<PaginationResult<K>> {
        touched("keys_by_value")
    }

    async fn contains(&self, _key: &K) -> RepoResult<bool> {
        touched("contains")
    }

    async fn count(&self) -> RepoResult<u64> {
        touched("count")
    }

    async fn get_all(&self) -> RepoResult<IndexMap<K, V>> {
        touched("get_all")
    }
}

#[async_trait]
impl<K, V> ReadCrudRepo<V, K> for PanickingRepo<K, V>
where
    K: RepoKey,
    V: RepoValue,
{
    async fn get_by_id(&self, _id: &K) -> RepoResult<Option<V>> {
        touched("get_by_id")
    }

    async fn get_by_pagination(&self, _pagination: Pagination) -> RepoResult<PaginationResult<V>> {
        touched("get_by_pagination")
    }

    async fn get_ids_by_pagination(&self, _pagination: Pagination) -> RepoResult<PaginationResult<K>> {
        touched("get_ids_by_pagination")
    }

    async fn count(&self) -> RepoResult<u64> {
        touched("count")
    }

    async fn contains(&self, _id: &K) -> RepoResult<bool> {
        touched("contains")
    }

    async fn get_all(&self) -> RepoResult<IndexMap<K, V>> {
        touched("get_all")
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for repo contents and operations.

    use super::*;
    use proptest::prelude::*;

    /// A write applied to a key-value repo.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum KvOp {
        Set(u16, String),
        Unset(u16),
        UnsetValue(String),
    }

    /// Small key space so writes collide often.
    pub fn arb_key() -> impl Strategy<Value = u16> {
        0u16..32
    }

    /// Small value space so reverse lookups find several keys.
    pub fn arb_value() -> impl Strategy<Value = String> {
        "[a-d]{1,2}"
    }

    /// Unique-key entries in a random insertion order.
    pub fn arb_entries(max: usize) -> impl Strategy<Value = Vec<(u16, String)>> {
        prop::collection::vec((arb_key(), arb_value()), 0..=max).prop_map(|entries| {
            let mut seen = IndexMap::new();
            for (key, value) in entries {
                seen.entry(key).or_insert(value);
            }
            seen.into_iter().collect()
        })
    }

    /// Page requests, including pages past the end.
    pub fn arb_pagination() -> impl Strategy<Value = Pagination> {
        (0u64..6, 1u64..12).prop_map(|(page, size)| Pagination::new(page, size))
    }

    pub fn arb_kv_op() -> impl Strategy<Value = KvOp> {
        prop_oneof![
            3 => (arb_key(), arb_value()).prop_map(|(key, value)| KvOp::Set(key, value)),
            2 => arb_key().prop_map(KvOp::Unset),
            1 => arb_value().prop_map(KvOp::UnsetValue),
        ]
    }

    pub fn arb_kv_ops(max: usize) -> impl Strategy<Value = Vec<KvOp>> {
        prop::collection::vec(arb_kv_op(), 0..=max)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common testing scenarios.

    use super::*;
    use std::future::Future;
    use std::time::Duration;
    use uuid::Uuid;

    /// A stored object with a repo-assigned id.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Article {
        pub id: Uuid,
        pub title: String,
    }

    /// Id extractor for [`Article`].
    pub fn article_id(article: &Article) -> Uuid {
        article.id
    }

    pub type ArticleRepo = MapCrudRepo<Article, Uuid, String>;

    /// An empty article repo that assigns time-ordered ids.
    pub fn article_repo() -> Arc<ArticleRepo> {
        Arc::new(MapCrudRepo::new(
            |title: String| {
                let id = Uuid::now_v7();
                (id, Article { id, title })
            },
            |id: &Uuid, _old: &Article, title: String| Article { id: *id, title },
        ))
    }

    /// A key-value repo holding `entries` in order.
    pub fn kv_repo<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Arc<MapKeyValueRepo<K, V>>
    where
        K: RepoKey,
        V: RepoValue + PartialEq,
    {
        Arc::new(MapKeyValueRepo::from_entries(entries))
    }

    /// Install a test log subscriber once, honouring `RUST_LOG`.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    /// Poll `check` until it holds or `timeout` passes.
    ///
    /// Returns whether the condition was reached.
    pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if check().await {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for repo results.

    use super::*;

    /// Assert that a result is the store's unavailable error.
    #[track_caller]
    pub fn assert_unavailable<T: std::fmt::Debug>(result: &RepoResult<T>) {
        match result {
            Err(RepoError::Store(StoreError::Unavailable { .. })) => {}
            other => panic!("Expected Unavailable store error, got: {:?}", other),
        }
    }

    /// Assert that two maps hold the same entries in the same order.
    #[track_caller]
    pub fn assert_same_entries<K, V>(actual: &IndexMap<K, V>, expected: &IndexMap<K, V>)
    where
        K: std::fmt::Debug + PartialEq,
        V: std::fmt::Debug + PartialEq,
    {
        let actual: Vec<_> = actual.iter().collect();
        let expected: Vec<_> = expected.iter().collect();
        assert_eq!(actual, expected, "Cache and store disagree");
    }
}
