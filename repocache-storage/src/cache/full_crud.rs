//! Full-snapshot cache decorators for CRUD repos.
//!
//! [`FullReadCrudCacheRepo`] serves reads from a [`FullKvCache`] whenever the
//! cache can answer completely, and otherwise reads the backing repo and
//! learns from the answer. A miss on any aggregate read (a page, the ids, the
//! count) rebuilds the whole collection rather than filling in the one page,
//! so the cache is either a full mirror or makes no claims at all.
//!
//! [`WriteCrudCacheRepo`] writes to the backing repo first and applies the
//! confirmed result to the cache before returning. [`FullCrudCacheRepo`]
//! combines both over one shared cache.

use super::full_store::FullKvCache;
use super::protocol::{aggregate, do_or_take_and_actualize, point, trusted_contains};
use super::store::KvCacheStore;
use crate::crud::{ReadCrudRepo, WriteCrudRepo};
use crate::events::{ChangeStream, CrudChange};
use async_trait::async_trait;
use indexmap::IndexMap;
use repocache_core::{
    get_all_paged, CacheConfig, Pagination, PaginationResult, RepoKey, RepoResult, RepoValue,
};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// Extracts the id of a stored object.
pub type IdGetter<O, Id> = Arc<dyn Fn(&O) -> Id + Send + Sync>;

// ============================================================================
// READ
// ============================================================================

/// Read-through cache in front of a [`ReadCrudRepo`].
pub struct FullReadCrudCacheRepo<O, Id, R: ?Sized> {
    parent: Arc<R>,
    cache: Arc<FullKvCache<Id, O>>,
    id_getter: IdGetter<O, Id>,
    config: CacheConfig,
}

impl<O, Id, R> Clone for FullReadCrudCacheRepo<O, Id, R>
where
    R: ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            parent: Arc::clone(&self.parent),
            cache: Arc::clone(&self.cache),
            id_getter: Arc::clone(&self.id_getter),
            config: self.config.clone(),
        }
    }
}

impl<O, Id, R> FullReadCrudCacheRepo<O, Id, R>
where
    O: RepoValue,
    Id: RepoKey,
    R: ReadCrudRepo<O, Id> + ?Sized,
{
    /// Create a cache with default configuration.
    pub fn new(
        parent: Arc<R>,
        cache: Arc<FullKvCache<Id, O>>,
        id_getter: impl Fn(&O) -> Id + Send + Sync + 'static,
    ) -> Self {
        Self::from_parts(parent, cache, Arc::new(id_getter), CacheConfig::default())
    }

    /// Create a cache with custom configuration.
    ///
    /// Fails with `RepoError::Config` if `config` does not validate.
    pub fn with_config(
        parent: Arc<R>,
        cache: Arc<FullKvCache<Id, O>>,
        id_getter: impl Fn(&O) -> Id + Send + Sync + 'static,
        config: CacheConfig,
    ) -> RepoResult<Self> {
        config.validate()?;
        Ok(Self::from_parts(parent, cache, Arc::new(id_getter), config))
    }

    fn from_parts(
        parent: Arc<R>,
        cache: Arc<FullKvCache<Id, O>>,
        id_getter: IdGetter<O, Id>,
        config: CacheConfig,
    ) -> Self {
        Self {
            parent,
            cache,
            id_getter,
            config,
        }
    }

    pub fn parent(&self) -> &Arc<R> {
        &self.parent
    }

    pub fn cache(&self) -> &Arc<FullKvCache<Id, O>> {
        &self.cache
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Rebuild the cache from the complete contents of the backing repo.
    ///
    /// Pages through the repo with `config.resync_page_size`. On error the
    /// cache keeps its previous state.
    pub async fn actualize_all(&self) -> RepoResult<()> {
        self.rebuild_from(|| self.fetch_all()).await.map(|_| ())
    }

    async fn fetch_all(&self) -> RepoResult<IndexMap<Id, O>> {
        let objects = get_all_paged(self.config.resync_page_size, |pagination| {
            self.parent.get_by_pagination(pagination)
        })
        .await?;
        Ok(objects
            .into_iter()
            .map(|object| ((self.id_getter)(&object), object))
            .collect())
    }

    /// Drop whatever the cache believes and rebuild it from the repo.
    pub async fn invalidate(&self) -> RepoResult<()> {
        self.actualize_all().await
    }

    /// Start a rebuild, fetch the whole set, and commit it.
    ///
    /// The rebuild is opened before fetching so writes that land while the
    /// fetch is running are replayed over the result.
    async fn rebuild_from<F, Fut>(&self, fetch: F) -> RepoResult<IndexMap<Id, O>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RepoResult<IndexMap<Id, O>>>,
    {
        let rebuild = self.cache.begin_rebuild().await;
        let entries = fetch().await?;
        let count = entries.len();

        if rebuild.commit(entries.clone()) {
            tracing::debug!(
                entries = count,
                page_size = self.config.resync_page_size,
                "Collection cache resynchronized"
            );
        } else {
            tracing::debug!("Collection cache cleared during resynchronization, result dropped");
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
impl<O, Id, R> ReadCrudRepo<O, Id> for FullReadCrudCacheRepo<O, Id, R>
where
    O: RepoValue,
    Id: RepoKey,
    R: ReadCrudRepo<O, Id> + ?Sized,
{
    async fn get_by_id(&self, id: &Id) -> RepoResult<Option<O>> {
        let (cached, ticket) = self
            .cache
            .read(|view| (point(view, id).map(Some), view.fill_ticket()));
        do_or_take_and_actualize(
            "get_by_id",
            cached,
            || self.parent.get_by_id(id),
            |found| async move {
                if let Some(object) = &found {
                    self.cache
                        .remember(ticket, (self.id_getter)(object), object.clone());
                }
                Ok(found)
            },
        )
        .await
    }

    async fn get_by_pagination(&self, pagination: Pagination) -> RepoResult<PaginationResult<O>> {
        let cached = self
            .cache
            .read(|view| aggregate(view, |v| v.values(pagination, false)));
        do_or_take_and_actualize(
            "get_by_pagination",
            cached,
            || self.parent.get_by_pagination(pagination),
            |page| self.resync_if(!page.is_empty(), page),
        )
        .await
    }

    async fn get_ids_by_pagination(&self, pagination: Pagination) -> RepoResult<PaginationResult<Id>> {
        let cached = self
            .cache
            .read(|view| aggregate(view, |v| v.keys(pagination, false)));
        do_or_take_and_actualize(
            "get_ids_by_pagination",
            cached,
            || self.parent.get_ids_by_pagination(pagination),
            |page| self.resync_if(!page.is_empty(), page),
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

    async fn contains(&self, id: &Id) -> RepoResult<bool> {
        let (cached, ticket) = self
            .cache
            .read(|view| (trusted_contains(view, id), view.fill_ticket()));
        do_or_take_and_actualize(
            "contains",
            cached,
            || self.parent.contains(id),
            |exists| async move {
                if exists {
                    if let Some(object) = self.parent.get_by_id(id).await? {
                        self.cache.remember(ticket, id.clone(), object);
                    }
                }
                Ok(exists)
            },
        )
        .await
    }

    async fn get_all(&self) -> RepoResult<IndexMap<Id, O>> {
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

/// Write path of a CRUD cache.
///
/// Every write goes to the backing repo first. Only what the repo confirms
/// is applied to the cache, before the call returns.
pub struct WriteCrudCacheRepo<O, Id, I, R: ?Sized> {
    parent: Arc<R>,
    cache: Arc<FullKvCache<Id, O>>,
    id_getter: IdGetter<O, Id>,
    _input: PhantomData<fn(I)>,
}

impl<O, Id, I, R> Clone for WriteCrudCacheRepo<O, Id, I, R>
where
    R: ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            parent: Arc::clone(&self.parent),
            cache: Arc::clone(&self.cache),
            id_getter: Arc::clone(&self.id_getter),
            _input: PhantomData,
        }
    }
}

impl<O, Id, I, R> WriteCrudCacheRepo<O, Id, I, R>
where
    O: RepoValue,
    Id: RepoKey,
    I: Send + 'static,
    R: WriteCrudRepo<O, Id, I> + ?Sized,
{
    pub fn new(
        parent: Arc<R>,
        cache: Arc<FullKvCache<Id, O>>,
        id_getter: impl Fn(&O) -> Id + Send + Sync + 'static,
    ) -> Self {
        Self::from_parts(parent, cache, Arc::new(id_getter))
    }

    fn from_parts(parent: Arc<R>, cache: Arc<FullKvCache<Id, O>>, id_getter: IdGetter<O, Id>) -> Self {
        Self {
            parent,
            cache,
            id_getter,
            _input: PhantomData,
        }
    }

    fn remember_written(&self, objects: &[O]) {
        self.cache.set_all(
            objects
                .iter()
                .map(|object| ((self.id_getter)(object), object.clone())),
        );
    }
}

#[async_trait]
impl<O, Id, I, R> WriteCrudRepo<O, Id, I> for WriteCrudCacheRepo<O, Id, I, R>
where
    O: RepoValue,
    Id: RepoKey,
    I: Send + 'static,
    R: WriteCrudRepo<O, Id, I> + ?Sized,
{
    async fn create(&self, values: Vec<I>) -> RepoResult<Vec<O>> {
        let created = self.parent.create(values).await?;
        self.remember_written(&created);
        Ok(created)
    }

    async fn update(&self, id: Id, value: I) -> RepoResult<Option<O>> {
        let updated = self.parent.update(id, value).await?;
        if let Some(object) = &updated {
            self.remember_written(std::slice::from_ref(object));
        }
        Ok(updated)
    }

    async fn update_many(&self, values: Vec<(Id, I)>) -> RepoResult<Vec<O>> {
        let updated = self.parent.update_many(values).await?;
        self.remember_written(&updated);
        Ok(updated)
    }

    async fn delete_by_ids(&self, ids: Vec<Id>) -> RepoResult<()> {
        self.parent.delete_by_ids(ids.clone()).await?;
        for id in &ids {
            self.cache.unset(id);
        }
        Ok(())
    }

    fn changes(&self) -> ChangeStream<CrudChange<O, Id>> {
        self.parent.changes()
    }
}

// ============================================================================
// COMBINED
// ============================================================================

/// Read-through, write-through cache in front of a full CRUD repo.
pub struct FullCrudCacheRepo<O, Id, I, R: ?Sized> {
    read: FullReadCrudCacheRepo<O, Id, R>,
    write: WriteCrudCacheRepo<O, Id, I, R>,
}

impl<O, Id, I, R> Clone for FullCrudCacheRepo<O, Id, I, R>
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

impl<O, Id, I, R> FullCrudCacheRepo<O, Id, I, R>
where
    O: RepoValue,
    Id: RepoKey,
    I: Send + 'static,
    R: ReadCrudRepo<O, Id> + WriteCrudRepo<O, Id, I> + ?Sized,
{
    pub fn new(
        parent: Arc<R>,
        cache: Arc<FullKvCache<Id, O>>,
        id_getter: impl Fn(&O) -> Id + Send + Sync + 'static,
    ) -> Self {
        Self::from_parts(parent, cache, Arc::new(id_getter), CacheConfig::default())
    }

    /// Fails with `RepoError::Config` if `config` does not validate.
    pub fn with_config(
        parent: Arc<R>,
        cache: Arc<FullKvCache<Id, O>>,
        id_getter: impl Fn(&O) -> Id + Send + Sync + 'static,
        config: CacheConfig,
    ) -> RepoResult<Self> {
        config.validate()?;
        Ok(Self::from_parts(parent, cache, Arc::new(id_getter), config))
    }

    fn from_parts(
        parent: Arc<R>,
        cache: Arc<FullKvCache<Id, O>>,
        id_getter: IdGetter<O, Id>,
        config: CacheConfig,
    ) -> Self {
        Self {
            read: FullReadCrudCacheRepo::from_parts(
                Arc::clone(&parent),
                Arc::clone(&cache),
                Arc::clone(&id_getter),
                config,
            ),
            write: WriteCrudCacheRepo::from_parts(parent, cache, id_getter),
        }
    }

    pub fn cache(&self) -> &Arc<FullKvCache<Id, O>> {
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
impl<O, Id, I, R> ReadCrudRepo<O, Id> for FullCrudCacheRepo<O, Id, I, R>
where
    O: RepoValue,
    Id: RepoKey,
    I: Send + 'static,
    R: ReadCrudRepo<O, Id> + WriteCrudRepo<O, Id, I> + ?Sized,
{
    async fn get_by_id(&self, id: &Id) -> RepoResult<Option<O>> {
        self.read.get_by_id(id).await
    }

    async fn get_by_pagination(&self, pagination: Pagination) -> RepoResult<PaginationResult<O>> {
        self.read.get_by_pagination(pagination).await
    }

    async fn get_ids_by_pagination(&self, pagination: Pagination) -> RepoResult<PaginationResult<Id>> {
        self.read.get_ids_by_pagination(pagination).await
    }

    async fn count(&self) -> RepoResult<u64> {
        self.read.count().await
    }

    async fn contains(&self, id: &Id) -> RepoResult<bool> {
        self.read.contains(id).await
    }

    async fn get_all(&self) -> RepoResult<IndexMap<Id, O>> {
        self.read.get_all().await
    }
}

#[async_trait]
impl<O, Id, I, R> WriteCrudRepo<O, Id, I> for FullCrudCacheRepo<O, Id, I, R>
where
    O: RepoValue,
    Id: RepoKey,
    I: Send + 'static,
    R: ReadCrudRepo<O, Id> + WriteCrudRepo<O, Id, I> + ?Sized,
{
    async fn create(&self, values: Vec<I>) -> RepoResult<Vec<O>> {
        self.write.create(values).await
    }

    async fn update(&self, id: Id, value: I) -> RepoResult<Option<O>> {
        self.write.update(id, value).await
    }

    async fn update_many(&self, values: Vec<(Id, I)>) -> RepoResult<Vec<O>> {
        self.write.update_many(values).await
    }

    async fn delete_by_ids(&self, ids: Vec<Id>) -> RepoResult<()> {
        self.write.delete_by_ids(ids).await
    }

    fn changes(&self) -> ChangeStream<CrudChange<O, Id>> {
        self.write.changes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::MapCrudRepo;
    use std::sync::atomic::{AtomicU32, Ordering};

    type Item = (u32, String);
    type Repo = MapCrudRepo<Item, u32, String>;

    fn repo() -> Arc<Repo> {
        let next = AtomicU32::new(1);
        Arc::new(MapCrudRepo::new(
            move |name: String| {
                let id = next.fetch_add(1, Ordering::Relaxed);
                (id, (id, name))
            },
            |id, _old, name| (*id, name),
        ))
    }

    fn cached(parent: Arc<Repo>) -> FullCrudCacheRepo<Item, u32, String, Repo> {
        FullCrudCacheRepo::new(parent, Arc::new(FullKvCache::new()), |item: &Item| item.0)
    }

    #[tokio::test]
    async fn test_page_miss_resyncs_everything() {
        let parent = repo();
        parent
            .create(vec!["a".into(), "b".into(), "c".into()])
            .await
            .unwrap();
        let repo = cached(parent);

        let page = repo.get_by_pagination(Pagination::new(0, 1)).await.unwrap();
        assert_eq!(page.results, vec![(1, "a".to_string())]);
        assert!(repo.cache().is_actualized());
        assert_eq!(repo.cache().count(), 3);
    }

    #[tokio::test]
    async fn test_empty_store_does_not_actualize_on_page_miss() {
        let repo = cached(repo());
        let page = repo.get_by_pagination(Pagination::new(0, 10)).await.unwrap();
        assert!(page.is_empty());
        assert_eq!(repo.count().await.unwrap(), 0);
        assert!(!repo.cache().is_actualized());
    }

    #[tokio::test]
    async fn test_get_by_id_fills_point_only() {
        let parent = repo();
        parent.create(vec!["a".into(), "b".into()]).await.unwrap();
        let repo = cached(parent);

        assert_eq!(repo.get_by_id(&2).await.unwrap(), Some((2, "b".to_string())));
        assert_eq!(repo.get_by_id(&9).await.unwrap(), None);
        assert_eq!(repo.cache().get(&2), Some((2, "b".to_string())));
        assert!(!repo.cache().is_actualized());
        assert_eq!(repo.cache().count(), 0);
    }

    #[tokio::test]
    async fn test_writes_update_cache_synchronously() {
        let repo = cached(repo());
        repo.invalidate().await.unwrap();

        let created = repo.create(vec!["x".into(), "y".into()]).await.unwrap();
        assert_eq!(created.len(), 2);
        assert_eq!(repo.cache().count(), 2);

        repo.update(1, "x2".into()).await.unwrap();
        assert_eq!(repo.cache().get(&1), Some((1, "x2".to_string())));

        repo.delete_by_ids(vec![2]).await.unwrap();
        assert!(!repo.cache().contains(&2));

        // Still actualized, so these are answered locally and agree with the repo.
        assert_eq!(repo.count().await.unwrap(), repo.parent().count().await.unwrap());
        assert_eq!(repo.get_all().await.unwrap(), repo.parent().get_all().await.unwrap());
    }

    #[tokio::test]
    async fn test_update_of_missing_object_leaves_cache_alone() {
        let repo = cached(repo());
        repo.invalidate().await.unwrap();
        assert_eq!(repo.update(5, "nope".into()).await.unwrap(), None);
        assert_eq!(repo.cache().count(), 0);
    }

    #[tokio::test]
    async fn test_contains_true_is_point_filled() {
        let parent = repo();
        let repo = cached(Arc::clone(&parent));
        repo.invalidate().await.unwrap();
        repo.create(vec!["a".into()]).await.unwrap();

        // Behind the cache's back.
        parent.create(vec!["b".into()]).await.unwrap();

        assert!(repo.contains(&2).await.unwrap());
        assert_eq!(repo.cache().get(&2), Some((2, "b".to_string())));
        assert_eq!(repo.get_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_zero_page_size_is_rejected() {
        let config = CacheConfig::new().with_resync_page_size(0);

        let read: RepoResult<FullReadCrudCacheRepo<Item, u32, Repo>> = FullReadCrudCacheRepo::with_config(
            repo(),
            Arc::new(FullKvCache::new()),
            |item: &Item| item.0,
            config.clone(),
        );
        assert!(matches!(read, Err(repocache_core::RepoError::Config(_))));

        let full: RepoResult<FullCrudCacheRepo<Item, u32, String, Repo>> =
            FullCrudCacheRepo::with_config(repo(), Arc::new(FullKvCache::new()), |item: &Item| item.0, config);
        assert!(matches!(full, Err(repocache_core::RepoError::Config(_))));
    }
}
