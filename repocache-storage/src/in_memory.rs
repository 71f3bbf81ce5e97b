//! In-memory repos.
//!
//! Insertion-ordered maps behind a lock. They are real backing stores, not
//! mocks: they paginate, count and notify exactly like a persistent store
//! would, which makes them the reference the caches are tested against.
//! Change notifications are emitted while the write lock is held, so
//! subscribers observe writes in the order they were applied.

use crate::crud::{ReadCrudRepo, WriteCrudRepo};
use crate::events::{ChangeSender, ChangeStream, CrudChange, KeyValueChange};
use crate::key_value::{ReadKeyValueRepo, WriteKeyValueRepo};
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;
use repocache_core::{
    paginate, CacheConfig, Pagination, PaginationResult, RepoKey, RepoResult, RepoValue,
    DEFAULT_NOTIFICATION_CAPACITY,
};

// ============================================================================
// KEY-VALUE
// ============================================================================

/// Insertion-ordered in-memory key-value repo.
pub struct MapKeyValueRepo<K, V> {
    map: RwLock<IndexMap<K, V>>,
    changes: ChangeSender<KeyValueChange<K, V>>,
}

impl<K, V> MapKeyValueRepo<K, V>
where
    K: RepoKey,
    V: RepoValue + PartialEq,
{
    /// Create an empty repo with default configuration.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_NOTIFICATION_CAPACITY)
    }

    /// Create an empty repo using `config.notification_capacity`.
    ///
    /// Fails with `RepoError::Config` if `config` does not validate.
    pub fn with_config(config: &CacheConfig) -> RepoResult<Self> {
        config.validate()?;
        Ok(Self::with_capacity(config.notification_capacity))
    }

    fn with_capacity(capacity: usize) -> Self {
        Self {
            map: RwLock::new(IndexMap::new()),
            changes: ChangeSender::new(capacity),
        }
    }

    /// Create a repo pre-filled with `entries`, without emitting changes.
    pub fn from_entries(entries: impl IntoIterator<Item = (K, V)>) -> Self {
        let repo = Self::new();
        repo.map.write().extend(entries);
        repo
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> IndexMap<K, V> {
        self.map.read().clone()
    }
}

impl<K, V> Default for MapKeyValueRepo<K, V>
where
    K: RepoKey,
    V: RepoValue + PartialEq,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K, V> ReadKeyValueRepo<K, V> for MapKeyValueRepo<K, V>
where
    K: RepoKey,
    V: RepoValue + PartialEq,
{
    async fn get(&self, key: &K) -> RepoResult<Option<V>> {
        Ok(self.map.read().get(key).cloned())
    }

    async fn values(&self, pagination: Pagination, reversed: bool) -> RepoResult<PaginationResult<V>> {
        Ok(paginate(self.map.read().values().cloned(), pagination, reversed))
    }

    async fn keys(&self, pagination: Pagination, reversed: bool) -> RepoResult<PaginationResult<K>> {
        Ok(paginate(self.map.read().keys().cloned(), pagination, reversed))
    }

    async fn keys_by_value(
        &self,
        value: &V,
        pagination: Pagination,
        reversed: bool,
    ) -> RepoResult<PaginationResult<K>> {
        let matching: Vec<K> = self
            .map
            .read()
            .iter()
            .filter(|(_, v)| *v == value)
            .map(|(k, _)| k.clone())
            .collect();
        Ok(paginate(matching, pagination, reversed))
    }

    async fn contains(&self, key: &K) -> RepoResult<bool> {
        Ok(self.map.read().contains_key(key))
    }

    async fn count(&self) -> RepoResult<u64> {
        Ok(self.map.read().len() as u64)
    }

    async fn get_all(&self) -> RepoResult<IndexMap<K, V>> {
        Ok(self.snapshot())
    }
}

#[async_trait]
impl<K, V> WriteKeyValueRepo<K, V> for MapKeyValueRepo<K, V>
where
    K: RepoKey,
    V: RepoValue + PartialEq,
{
    async fn set(&self, entries: Vec<(K, V)>) -> RepoResult<()> {
        let mut map = self.map.write();
        for (key, value) in entries {
            map.insert(key.clone(), value.clone());
            self.changes.emit(KeyValueChange::Set(key, value));
        }
        Ok(())
    }

    async fn unset(&self, keys: Vec<K>) -> RepoResult<()> {
        let mut map = self.map.write();
        for key in keys {
            if map.shift_remove(&key).is_some() {
                self.changes.emit(KeyValueChange::Removed(key));
            }
        }
        Ok(())
    }

    async fn unset_with_values(&self, values: Vec<V>) -> RepoResult<()> {
        let mut map = self.map.write();
        let doomed: Vec<K> = map
            .iter()
            .filter(|(_, v)| values.contains(v))
            .map(|(k, _)| k.clone())
            .collect();
        for key in doomed {
            map.shift_remove(&key);
            self.changes.emit(KeyValueChange::Removed(key));
        }
        Ok(())
    }

    fn changes(&self) -> ChangeStream<KeyValueChange<K, V>> {
        self.changes.subscribe()
    }
}

// ============================================================================
// CRUD
// ============================================================================

type CreateFn<I, Id, O> = Box<dyn Fn(I) -> (Id, O) + Send + Sync>;
type UpdateFn<I, Id, O> = Box<dyn Fn(&Id, &O, I) -> O + Send + Sync>;

/// Insertion-ordered in-memory CRUD repo.
///
/// Object construction is supplied by the caller: `create` turns an input
/// into a fresh `(id, object)` pair, `update` builds the replacement for an
/// existing object.
pub struct MapCrudRepo<O, Id, I> {
    map: RwLock<IndexMap<Id, O>>,
    changes: ChangeSender<CrudChange<O, Id>>,
    create_object: CreateFn<I, Id, O>,
    update_object: UpdateFn<I, Id, O>,
}

impl<O, Id, I> MapCrudRepo<O, Id, I>
where
    O: RepoValue,
    Id: RepoKey,
    I: Send + 'static,
{
    /// Create an empty repo with default configuration.
    pub fn new(
        create_object: impl Fn(I) -> (Id, O) + Send + Sync + 'static,
        update_object: impl Fn(&Id, &O, I) -> O + Send + Sync + 'static,
    ) -> Self {
        Self::with_capacity(DEFAULT_NOTIFICATION_CAPACITY, create_object, update_object)
    }

    /// Create an empty repo using `config.notification_capacity`.
    ///
    /// Fails with `RepoError::Config` if `config` does not validate.
    pub fn with_config(
        config: &CacheConfig,
        create_object: impl Fn(I) -> (Id, O) + Send + Sync + 'static,
        update_object: impl Fn(&Id, &O, I) -> O + Send + Sync + 'static,
    ) -> RepoResult<Self> {
        config.validate()?;
        Ok(Self::with_capacity(
            config.notification_capacity,
            create_object,
            update_object,
        ))
    }

    fn with_capacity(
        capacity: usize,
        create_object: impl Fn(I) -> (Id, O) + Send + Sync + 'static,
        update_object: impl Fn(&Id, &O, I) -> O + Send + Sync + 'static,
    ) -> Self {
        Self {
            map: RwLock::new(IndexMap::new()),
            changes: ChangeSender::new(capacity),
            create_object: Box::new(create_object),
            update_object: Box::new(update_object),
        }
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> IndexMap<Id, O> {
        self.map.read().clone()
    }
}

#[async_trait]
impl<O, Id, I> ReadCrudRepo<O, Id> for MapCrudRepo<O, Id, I>
where
    O: RepoValue,
    Id: RepoKey,
    I: Send + 'static,
{
    async fn get_by_id(&self, id: &Id) -> RepoResult<Option<O>> {
        Ok(self.map.read().get(id).cloned())
    }

    async fn get_by_pagination(&self, pagination: Pagination) -> RepoResult<PaginationResult<O>> {
        Ok(paginate(self.map.read().values().cloned(), pagination, false))
    }

    async fn get_ids_by_pagination(&self, pagination: Pagination) -> RepoResult<PaginationResult<Id>> {
        Ok(paginate(self.map.read().keys().cloned(), pagination, false))
    }

    async fn count(&self) -> RepoResult<u64> {
        Ok(self.map.read().len() as u64)
    }

    async fn contains(&self, id: &Id) -> RepoResult<bool> {
        Ok(self.map.read().contains_key(id))
    }

    async fn get_all(&self) -> RepoResult<IndexMap<Id, O>> {
        Ok(self.snapshot())
    }
}

#[async_trait]
impl<O, Id, I> WriteCrudRepo<O, Id, I> for MapCrudRepo<O, Id, I>
where
    O: RepoValue,
    Id: RepoKey,
    I: Send + 'static,
{
    async fn create(&self, values: Vec<I>) -> RepoResult<Vec<O>> {
        let mut map = self.map.write();
        let mut created = Vec::with_capacity(values.len());
        for value in values {
            let (id, object) = (self.create_object)(value);
            map.insert(id, object.clone());
            self.changes.emit(CrudChange::Created(object.clone()));
            created.push(object);
        }
        Ok(created)
    }

    async fn update(&self, id: Id, value: I) -> RepoResult<Option<O>> {
        let mut map = self.map.write();
        let Some(old) = map.get(&id) else {
            return Ok(None);
        };
        let object = (self.update_object)(&id, old, value);
        map.insert(id, object.clone());
        self.changes.emit(CrudChange::Updated(object.clone()));
        Ok(Some(object))
    }

    async fn delete_by_ids(&self, ids: Vec<Id>) -> RepoResult<()> {
        let mut map = self.map.write();
        for id in ids {
            if map.shift_remove(&id).is_some() {
                self.changes.emit(CrudChange::Deleted(id));
            }
        }
        Ok(())
    }

    fn changes(&self) -> ChangeStream<CrudChange<O, Id>> {
        self.changes.subscribe()
    }
}
