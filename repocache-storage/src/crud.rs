//! CRUD repo traits.
//!
//! A CRUD repo stores objects under ids it assigns itself: callers hand in an
//! input value and get the stored object back. Reads paginate in the repo's
//! own order.

use crate::events::{ChangeStream, CrudChange};
use async_trait::async_trait;
use indexmap::IndexMap;
use repocache_core::{
    get_all_paged, Pagination, PaginationResult, RepoKey, RepoResult, RepoValue, DEFAULT_PAGE_SIZE,
};

/// Read half of a CRUD repo.
#[async_trait]
pub trait ReadCrudRepo<O, Id>: Send + Sync
where
    O: RepoValue,
    Id: RepoKey,
{
    /// Get an object by id.
    async fn get_by_id(&self, id: &Id) -> RepoResult<Option<O>>;

    /// Get one page of objects in repo order.
    async fn get_by_pagination(&self, pagination: Pagination) -> RepoResult<PaginationResult<O>>;

    /// Get one page of ids in repo order.
    async fn get_ids_by_pagination(&self, pagination: Pagination) -> RepoResult<PaginationResult<Id>>;

    /// Number of stored objects.
    async fn count(&self) -> RepoResult<u64>;

    /// Whether an object with this id exists.
    async fn contains(&self, id: &Id) -> RepoResult<bool>;

    /// Every object keyed by id, in repo order.
    ///
    /// The default walks the ids page by page and loads each object, skipping
    /// ids deleted in between.
    async fn get_all(&self) -> RepoResult<IndexMap<Id, O>> {
        let ids = get_all_paged(DEFAULT_PAGE_SIZE, |pagination| {
            self.get_ids_by_pagination(pagination)
        })
        .await?;

        let mut all = IndexMap::with_capacity(ids.len());
        for id in ids {
            if let Some(object) = self.get_by_id(&id).await? {
                all.insert(id, object);
            }
        }
        Ok(all)
    }
}

/// Write half of a CRUD repo.
#[async_trait]
pub trait WriteCrudRepo<O, Id, I>: Send + Sync
where
    O: RepoValue,
    Id: RepoKey,
    I: Send + 'static,
{
    /// Create one object per input, returning them in input order.
    async fn create(&self, values: Vec<I>) -> RepoResult<Vec<O>>;

    /// Replace the object stored under `id`. Returns `None` if there is none.
    async fn update(&self, id: Id, value: I) -> RepoResult<Option<O>>;

    /// Update several objects, returning those that existed.
    async fn update_many(&self, values: Vec<(Id, I)>) -> RepoResult<Vec<O>> {
        let mut updated = Vec::with_capacity(values.len());
        for (id, value) in values {
            if let Some(object) = self.update(id, value).await? {
                updated.push(object);
            }
        }
        Ok(updated)
    }

    /// Delete the objects with these ids. Unknown ids are ignored.
    async fn delete_by_ids(&self, ids: Vec<Id>) -> RepoResult<()>;

    /// Subscribe to every accepted write from now on.
    fn changes(&self) -> ChangeStream<CrudChange<O, Id>>;
}

/// A CRUD repo with both halves.
pub trait CrudRepo<O, Id, I>: ReadCrudRepo<O, Id> + WriteCrudRepo<O, Id, I>
where
    O: RepoValue,
    Id: RepoKey,
    I: Send + 'static,
{
}

impl<T, O, Id, I> CrudRepo<O, Id, I> for T
where
    T: ReadCrudRepo<O, Id> + WriteCrudRepo<O, Id, I>,
    O: RepoValue,
    Id: RepoKey,
    I: Send + 'static,
{
}
