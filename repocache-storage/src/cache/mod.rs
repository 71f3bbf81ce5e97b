//! Cache-aside decorators with full-snapshot semantics.
//!
//! A decorator wraps a backing repo and implements the same repo traits. It
//! answers from its cache store only when the answer is known to be complete
//! and correct, and otherwise reads the backing repo, which stays the single
//! source of truth.
//!
//! # Design Philosophy
//!
//! An empty answer from a cache is ambiguous: the collection may be empty, or
//! the cache may simply not have loaded it yet. Cache-side lookups therefore
//! return [`Optional`](repocache_core::Optional), where `Absent` means "ask
//! the store" and never "empty". A [`FullKvCache`] carries an actualization
//! witness set only by a complete rebuild; while it is set, pages, counts
//! and reverse lookups are served locally, empty ones included.
//!
//! # Example
//!
//! ```ignore
//! let scope = SubscriptionScope::new();
//! let repo = FullKeyValueCacheRepo::new(store, Arc::new(FullKvCache::new()), &scope);
//!
//! // First page miss rebuilds the whole mirror; later pages are local.
//! let page = repo.keys(Pagination::first_page(20), false).await?;
//!
//! // Writes go to the store; the cache follows its change stream.
//! repo.set(vec![(key, value)]).await?;
//!
//! // Someone else wrote to the store directly: start over.
//! repo.invalidate().await?;
//! ```

pub mod full_crud;
pub mod full_key_value;
pub mod full_store;
mod protocol;
pub mod scope;
pub mod store;

pub use full_crud::{FullCrudCacheRepo, FullReadCrudCacheRepo, IdGetter, WriteCrudCacheRepo};
pub use full_key_value::{FullKeyValueCacheRepo, FullReadKeyValueCacheRepo, FullWriteKeyValueCacheRepo};
pub use full_store::{CacheView, FillTicket, FullKvCache, Rebuild};
pub use scope::SubscriptionScope;
pub use store::{KvCache, KvCacheStore};
