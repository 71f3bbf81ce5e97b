//! repocache Storage - Repo Traits, In-Memory Stores and Cache Decorators
//!
//! Defines the repo abstraction the caches sit in front of, change
//! notifications for writable repos, insertion-ordered in-memory repos, and
//! the cache-aside decorators themselves. Persistent repos (SQL, remote)
//! live elsewhere and only need to implement the traits here.

pub mod cache;
pub mod crud;
pub mod events;
pub mod in_memory;
pub mod key_value;

pub use cache::{
    CacheView, FillTicket, FullCrudCacheRepo, FullKeyValueCacheRepo, FullKvCache, FullReadCrudCacheRepo,
    FullReadKeyValueCacheRepo, FullWriteKeyValueCacheRepo, IdGetter, KvCache, KvCacheStore,
    Rebuild, SubscriptionScope, WriteCrudCacheRepo,
};
pub use crud::{CrudRepo, ReadCrudRepo, WriteCrudRepo};
pub use events::{ChangeSender, ChangeStream, CrudChange, KeyValueChange, MissedChanges};
pub use in_memory::{MapCrudRepo, MapKeyValueRepo};
pub use key_value::{KeyValueRepo, ReadKeyValueRepo, WriteKeyValueRepo};
