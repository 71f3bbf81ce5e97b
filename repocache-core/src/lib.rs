//! repocache Core - Shared Types
//!
//! Tri-state lookup results, pagination, errors and configuration shared by
//! the store traits and the cache decorators. This crate holds no I/O and no
//! runtime.

pub mod config;
pub mod error;
pub mod optional;
pub mod pagination;

pub use config::{CacheConfig, DEFAULT_NOTIFICATION_CAPACITY};
pub use error::{ConfigError, RepoError, RepoResult, StoreError};
pub use optional::Optional;
pub use pagination::{get_all_paged, paginate, Pagination, PaginationResult, DEFAULT_PAGE_SIZE};

use std::fmt::Debug;
use std::hash::Hash;

// ============================================================================
// KEY / VALUE BOUNDS
// ============================================================================

/// Anything usable as a repo key or object id.
pub trait RepoKey: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T> RepoKey for T where T: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

/// Anything storable as a repo value or object.
pub trait RepoValue: Clone + Send + Sync + 'static {}

impl<T> RepoValue for T where T: Clone + Send + Sync + 'static {}
