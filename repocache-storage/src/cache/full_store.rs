//! Full-collection cache store.
//!
//! [`FullKvCache`] holds an insertion-ordered copy of a backing store's whole
//! collection together with an actualization witness: the instant at which
//! the collection was last rebuilt from the store. While the witness is set
//! the collection may answer pagination, counts and reverse lookups on the
//! store's behalf.
//!
//! # Rebuilds
//!
//! A rebuild never mutates the live collection. [`FullKvCache::begin_rebuild`]
//! takes the rebuild lock and starts a journal of point writes; the caller
//! fetches the complete set from the store and hands it to
//! [`Rebuild::commit`], which replays the journal over the fetched set and
//! swaps it in under a single write lock. Readers see either the old
//! collection or the new one. Dropping an uncommitted [`Rebuild`] discards the
//! journal and leaves the previous state untouched. A [`clear`] issued while
//! a rebuild is in flight makes that rebuild's commit a no-op.
//!
//! # Point entries
//!
//! Objects learned one at a time, whose position in the store's ordering is
//! unknown, are kept next to the collection. They answer `get` and
//! `contains` but never show up in pages, counts or `get_all`. A committed
//! rebuild discards them.
//!
//! A point fill carries a [`FillTicket`] taken before the store was read.
//! Every write, clear and commit advances the store's generation, and a fill
//! whose ticket predates the current generation is dropped: the value it
//! carries may already have been overwritten or removed in the store.
//!
//! [`clear`]: KvCacheStore::clear

use super::store::KvCacheStore;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;
use repocache_core::{paginate, Pagination, PaginationResult, RepoKey, RepoValue};
use std::collections::HashMap;
use tokio::sync::{Mutex, MutexGuard};

enum PendingWrite<K, V> {
    Set(K, V),
    Unset(K),
}

struct FullState<K, V> {
    collection: IndexMap<K, V>,
    points: HashMap<K, V>,
    actualized_at: Option<DateTime<Utc>>,
    /// Point writes seen since the current rebuild started.
    pending: Option<Vec<PendingWrite<K, V>>>,
    epoch: u64,
    /// Advanced by every mutation other than a point fill.
    generation: u64,
}

impl<K, V> FullState<K, V> {
    fn new() -> Self {
        Self {
            collection: IndexMap::new(),
            points: HashMap::new(),
            actualized_at: None,
            pending: None,
            epoch: 0,
            generation: 0,
        }
    }

    fn advance(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }
}

/// Proof of the store's generation before a backing read.
///
/// Obtained from [`FullKvCache::fill_ticket`] or [`CacheView::fill_ticket`]
/// and spent by [`FullKvCache::remember`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillTicket(u64);

/// Consistent read-only view of a [`FullKvCache`].
///
/// Everything read through one view comes from the same state, so checking
/// [`is_actualized`](Self::is_actualized) and then reading a page can never
/// straddle a rebuild.
pub struct CacheView<'a, K, V> {
    state: &'a FullState<K, V>,
}

impl<K, V> CacheView<'_, K, V>
where
    K: RepoKey,
    V: RepoValue,
{
    pub fn is_actualized(&self) -> bool {
        self.state.actualized_at.is_some()
    }

    pub fn actualized_at(&self) -> Option<DateTime<Utc>> {
        self.state.actualized_at
    }

    /// Ticket for filling in what the backing repo is about to answer.
    pub fn fill_ticket(&self) -> FillTicket {
        FillTicket(self.state.generation)
    }

    /// Collection entry or point entry for `key`.
    pub fn get(&self, key: &K) -> Option<V> {
        self.state
            .collection
            .get(key)
            .or_else(|| self.state.points.get(key))
            .cloned()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.state.collection.contains_key(key) || self.state.points.contains_key(key)
    }

    /// Number of entries in the ordered collection.
    pub fn count(&self) -> u64 {
        self.state.collection.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.state.collection.is_empty()
    }

    pub fn values(&self, pagination: Pagination, reversed: bool) -> PaginationResult<V> {
        paginate(self.state.collection.values().cloned(), pagination, reversed)
    }

    pub fn keys(&self, pagination: Pagination, reversed: bool) -> PaginationResult<K> {
        paginate(self.state.collection.keys().cloned(), pagination, reversed)
    }

    pub fn keys_by_value(&self, value: &V, pagination: Pagination, reversed: bool) -> PaginationResult<K>
    where
        V: PartialEq,
    {
        let matching: Vec<K> = self
            .state
            .collection
            .iter()
            .filter(|(_, v)| *v == value)
            .map(|(k, _)| k.clone())
            .collect();
        paginate(matching, pagination, reversed)
    }

    pub fn get_all(&self) -> IndexMap<K, V> {
        self.state.collection.clone()
    }
}

/// Cache store able to mirror a whole collection.
pub struct FullKvCache<K, V> {
    state: RwLock<FullState<K, V>>,
    rebuild_lock: Mutex<()>,
}

impl<K, V> FullKvCache<K, V>
where
    K: RepoKey,
    V: RepoValue,
{
    /// Create an empty, non-actualized store.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(FullState::new()),
            rebuild_lock: Mutex::new(()),
        }
    }

    /// Run `f` against a consistent view of the store.
    ///
    /// `f` runs under the read lock and must not block.
    pub fn read<R>(&self, f: impl FnOnce(&CacheView<'_, K, V>) -> R) -> R {
        let state = self.state.read();
        f(&CacheView { state: &*state })
    }

    pub fn is_actualized(&self) -> bool {
        self.read(|view| view.is_actualized())
    }

    /// When the last successful rebuild committed.
    pub fn actualized_at(&self) -> Option<DateTime<Utc>> {
        self.read(|view| view.actualized_at())
    }

    pub fn count(&self) -> u64 {
        self.read(|view| view.count())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.read(|view| view.contains(key))
    }

    pub fn values(&self, pagination: Pagination, reversed: bool) -> PaginationResult<V> {
        self.read(|view| view.values(pagination, reversed))
    }

    pub fn keys(&self, pagination: Pagination, reversed: bool) -> PaginationResult<K> {
        self.read(|view| view.keys(pagination, reversed))
    }

    pub fn keys_by_value(&self, value: &V, pagination: Pagination, reversed: bool) -> PaginationResult<K>
    where
        V: PartialEq,
    {
        self.read(|view| view.keys_by_value(value, pagination, reversed))
    }

    /// Copy of the ordered collection.
    pub fn get_all(&self) -> IndexMap<K, V> {
        self.read(|view| view.get_all())
    }

    pub fn fill_ticket(&self) -> FillTicket {
        self.read(|view| view.fill_ticket())
    }

    /// Record a single entry read from the store under `ticket`.
    ///
    /// A key already in the collection is refreshed in place. Any other key
    /// becomes a point entry. Returns `false`, leaving the store untouched,
    /// if anything was written or cleared since the ticket was taken.
    pub fn remember(&self, ticket: FillTicket, key: K, value: V) -> bool {
        let mut state = self.state.write();
        if state.generation != ticket.0 {
            return false;
        }
        if let Some(slot) = state.collection.get_mut(&key) {
            *slot = value;
        } else {
            state.points.insert(key, value);
        }
        true
    }

    /// Start a rebuild, waiting for any rebuild already in flight.
    pub async fn begin_rebuild(&self) -> Rebuild<'_, K, V> {
        let guard = self.rebuild_lock.lock().await;
        let epoch = {
            let mut state = self.state.write();
            state.pending = Some(Vec::new());
            state.epoch
        };
        Rebuild {
            cache: self,
            _guard: guard,
            epoch,
            finished: false,
        }
    }

    fn journal(state: &mut FullState<K, V>, write: impl FnOnce() -> PendingWrite<K, V>) {
        if let Some(pending) = state.pending.as_mut() {
            pending.push(write());
        }
    }
}

impl<K, V> Default for FullKvCache<K, V>
where
    K: RepoKey,
    V: RepoValue,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> KvCacheStore<K, V> for FullKvCache<K, V>
where
    K: RepoKey,
    V: RepoValue,
{
    fn get(&self, key: &K) -> Option<V> {
        self.read(|view| view.get(key))
    }

    /// Existing keys are updated in place, new keys are appended, matching
    /// how an insertion-ordered store treats the same write.
    fn set(&self, key: K, value: V) {
        let mut state = self.state.write();
        Self::journal(&mut state, || PendingWrite::Set(key.clone(), value.clone()));
        state.advance();
        state.points.remove(&key);
        state.collection.insert(key, value);
    }

    fn unset(&self, key: &K) {
        let mut state = self.state.write();
        Self::journal(&mut state, || PendingWrite::Unset(key.clone()));
        state.advance();
        state.points.remove(key);
        state.collection.shift_remove(key);
    }

    fn set_all<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let mut state = self.state.write();
        state.advance();
        for (key, value) in entries {
            Self::journal(&mut state, || PendingWrite::Set(key.clone(), value.clone()));
            state.points.remove(&key);
            state.collection.insert(key, value);
        }
    }

    /// Drops every entry and the actualization witness.
    fn clear(&self) {
        let mut state = self.state.write();
        state.collection.clear();
        state.points.clear();
        state.actualized_at = None;
        state.epoch = state.epoch.wrapping_add(1);
        state.advance();
    }
}

/// An in-flight rebuild of a [`FullKvCache`].
///
/// Holds the store's rebuild lock until committed or dropped.
#[must_use = "an uncommitted rebuild is aborted on drop"]
pub struct Rebuild<'a, K, V>
where
    K: RepoKey,
    V: RepoValue,
{
    cache: &'a FullKvCache<K, V>,
    _guard: MutexGuard<'a, ()>,
    epoch: u64,
    finished: bool,
}

impl<K, V> Rebuild<'_, K, V>
where
    K: RepoKey,
    V: RepoValue,
{
    /// Swap in `entries`, in store order, as the new collection.
    ///
    /// Point writes that reached the store during the rebuild are replayed
    /// on top. Returns `false` without touching the store if it was cleared
    /// after the rebuild began.
    pub fn commit(mut self, entries: impl IntoIterator<Item = (K, V)>) -> bool {
        let mut collection: IndexMap<K, V> = entries.into_iter().collect();

        let mut state = self.cache.state.write();
        self.finished = true;
        let pending = state.pending.take().unwrap_or_default();
        if state.epoch != self.epoch {
            return false;
        }

        for write in pending {
            match write {
                PendingWrite::Set(key, value) => {
                    collection.insert(key, value);
                }
                PendingWrite::Unset(key) => {
                    collection.shift_remove(&key);
                }
            }
        }

        state.collection = collection;
        state.points.clear();
        state.actualized_at = Some(Utc::now());
        state.advance();
        true
    }
}

impl<K, V> Drop for Rebuild<'_, K, V>
where
    K: RepoKey,
    V: RepoValue,
{
    fn drop(&mut self) {
        if !self.finished {
            self.cache.state.write().pending = None;
        }
    }
}
