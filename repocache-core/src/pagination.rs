//! Page descriptors, page results and the helpers both stores and caches use
//! to slice ordered collections.
//!
//! Backing stores and cache stores must paginate the same way for a cached
//! page to equal the page the store would have returned, so every in-process
//! implementation goes through [`paginate`].

use serde::{Deserialize, Serialize};
use std::future::Future;

/// Default page size used when walking a whole collection.
pub const DEFAULT_PAGE_SIZE: u64 = 100;

/// A page request: `size` items starting at `page * size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pagination {
    /// Zero-based page number.
    pub page: u64,
    /// Items per page.
    pub size: u64,
}

impl Pagination {
    /// Create a page request.
    pub fn new(page: u64, size: u64) -> Self {
        Self { page, size }
    }

    /// The first page of the given size.
    pub fn first_page(size: u64) -> Self {
        Self { page: 0, size }
    }

    /// Index of the first item on this page.
    pub fn offset(&self) -> u64 {
        self.page.saturating_mul(self.size)
    }

    /// Maximum number of items on this page.
    pub fn limit(&self) -> u64 {
        self.size
    }

    /// The page after this one, regardless of whether it has items.
    pub fn next(&self) -> Self {
        Self {
            page: self.page.saturating_add(1),
            size: self.size,
        }
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::first_page(DEFAULT_PAGE_SIZE)
    }
}

/// One page of results plus the total number of objects in the collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationResult<T> {
    pub page: u64,
    pub size: u64,
    pub results: Vec<T>,
    /// Total objects in the whole collection, not on this page.
    pub objects_count: u64,
}

impl<T> PaginationResult<T> {
    /// Build a result for the given request.
    pub fn new(pagination: Pagination, results: Vec<T>, objects_count: u64) -> Self {
        Self {
            page: pagination.page,
            size: pagination.size,
            results,
            objects_count,
        }
    }

    /// An empty result for the given request over an empty collection.
    pub fn empty(pagination: Pagination) -> Self {
        Self::new(pagination, Vec::new(), 0)
    }

    /// The request this result answers.
    pub fn pagination(&self) -> Pagination {
        Pagination::new(self.page, self.size)
    }

    /// Returns true if this page carries no items.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Number of pages of this size in the whole collection.
    pub fn pages_count(&self) -> u64 {
        if self.size == 0 {
            0
        } else {
            self.objects_count.div_ceil(self.size)
        }
    }

    /// The following page, if the collection has items beyond this one.
    pub fn next_page(&self) -> Option<Pagination> {
        let next = self.pagination().next();
        (self.size > 0 && next.offset() < self.objects_count).then_some(next)
    }

    /// The preceding page, if this is not the first one.
    pub fn previous_page(&self) -> Option<Pagination> {
        (self.page > 0).then(|| Pagination::new(self.page - 1, self.size))
    }

    /// Map every item on the page.
    pub fn map<U, F>(self, f: F) -> PaginationResult<U>
    where
        F: FnMut(T) -> U,
    {
        PaginationResult {
            page: self.page,
            size: self.size,
            results: self.results.into_iter().map(f).collect(),
            objects_count: self.objects_count,
        }
    }
}

/// Slice an ordered collection into the requested page.
///
/// With `reversed` the collection is read from its last item backwards, so
/// page 0 holds the last `size` items, newest first.
pub fn paginate<I>(items: I, pagination: Pagination, reversed: bool) -> PaginationResult<I::Item>
where
    I: IntoIterator,
    I::IntoIter: DoubleEndedIterator + ExactSizeIterator,
{
    let iter = items.into_iter();
    let objects_count = iter.len() as u64;
    let skip = usize::try_from(pagination.offset()).unwrap_or(usize::MAX);
    let take = usize::try_from(pagination.limit()).unwrap_or(usize::MAX);

    let results = if reversed {
        iter.rev().skip(skip).take(take).collect()
    } else {
        iter.skip(skip).take(take).collect()
    };

    PaginationResult::new(pagination, results, objects_count)
}

/// Walk a paginated source from the first page until it runs dry and collect
/// every item.
///
/// A source that changes while it is walked may yield duplicates or skip
/// items; callers needing a consistent snapshot must serialize writers
/// themselves.
pub async fn get_all_paged<T, E, F, Fut>(page_size: u64, mut fetch: F) -> Result<Vec<T>, E>
where
    F: FnMut(Pagination) -> Fut,
    Fut: Future<Output = Result<PaginationResult<T>, E>>,
{
    let mut pagination = Pagination::first_page(page_size.max(1));
    let mut all = Vec::new();

    loop {
        let page = fetch(pagination).await?;
        let next = page.next_page();
        let received = page.results.len();
        all.extend(page.results);

        match next {
            Some(next) if received > 0 => pagination = next,
            _ => break,
        }
    }

    Ok(all)
}
