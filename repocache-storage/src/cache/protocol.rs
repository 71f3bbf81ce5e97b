//! The cache-or-fetch protocol shared by every decorator.
//!
//! A decorated read runs three steps: ask the cache, fall back to the
//! backing store when the cache cannot answer, then let the cache learn from
//! the store's answer before handing it back. The helpers below decide what
//! the cache may answer on its own.

use super::full_store::CacheView;
use repocache_core::{Optional, RepoKey, RepoResult, RepoValue};
use std::future::Future;

/// Return `cached` if present, otherwise fetch from the store and feed the
/// result to `actualize`.
///
/// Errors from either step reach the caller as-is; nothing is written to the
/// cache for a failed fetch.
pub(crate) async fn do_or_take_and_actualize<T, F, FFut, A, AFut>(
    operation: &'static str,
    cached: Optional<T>,
    fetch: F,
    actualize: A,
) -> RepoResult<T>
where
    F: FnOnce() -> FFut,
    FFut: Future<Output = RepoResult<T>>,
    A: FnOnce(T) -> AFut,
    AFut: Future<Output = RepoResult<T>>,
{
    match cached {
        Optional::Present(value) => Ok(value),
        Optional::Absent => {
            tracing::debug!(operation, "Cache miss, reading backing store");
            let fetched = fetch().await?;
            actualize(fetched).await
        }
    }
}

/// An aggregate answer is only trusted from an actualized store.
///
/// Empty results count: an actualized store that holds nothing knows the
/// collection is empty.
pub(crate) fn aggregate<K, V, T>(
    view: &CacheView<'_, K, V>,
    answer: impl FnOnce(&CacheView<'_, K, V>) -> T,
) -> Optional<T>
where
    K: RepoKey,
    V: RepoValue,
{
    if view.is_actualized() {
        Optional::present(answer(view))
    } else {
        Optional::absent()
    }
}

/// Containment as far as the cache can vouch for it.
///
/// A held key is always there. A missing key is only known missing when the
/// store is actualized and empty; a non-empty collection may lack keys added
/// behind the cache's back.
pub(crate) fn trusted_contains<K, V>(view: &CacheView<'_, K, V>, key: &K) -> Optional<bool>
where
    K: RepoKey,
    V: RepoValue,
{
    if view.contains(key) {
        Optional::present(true)
    } else {
        Optional::present_if(view.is_actualized() && view.is_empty(), false)
    }
}

/// Point lookup. A miss is never trusted.
pub(crate) fn point<K, V>(view: &CacheView<'_, K, V>, key: &K) -> Optional<V>
where
    K: RepoKey,
    V: RepoValue,
{
    view.get(key).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::full_store::FullKvCache;
    use crate::cache::store::KvCacheStore;
    use futures_util::FutureExt;
    use repocache_core::StoreError;

    fn run<T>(fut: impl Future<Output = T>) -> T {
        fut.now_or_never().expect("future should be ready")
    }

    #[test]
    fn test_present_skips_fetch() {
        let result = run(do_or_take_and_actualize(
            "test",
            Optional::present(1),
            || async { Err(StoreError::unavailable("fetched").into()) },
            |fetched: i32| async move { Ok(fetched + 100) },
        ));
        assert_eq!(result, Ok(1));
    }

    #[test]
    fn test_absent_fetches_then_actualizes() {
        let mut seen = None;
        let result = run(do_or_take_and_actualize(
            "test",
            Optional::absent(),
            || async { Ok(2) },
            |fetched| {
                seen = Some(fetched);
                async move { Ok(fetched) }
            },
        ));
        assert_eq!(result, Ok(2));
        assert_eq!(seen, Some(2));
    }

    #[test]
    fn test_fetch_error_skips_actualize() {
        let result: RepoResult<u8> = run(do_or_take_and_actualize(
            "test",
            Optional::absent(),
            || async { Err(StoreError::unavailable("down").into()) },
            |fetched: u8| async move { Ok(fetched + 1) },
        ));
        assert_eq!(result, Err(StoreError::unavailable("down").into()));
    }

    #[tokio::test]
    async fn test_trust_rules() {
        let cache: FullKvCache<u32, &str> = FullKvCache::new();

        // Cold store: nothing is trusted.
        cache.read(|view| {
            assert!(aggregate(view, |v| v.count()).is_absent());
            assert!(trusted_contains(view, &1).is_absent());
            assert!(point(view, &1).is_absent());
        });

        // Actualized and empty: every answer is known.
        cache.begin_rebuild().await.commit([]);
        cache.read(|view| {
            assert_eq!(aggregate(view, |v| v.count()), Optional::present(0));
            assert_eq!(trusted_contains(view, &1), Optional::present(false));
        });

        // Actualized and non-empty: hits are trusted, misses are not.
        cache.set(1, "a");
        cache.read(|view| {
            assert_eq!(trusted_contains(view, &1), Optional::present(true));
            assert!(trusted_contains(view, &2).is_absent());
            assert_eq!(point(view, &1), Optional::present("a"));
            assert!(point(view, &2).is_absent());
        });
    }
}
