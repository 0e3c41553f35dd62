use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::key::CacheKey;
use super::result::QueryResult;

static NEXT_PENDING_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one in-flight request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PendingId(u64);

impl PendingId {
    pub fn next() -> Self {
        Self(NEXT_PENDING_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A handle to an in-flight request.
///
/// Clones share the same underlying future; awaiting any of them yields the
/// settled [`QueryResult`]. Two handles are equal when they were created for
/// the same request.
#[derive(Clone)]
pub struct PendingResult {
    id: PendingId,
    future: Shared<BoxFuture<'static, QueryResult>>,
}

impl PendingResult {
    pub fn new(id: PendingId, future: impl Future<Output = QueryResult> + Send + 'static) -> Self {
        Self {
            id,
            future: future.boxed().shared(),
        }
    }

    pub const fn id(&self) -> PendingId {
        self.id
    }

    /// Returns `true` once the request has completed.
    ///
    /// Only meaningful on handles that have not themselves been awaited.
    pub fn is_settled(&self) -> bool {
        self.future.peek().is_some()
    }

    /// The settled result, if the request has completed.
    pub fn value(&self) -> Option<QueryResult> {
        self.future.peek().cloned()
    }
}

impl Future for PendingResult {
    type Output = QueryResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.future.poll_unpin(cx)
    }
}

impl PartialEq for PendingResult {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for PendingResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingResult")
            .field("id", &self.id)
            .field("settled", &self.is_settled())
            .finish()
    }
}

/// A cached value: an in-flight request or its settled result.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEntry {
    Pending(PendingResult),
    Settled(QueryResult),
}

/// Outcome of reading a key through [`ResultCache::lookup`].
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Pending(PendingResult),
    Settled(QueryResult),
    Missing,
}

/// Bounded store of results for one query text, evicting least recently used.
///
/// Entries are kept in touch order, oldest first. Writing a key (including
/// promoting it to pending) and reading a settled key both move it to the back.
#[derive(Debug)]
pub struct ResultCache {
    entries: Mutex<IndexMap<CacheKey, CacheEntry>>,
    capacity: usize,
}

impl ResultCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(IndexMap::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Keys in touch order, least recently used first.
    pub fn keys(&self) -> Vec<CacheKey> {
        self.entries.lock().keys().cloned().collect()
    }

    pub fn entries(&self) -> Vec<(CacheKey, CacheEntry)> {
        self.entries
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Reads an entry without touching it.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.lock().get(key).cloned()
    }

    /// Inserts `entry` as the most recently used, evicting the oldest entry if
    /// a new key would exceed capacity.
    pub fn set(&self, key: CacheKey, entry: CacheEntry) {
        let mut entries = self.entries.lock();
        entries.shift_remove(&key);
        while entries.len() >= self.capacity {
            match entries.shift_remove_index(0) {
                Some((evicted, _)) => debug!(key = %evicted, "evicted least recently used result"),
                None => break,
            }
        }
        entries.insert(key, entry);
    }

    pub fn remove(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.lock().shift_remove(key)
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Records `pending` as the in-flight request for `key`.
    pub fn set_pending_result(&self, key: CacheKey, pending: PendingResult) {
        self.set(key, CacheEntry::Pending(pending));
    }

    /// Settles `key` with `result` if `pending` is still its in-flight request.
    ///
    /// Returns `false` and leaves the cache untouched when the key was cleared,
    /// evicted or re-requested since `pending` was issued.
    pub fn set_results(&self, pending: PendingId, key: &CacheKey, result: QueryResult) -> bool {
        let mut entries = self.entries.lock();
        let current = matches!(entries.get(key), Some(CacheEntry::Pending(p)) if p.id() == pending);
        if !current {
            debug!(%key, ?pending, "dropping result for superseded request");
            return false;
        }
        entries.insert(key.clone(), CacheEntry::Settled(result));
        true
    }

    /// The single read path: reports the state of `key`, promoting settled
    /// entries to most recently used.
    pub fn lookup(&self, key: &CacheKey) -> CacheLookup {
        let mut entries = self.entries.lock();
        let Some(index) = entries.get_index_of(key) else {
            return CacheLookup::Missing;
        };
        match &entries[index] {
            CacheEntry::Pending(pending) => CacheLookup::Pending(pending.clone()),
            CacheEntry::Settled(result) => {
                let result = result.clone();
                let last = entries.len() - 1;
                entries.move_index(index, last);
                trace!(%key, "cache hit");
                CacheLookup::Settled(result)
            }
        }
    }

    /// Dispatches on the state of `key`; see [`lookup`](Self::lookup).
    pub fn get_from_cache<R>(
        &self,
        key: &CacheKey,
        on_pending: impl FnOnce(PendingResult) -> R,
        on_settled: impl FnOnce(QueryResult) -> R,
        on_missing: impl FnOnce() -> R,
    ) -> R {
        match self.lookup(key) {
            CacheLookup::Pending(pending) => on_pending(pending),
            CacheLookup::Settled(result) => on_settled(result),
            CacheLookup::Missing => on_missing(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settled(n: i64) -> CacheEntry {
        CacheEntry::Settled(QueryResult::success(json!(n)))
    }

    fn never() -> PendingResult {
        PendingResult::new(PendingId::next(), futures::future::pending())
    }

    fn keys(cache: &ResultCache) -> Vec<String> {
        cache.keys().iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_lru_bound_evicts_first_inserted() {
        let cache = ResultCache::new(3);
        for (i, key) in ["a", "b", "c", "d"].into_iter().enumerate() {
            cache.set(key.into(), settled(i as i64));
        }
        assert_eq!(cache.len(), 3);
        assert!(cache.get(&"a".into()).is_none());
        assert_eq!(keys(&cache), ["b", "c", "d"]);
    }

    #[test]
    fn test_read_promotes_settled_entry() {
        let cache = ResultCache::new(2);
        cache.set("q1".into(), settled(1));
        cache.set("q2".into(), settled(2));

        assert_eq!(
            cache.lookup(&"q1".into()),
            CacheLookup::Settled(QueryResult::success(json!(1)))
        );

        cache.set("q3".into(), settled(3));
        assert_eq!(keys(&cache), ["q1", "q3"]);
    }

    #[test]
    fn test_get_does_not_promote() {
        let cache = ResultCache::new(2);
        cache.set("q1".into(), settled(1));
        cache.set("q2".into(), settled(2));
        assert!(cache.get(&"q1".into()).is_some());

        cache.set("q3".into(), settled(3));
        assert_eq!(keys(&cache), ["q2", "q3"]);
    }

    #[test]
    fn test_reinsert_existing_key_moves_to_back_without_eviction() {
        let cache = ResultCache::new(2);
        cache.set("q1".into(), settled(1));
        cache.set("q2".into(), settled(2));
        cache.set_pending_result("q1".into(), never());

        assert_eq!(keys(&cache), ["q2", "q1"]);
        assert!(matches!(cache.get(&"q1".into()), Some(CacheEntry::Pending(_))));
    }

    #[test]
    fn test_pending_lookup_does_not_promote() {
        let cache = ResultCache::new(2);
        let pending = never();
        cache.set_pending_result("q1".into(), pending.clone());
        cache.set("q2".into(), settled(2));

        assert_eq!(cache.lookup(&"q1".into()), CacheLookup::Pending(pending));
        cache.set("q3".into(), settled(3));
        assert_eq!(keys(&cache), ["q2", "q3"]);
    }

    #[test]
    fn test_set_results_applies_for_current_request() {
        let cache = ResultCache::new(2);
        let pending = never();
        cache.set_pending_result("k".into(), pending.clone());

        assert!(cache.set_results(pending.id(), &"k".into(), QueryResult::success(json!("fresh"))));
        assert_eq!(
            cache.get(&"k".into()),
            Some(CacheEntry::Settled(QueryResult::success(json!("fresh"))))
        );
    }

    #[test]
    fn test_stale_write_is_discarded() {
        let cache = ResultCache::new(2);
        let first = never();
        cache.set_pending_result("k".into(), first.clone());

        cache.clear();
        let second = never();
        cache.set_pending_result("k".into(), second.clone());

        assert!(!cache.set_results(first.id(), &"k".into(), QueryResult::success(json!("stale"))));
        assert_eq!(cache.get(&"k".into()), Some(CacheEntry::Pending(second)));
    }

    #[test]
    fn test_set_results_after_clear_is_discarded() {
        let cache = ResultCache::new(2);
        let pending = never();
        cache.set_pending_result("k".into(), pending.clone());
        cache.clear();

        assert!(!cache.set_results(pending.id(), &"k".into(), QueryResult::success(json!(1))));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_get_from_cache_dispatch() {
        let cache = ResultCache::new(4);
        cache.set("settled".into(), settled(7));
        cache.set_pending_result("pending".into(), never());

        let which = |key: &str| {
            cache.get_from_cache(&key.into(), |_| "pending", |_| "settled", || "missing")
        };
        assert_eq!(which("settled"), "settled");
        assert_eq!(which("pending"), "pending");
        assert_eq!(which("absent"), "missing");
    }

    #[test]
    fn test_remove_only_touches_one_key() {
        let cache = ResultCache::new(4);
        cache.set("a".into(), settled(1));
        cache.set("b".into(), settled(2));
        assert!(cache.remove(&"a".into()).is_some());
        assert_eq!(keys(&cache), ["b"]);
    }

    #[tokio::test]
    async fn test_pending_result_settles() {
        let pending = PendingResult::new(PendingId::next(), async { QueryResult::success(json!(1)) });
        let observer = pending.clone();
        assert!(!observer.is_settled());

        let result = pending.await;
        assert_eq!(result, QueryResult::success(json!(1)));
        assert_eq!(observer.value(), Some(QueryResult::success(json!(1))));
    }
}
