//! In-memory query cache with stale-while-revalidate semantics.
//!
//! An entry is *fresh* while `now < stale_at`, *stale* (returned immediately,
//! refreshed in the background) while `stale_at <= now < gc_at`, and
//! *evicted* once `now >= gc_at`. For any key at most one fetch is in flight;
//! concurrent callers join it instead of issuing their own request.
//!
//! A fetch owns its own [`CancellationToken`]. A caller that gives up only
//! stops waiting; the fetch itself is cancelled once no caller is left.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::key::CacheKey;
use crate::policy::CachePolicy;
use crate::retry::{run_with_retry, Retryable};

type SharedFetch<T, E> = Shared<BoxFuture<'static, Result<Arc<T>, E>>>;

/// Returned to a caller whose own token fired before the shared fetch
/// resolved. Error types convert it into their "aborted" variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

struct InFlight<T, E> {
    fetch: SharedFetch<T, E>,
    cancel: CancellationToken,
    waiters: Arc<AtomicUsize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
    Evicted,
}

/// Read-only view of a resolved cache entry.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub key: CacheKey,
    pub value: Arc<T>,
    pub fetched_at: Instant,
    pub stale_at: Instant,
    pub gc_at: Instant,
    pub fetching: bool,
}

impl<T> CacheEntry<T> {
    pub fn freshness(&self, now: Instant) -> Freshness {
        freshness(now, self.stale_at, self.gc_at)
    }
}

fn freshness(now: Instant, stale_at: Instant, gc_at: Instant) -> Freshness {
    if now < stale_at {
        Freshness::Fresh
    } else if now < gc_at {
        Freshness::Stale
    } else {
        Freshness::Evicted
    }
}

struct Slot<T, E> {
    value: Option<Arc<T>>,
    fetched_at: Instant,
    stale_at: Instant,
    gc_at: Instant,
    inflight: Option<InFlight<T, E>>,
    /// Bumped on invalidation so that detached fetches cannot write back.
    generation: u64,
}

impl<T, E> Slot<T, E> {
    fn pending(generation: u64, now: Instant) -> Self {
        Self {
            value: None,
            fetched_at: now,
            stale_at: now,
            gc_at: now,
            inflight: None,
            generation,
        }
    }

    fn freshness(&self, now: Instant) -> Freshness {
        freshness(now, self.stale_at, self.gc_at)
    }

    fn is_evicted(&self, now: Instant) -> bool {
        self.value.is_some() && self.inflight.is_none() && self.freshness(now) == Freshness::Evicted
    }
}

struct Inner<T, E> {
    slots: Mutex<HashMap<CacheKey, Slot<T, E>>>,
    generation: AtomicU64,
}

impl<T, E> Inner<T, E> {
    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn complete(
        &self,
        key: &CacheKey,
        generation: u64,
        policy: &CachePolicy,
        result: &Result<Arc<T>, E>,
    ) where
        E: Retryable,
    {
        let now = Instant::now();
        let mut slots = self.slots.lock();

        let Some(slot) = slots.get_mut(key) else {
            tracing::debug!("Discarding result for invalidated key {}", key);
            return;
        };
        if slot.generation != generation {
            tracing::debug!("Discarding result for superseded fetch of {}", key);
            return;
        }

        slot.inflight = None;
        match result {
            Ok(value) => {
                slot.value = Some(Arc::clone(value));
                slot.fetched_at = now;
                slot.stale_at = now + policy.stale_time;
                slot.gc_at = now + policy.gc_time;
                tracing::debug!("Cached {}", key);
            }
            Err(e) => {
                if e.is_cancelled() {
                    tracing::debug!("Fetch for {} cancelled; cache untouched", key);
                }
                if slot.value.is_none() {
                    slots.remove(key);
                }
            }
        }
    }
}

/// One caller's registration on an in-flight fetch.
///
/// Dropping the last unsettled waiter cancels the fetch and detaches it from
/// its slot, so nothing it produces is written back.
struct Waiter<T, E> {
    fetch: SharedFetch<T, E>,
    cancel: CancellationToken,
    waiters: Arc<AtomicUsize>,
    inner: Arc<Inner<T, E>>,
    key: CacheKey,
    settled: bool,
}

impl<T, E> Waiter<T, E> {
    async fn wait(mut self) -> Result<Arc<T>, E>
    where
        E: Clone,
    {
        let result = self.fetch.clone().await;
        self.settled = true;
        result
    }
}

impl<T, E> Drop for Waiter<T, E> {
    fn drop(&mut self) {
        // Count under the map lock so a new caller cannot join a fetch that
        // is being abandoned.
        let mut slots = self.inner.slots.lock();
        if self.waiters.fetch_sub(1, Ordering::AcqRel) != 1 || self.settled {
            return;
        }

        tracing::debug!("No callers left for {}; cancelling fetch", self.key);
        self.cancel.cancel();
        let remove = match slots.get_mut(&self.key) {
            Some(slot)
                if slot
                    .inflight
                    .as_ref()
                    .is_some_and(|inflight| Arc::ptr_eq(&inflight.waiters, &self.waiters)) =>
            {
                slot.inflight = None;
                slot.value.is_none()
            }
            _ => false,
        };
        if remove {
            slots.remove(&self.key);
        }
    }
}

enum Joined<T, E> {
    Ready(Arc<T>),
    Waiting(Waiter<T, E>),
}

/// Cache of values of one type, keyed by [`CacheKey`].
///
/// The map is owned here; fetchers only produce values and never touch it.
pub struct QueryCache<T, E> {
    inner: Arc<Inner<T, E>>,
}

impl<T, E> Default for QueryCache<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> QueryCache<T, E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Number of entries, including ones whose first fetch is still pending
    pub fn len(&self) -> usize {
        self.inner.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_fetching(&self, key: &CacheKey) -> bool {
        self.inner
            .slots
            .lock()
            .get(key)
            .is_some_and(|slot| slot.inflight.is_some())
    }

    /// Callers currently awaiting the in-flight fetch for `key`
    pub fn waiters(&self, key: &CacheKey) -> usize {
        self.inner
            .slots
            .lock()
            .get(key)
            .and_then(|slot| slot.inflight.as_ref())
            .map_or(0, |inflight| inflight.waiters.load(Ordering::Acquire))
    }

    /// Current entry for `key`, if it holds a value that is not yet evicted.
    pub fn peek(&self, key: &CacheKey) -> Option<CacheEntry<T>> {
        let now = Instant::now();
        let slots = self.inner.slots.lock();
        slots.get(key).and_then(|slot| Self::view(key, slot, now))
    }

    /// Most recently fetched usable entry whose key satisfies `pred`.
    pub fn peek_matching(&self, pred: impl Fn(&CacheKey) -> bool) -> Option<CacheEntry<T>> {
        let now = Instant::now();
        let slots = self.inner.slots.lock();
        slots
            .iter()
            .filter(|(key, _)| pred(key))
            .filter_map(|(key, slot)| Self::view(key, slot, now))
            .max_by_key(|entry| entry.fetched_at)
    }

    fn view(key: &CacheKey, slot: &Slot<T, E>, now: Instant) -> Option<CacheEntry<T>> {
        let value = slot.value.as_ref()?;
        if slot.freshness(now) == Freshness::Evicted {
            return None;
        }
        Some(CacheEntry {
            key: key.clone(),
            value: Arc::clone(value),
            fetched_at: slot.fetched_at,
            stale_at: slot.stale_at,
            gc_at: slot.gc_at,
            fetching: slot.inflight.is_some(),
        })
    }

    /// Evict a single key. In-flight fetches for it still resolve their
    /// callers but no longer write to the cache.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.inner.slots.lock().remove(key).is_some()
    }

    pub fn invalidate_where(&self, pred: impl Fn(&CacheKey) -> bool) -> usize {
        let mut slots = self.inner.slots.lock();
        let before = slots.len();
        slots.retain(|key, _| !pred(key));
        before - slots.len()
    }

    /// Evict every entry bound to the given location.
    pub fn invalidate_location(&self, lat: f64, lon: f64) -> usize {
        let removed = self.invalidate_where(|key| key.is_for_location(lat, lon));
        tracing::debug!("Evicted {} entries for ({}, {})", removed, lat, lon);
        removed
    }

    /// Force entries matching `pred` to be stale: their values stay usable but
    /// the next read refetches. Detaches any in-flight fetch for them.
    pub fn mark_stale_where(&self, pred: impl Fn(&CacheKey) -> bool) -> usize {
        let now = Instant::now();
        let mut slots = self.inner.slots.lock();
        let mut marked = 0;
        let mut orphaned = Vec::new();

        for (key, slot) in slots.iter_mut().filter(|(key, _)| pred(key)) {
            if slot.value.is_none() {
                orphaned.push(key.clone());
                continue;
            }
            slot.stale_at = slot.stale_at.min(now);
            slot.inflight = None;
            slot.generation = self.inner.next_generation();
            marked += 1;
        }
        for key in orphaned {
            slots.remove(&key);
        }
        marked
    }

    pub fn mark_location_stale(&self, lat: f64, lon: f64) -> usize {
        self.mark_stale_where(|key| key.is_for_location(lat, lon))
    }

    /// Drop entries whose GC window has passed. Returns how many were removed.
    pub fn collect_garbage(&self) -> usize {
        let now = Instant::now();
        let mut slots = self.inner.slots.lock();
        let before = slots.len();
        slots.retain(|_, slot| !slot.is_evicted(now));
        let removed = before - slots.len();
        if removed > 0 {
            tracing::debug!("Garbage-collected {} cache entries", removed);
        }
        removed
    }

    pub fn clear(&self) {
        self.inner.slots.lock().clear();
    }
}

impl<T, E> QueryCache<T, E>
where
    T: Send + Sync + 'static,
    E: Retryable + Display + Clone + Send + Sync + 'static,
{
    /// Resolve `key`.
    ///
    /// - fresh: returns the cached value without calling `fetcher`
    /// - stale: returns the cached value and refetches in the background
    /// - absent or evicted: awaits a fetch (joining one already in flight)
    ///
    /// Failures that survive the retry policy are returned to the caller;
    /// a previously cached value is left in place.
    pub async fn get<F, Fut>(&self, key: &CacheKey, policy: &CachePolicy, fetcher: F) -> Result<Arc<T>, E>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        match self.join(key, policy, move |_| fetcher()) {
            Joined::Ready(value) => Ok(value),
            Joined::Waiting(waiter) => waiter.wait().await,
        }
    }

    /// [`Self::get`] for a caller that may give up.
    ///
    /// `fetcher` receives the fetch's own token, not `cancel`. When `cancel`
    /// fires this caller gets [`Cancelled`] while other callers keep waiting;
    /// the fetch is cancelled only when every caller has left.
    pub async fn get_cancellable<F, Fut>(
        &self,
        key: &CacheKey,
        policy: &CachePolicy,
        cancel: &CancellationToken,
        fetcher: F,
    ) -> Result<Arc<T>, E>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: From<Cancelled>,
    {
        let mut waiter = match self.join(key, policy, fetcher) {
            Joined::Ready(value) => return Ok(value),
            Joined::Waiting(waiter) => waiter,
        };

        let fetch = waiter.fetch.clone();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("Caller stopped waiting for {}", key);
                Err(E::from(Cancelled))
            }
            result = fetch => {
                waiter.settled = true;
                result
            }
        }
    }

    fn join<F, Fut>(&self, key: &CacheKey, policy: &CachePolicy, fetcher: F) -> Joined<T, E>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let now = Instant::now();
        let mut slots = self.inner.slots.lock();

        if slots.get(key).is_some_and(|slot| slot.is_evicted(now)) {
            tracing::debug!("Entry {} evicted", key);
            slots.remove(key);
        }

        match slots.get_mut(key) {
            Some(slot) => match (slot.value.clone(), slot.freshness(now)) {
                (Some(value), Freshness::Fresh) => {
                    tracing::debug!("Cache hit for {}", key);
                    Joined::Ready(value)
                }
                (Some(value), Freshness::Stale) => {
                    if slot.inflight.is_none() {
                        tracing::debug!("Entry {} stale; refreshing in background", key);
                        // The spawned task counts as a waiter that never leaves.
                        let inflight = self.start_fetch(key, slot.generation, policy, fetcher, 1);
                        tokio::spawn(inflight.fetch.clone().map(|_| ()));
                        slot.inflight = Some(inflight);
                    }
                    Joined::Ready(value)
                }
                _ => {
                    let reusable = slot
                        .inflight
                        .as_ref()
                        .is_some_and(|inflight| !inflight.cancel.is_cancelled());
                    if reusable {
                        tracing::debug!("Joining in-flight fetch for {}", key);
                    } else {
                        slot.generation = self.inner.next_generation();
                        slot.inflight = None;
                    }
                    let generation = slot.generation;
                    let inflight = slot
                        .inflight
                        .get_or_insert_with(|| self.start_fetch(key, generation, policy, fetcher, 0));
                    Joined::Waiting(self.waiter(key, inflight))
                }
            },
            None => {
                tracing::debug!("Cache miss for {}", key);
                let generation = self.inner.next_generation();
                let mut slot = Slot::pending(generation, now);
                let inflight = self.start_fetch(key, generation, policy, fetcher, 0);
                let waiter = self.waiter(key, &inflight);
                slot.inflight = Some(inflight);
                slots.insert(key.clone(), slot);
                Joined::Waiting(waiter)
            }
        }
    }

    /// Must be called with the slot map locked.
    fn waiter(&self, key: &CacheKey, inflight: &InFlight<T, E>) -> Waiter<T, E> {
        inflight.waiters.fetch_add(1, Ordering::AcqRel);
        Waiter {
            fetch: inflight.fetch.clone(),
            cancel: inflight.cancel.clone(),
            waiters: Arc::clone(&inflight.waiters),
            inner: Arc::clone(&self.inner),
            key: key.clone(),
            settled: false,
        }
    }

    fn start_fetch<F, Fut>(
        &self,
        key: &CacheKey,
        generation: u64,
        policy: &CachePolicy,
        fetcher: F,
        waiters: usize,
    ) -> InFlight<T, E>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let key = key.clone();
        let policy = policy.clone();
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let fetch = async move {
            let result = run_with_retry(&policy.retry, || fetcher(token.clone()))
                .await
                .map(Arc::new);
            inner.complete(&key, generation, &policy, &result);
            result
        }
        .boxed()
        .shared();

        InFlight {
            fetch,
            cancel,
            waiters: Arc::new(AtomicUsize::new(waiters)),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use crate::key::ResourceKind;
    use crate::retry::{is_retryable_status, RetryDecision};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use weatherflow_core::Units;

    #[derive(Debug, Clone, PartialEq)]
    enum TestError {
        Status(u16),
        Cancelled,
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    impl Retryable for TestError {
        fn retry_decision(&self) -> RetryDecision {
            match self {
                Self::Status(s) => is_retryable_status(*s),
                Self::Cancelled => RetryDecision::NoRetry,
            }
        }

        fn is_cancelled(&self) -> bool {
            matches!(self, Self::Cancelled)
        }
    }

    fn counting_fetcher(
        calls: Arc<AtomicUsize>,
    ) -> impl Fn() -> BoxFuture<'static, Result<usize, TestError>> + Send + Sync + 'static {
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok(n) }.boxed()
        }
    }

    fn current_key() -> CacheKey {
        CacheKey::current(51.5074, -0.1278, Units::Metric)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_hit_skips_fetch() {
        let cache: QueryCache<usize, TestError> = QueryCache::new();
        let policy = CachePolicy::for_kind(ResourceKind::Current);
        let calls = Arc::new(AtomicUsize::new(0));

        let first = cache.get(&current_key(), &policy, counting_fetcher(calls.clone())).await;
        let second = cache.get(&current_key(), &policy, counting_fetcher(calls.clone())).await;

        assert_eq!(*first.unwrap(), 1);
        assert_eq!(*second.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_timestamps_ordered() {
        let cache: QueryCache<usize, TestError> = QueryCache::new();
        let policy = CachePolicy::for_kind(ResourceKind::Forecast);
        let calls = Arc::new(AtomicUsize::new(0));
        cache.get(&current_key(), &policy, counting_fetcher(calls)).await.unwrap();

        let entry = cache.peek(&current_key()).unwrap();
        assert!(entry.fetched_at <= entry.stale_at);
        assert!(entry.stale_at <= entry.gc_at);
        assert_eq!(entry.freshness(Instant::now()), Freshness::Fresh);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_first_fetch_leaves_no_entry() {
        let cache: QueryCache<usize, TestError> = QueryCache::new();
        let policy = CachePolicy::for_kind(ResourceKind::Current);

        let result = cache
            .get(&current_key(), &policy, || async { Err(TestError::Status(404)) })
            .await;

        assert_eq!(result.unwrap_err(), TestError::Status(404));
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_fetch_not_cached() {
        let cache: QueryCache<usize, TestError> = QueryCache::new();
        let policy = CachePolicy::for_kind(ResourceKind::Current);

        let result = cache
            .get(&current_key(), &policy, || async { Err(TestError::Cancelled) })
            .await;

        assert_eq!(result.unwrap_err(), TestError::Cancelled);
        assert!(cache.peek(&current_key()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_collect_garbage() {
        let cache: QueryCache<usize, TestError> = QueryCache::new();
        let policy = CachePolicy::for_kind(ResourceKind::Search);
        let calls = Arc::new(AtomicUsize::new(0));
        cache
            .get(&CacheKey::search("london"), &policy, counting_fetcher(calls))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(9 * 60)).await;
        assert_eq!(cache.collect_garbage(), 0);

        tokio::time::advance(Duration::from_secs(2 * 60)).await;
        assert_eq!(cache.collect_garbage(), 1);
        assert!(cache.is_empty());
    }
}
