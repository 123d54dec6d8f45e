//! Behavioural tests for QueryCache: freshness windows, de-duplication,
//! retry budget and invalidation.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use weatherflow_cache::{
    is_retryable_status, CacheKey, CachePolicy, Cancelled, QueryCache, ResourceKind,
    RetryDecision, Retryable,
};
use weatherflow_core::Units;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
enum FetchError {
    #[error("http {0}")]
    Http(u16),
    #[error("network down")]
    Network,
    #[error("aborted")]
    Aborted,
}

impl From<Cancelled> for FetchError {
    fn from(_: Cancelled) -> Self {
        Self::Aborted
    }
}

impl Retryable for FetchError {
    fn retry_decision(&self) -> RetryDecision {
        match self {
            Self::Http(status) => is_retryable_status(*status),
            Self::Network => RetryDecision::Retry,
            Self::Aborted => RetryDecision::NoRetry,
        }
    }

    fn is_cancelled(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

type Cache = QueryCache<String, FetchError>;

fn london_current() -> CacheKey {
    CacheKey::current(51.5074, -0.1278, Units::Metric)
}

/// Fetcher returning "v<n>" where n counts invocations, after a short delay.
fn versioned(
    calls: &Arc<AtomicUsize>,
    delay: Duration,
) -> impl Fn() -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<String, FetchError>> + Send>>
       + Send
       + Sync
       + 'static {
    let calls = Arc::clone(calls);
    move || {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            Ok(format!("v{}", n))
        })
    }
}

/// Like [`versioned`], but the fetch stops early when its own token fires.
/// `seen` records how many fetches observed cancellation.
fn abortable(
    calls: &Arc<AtomicUsize>,
    seen: &Arc<AtomicUsize>,
    delay: Duration,
) -> impl Fn(CancellationToken) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<String, FetchError>> + Send>>
       + Send
       + Sync
       + 'static {
    let calls = Arc::clone(calls);
    let seen = Arc::clone(seen);
    move |cancel: CancellationToken| {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        let seen = Arc::clone(&seen);
        Box::pin(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Err(FetchError::Aborted)
                }
                _ = tokio::time::sleep(delay) => Ok(format!("v{}", n)),
            }
        })
    }
}

fn cancel_after(token: &CancellationToken, delay: Duration) {
    let token = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        token.cancel();
    });
}

fn failing(
    calls: &Arc<AtomicUsize>,
    error: FetchError,
) -> impl Fn() -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<String, FetchError>> + Send>>
       + Send
       + Sync
       + 'static {
    let calls = Arc::clone(calls);
    move || {
        calls.fetch_add(1, Ordering::SeqCst);
        let error = error.clone();
        Box::pin(async move { Err(error) })
    }
}

#[tokio::test(start_paused = true)]
async fn concurrent_gets_share_one_fetch() {
    let cache = Cache::new();
    let policy = CachePolicy::for_kind(ResourceKind::Current);
    let calls = Arc::new(AtomicUsize::new(0));
    let key = london_current();

    let (a, b, c) = tokio::join!(
        cache.get(&key, &policy, versioned(&calls, Duration::from_millis(200))),
        cache.get(&key, &policy, versioned(&calls, Duration::from_millis(200))),
        cache.get(&key, &policy, versioned(&calls, Duration::from_millis(200))),
    );

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(a.unwrap().as_str(), "v1");
    assert_eq!(b.unwrap().as_str(), "v1");
    assert_eq!(c.unwrap().as_str(), "v1");
}

#[tokio::test(start_paused = true)]
async fn different_keys_fetch_independently() {
    let cache = Cache::new();
    let policy = CachePolicy::for_kind(ResourceKind::Current);
    let calls = Arc::new(AtomicUsize::new(0));

    let metric = CacheKey::current(0.0, 0.0, Units::Metric);
    let imperial = CacheKey::current(0.0, 0.0, Units::Imperial);
    cache.get(&metric, &policy, versioned(&calls, Duration::ZERO)).await.unwrap();
    cache.get(&imperial, &policy, versioned(&calls, Duration::ZERO)).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn stale_entry_served_immediately_and_refreshed() {
    let cache = Cache::new();
    let policy = CachePolicy::for_kind(ResourceKind::Current);
    let calls = Arc::new(AtomicUsize::new(0));
    let key = london_current();

    cache.get(&key, &policy, versioned(&calls, Duration::ZERO)).await.unwrap();

    // Past the 8 minute stale window, inside the 15 minute GC window.
    tokio::time::advance(Duration::from_secs(9 * 60)).await;

    let stale = cache
        .get(&key, &policy, versioned(&calls, Duration::from_millis(500)))
        .await
        .unwrap();
    assert_eq!(stale.as_str(), "v1");
    assert!(cache.is_fetching(&key));

    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.peek(&key).unwrap().value.as_str(), "v2");
}

#[tokio::test(start_paused = true)]
async fn evicted_entry_waits_for_new_fetch() {
    let cache = Cache::new();
    let policy = CachePolicy::for_kind(ResourceKind::Current);
    let calls = Arc::new(AtomicUsize::new(0));
    let key = london_current();

    cache.get(&key, &policy, versioned(&calls, Duration::ZERO)).await.unwrap();
    tokio::time::advance(Duration::from_secs(16 * 60)).await;

    assert!(cache.peek(&key).is_none());
    let value = cache.get(&key, &policy, versioned(&calls, Duration::ZERO)).await.unwrap();
    assert_eq!(value.as_str(), "v2");
}

#[tokio::test(start_paused = true)]
async fn client_error_is_not_retried() {
    let cache = Cache::new();
    let policy = CachePolicy::for_kind(ResourceKind::Current);
    let calls = Arc::new(AtomicUsize::new(0));

    let err = cache
        .get(&london_current(), &policy, failing(&calls, FetchError::Http(400)))
        .await
        .unwrap_err();

    assert_eq!(err, FetchError::Http(400));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn server_error_retried_once_then_surfaced() {
    let cache = Cache::new();
    let policy = CachePolicy::for_kind(ResourceKind::Forecast);
    let calls = Arc::new(AtomicUsize::new(0));

    let err = cache
        .get(&london_current(), &policy, failing(&calls, FetchError::Http(500)))
        .await
        .unwrap_err();

    assert_eq!(err, FetchError::Http(500));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn failed_refresh_keeps_stale_value() {
    let cache = Cache::new();
    let policy = CachePolicy::for_kind(ResourceKind::Current);
    let calls = Arc::new(AtomicUsize::new(0));
    let key = london_current();

    cache.get(&key, &policy, versioned(&calls, Duration::ZERO)).await.unwrap();
    tokio::time::advance(Duration::from_secs(10 * 60)).await;

    let failures = Arc::new(AtomicUsize::new(0));
    let stale = cache
        .get(&key, &policy, failing(&failures, FetchError::Network))
        .await
        .unwrap();
    assert_eq!(stale.as_str(), "v1");

    // Let the background refresh and its single retry run.
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(failures.load(Ordering::SeqCst), 2);
    assert!(!cache.is_fetching(&key));
    assert_eq!(cache.peek(&key).unwrap().value.as_str(), "v1");
}

#[tokio::test(start_paused = true)]
async fn invalidate_location_covers_all_kinds() {
    let cache = Cache::new();
    let policy = CachePolicy::for_kind(ResourceKind::Forecast);
    let calls = Arc::new(AtomicUsize::new(0));

    let keys = [
        CacheKey::current(51.5074, -0.1278, Units::Metric),
        CacheKey::forecast(51.5074, -0.1278, Units::Metric),
        CacheKey::forecast(51.5074, -0.1278, Units::Imperial),
        CacheKey::forecast(48.8566, 2.3522, Units::Metric),
        CacheKey::search("london"),
    ];
    for key in &keys {
        cache.get(key, &policy, versioned(&calls, Duration::ZERO)).await.unwrap();
    }

    assert_eq!(cache.invalidate_location(51.5074, -0.1278), 3);
    assert_eq!(cache.len(), 2);

    // The next read must go to the network again.
    let before = calls.load(Ordering::SeqCst);
    cache.get(&keys[0], &policy, versioned(&calls, Duration::ZERO)).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), before + 1);
}

#[tokio::test(start_paused = true)]
async fn invalidated_inflight_fetch_does_not_write_back() {
    let cache = Cache::new();
    let policy = CachePolicy::for_kind(ResourceKind::Current);
    let calls = Arc::new(AtomicUsize::new(0));
    let key = london_current();

    let pending = cache.get(&key, &policy, versioned(&calls, Duration::from_secs(1)));
    let invalidate = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(cache.invalidate(&key));
    };
    let (value, ()) = tokio::join!(pending, invalidate);

    // The original caller still gets its answer...
    assert_eq!(value.unwrap().as_str(), "v1");
    // ...but the cache does not hold data fetched before the invalidation.
    assert!(cache.peek(&key).is_none());
}

#[tokio::test(start_paused = true)]
async fn mark_stale_forces_refetch_but_keeps_value() {
    let cache = Cache::new();
    let policy = CachePolicy::for_kind(ResourceKind::Forecast);
    let calls = Arc::new(AtomicUsize::new(0));
    let key = CacheKey::forecast(51.5074, -0.1278, Units::Metric);

    cache.get(&key, &policy, versioned(&calls, Duration::ZERO)).await.unwrap();
    assert_eq!(cache.mark_location_stale(51.5074, -0.1278), 1);

    let served = cache.get(&key, &policy, versioned(&calls, Duration::ZERO)).await.unwrap();
    assert_eq!(served.as_str(), "v1");

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.peek(&key).unwrap().value.as_str(), "v2");
}

#[tokio::test(start_paused = true)]
async fn leaving_caller_does_not_abort_other_waiters() {
    let cache = Cache::new();
    let policy = CachePolicy::for_kind(ResourceKind::Current);
    let (calls, seen) = (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)));
    let key = london_current();

    let (first_token, second_token) = (CancellationToken::new(), CancellationToken::new());
    cancel_after(&first_token, Duration::from_millis(50));

    let (first, second) = tokio::join!(
        cache.get_cancellable(&key, &policy, &first_token, abortable(&calls, &seen, Duration::from_millis(500))),
        cache.get_cancellable(&key, &policy, &second_token, abortable(&calls, &seen, Duration::from_millis(500))),
    );

    assert_eq!(first.unwrap_err(), FetchError::Aborted);
    assert_eq!(second.unwrap().as_str(), "v1");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(seen.load(Ordering::SeqCst), 0);
    assert_eq!(cache.peek(&key).unwrap().value.as_str(), "v1");
}

#[tokio::test(start_paused = true)]
async fn last_caller_leaving_cancels_fetch() {
    let cache = Cache::new();
    let policy = CachePolicy::for_kind(ResourceKind::Current);
    let (calls, seen) = (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)));
    let key = london_current();

    let token = CancellationToken::new();
    cancel_after(&token, Duration::from_millis(50));
    let result = cache
        .get_cancellable(&key, &policy, &token, abortable(&calls, &seen, Duration::from_secs(1)))
        .await;

    assert_eq!(result.unwrap_err(), FetchError::Aborted);
    assert!(cache.is_empty());
    assert!(!cache.is_fetching(&key));

    // A later caller starts a fresh fetch rather than joining the abandoned one.
    let value = cache
        .get_cancellable(
            &key,
            &policy,
            &CancellationToken::new(),
            abortable(&calls, &seen, Duration::from_millis(10)),
        )
        .await
        .unwrap();
    assert_eq!(value.as_str(), "v2");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn waiters_are_counted_per_fetch() {
    let cache = Cache::new();
    let policy = CachePolicy::for_kind(ResourceKind::Current);
    let (calls, seen) = (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)));
    let key = london_current();
    let token = CancellationToken::new();

    let observe = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.waiters(&key)
    };
    let (a, b, waiting) = tokio::join!(
        cache.get_cancellable(&key, &policy, &token, abortable(&calls, &seen, Duration::from_millis(100))),
        cache.get_cancellable(&key, &policy, &token, abortable(&calls, &seen, Duration::from_millis(100))),
        observe,
    );

    assert_eq!(waiting, 2);
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(cache.waiters(&key), 0);
}
