//! Query cache for WeatherFlow.
//!
//! Keyed, TTL-aware cache of in-flight and resolved fetches with
//! per-resource staleness/GC windows, retry with exponential backoff and
//! de-duplication of concurrent identical requests.

pub mod key;
pub mod policy;
pub mod query;
pub mod retry;

pub use key::{CacheKey, ResourceKind};
pub use policy::{CachePolicy, Policies};
pub use query::{CacheEntry, Cancelled, Freshness, QueryCache};
pub use retry::{is_retryable_status, run_with_retry, RetryDecision, RetryPolicy, Retryable};
