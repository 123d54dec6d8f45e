use std::time::Duration;

use weatherflow_core::{CacheConfig, PolicyConfig};

use crate::key::ResourceKind;
use crate::retry::RetryPolicy;

/// Freshness and retry rules for one resource kind.
///
/// `gc_time` is never shorter than `stale_time`, which keeps
/// `fetched_at <= stale_at <= gc_at` for every entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    pub stale_time: Duration,
    pub gc_time: Duration,
    pub retry: RetryPolicy,
}

impl CachePolicy {
    pub fn new(stale_time: Duration, gc_time: Duration, retry: RetryPolicy) -> Self {
        Self {
            stale_time,
            gc_time: gc_time.max(stale_time),
            retry,
        }
    }

    /// Built-in defaults per resource kind
    pub fn for_kind(kind: ResourceKind) -> Self {
        let minutes = |m: u64| Duration::from_secs(m * 60);
        match kind {
            ResourceKind::Current => Self::new(minutes(8), minutes(15), RetryPolicy::default()),
            ResourceKind::Forecast => Self::new(minutes(30), minutes(60), RetryPolicy::default()),
            ResourceKind::Search => Self::new(minutes(5), minutes(10), RetryPolicy::default()),
        }
    }

    pub fn from_config(config: &PolicyConfig) -> Self {
        Self::new(
            config.stale_time(),
            config.gc_time(),
            RetryPolicy::with_max_retries(config.retries),
        )
    }
}

/// The policy table for all resource kinds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policies {
    pub current: CachePolicy,
    pub forecast: CachePolicy,
    pub search: CachePolicy,
}

impl Policies {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            current: CachePolicy::from_config(&config.current),
            forecast: CachePolicy::from_config(&config.forecast),
            search: CachePolicy::from_config(&config.search),
        }
    }

    pub fn for_kind(&self, kind: ResourceKind) -> &CachePolicy {
        match kind {
            ResourceKind::Current => &self.current,
            ResourceKind::Forecast => &self.forecast,
            ResourceKind::Search => &self.search,
        }
    }
}

impl Default for Policies {
    fn default() -> Self {
        Self {
            current: CachePolicy::for_kind(ResourceKind::Current),
            forecast: CachePolicy::for_kind(ResourceKind::Forecast),
            search: CachePolicy::for_kind(ResourceKind::Search),
        }
    }
}
