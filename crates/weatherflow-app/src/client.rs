//! The per-session cache context.

use weatherflow_cache::{CachePolicy, Policies, QueryCache, ResourceKind};
use weatherflow_core::CacheConfig;
use weatherflow_weather::{CurrentWeather, Forecast, GeoPoint, WeatherError};

/// Query caches for every resource kind plus their policies.
///
/// Constructed once per session and shared by reference; nothing else
/// holds cache state.
pub struct CacheClient {
    current: QueryCache<CurrentWeather, WeatherError>,
    forecast: QueryCache<Forecast, WeatherError>,
    search: QueryCache<Vec<GeoPoint>, WeatherError>,
    policies: Policies,
}

impl CacheClient {
    pub fn new(policies: Policies) -> Self {
        Self {
            current: QueryCache::new(),
            forecast: QueryCache::new(),
            search: QueryCache::new(),
            policies,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(Policies::from_config(config))
    }

    pub fn current(&self) -> &QueryCache<CurrentWeather, WeatherError> {
        &self.current
    }

    pub fn forecast(&self) -> &QueryCache<Forecast, WeatherError> {
        &self.forecast
    }

    pub fn search(&self) -> &QueryCache<Vec<GeoPoint>, WeatherError> {
        &self.search
    }

    pub fn policy(&self, kind: ResourceKind) -> &CachePolicy {
        self.policies.for_kind(kind)
    }

    /// Evict every entry for the location. Search results are keyed by
    /// query, not location, and are left alone.
    pub fn invalidate_location(&self, lat: f64, lon: f64) -> usize {
        self.current.invalidate_location(lat, lon) + self.forecast.invalidate_location(lat, lon)
    }

    /// Mark every entry for the location stale
    pub fn mark_location_stale(&self, lat: f64, lon: f64) -> usize {
        self.current.mark_location_stale(lat, lon) + self.forecast.mark_location_stale(lat, lon)
    }

    pub fn collect_garbage(&self) -> usize {
        self.current.collect_garbage() + self.forecast.collect_garbage() + self.search.collect_garbage()
    }

    pub fn len(&self) -> usize {
        self.current.len() + self.forecast.len() + self.search.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.current.clear();
        self.forecast.clear();
        self.search.clear();
    }
}

impl Default for CacheClient {
    fn default() -> Self {
        Self::new(Policies::default())
    }
}
