//! Weather orchestration: query cache in front of the provider, snapshots
//! behind it.
//!
//! Everything the cache holds is metric. The active [`Units`] only pick the
//! cache key and decide how values are converted on the way out, so a unit
//! toggle can be rendered from data already in memory.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use weatherflow_cache::{CacheKey, ResourceKind};
use weatherflow_core::{AppError, StorageError, Units};
use weatherflow_offline::{
    LocalStore, Snapshot, SnapshotData, SnapshotKind, SnapshotStore, WorkerHandle,
};
use weatherflow_weather::format::format_snapshot_age;
use weatherflow_weather::{
    CurrentWeather, Forecast, GeoPoint, GeolocationResolver, OpenMeteoClient, WeatherError,
};

use crate::client::CacheClient;
use crate::intercept::{forecast_via_worker, RoutedForecast};

/// Where a displayed value came from
#[derive(Debug, Clone, PartialEq)]
pub enum DataOrigin {
    Live,
    /// Last-known-good snapshot; must be shown with a staleness indicator
    Offline {
        captured_at: DateTime<Utc>,
        location_label: String,
    },
}

/// A value ready for display, already converted to `units`
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherView<T> {
    pub data: T,
    pub units: Units,
    pub origin: DataOrigin,
}

impl<T> WeatherView<T> {
    fn live(data: T, units: Units) -> Self {
        Self {
            data,
            units,
            origin: DataOrigin::Live,
        }
    }

    fn offline(data: T, units: Units, captured_at: DateTime<Utc>, location_label: String) -> Self {
        Self {
            data,
            units,
            origin: DataOrigin::Offline {
                captured_at,
                location_label,
            },
        }
    }

    pub fn is_offline(&self) -> bool {
        matches!(self.origin, DataOrigin::Offline { .. })
    }

    /// "Offline data - last updated ..." for offline views, `None` for live ones
    pub fn staleness_label(&self, now: DateTime<Utc>) -> Option<String> {
        match &self.origin {
            DataOrigin::Live => None,
            DataOrigin::Offline { captured_at, .. } => Some(format!(
                "Offline data - last updated {}",
                format_snapshot_age(*captured_at, now)
            )),
        }
    }
}

/// Cancelled and invalid requests are the caller's doing; showing old data
/// for them would be wrong.
fn falls_back_to_snapshot(error: &WeatherError) -> bool {
    !matches!(error, WeatherError::Aborted | WeatherError::Validation(_))
}

fn storage_error(error: anyhow::Error) -> AppError {
    AppError::Storage(StorageError::QueryFailed(format!("{:#}", error)))
}

/// SQLite writes run on the blocking pool, off the runtime workers.
async fn save_snapshot(snapshots: Arc<SnapshotStore>, data: SnapshotData, label: String, units: Units) {
    let snapshot = Snapshot::new(data, label, units);
    match tokio::task::spawn_blocking(move || snapshots.save(&snapshot)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!("Failed to save offline snapshot: {:#}", e),
        Err(e) => tracing::warn!("Snapshot writer task failed: {}", e),
    }
}

/// Forecast the worker answered from its bucket, kept until a live fetch
/// for the same key succeeds
#[derive(Debug, Clone)]
struct BucketForecast {
    forecast: Forecast,
    stored_at: DateTime<Utc>,
}

type BucketForecasts = Arc<Mutex<HashMap<CacheKey, BucketForecast>>>;

pub struct WeatherService {
    provider: OpenMeteoClient,
    cache: Arc<CacheClient>,
    snapshots: Arc<SnapshotStore>,
    store: Arc<LocalStore>,
    locator: GeolocationResolver,
    units: RwLock<Units>,
    worker: Option<WorkerHandle>,
    bucket_forecasts: BucketForecasts,
}

impl WeatherService {
    /// The persisted unit preference wins over `default_units`.
    pub fn new(
        provider: OpenMeteoClient,
        cache: Arc<CacheClient>,
        snapshots: Arc<SnapshotStore>,
        store: Arc<LocalStore>,
        locator: GeolocationResolver,
        default_units: Units,
    ) -> Self {
        let units = match store.units() {
            Ok(Some(units)) => units,
            Ok(None) => default_units,
            Err(e) => {
                tracing::warn!("Failed to read unit preference: {:#}", e);
                default_units
            }
        };

        Self {
            provider,
            cache,
            snapshots,
            store,
            locator,
            units: RwLock::new(units),
            worker: None,
            bucket_forecasts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Send forecast requests through the offline worker
    pub fn with_worker(mut self, worker: WorkerHandle) -> Self {
        self.worker = Some(worker);
        self
    }

    pub fn units(&self) -> Units {
        *self.units.read()
    }

    pub fn cache(&self) -> &CacheClient {
        &self.cache
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    /// Candidate places for `query`, cached per trimmed query string.
    /// Successful searches are recorded in the recent-search list.
    pub async fn search(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<Vec<GeoPoint>>, WeatherError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(WeatherError::Validation(
                "search query must not be empty".to_string(),
            ));
        }

        let provider = self.provider.clone();
        let owned_query = query.to_string();
        let results = self
            .cache
            .search()
            .get_cancellable(
                &CacheKey::search(query),
                self.cache.policy(ResourceKind::Search),
                cancel,
                move |fetch_cancel| {
                    let provider = provider.clone();
                    let query = owned_query.clone();
                    async move { provider.search_locations(&query, &fetch_cancel).await }
                },
            )
            .await?;

        if let Err(e) = self.store.push_recent_search(query) {
            tracing::warn!("Failed to record recent search: {:#}", e);
        }
        Ok(results)
    }

    /// Current conditions at `point`, metric. A successful fetch also
    /// replaces the current-weather snapshot.
    pub async fn current(
        &self,
        point: &GeoPoint,
        cancel: &CancellationToken,
    ) -> Result<Arc<CurrentWeather>, WeatherError> {
        let units = self.units();
        let provider = self.provider.clone();
        let snapshots = Arc::clone(&self.snapshots);
        let (lat, lon, label) = (point.lat, point.lon, point.label());

        self.cache
            .current()
            .get_cancellable(
                &CacheKey::current(lat, lon, units),
                self.cache.policy(ResourceKind::Current),
                cancel,
                move |fetch_cancel| {
                    let provider = provider.clone();
                    let snapshots = Arc::clone(&snapshots);
                    let label = label.clone();
                    async move {
                        let mut weather = provider.get_current(lat, lon, &fetch_cancel).await?;
                        weather.location_label = label.clone();
                        save_snapshot(snapshots, SnapshotData::Current(weather.clone()), label, units).await;
                        Ok(weather)
                    }
                },
            )
            .await
    }

    /// Daily forecast at `point`, metric. A successful fetch also replaces
    /// the forecast snapshot.
    ///
    /// With a worker attached the request goes through it. A forecast the
    /// worker serves from its bucket is not cached here; the call fails and
    /// [`Self::forecast_or_snapshot`] presents that forecast as offline data.
    pub async fn forecast(
        &self,
        point: &GeoPoint,
        cancel: &CancellationToken,
    ) -> Result<Arc<Forecast>, WeatherError> {
        let units = self.units();
        let provider = self.provider.clone();
        let snapshots = Arc::clone(&self.snapshots);
        let worker = self.worker.clone();
        let bucket_forecasts = Arc::clone(&self.bucket_forecasts);
        let (lat, lon, label) = (point.lat, point.lon, point.label());
        let key = CacheKey::forecast(lat, lon, units);

        self.cache
            .forecast()
            .get_cancellable(
                &key,
                self.cache.policy(ResourceKind::Forecast),
                cancel,
                {
                    let key = key.clone();
                    move |fetch_cancel: CancellationToken| {
                        let provider = provider.clone();
                        let snapshots = Arc::clone(&snapshots);
                        let worker = worker.clone();
                        let bucket_forecasts = Arc::clone(&bucket_forecasts);
                        let label = label.clone();
                        let key = key.clone();
                        async move {
                            let routed = match &worker {
                                Some(worker) => {
                                    forecast_via_worker(&provider, worker, lat, lon, &fetch_cancel).await?
                                }
                                None => RoutedForecast::Live(provider.get_forecast(lat, lon, &fetch_cancel).await?),
                            };
                            let forecast = match routed {
                                RoutedForecast::Live(forecast) => forecast,
                                RoutedForecast::Bucket { forecast, stored_at } => {
                                    bucket_forecasts
                                        .lock()
                                        .insert(key, BucketForecast { forecast, stored_at });
                                    return Err(WeatherError::Network(
                                        "live forecast unavailable; worker answered from its bucket".to_string(),
                                    ));
                                }
                            };
                            bucket_forecasts.lock().remove(&key);
                            save_snapshot(snapshots, SnapshotData::Forecast(forecast.clone()), label, units).await;
                            Ok(forecast)
                        }
                    }
                },
            )
            .await
    }

    /// Live current conditions in the active units, or the last snapshot
    /// when the live path fails after retries.
    pub async fn current_or_snapshot(
        &self,
        point: &GeoPoint,
        cancel: &CancellationToken,
    ) -> Result<WeatherView<CurrentWeather>, AppError> {
        let units = self.units();
        let error = match self.current(point, cancel).await {
            Ok(weather) => return Ok(WeatherView::live(weather.in_units(units), units)),
            Err(error) => error,
        };

        let snapshot = self.fallback_snapshot(SnapshotKind::Current, error)?;
        match &snapshot.data {
            SnapshotData::Current(weather) => {
                Ok(WeatherView::offline(
                weather.in_units(units),
                units,
                snapshot.captured_at,
                snapshot.location_label.clone(),
            ))
            }
            SnapshotData::Forecast(_) => Err(weatherflow_core::WeatherError::NoData.into()),
        }
    }

    /// Live forecast in the active units, or the last snapshot when the
    /// live path fails after retries.
    pub async fn forecast_or_snapshot(
        &self,
        point: &GeoPoint,
        cancel: &CancellationToken,
    ) -> Result<WeatherView<Forecast>, AppError> {
        let units = self.units();
        let error = match self.forecast(point, cancel).await {
            Ok(forecast) => return Ok(WeatherView::live(forecast.in_units(units), units)),
            Err(error) => error,
        };

        if falls_back_to_snapshot(&error) {
            let key = CacheKey::forecast(point.lat, point.lon, units);
            let bucket = self.bucket_forecasts.lock().get(&key).cloned();
            if let Some(bucket) = bucket {
                tracing::info!(
                    "Serving worker-cached forecast for {} stored at {}",
                    point.label(),
                    bucket.stored_at
                );
                return Ok(WeatherView::offline(
                    bucket.forecast.in_units(units),
                    units,
                    bucket.stored_at,
                    point.label(),
                ));
            }
        }

        let snapshot = self.fallback_snapshot(SnapshotKind::Forecast, error)?;
        match &snapshot.data {
            SnapshotData::Forecast(forecast) => {
                Ok(WeatherView::offline(
                forecast.in_units(units),
                units,
                snapshot.captured_at,
                snapshot.location_label.clone(),
            ))
            }
            SnapshotData::Current(_) => Err(weatherflow_core::WeatherError::NoData.into()),
        }
    }

    fn fallback_snapshot(&self, kind: SnapshotKind, error: WeatherError) -> Result<Snapshot, AppError> {
        if !falls_back_to_snapshot(&error) {
            return Err(error.into());
        }

        tracing::warn!(
            "Live {} data unavailable ({}); trying offline snapshot",
            kind.as_str(),
            error
        );
        match self.snapshots.load_kind(kind) {
            Ok(Some(snapshot)) => {
                tracing::info!(
                    "Serving {} snapshot for {} captured at {}",
                    kind.as_str(),
                    snapshot.location_label,
                    snapshot.captured_at
                );
                Ok(snapshot)
            }
            Ok(None) => Err(error.into()),
            Err(e) => {
                tracing::warn!("Failed to read offline snapshot: {:#}", e);
                Err(error.into())
            }
        }
    }

    /// Render cached current conditions at `point` in `units` without
    /// fetching. Falls back to an entry cached under other units.
    pub fn current_view(&self, point: &GeoPoint, units: Units) -> Option<CurrentWeather> {
        let cache = self.cache.current();
        let entry = cache
            .peek(&CacheKey::current(point.lat, point.lon, units))
            .or_else(|| {
                cache.peek_matching(|key| {
                    key.kind() == ResourceKind::Current && key.is_for_location(point.lat, point.lon)
                })
            })?;
        Some(entry.value.in_units(units))
    }

    /// Forecast counterpart of [`Self::current_view`]
    pub fn forecast_view(&self, point: &GeoPoint, units: Units) -> Option<Forecast> {
        let cache = self.cache.forecast();
        let entry = cache
            .peek(&CacheKey::forecast(point.lat, point.lon, units))
            .or_else(|| {
                cache.peek_matching(|key| {
                    key.kind() == ResourceKind::Forecast && key.is_for_location(point.lat, point.lon)
                })
            })?;
        Some(entry.value.in_units(units))
    }

    /// Switch display units and persist the preference. Every entry for the
    /// active location is marked stale so the next read refetches.
    pub fn change_units(&self, units: Units, active: Option<&GeoPoint>) -> Result<usize, AppError> {
        let previous = std::mem::replace(&mut *self.units.write(), units);
        if previous == units {
            return Ok(0);
        }

        let marked = active
            .map(|point| self.cache.mark_location_stale(point.lat, point.lon))
            .unwrap_or_default();
        self.store.set_units(units).map_err(storage_error)?;

        tracing::info!("Units changed {} -> {} ({} entries marked stale)", previous, units, marked);
        Ok(marked)
    }

    /// Explicit user refresh: evict everything cached for `point`.
    pub fn refresh(&self, point: &GeoPoint) -> usize {
        let removed = self.cache.invalidate_location(point.lat, point.lon);
        tracing::info!("Refresh requested for {} ({} entries evicted)", point.label(), removed);
        removed
    }

    /// Resolve the device position and remember it as the last location.
    pub async fn locate(&self) -> Result<GeoPoint, AppError> {
        let point = self.locator.resolve_location().await?;
        if let Err(e) = self.store.set_last_location(&point) {
            tracing::warn!("Failed to persist last location: {:#}", e);
        }
        Ok(point)
    }

    pub fn last_location(&self) -> Option<GeoPoint> {
        match self.store.last_location() {
            Ok(last) => last.map(|last| last.point),
            Err(e) => {
                tracing::warn!("Failed to read last location: {:#}", e);
                None
            }
        }
    }

    /// Delete saved snapshots. Explicit user action only.
    pub fn clear_offline_data(&self) -> Result<(), AppError> {
        self.bucket_forecasts.lock().clear();
        self.snapshots.clear().map_err(storage_error)
    }
}
