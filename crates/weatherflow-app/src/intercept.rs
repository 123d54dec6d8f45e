//! Forecast requests routed through the offline worker.
//!
//! The worker goes to the network first and keeps every good response in
//! its forecast bucket. When the network fails it answers from that bucket
//! instead, and the answer is tagged with when it was stored so it is never
//! mistaken for live data.

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use weatherflow_offline::{FetchOutcome, FetchRequest, InterceptError, ResponseSource, WorkerHandle};
use weatherflow_weather::{Forecast, OpenMeteoClient, WeatherError};

/// A forecast as the worker delivered it
#[derive(Debug, Clone, PartialEq)]
pub enum RoutedForecast {
    Live(Forecast),
    /// Served from the worker's bucket after the live request failed
    Bucket {
        forecast: Forecast,
        stored_at: DateTime<Utc>,
    },
}

/// Fetch the forecast at `(lat, lon)` through `worker`.
///
/// Falls back to a direct provider request when the worker passes the
/// request through or cannot take it at all.
pub async fn forecast_via_worker(
    provider: &OpenMeteoClient,
    worker: &WorkerHandle,
    lat: f64,
    lon: f64,
    cancel: &CancellationToken,
) -> Result<RoutedForecast, WeatherError> {
    let url = provider.forecast_url(lat, lon)?;

    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(WeatherError::Aborted),
        outcome = worker.fetch(FetchRequest::get(url)) => outcome,
    };

    match outcome {
        Ok(FetchOutcome::Served { response, source }) => {
            if !response.is_success() {
                return Err(WeatherError::Http {
                    status: response.status,
                });
            }
            let forecast = OpenMeteoClient::decode_forecast(&String::from_utf8_lossy(&response.body))?;
            match source {
                ResponseSource::Network => Ok(RoutedForecast::Live(forecast)),
                ResponseSource::Cache { stored_at } => {
                    tracing::info!("Worker served forecast for ({}, {}) stored at {}", lat, lon, stored_at);
                    Ok(RoutedForecast::Bucket { forecast, stored_at })
                }
            }
        }
        Ok(FetchOutcome::Passthrough) => {
            tracing::debug!("Worker not intercepting yet; fetching forecast directly");
            provider.get_forecast(lat, lon, cancel).await.map(RoutedForecast::Live)
        }
        Err(InterceptError::Status(status)) => Err(WeatherError::Http { status }),
        Err(InterceptError::Network(message)) => Err(WeatherError::Network(message)),
        Err(e) => {
            tracing::warn!("Offline worker unavailable ({}); fetching forecast directly", e);
            provider.get_forecast(lat, lon, cancel).await.map(RoutedForecast::Live)
        }
    }
}
