//! Forward geocoding: resolve a city name to candidate coordinates.
//! Uses the Open-Meteo geocoding API - free, no API key required.

use tokio_util::sync::CancellationToken;

use crate::error::WeatherError;
use crate::provider::OpenMeteoClient;
use crate::schema::{decode, GeocodingResponse};
use crate::types::GeoPoint;

/// Maximum number of candidates returned for one query
pub const MAX_RESULTS: usize = 5;

impl OpenMeteoClient {
    /// Search for places matching `query`, in provider rank order.
    ///
    /// Fails with [`WeatherError::Validation`] for an empty or
    /// whitespace-only query without touching the network.
    pub async fn search_locations(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<GeoPoint>, WeatherError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(WeatherError::Validation(
                "search query must not be empty".to_string(),
            ));
        }

        let mut url = self.geocoding_endpoint()?;
        url.query_pairs_mut()
            .append_pair("name", query)
            .append_pair("count", &MAX_RESULTS.to_string())
            .append_pair("language", "en");

        let body = self.fetch(url, cancel).await?;
        let response: GeocodingResponse = decode(&body)?;

        let places: Vec<GeoPoint> = response
            .results
            .unwrap_or_default()
            .into_iter()
            .take(MAX_RESULTS)
            .map(|place| place.into_point())
            .collect();

        tracing::info!("Geocoded '{}' to {} candidate(s)", query, places.len());
        Ok(places)
    }
}
