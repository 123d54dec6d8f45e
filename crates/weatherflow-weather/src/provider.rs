//! Open-Meteo forecast client.
//!
//! Always requests metric values; conversion happens at the presentation
//! boundary. The client never touches the query cache.

use reqwest::Client;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;
use weatherflow_core::ProviderConfig;

use crate::error::WeatherError;
use crate::schema::{decode, ForecastResponse};
use crate::types::{CurrentWeather, Forecast};

const CURRENT_FIELDS: &str = "temperature_2m,relative_humidity_2m,apparent_temperature,surface_pressure,wind_speed_10m,wind_direction_10m,weathercode";
const DAILY_FIELDS: &str = "weathercode,temperature_2m_max,temperature_2m_min";
const HOURLY_FIELDS: &str = "temperature_2m";

#[derive(Debug, Clone)]
pub struct OpenMeteoClient {
    client: Arc<Client>,
    geocoding_url: String,
    forecast_url: String,
}

impl OpenMeteoClient {
    pub fn new(config: &ProviderConfig) -> Result<Self, WeatherError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(WeatherError::from_transport)?;

        Ok(Self {
            client: Arc::new(client),
            geocoding_url: config.geocoding_url.trim_end_matches('/').to_string(),
            forecast_url: config.forecast_url.trim_end_matches('/').to_string(),
        })
    }

    /// Current conditions at `(lat, lon)`, metric
    pub async fn get_current(
        &self,
        lat: f64,
        lon: f64,
        cancel: &CancellationToken,
    ) -> Result<CurrentWeather, WeatherError> {
        let mut url = self.forecast_endpoint(lat, lon)?;
        url.query_pairs_mut().append_pair("current", CURRENT_FIELDS);

        let body = self.fetch(url, cancel).await?;
        let weather = decode::<ForecastResponse>(&body)?.into_current()?;
        tracing::debug!(
            "Current weather for ({}, {}): {:.1}°C code {}",
            lat,
            lon,
            weather.temperature,
            weather.conditions.first().map(|c| c.code).unwrap_or_default()
        );
        Ok(weather)
    }

    /// Daily forecast (plus hourly temperatures) at `(lat, lon)`, metric
    pub async fn get_forecast(
        &self,
        lat: f64,
        lon: f64,
        cancel: &CancellationToken,
    ) -> Result<Forecast, WeatherError> {
        let url = self.forecast_url(lat, lon)?;
        let body = self.fetch(url, cancel).await?;
        let forecast = Self::decode_forecast(&body)?;
        tracing::debug!(
            "Forecast for ({}, {}): {} days",
            lat,
            lon,
            forecast.daily.len()
        );
        Ok(forecast)
    }

    /// The exact request [`Self::get_forecast`] sends, for callers that
    /// route it through another transport.
    pub fn forecast_url(&self, lat: f64, lon: f64) -> Result<Url, WeatherError> {
        let mut url = self.forecast_endpoint(lat, lon)?;
        url.query_pairs_mut()
            .append_pair("daily", DAILY_FIELDS)
            .append_pair("hourly", HOURLY_FIELDS);
        Ok(url)
    }

    /// Normalize a forecast response body
    pub fn decode_forecast(body: &str) -> Result<Forecast, WeatherError> {
        decode::<ForecastResponse>(body)?.into_forecast()
    }

    fn forecast_endpoint(&self, lat: f64, lon: f64) -> Result<Url, WeatherError> {
        validate_coordinates(lat, lon)?;
        let mut url = endpoint(&self.forecast_url, "forecast")?;
        url.query_pairs_mut()
            .append_pair("latitude", &lat.to_string())
            .append_pair("longitude", &lon.to_string())
            .append_pair("timezone", "auto")
            .append_pair("temperature_unit", "celsius")
            .append_pair("wind_speed_unit", "kmh");
        Ok(url)
    }

    pub(crate) fn geocoding_endpoint(&self) -> Result<Url, WeatherError> {
        endpoint(&self.geocoding_url, "search")
    }

    /// GET `url` and return the body of a 2xx response.
    ///
    /// Resolves to [`WeatherError::Aborted`] as soon as `cancel` fires.
    pub(crate) async fn fetch(
        &self,
        url: Url,
        cancel: &CancellationToken,
    ) -> Result<String, WeatherError> {
        let request = async {
            tracing::debug!("GET {}", url);
            let response = self
                .client
                .get(url.clone())
                .send()
                .await
                .map_err(WeatherError::from_transport)?;

            let status = response.status();
            if !status.is_success() {
                tracing::debug!("{} returned status {}", url.path(), status);
                return Err(WeatherError::Http {
                    status: status.as_u16(),
                });
            }

            response.text().await.map_err(WeatherError::from_transport)
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("Request aborted");
                Err(WeatherError::Aborted)
            }
            result = request => result,
        }
    }
}

fn endpoint(base: &str, path: &str) -> Result<Url, WeatherError> {
    Url::parse(&format!("{}/{}", base, path))
        .map_err(|e| WeatherError::Validation(format!("invalid provider URL '{}': {}", base, e)))
}

fn validate_coordinates(lat: f64, lon: f64) -> Result<(), WeatherError> {
    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(WeatherError::Validation(format!("latitude out of range: {}", lat)));
    }
    if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
        return Err(WeatherError::Validation(format!("longitude out of range: {}", lon)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn test_coordinate_validation() {
        assert!(validate_coordinates(51.5, -0.12).is_ok());
        assert!(validate_coordinates(90.0, 180.0).is_ok());
        assert!(matches!(
            validate_coordinates(91.0, 0.0),
            Err(WeatherError::Validation(_))
        ));
        assert!(validate_coordinates(0.0, f64::NAN).is_err());
    }

    #[test]
    fn test_forecast_endpoint_always_metric() {
        let client = OpenMeteoClient::new(&ProviderConfig::default()).unwrap();
        let url = client.forecast_endpoint(51.5074, -0.1278).unwrap();

        assert_eq!(url.path(), "/v1/forecast");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("temperature_unit".into(), "celsius".into())));
        assert!(pairs.contains(&("wind_speed_unit".into(), "kmh".into())));
        assert!(pairs.contains(&("timezone".into(), "auto".into())));
        assert!(pairs.contains(&("latitude".into(), "51.5074".into())));
    }

    #[test]
    fn test_forecast_url_requests_daily_and_hourly() {
        let client = OpenMeteoClient::new(&ProviderConfig::default()).unwrap();
        let url = client.forecast_url(51.5074, -0.1278).unwrap();

        assert!(url.as_str().starts_with("https://api.open-meteo.com/v1/forecast?"));
        let keys: Vec<String> = url.query_pairs().map(|(key, _)| key.into_owned()).collect();
        assert!(keys.contains(&"daily".to_string()));
        assert!(keys.contains(&"hourly".to_string()));
        assert!(client.forecast_url(95.0, 0.0).is_err());
    }

    #[test]
    fn test_decode_forecast_rejects_garbage() {
        assert!(matches!(
            OpenMeteoClient::decode_forecast("not json"),
            Err(WeatherError::Parse(_))
        ));
    }

    #[test]
    fn test_trailing_slash_in_base_url() {
        let config = ProviderConfig {
            geocoding_url: "https://geo.example.com/v1/".to_string(),
            ..ProviderConfig::default()
        };
        let client = OpenMeteoClient::new(&config).unwrap();
        assert_eq!(
            client.geocoding_endpoint().unwrap().as_str(),
            "https://geo.example.com/v1/search"
        );
    }

    #[tokio::test]
    async fn test_cancelled_token_aborts_before_sending() {
        let client = OpenMeteoClient::new(&ProviderConfig::default()).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = client.get_current(51.5, -0.12, &cancel).await;
        assert_eq!(result.unwrap_err(), WeatherError::Aborted);
    }
}
