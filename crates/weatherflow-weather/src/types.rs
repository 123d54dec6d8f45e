use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

pub use weatherflow_core::Units;

/// Geographic point.
///
/// Only `(lat, lon)` identify a location; `name` and `country` are for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self {
            lat,
            lon,
            name: None,
            country: None,
        }
    }

    pub fn named(lat: f64, lon: f64, name: impl Into<String>, country: Option<String>) -> Self {
        Self {
            lat,
            lon,
            name: Some(name.into()),
            country,
        }
    }

    /// Display label: "London, GB", "London", or the rounded coordinates.
    pub fn label(&self) -> String {
        match (&self.name, &self.country) {
            (Some(name), Some(country)) if !country.is_empty() => format!("{}, {}", name, country),
            (Some(name), _) => name.clone(),
            _ => coordinate_label(self.lat, self.lon),
        }
    }
}

pub(crate) fn coordinate_label(lat: f64, lon: f64) -> String {
    format!("{:.2}, {:.2}", lat, lon)
}

/// Coarse condition category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WeatherCategory {
    Clear,
    Fog,
    Drizzle,
    Rain,
    Snow,
    Thunderstorm,
    Unknown,
}

impl WeatherCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clear => "Clear",
            Self::Fog => "Fog",
            Self::Drizzle => "Drizzle",
            Self::Rain => "Rain",
            Self::Snow => "Snow",
            Self::Thunderstorm => "Thunderstorm",
            Self::Unknown => "Unknown",
        }
    }
}

/// Icon identifiers understood by the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WeatherIcon {
    ClearDay,
    ClearNight,
    PartlyCloudyDay,
    PartlyCloudyNight,
    Cloudy,
    Rain,
    ShowerRain,
    Thunderstorm,
    Snow,
    Mist,
    Fog,
    Unknown,
}

impl WeatherIcon {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClearDay => "clear-day",
            Self::ClearNight => "clear-night",
            Self::PartlyCloudyDay => "partly-cloudy-day",
            Self::PartlyCloudyNight => "partly-cloudy-night",
            Self::Cloudy => "cloudy",
            Self::Rain => "rain",
            Self::ShowerRain => "shower-rain",
            Self::Thunderstorm => "thunderstorm",
            Self::Snow => "snow",
            Self::Mist => "mist",
            Self::Fog => "fog",
            Self::Unknown => "unknown",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Self::ClearDay => "☀️",
            Self::ClearNight => "🌙",
            Self::PartlyCloudyDay => "⛅",
            Self::PartlyCloudyNight | Self::Cloudy => "☁️",
            Self::Rain => "🌧️",
            Self::ShowerRain => "🌦️",
            Self::Thunderstorm => "⛈️",
            Self::Snow => "❄️",
            Self::Mist | Self::Fog => "🌫️",
            Self::Unknown => "🌤️",
        }
    }
}

/// One `(category, description, icon)` triple for a provider weather code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub code: i32,
    pub category: WeatherCategory,
    pub description: String,
    pub icon: WeatherIcon,
}

/// Current conditions. Values are in `units` (metric as produced by the provider).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentWeather {
    pub coord: GeoPoint,
    pub observed_at: DateTime<Utc>,
    pub utc_offset_seconds: i32,
    pub location_label: String,
    pub conditions: Vec<Condition>,
    pub temperature: f64,
    pub feels_like: f64,
    pub humidity_pct: u8,
    pub pressure_hpa: u32,
    pub wind_speed: f64,
    pub wind_dir_deg: u16,
    pub units: Units,
}

/// Daily forecast entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyForecast {
    pub date: NaiveDate,
    pub temp_min: f64,
    pub temp_max: f64,
    pub conditions: Vec<Condition>,
}

/// Hourly temperature sample, local time at the forecast location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyData {
    pub time: NaiveDateTime,
    pub temperature: f64,
}

/// Chronological daily forecast (day 0 = today) plus optional hourly series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub coord: GeoPoint,
    pub utc_offset_seconds: i32,
    pub daily: Vec<DailyForecast>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hourly: Option<Vec<HourlyData>>,
    pub units: Units,
}
