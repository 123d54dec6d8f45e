//! Open-Meteo response schemas and their validation into domain types.
//!
//! Bodies are deserialized into strict structs first; anything that does not
//! match (missing blocks, wrong types, ragged arrays) becomes
//! [`WeatherError::Parse`] instead of leaking half-filled values.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::codes;
use crate::error::WeatherError;
use crate::types::{
    coordinate_label, CurrentWeather, DailyForecast, Forecast, GeoPoint, HourlyData, Units,
};

/// Used when the provider omits surface pressure
pub const STANDARD_PRESSURE_HPA: u32 = 1013;

#[derive(Debug, Deserialize)]
pub(crate) struct ForecastResponse {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub utc_offset_seconds: i32,
    pub current: Option<CurrentBlock>,
    pub daily: Option<DailyBlock>,
    pub hourly: Option<HourlyBlock>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CurrentBlock {
    pub time: String,
    pub temperature_2m: f64,
    pub relative_humidity_2m: f64,
    pub wind_speed_10m: f64,
    pub wind_direction_10m: f64,
    #[serde(alias = "weather_code")]
    pub weathercode: i32,
    #[serde(default)]
    pub apparent_temperature: Option<f64>,
    #[serde(default)]
    pub surface_pressure: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DailyBlock {
    pub time: Vec<String>,
    #[serde(alias = "weather_code")]
    pub weathercode: Vec<i32>,
    pub temperature_2m_max: Vec<f64>,
    pub temperature_2m_min: Vec<f64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct HourlyBlock {
    pub time: Vec<String>,
    pub temperature_2m: Vec<f64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GeocodingResponse {
    #[serde(default)]
    pub results: Option<Vec<GeocodingPlace>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GeocodingPlace {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,
}

impl GeocodingPlace {
    pub fn into_point(self) -> GeoPoint {
        let country = self.country.or(self.country_code);
        GeoPoint::named(self.latitude, self.longitude, self.name, country)
    }
}

pub(crate) fn decode<R: DeserializeOwned>(body: &str) -> Result<R, WeatherError> {
    serde_json::from_str(body).map_err(|e| WeatherError::Parse(e.to_string()))
}

fn parse_local_time(value: &str) -> Result<NaiveDateTime, WeatherError> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S"))
        .map_err(|e| WeatherError::Parse(format!("invalid timestamp '{}': {}", value, e)))
}

fn parse_date(value: &str) -> Result<NaiveDate, WeatherError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| WeatherError::Parse(format!("invalid date '{}': {}", value, e)))
}

fn ensure_same_len(field: &str, expected: usize, actual: usize) -> Result<(), WeatherError> {
    if expected == actual {
        Ok(())
    } else {
        Err(WeatherError::Parse(format!(
            "{} has {} entries, expected {}",
            field, actual, expected
        )))
    }
}

impl ForecastResponse {
    fn coord(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }

    pub fn into_current(self) -> Result<CurrentWeather, WeatherError> {
        let coord = self.coord();
        let current = self
            .current
            .ok_or_else(|| WeatherError::Parse("response has no 'current' block".to_string()))?;

        let local = parse_local_time(&current.time)?;
        let observed_at =
            Utc.from_utc_datetime(&(local - Duration::seconds(i64::from(self.utc_offset_seconds))));
        let is_day = codes::is_day_hour(local.hour());

        Ok(CurrentWeather {
            location_label: coordinate_label(coord.lat, coord.lon),
            coord,
            observed_at,
            utc_offset_seconds: self.utc_offset_seconds,
            conditions: vec![codes::condition(current.weathercode, is_day)],
            temperature: current.temperature_2m,
            feels_like: current.apparent_temperature.unwrap_or(current.temperature_2m),
            humidity_pct: current.relative_humidity_2m.round().clamp(0.0, 100.0) as u8,
            pressure_hpa: current
                .surface_pressure
                .map(|p| p.round().max(0.0) as u32)
                .unwrap_or(STANDARD_PRESSURE_HPA),
            wind_speed: current.wind_speed_10m,
            wind_dir_deg: current.wind_direction_10m.round().rem_euclid(360.0) as u16,
            units: Units::Metric,
        })
    }

    pub fn into_forecast(self) -> Result<Forecast, WeatherError> {
        let coord = self.coord();
        let daily = self
            .daily
            .ok_or_else(|| WeatherError::Parse("response has no 'daily' block".to_string()))?;

        let days = daily.time.len();
        ensure_same_len("daily.weathercode", days, daily.weathercode.len())?;
        ensure_same_len("daily.temperature_2m_max", days, daily.temperature_2m_max.len())?;
        ensure_same_len("daily.temperature_2m_min", days, daily.temperature_2m_min.len())?;

        let mut entries = Vec::with_capacity(days);
        for (i, date) in daily.time.iter().enumerate() {
            let date = parse_date(date)?;
            let timestamp = Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)).timestamp();
            entries.push(DailyForecast {
                date,
                temp_min: daily.temperature_2m_min[i],
                temp_max: daily.temperature_2m_max[i],
                conditions: vec![codes::varied_condition(daily.weathercode[i], timestamp, true)],
            });
        }

        let hourly = match self.hourly {
            Some(hourly) => {
                ensure_same_len("hourly.temperature_2m", hourly.time.len(), hourly.temperature_2m.len())?;
                let series = hourly
                    .time
                    .iter()
                    .zip(hourly.temperature_2m)
                    .map(|(time, temperature)| {
                        parse_local_time(time).map(|time| HourlyData { time, temperature })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Some(series)
            }
            None => None,
        };

        Ok(Forecast {
            coord,
            utc_offset_seconds: self.utc_offset_seconds,
            daily: entries,
            hourly,
            units: Units::Metric,
        })
    }
}
