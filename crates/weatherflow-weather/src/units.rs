//! Metric/imperial conversion.
//!
//! Cached values are always metric; these converters run at the
//! presentation boundary and never feed back into the cache.

use crate::types::{CurrentWeather, DailyForecast, Forecast, HourlyData, Units};

const KMH_TO_MPH: f64 = 0.621371;
const MPH_TO_KMH: f64 = 1.609344;

pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

pub fn fahrenheit_to_celsius(fahrenheit: f64) -> f64 {
    (fahrenheit - 32.0) * 5.0 / 9.0
}

pub fn kmh_to_mph(kmh: f64) -> f64 {
    kmh * KMH_TO_MPH
}

pub fn mph_to_kmh(mph: f64) -> f64 {
    mph * MPH_TO_KMH
}

pub fn convert_temperature(value: f64, from: Units, to: Units) -> f64 {
    match (from, to) {
        (Units::Metric, Units::Imperial) => celsius_to_fahrenheit(value),
        (Units::Imperial, Units::Metric) => fahrenheit_to_celsius(value),
        _ => value,
    }
}

pub fn convert_wind_speed(value: f64, from: Units, to: Units) -> f64 {
    match (from, to) {
        (Units::Metric, Units::Imperial) => kmh_to_mph(value),
        (Units::Imperial, Units::Metric) => mph_to_kmh(value),
        _ => value,
    }
}

impl CurrentWeather {
    /// Copy of this observation with temperatures and wind speed in `to`
    pub fn in_units(&self, to: Units) -> CurrentWeather {
        let from = self.units;
        CurrentWeather {
            temperature: convert_temperature(self.temperature, from, to),
            feels_like: convert_temperature(self.feels_like, from, to),
            wind_speed: convert_wind_speed(self.wind_speed, from, to),
            units: to,
            ..self.clone()
        }
    }
}

impl DailyForecast {
    pub fn converted(&self, from: Units, to: Units) -> DailyForecast {
        DailyForecast {
            temp_min: convert_temperature(self.temp_min, from, to),
            temp_max: convert_temperature(self.temp_max, from, to),
            ..self.clone()
        }
    }
}

/// Convert an hourly series
pub fn convert_hourly(hourly: &[HourlyData], from: Units, to: Units) -> Vec<HourlyData> {
    hourly
        .iter()
        .map(|hour| HourlyData {
            time: hour.time,
            temperature: convert_temperature(hour.temperature, from, to),
        })
        .collect()
}

impl Forecast {
    pub fn in_units(&self, to: Units) -> Forecast {
        let from = self.units;
        Forecast {
            coord: self.coord.clone(),
            utc_offset_seconds: self.utc_offset_seconds,
            daily: self.daily.iter().map(|day| day.converted(from, to)).collect(),
            hourly: self.hourly.as_deref().map(|h| convert_hourly(h, from, to)),
            units: to,
        }
    }
}
