//! WeatherFlow application layer
//!
//! Wires the provider adapter, the query cache and the offline stores into
//! a [`WeatherService`], and owns the process lifecycle in [`App`].
//! Forecast requests go through the offline worker when one is attached.

pub mod app;
pub mod client;
pub mod intercept;
pub mod service;

pub use app::App;
pub use client::CacheClient;
pub use intercept::{forecast_via_worker, RoutedForecast};
pub use service::{DataOrigin, WeatherService, WeatherView};
