//! Weather provider adapter for WeatherFlow
//!
//! Open-Meteo forecast and geocoding client with schema-validated parsing,
//! WMO code interpretation, metric/imperial conversion, display formatting
//! and device geolocation.

pub mod codes;
pub mod error;
pub mod format;
pub mod geocode;
pub mod location;
pub mod provider;
mod schema;
pub mod types;
pub mod units;

pub use error::{GeoLocationError, GeoLocationErrorKind, WeatherError};
pub use location::{
    GeolocationResolver, PermissionState, Position, PositionCallback, PositionError,
    PositionOptions, PositionSource,
};
pub use provider::OpenMeteoClient;
pub use schema::STANDARD_PRESSURE_HPA;
pub use types::*;
