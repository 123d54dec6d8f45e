//! Device geolocation.
//!
//! Platforms expose "get current position" as a callback primitive; the
//! resolver adapts it to a single-shot async call with a hard timeout.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use crate::error::{GeoLocationError, GeoLocationErrorKind};
use crate::types::GeoPoint;

/// Platform error codes reported by a [`PositionSource`]
pub const PERMISSION_DENIED: u16 = 1;
pub const POSITION_UNAVAILABLE: u16 = 2;
pub const TIMEOUT: u16 = 3;

/// Display name given to a resolved device position
pub const CURRENT_LOCATION: &str = "Current Location";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionOptions {
    pub enable_high_accuracy: bool,
    pub timeout: Duration,
    /// A cached device fix up to this old is acceptable
    pub maximum_age: Duration,
}

impl Default for PositionOptions {
    fn default() -> Self {
        Self {
            enable_high_accuracy: true,
            timeout: Duration::from_secs(10),
            maximum_age: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_meters: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionError {
    pub code: u16,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    Denied,
    Prompt,
    Unknown,
}

pub type PositionCallback = Box<dyn FnOnce(Result<Position, PositionError>) + Send + 'static>;

/// Callback-style position primitive supplied by the platform.
///
/// Implementations invoke `callback` at most once. Dropping it without a call
/// is reported as position unavailable.
pub trait PositionSource: Send + Sync {
    fn get_current_position(&self, options: &PositionOptions, callback: PositionCallback);

    fn permission_state(&self) -> PermissionState {
        PermissionState::Unknown
    }
}

#[derive(Clone)]
pub struct GeolocationResolver {
    source: Option<Arc<dyn PositionSource>>,
    options: PositionOptions,
}

impl GeolocationResolver {
    pub fn new(source: Arc<dyn PositionSource>) -> Self {
        Self {
            source: Some(source),
            options: PositionOptions::default(),
        }
    }

    /// Resolver for a platform without location support
    pub fn unsupported() -> Self {
        Self {
            source: None,
            options: PositionOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PositionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn is_supported(&self) -> bool {
        self.source.is_some()
    }

    pub fn permission_state(&self) -> PermissionState {
        self.source
            .as_ref()
            .map(|source| source.permission_state())
            .unwrap_or(PermissionState::Unknown)
    }

    /// Resolve the device position once. Never retries.
    pub async fn resolve_location(&self) -> Result<GeoPoint, GeoLocationError> {
        let Some(source) = &self.source else {
            tracing::warn!("Geolocation requested but no position source is available");
            return Err(GeoLocationError::unsupported());
        };

        let (tx, rx) = oneshot::channel();
        source.get_current_position(
            &self.options,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );

        let result = match tokio::time::timeout(self.options.timeout, rx).await {
            Err(_) => Err(GeoLocationError::new(
                GeoLocationErrorKind::Timeout,
                "Timed out waiting for a position fix",
            )),
            Ok(Err(_)) => Err(GeoLocationError::new(
                GeoLocationErrorKind::PositionUnavailable,
                "Position source went away without reporting a position",
            )),
            Ok(Ok(Err(e))) => Err(map_position_error(e)),
            Ok(Ok(Ok(position))) => Ok(GeoPoint::named(
                position.latitude,
                position.longitude,
                CURRENT_LOCATION,
                None,
            )),
        };

        match &result {
            Ok(point) => tracing::info!("Resolved device location ({:.4}, {:.4})", point.lat, point.lon),
            Err(e) => tracing::warn!("Geolocation failed ({:?}): {}", e.kind, e.message),
        }
        result
    }
}

fn map_position_error(error: PositionError) -> GeoLocationError {
    let kind = match error.code {
        PERMISSION_DENIED => GeoLocationErrorKind::PermissionDenied,
        POSITION_UNAVAILABLE => GeoLocationErrorKind::PositionUnavailable,
        TIMEOUT => GeoLocationErrorKind::Timeout,
        _ => GeoLocationErrorKind::Unknown,
    };
    GeoLocationError::new(kind, error.message)
}
