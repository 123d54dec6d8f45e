use thiserror::Error;
use weatherflow_cache::{is_retryable_status, Cancelled, RetryDecision, Retryable};
use weatherflow_core::error::{AppError, LocationError, NetworkError};

/// Provider adapter errors.
///
/// `Clone` so a single fetch result can be handed to every de-duplicated
/// waiter in the query cache.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WeatherError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("HTTP error: status {status}")]
    Http { status: u16 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Malformed provider response: {0}")]
    Parse(String),

    #[error("Request aborted")]
    Aborted,
}

impl WeatherError {
    pub(crate) fn from_transport(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(error.to_string())
        }
    }

    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Http { status } if (400..500).contains(status))
    }

    pub fn is_retryable(&self) -> bool {
        self.retry_decision() == RetryDecision::Retry
    }
}

impl Retryable for WeatherError {
    fn retry_decision(&self) -> RetryDecision {
        match self {
            Self::Http { status } => is_retryable_status(*status),
            Self::Network(_) | Self::Timeout => RetryDecision::Retry,
            Self::Validation(_) | Self::Parse(_) | Self::Aborted => RetryDecision::NoRetry,
        }
    }

    fn is_cancelled(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

impl From<Cancelled> for WeatherError {
    fn from(_: Cancelled) -> Self {
        Self::Aborted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeoLocationErrorKind {
    PermissionDenied,
    PositionUnavailable,
    Timeout,
    Unsupported,
    Unknown,
}

/// Device location failure. Never retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct GeoLocationError {
    pub kind: GeoLocationErrorKind,
    pub message: String,
}

impl GeoLocationError {
    pub fn new(kind: GeoLocationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unsupported() -> Self {
        Self::new(
            GeoLocationErrorKind::Unsupported,
            "Geolocation is not supported on this device",
        )
    }

    pub fn user_message(&self) -> &'static str {
        match self.kind {
            GeoLocationErrorKind::PermissionDenied => {
                "Location access denied. Try \"Use my location\" again, or enable location access in your settings."
            }
            GeoLocationErrorKind::PositionUnavailable => {
                "Unable to determine your location. Please try again or search manually."
            }
            GeoLocationErrorKind::Timeout => "Location request timed out. Please try again.",
            GeoLocationErrorKind::Unsupported | GeoLocationErrorKind::Unknown => {
                "Unable to get your location. Please search manually."
            }
        }
    }
}

impl From<WeatherError> for AppError {
    fn from(error: WeatherError) -> Self {
        use weatherflow_core::error::WeatherError as Presented;

        match error {
            WeatherError::Validation(message) => AppError::Weather(Presented::InvalidInput(message)),
            WeatherError::Http { status } if status >= 500 => {
                AppError::Network(NetworkError::ServerError { status })
            }
            WeatherError::Http { status: 404 } => {
                AppError::Weather(Presented::LocationNotFound("HTTP 404".to_string()))
            }
            WeatherError::Http { status } => {
                AppError::Weather(Presented::ApiError(format!("HTTP {}", status)))
            }
            WeatherError::Network(message) => AppError::Network(NetworkError::ConnectionFailed(message)),
            WeatherError::Timeout => AppError::Network(NetworkError::Timeout),
            WeatherError::Parse(message) => AppError::Weather(Presented::InvalidResponse(message)),
            WeatherError::Aborted => AppError::Network(NetworkError::Cancelled),
        }
    }
}

impl From<GeoLocationError> for AppError {
    fn from(error: GeoLocationError) -> Self {
        let location = match error.kind {
            GeoLocationErrorKind::PermissionDenied => LocationError::PermissionDenied,
            GeoLocationErrorKind::PositionUnavailable => LocationError::PositionUnavailable,
            GeoLocationErrorKind::Timeout => LocationError::Timeout,
            GeoLocationErrorKind::Unsupported => LocationError::Unsupported,
            GeoLocationErrorKind::Unknown => LocationError::Other(error.message),
        };
        AppError::Location(location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(WeatherError::Http { status: 503 }.is_retryable());
        assert!(WeatherError::Network("reset".into()).is_retryable());
        assert!(WeatherError::Timeout.is_retryable());

        assert!(!WeatherError::Http { status: 400 }.is_retryable());
        assert!(!WeatherError::Validation("empty".into()).is_retryable());
        assert!(!WeatherError::Parse("bad".into()).is_retryable());
        assert!(!WeatherError::Aborted.is_retryable());
    }

    #[test]
    fn test_aborted_is_cancelled() {
        assert!(WeatherError::Aborted.is_cancelled());
        assert!(!WeatherError::Timeout.is_cancelled());
        assert_eq!(WeatherError::from(Cancelled), WeatherError::Aborted);
    }

    #[test]
    fn test_client_error() {
        assert!(WeatherError::Http { status: 404 }.is_client_error());
        assert!(!WeatherError::Http { status: 500 }.is_client_error());
    }

    #[test]
    fn test_geolocation_error_display_uses_message() {
        let err = GeoLocationError::new(GeoLocationErrorKind::Timeout, "took too long");
        assert_eq!(err.to_string(), "took too long");
        assert!(err.user_message().contains("timed out"));
    }

    #[test]
    fn test_app_error_mapping() {
        let server: AppError = WeatherError::Http { status: 502 }.into();
        assert!(matches!(server, AppError::Network(NetworkError::ServerError { status: 502 })));
        assert!(server.is_retryable());

        let bad_input: AppError = WeatherError::Validation("empty".into()).into();
        assert!(!bad_input.is_retryable());
        assert_eq!(bad_input.user_message(), "Please enter a city name.");

        let aborted: AppError = WeatherError::Aborted.into();
        assert!(matches!(aborted, AppError::Network(NetworkError::Cancelled)));
    }

    #[test]
    fn test_location_error_mapping() {
        let denied: AppError = GeoLocationError::new(GeoLocationErrorKind::PermissionDenied, "denied").into();
        assert!(matches!(denied, AppError::Location(LocationError::PermissionDenied)));

        let unknown: AppError = GeoLocationError::new(GeoLocationErrorKind::Unknown, "code 9").into();
        assert!(matches!(unknown, AppError::Location(LocationError::Other(ref m)) if m == "code 9"));
    }
}
