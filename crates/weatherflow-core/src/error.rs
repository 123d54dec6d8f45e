//! Centralized error types for the WeatherFlow application.
//!
//! Library crates keep their own precise error enums; everything that
//! reaches the presentation layer is converted into [`AppError`], whose
//! `user_message()` is safe to show verbatim.

use thiserror::Error;

/// Top-level application error type.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Weather service error: {0}")]
    Weather(#[from] WeatherError),

    #[error("Location error: {0}")]
    Location(#[from] LocationError),
}

impl AppError {
    /// Returns a user-friendly message suitable for display in the UI.
    pub fn user_message(&self) -> &'static str {
        match self {
            AppError::Network(e) => e.user_message(),
            AppError::Storage(e) => e.user_message(),
            AppError::Weather(e) => e.user_message(),
            AppError::Location(e) => e.user_message(),
        }
    }

    /// Whether the UI should offer a retry affordance for this failure.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Network(_) => true,
            AppError::Weather(e) => matches!(e, WeatherError::ApiError(_) | WeatherError::NoData),
            AppError::Location(e) => !matches!(e, LocationError::Unsupported),
            _ => false,
        }
    }
}

/// Network-related errors (HTTP transport, connectivity).
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Server error: {status}")]
    ServerError { status: u16 },

    #[error("Request cancelled")]
    Cancelled,
}

impl NetworkError {
    pub fn user_message(&self) -> &'static str {
        match self {
            NetworkError::ConnectionFailed(_) => {
                "Unable to connect. Check your internet connection."
            }
            NetworkError::Timeout => "The request timed out. Please try again.",
            NetworkError::ServerError { status } if *status >= 500 => {
                "The weather service is experiencing issues. Please try again later."
            }
            NetworkError::ServerError { .. } => "The request failed. Please try again.",
            NetworkError::Cancelled => "The request was cancelled.",
        }
    }
}

/// Local storage errors (snapshot, preferences, response buckets).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Query failed: {0}")]
    QueryFailed(String),
}

impl StorageError {
    pub fn user_message(&self) -> &'static str {
        match self {
            StorageError::QueryFailed(_) => "A data operation failed. Please try again.",
        }
    }
}

/// Weather service errors as seen by the user.
#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Location not found: {0}")]
    LocationNotFound(String),

    #[error("Weather API error: {0}")]
    ApiError(String),

    #[error("Unexpected response: {0}")]
    InvalidResponse(String),

    #[error("No live or offline data available")]
    NoData,
}

impl WeatherError {
    pub fn user_message(&self) -> &'static str {
        match self {
            WeatherError::InvalidInput(_) => "Please enter a city name.",
            WeatherError::LocationNotFound(_) => "Location not found. Check and try again.",
            WeatherError::ApiError(_) => "Weather service error. Please try again.",
            WeatherError::InvalidResponse(_) => {
                "Received unexpected weather data. Please try again later."
            }
            WeatherError::NoData => "Weather data is unavailable. Check your connection and retry.",
        }
    }
}

/// Device location errors.
#[derive(Debug, Error)]
pub enum LocationError {
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Position unavailable")]
    PositionUnavailable,

    #[error("Location request timed out")]
    Timeout,

    #[error("Geolocation is not supported")]
    Unsupported,

    #[error("Location error: {0}")]
    Other(String),
}

impl LocationError {
    pub fn user_message(&self) -> &'static str {
        match self {
            LocationError::PermissionDenied => {
                "Location access denied. Enable location access in your settings or search manually."
            }
            LocationError::PositionUnavailable => {
                "Unable to determine your location. Please try again or search manually."
            }
            LocationError::Timeout => "Location request timed out. Please try again.",
            LocationError::Unsupported | LocationError::Other(_) => {
                "Unable to get your location. Please search manually."
            }
        }
    }
}
