//! Shared foundation for the WeatherFlow crates: configuration, the
//! application error hierarchy, unit preference and logging setup.

pub mod config;
pub mod error;
pub mod units;

pub use config::{
    CacheConfig, Config, OfflineConfig, PolicyConfig, ProviderConfig, ValidationResult,
    WeatherConfig,
};
pub use error::{AppError, LocationError, NetworkError, StorageError, WeatherError};
pub use units::Units;

use anyhow::Result;

fn env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

/// Initialize logging for the process
pub fn init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))?;

    tracing::info!("WeatherFlow core initialized");
    Ok(())
}

/// Like [`init`], but silently keeps an already-installed subscriber.
/// Embedders and tests may call this any number of times.
pub fn try_init() {
    let _ = tracing_subscriber::fmt().with_env_filter(env_filter()).try_init();
}
