use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::units::Units;

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a user-friendly message summarizing all errors
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the SQLite stores (snapshot, preferences, response buckets)
    pub data_dir: PathBuf,

    /// Upstream weather/geocoding provider
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Per-resource cache policies
    #[serde(default)]
    pub cache: CacheConfig,

    /// Weather display settings
    #[serde(default)]
    pub weather: WeatherConfig,

    /// Offline worker settings
    #[serde(default)]
    pub offline: OfflineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL of the geocoding API (the `/search` path is appended)
    pub geocoding_url: String,

    /// Base URL of the forecast API (the `/forecast` path is appended)
    pub forecast_url: String,

    /// Per-request timeout; expiry counts as a transient network failure
    pub request_timeout_secs: u64,

    pub user_agent: String,
}

impl ProviderConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            geocoding_url: "https://geocoding-api.open-meteo.com/v1".to_string(),
            forecast_url: "https://api.open-meteo.com/v1".to_string(),
            request_timeout_secs: 10,
            user_agent: concat!("WeatherFlow/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Staleness, garbage-collection and retry settings for one resource kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub stale_minutes: u64,
    pub gc_minutes: u64,
    pub retries: u32,
}

impl PolicyConfig {
    pub const fn new(stale_minutes: u64, gc_minutes: u64, retries: u32) -> Self {
        Self {
            stale_minutes,
            gc_minutes,
            retries,
        }
    }

    pub fn stale_time(&self) -> Duration {
        Duration::from_secs(self.stale_minutes * 60)
    }

    pub fn gc_time(&self) -> Duration {
        Duration::from_secs(self.gc_minutes * 60)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_current_policy")]
    pub current: PolicyConfig,
    #[serde(default = "default_forecast_policy")]
    pub forecast: PolicyConfig,
    #[serde(default = "default_search_policy")]
    pub search: PolicyConfig,
}

fn default_current_policy() -> PolicyConfig {
    PolicyConfig::new(8, 15, 1)
}

fn default_forecast_policy() -> PolicyConfig {
    PolicyConfig::new(30, 60, 1)
}

fn default_search_policy() -> PolicyConfig {
    PolicyConfig::new(5, 10, 1)
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            current: default_current_policy(),
            forecast: default_forecast_policy(),
            search: default_search_policy(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WeatherConfig {
    /// Preferred display units
    #[serde(default)]
    pub units: Units,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineConfig {
    /// Release tag; static buckets of any other tag are dropped on activation
    #[serde(default = "default_offline_version")]
    pub version: String,

    /// Origin the app shell is served from
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Shell assets cached when the worker installs
    #[serde(default = "default_static_assets")]
    pub static_assets: Vec<String>,

    /// Fetch `static_assets` from `origin` on install. Off unless a shell is
    /// actually being served.
    #[serde(default)]
    pub precache_shell: bool,
}

fn default_offline_version() -> String {
    "v1".to_string()
}

fn default_origin() -> String {
    "http://localhost:3000".to_string()
}

fn default_static_assets() -> Vec<String> {
    [
        "/",
        "/manifest.webmanifest",
        "/icons/icon-192x192.png",
        "/icons/icon-512x512.png",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            version: default_offline_version(),
            origin: default_origin(),
            static_assets: default_static_assets(),
            precache_shell: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("weatherflow");

        Self {
            data_dir,
            provider: ProviderConfig::default(),
            cache: CacheConfig::default(),
            weather: WeatherConfig::default(),
            offline: OfflineConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file, creating default if it doesn't exist
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from an explicit path, writing defaults there if absent
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let contents =
            std::fs::read_to_string(config_path).context("Failed to read config file")?;

        let config: Config = toml::from_str(&contents).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Load configuration and validate it
    ///
    /// Returns an error if validation fails with critical errors.
    pub fn load_validated() -> Result<(Self, ValidationResult)> {
        let config = Self::load()?;
        let validation = config.validate();

        if !validation.is_valid() {
            anyhow::bail!(
                "Configuration validation failed: {}",
                validation.error_summary()
            );
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((config, validation))
    }

    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        self.validate_url(&self.provider.geocoding_url, "provider.geocoding_url", &mut result);
        self.validate_url(&self.provider.forecast_url, "provider.forecast_url", &mut result);
        self.validate_url(&self.offline.origin, "offline.origin", &mut result);

        if self.provider.request_timeout_secs == 0 {
            result.add_error(
                "provider.request_timeout_secs",
                "Request timeout must be greater than 0",
            );
        } else if self.provider.request_timeout_secs > 120 {
            result.add_warning(
                "provider.request_timeout_secs",
                "Request timeout is unusually long (>120s)",
            );
        }

        for (field, policy) in [
            ("cache.current", &self.cache.current),
            ("cache.forecast", &self.cache.forecast),
            ("cache.search", &self.cache.search),
        ] {
            if policy.stale_minutes > policy.gc_minutes {
                result.add_error(field, "stale_minutes must not exceed gc_minutes");
            }
            if policy.gc_minutes == 0 {
                result.add_warning(field, "Caching disabled (gc_minutes = 0)");
            }
            if policy.retries > 5 {
                result.add_warning(field, "More than 5 retries delays error reporting");
            }
        }

        if self.offline.version.trim().is_empty() {
            result.add_error("offline.version", "Version tag must not be empty");
        }

        result
    }

    fn validate_url(&self, url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                }

                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }

                if url.port() == Some(0) {
                    result.add_error(field_name, "Port cannot be 0");
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(config_path, contents).context("Failed to write config file")?;

        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("weatherflow");

        Ok(config_dir.join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn test_valid_default_config() {
        let config = Config::default();
        let result = config.validate();
        assert!(result.is_valid(), "Default config should be valid: {:?}", result.errors);
    }

    #[test]
    fn test_default_policies() {
        let cache = CacheConfig::default();
        assert_eq!(cache.current, PolicyConfig::new(8, 15, 1));
        assert_eq!(cache.forecast, PolicyConfig::new(30, 60, 1));
        assert_eq!(cache.search, PolicyConfig::new(5, 10, 1));
        assert_eq!(cache.current.stale_time(), Duration::from_secs(480));
    }

    #[test]
    fn test_invalid_url() {
        let mut config = Config::default();
        config.provider.forecast_url = "not-a-url".to_string();
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.field == "provider.forecast_url"));
    }

    #[test]
    fn test_invalid_url_scheme() {
        let mut config = Config::default();
        config.provider.geocoding_url = "ftp://localhost:8080".to_string();
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.message.contains("http or https")));
    }

    #[test]
    fn test_stale_longer_than_gc_is_error() {
        let mut config = Config::default();
        config.cache.forecast = PolicyConfig::new(90, 60, 1);
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.field == "cache.forecast"));
    }

    #[test]
    fn test_many_retries_is_warning() {
        let mut config = Config::default();
        config.cache.search.retries = 9;
        let result = config.validate();
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.field == "cache.search"));
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.weather.units, Units::Metric);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.weather.units = Units::Imperial;
        config.offline.version = "v7".to_string();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.weather.units, Units::Imperial);
        assert_eq!(loaded.offline.version, "v7");
        assert_eq!(loaded.cache.current, config.cache.current);
    }

    #[test]
    fn test_partial_file_uses_section_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "data_dir = \"/tmp/wf\"\n").unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.data_dir, PathBuf::from("/tmp/wf"));
        assert_eq!(loaded.provider.request_timeout_secs, 10);
        assert_eq!(loaded.offline.static_assets.len(), 4);
        assert!(!loaded.offline.precache_shell);
    }

    #[test]
    fn test_validation_result_error_summary() {
        let mut result = ValidationResult::default();
        result.add_error("field1", "error1");
        result.add_error("field2", "error2");
        let summary = result.error_summary();
        assert!(summary.contains("field1"));
        assert!(summary.contains("field2"));
    }
}
