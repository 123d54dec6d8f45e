use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use weatherflow_core::Config;
use weatherflow_offline::{
    spawn_worker, HttpNetwork, LocalStore, OfflineWorker, ResponseCache, SnapshotStore,
    WorkerConfig, WorkerHandle,
};
use weatherflow_weather::{GeolocationResolver, OpenMeteoClient};

use crate::client::CacheClient;
use crate::service::WeatherService;

const SNAPSHOT_DB: &str = "snapshots.db";
const PREFERENCES_DB: &str = "preferences.db";
const RESPONSES_DB: &str = "responses.db";

/// How often expired cache entries are swept
pub const GC_INTERVAL: Duration = Duration::from_secs(60);

/// Main application state and lifecycle manager
pub struct App {
    config: Arc<Config>,
    service: Arc<WeatherService>,
    worker: WorkerHandle,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl App {
    /// Load and validate configuration, then build the application.
    /// Must be called inside a Tokio runtime.
    pub fn load() -> Result<Self> {
        let (config, _) = Config::load_validated()?;
        Self::new(config, GeolocationResolver::unsupported())
    }

    /// Build the application from `config`. Must be called inside a Tokio
    /// runtime; the offline worker starts installing immediately and every
    /// forecast request goes through it.
    pub fn new(config: Config, locator: GeolocationResolver) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir).with_context(|| {
            format!("Failed to create data directory {}", config.data_dir.display())
        })?;

        let snapshots = Arc::new(SnapshotStore::new(config.data_dir.join(SNAPSHOT_DB))?);
        let store = Arc::new(LocalStore::new(config.data_dir.join(PREFERENCES_DB))?);
        let responses = Arc::new(
            ResponseCache::new(config.data_dir.join(RESPONSES_DB))
                .context("Failed to open response cache")?,
        );

        let network = HttpNetwork::new(
            config.provider.request_timeout(),
            &config.provider.user_agent,
        )
        .context("Failed to create worker network client")?;
        let worker_config = WorkerConfig::new(&config.offline, &config.provider)
            .context("Invalid offline origin")?;
        let worker = spawn_worker(OfflineWorker::new(worker_config, responses, network));

        let provider = OpenMeteoClient::new(&config.provider)
            .context("Failed to create weather provider client")?;
        let cache = Arc::new(CacheClient::from_config(&config.cache));
        let service = Arc::new(
            WeatherService::new(
                provider,
                cache,
                snapshots,
                store,
                locator,
                config.weather.units,
            )
            .with_worker(worker.clone()),
        );

        tracing::info!("Application created (data dir {})", config.data_dir.display());

        Ok(Self {
            config: Arc::new(config),
            service,
            worker,
            shutdown: CancellationToken::new(),
            tasks: Vec::new(),
        })
    }

    /// Start background maintenance (cache garbage collection).
    pub fn start(&mut self) {
        self.start_with_interval(GC_INTERVAL);
    }

    pub fn start_with_interval(&mut self, interval: Duration) {
        let service = Arc::clone(&self.service);
        let shutdown = self.shutdown.clone();

        self.tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        service.cache().collect_garbage();
                    }
                }
            }
            tracing::debug!("Cache maintenance stopped");
        }));
        tracing::info!("Cache maintenance running every {:?}", interval);
    }

    /// Stop background tasks and wait for them to finish
    pub async fn shutdown(&mut self) -> Result<()> {
        tracing::info!("Shutting down application");
        self.shutdown.cancel();

        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::error!("Background task failed during shutdown: {}", e);
            }
        }

        Ok(())
    }

    /// Get reference to application config
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn service(&self) -> Arc<WeatherService> {
        Arc::clone(&self.service)
    }

    pub fn worker(&self) -> &WorkerHandle {
        &self.worker
    }

    /// Token cancelled on shutdown; in-flight requests can hang off it
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use weatherflow_core::Units;
    use weatherflow_offline::{WorkerMessage, WorkerReply, WorkerState};

    fn config_in(dir: &std::path::Path) -> Config {
        Config {
            data_dir: dir.join("data"),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_new_creates_stores_in_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = App::new(config_in(dir.path()), GeolocationResolver::unsupported()).unwrap();

        assert!(dir.path().join("data").join(SNAPSHOT_DB).exists());
        assert!(dir.path().join("data").join(PREFERENCES_DB).exists());
        assert_eq!(app.service().units(), Units::Metric);

        app.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_worker_is_active_without_shell_precache() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = App::new(config_in(dir.path()), GeolocationResolver::unsupported()).unwrap();

        match app.worker().post(WorkerMessage::GetStatus).await.unwrap() {
            WorkerReply::Status(status) => {
                assert_eq!(status.state, WorkerState::Active);
                assert_eq!(status.static_entries, 0);
            }
            other => panic!("unexpected reply {:?}", other),
        }
        assert!(dir.path().join("data").join(RESPONSES_DB).exists());

        app.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_stops_maintenance() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = App::new(config_in(dir.path()), GeolocationResolver::unsupported()).unwrap();
        app.start_with_interval(Duration::from_millis(10));

        let token = app.shutdown_token();
        app.shutdown().await.unwrap();
        assert!(token.is_cancelled());
    }
}
