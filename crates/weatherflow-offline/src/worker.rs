//! Request-level interception worker.
//!
//! Lifecycle is an explicit state machine (`Installing -> Waiting -> Active`).
//! The worker runs on its own task and talks to the rest of the app only
//! through [`WorkerHandle`] messages; it is the sole writer of the response
//! buckets.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use url::Url;

use weatherflow_core::{OfflineConfig, ProviderConfig};

use crate::network::Network;
use crate::response_cache::{HttpResponse, ResponseCache};

const BUCKET_PREFIX: &str = "weatherflow-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Installing,
    Waiting,
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Document,
    Asset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub method: String,
    pub url: Url,
    pub destination: Destination,
}

impl FetchRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: "GET".to_string(),
            url,
            destination: Destination::Asset,
        }
    }

    pub fn navigate(url: Url) -> Self {
        Self {
            method: "GET".to_string(),
            url,
            destination: Destination::Document,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    /// Served from a bucket; the data may be stale
    Cache { stored_at: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Served {
        response: HttpResponse,
        source: ResponseSource,
    },
    /// Not intercepted; the caller goes to the network itself
    Passthrough,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterceptError {
    #[error("Network request failed: {0}")]
    Network(String),

    #[error("Forecast request failed with status {0} and nothing is cached")]
    Status(u16),

    #[error("Response cache error: {0}")]
    Storage(String),

    #[error("Cannot {action} while {state:?}")]
    InvalidState {
        action: &'static str,
        state: WorkerState,
    },

    #[error("Worker has stopped")]
    WorkerGone,
}

fn storage_error(error: anyhow::Error) -> InterceptError {
    InterceptError::Storage(format!("{:#}", error))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerMessage {
    SkipWaiting,
    ClearForecastCache,
    GetStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerStatus {
    pub state: WorkerState,
    pub version: String,
    pub static_entries: usize,
    pub forecast_entries: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerReply {
    Activated { deleted_buckets: Vec<String> },
    ForecastCacheCleared,
    Status(WorkerStatus),
}

/// Where the worker lives and what it intercepts
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub version: String,
    pub origin: Url,
    pub static_assets: Vec<String>,
    /// Requests whose URL starts with this are forecast API calls
    pub forecast_endpoint: String,
}

impl WorkerConfig {
    /// The shell list is left empty unless `precache_shell` is set.
    pub fn new(offline: &OfflineConfig, provider: &ProviderConfig) -> Result<Self, url::ParseError> {
        let static_assets = if offline.precache_shell {
            offline.static_assets.clone()
        } else {
            Vec::new()
        };
        Ok(Self {
            version: offline.version.clone(),
            origin: Url::parse(&offline.origin)?,
            static_assets,
            forecast_endpoint: format!("{}/forecast", provider.forecast_url.trim_end_matches('/')),
        })
    }

    pub fn static_bucket(&self) -> String {
        format!("{}{}", BUCKET_PREFIX, self.version)
    }

    /// Forecast responses are tagged with the release too, so activating a
    /// new version starts from an empty forecast bucket.
    pub fn forecast_bucket(&self) -> String {
        format!("{}forecast-{}", BUCKET_PREFIX, self.version)
    }
}

pub struct OfflineWorker<N> {
    config: WorkerConfig,
    state: WorkerState,
    cache: Arc<ResponseCache>,
    network: N,
}

impl<N: Network> OfflineWorker<N> {
    pub fn new(config: WorkerConfig, cache: Arc<ResponseCache>, network: N) -> Self {
        Self {
            config,
            state: WorkerState::Installing,
            cache,
            network,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Pre-cache the static shell. Assets that fail to download are logged
    /// and skipped; installation itself still completes.
    pub async fn install(&mut self) -> Result<usize, InterceptError> {
        if self.state != WorkerState::Installing {
            return Err(InterceptError::InvalidState {
                action: "install",
                state: self.state,
            });
        }

        let bucket = self.config.static_bucket();
        let mut cached = 0;
        for asset in &self.config.static_assets {
            let url = match self.config.origin.join(asset) {
                Ok(url) => url,
                Err(e) => {
                    tracing::warn!("Skipping invalid static asset {}: {}", asset, e);
                    continue;
                }
            };
            match self.network.fetch(&url).await {
                Ok(response) if response.status == 200 => {
                    self.cache
                        .put(&bucket, url.as_str(), &response)
                        .map_err(storage_error)?;
                    cached += 1;
                }
                Ok(response) => {
                    tracing::warn!("Static asset {} returned status {}", url, response.status)
                }
                Err(e) => tracing::warn!("Failed to cache static asset {}: {}", url, e),
            }
        }

        self.state = WorkerState::Waiting;
        tracing::info!(
            "Offline worker {} installed ({}/{} static assets cached)",
            self.config.version,
            cached,
            self.config.static_assets.len()
        );
        Ok(cached)
    }

    /// Take control, deleting every bucket not tagged with this version.
    pub fn activate(&mut self) -> Result<Vec<String>, InterceptError> {
        match self.state {
            WorkerState::Waiting => {}
            WorkerState::Active => return Ok(Vec::new()),
            WorkerState::Installing => {
                return Err(InterceptError::InvalidState {
                    action: "activate",
                    state: self.state,
                })
            }
        }

        let keep = [self.config.static_bucket(), self.config.forecast_bucket()];
        let mut deleted = Vec::new();
        for bucket in self.cache.bucket_names().map_err(storage_error)? {
            if keep.contains(&bucket) {
                continue;
            }
            tracing::info!("Deleting old cache bucket {}", bucket);
            self.cache.delete_bucket(&bucket).map_err(storage_error)?;
            deleted.push(bucket);
        }

        self.state = WorkerState::Active;
        tracing::info!("Offline worker {} activated", self.config.version);
        Ok(deleted)
    }

    fn is_forecast_request(&self, url: &Url) -> bool {
        url.as_str().starts_with(&self.config.forecast_endpoint)
    }

    fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.config.origin.origin()
    }

    pub async fn handle_fetch(&self, request: &FetchRequest) -> Result<FetchOutcome, InterceptError> {
        if self.state != WorkerState::Active || request.method != "GET" {
            return Ok(FetchOutcome::Passthrough);
        }

        if self.is_forecast_request(&request.url) {
            return self.network_first(&request.url).await;
        }

        if !self.is_same_origin(&request.url) {
            return Ok(FetchOutcome::Passthrough);
        }

        self.cache_first(request).await
    }

    async fn network_first(&self, url: &Url) -> Result<FetchOutcome, InterceptError> {
        let bucket = self.config.forecast_bucket();
        let failure = match self.network.fetch(url).await {
            Ok(response) if response.is_success() => {
                self.cache
                    .put(&bucket, url.as_str(), &response)
                    .map_err(storage_error)?;
                tracing::debug!("Cached forecast response for {}", url);
                return Ok(FetchOutcome::Served {
                    response,
                    source: ResponseSource::Network,
                });
            }
            Ok(response) => InterceptError::Status(response.status),
            Err(e) => InterceptError::Network(e.0),
        };

        tracing::info!("Forecast network request failed ({}); trying cache", failure);
        let cached = match self.cache.lookup(&bucket, url.as_str()).map_err(storage_error)? {
            Some(cached) => Some(cached),
            None => self.cache.latest(&bucket).map_err(storage_error)?,
        };

        match cached {
            Some(cached) => {
                tracing::info!("Serving cached forecast from {}", cached.stored_at);
                Ok(FetchOutcome::Served {
                    response: cached.response,
                    source: ResponseSource::Cache {
                        stored_at: cached.stored_at,
                    },
                })
            }
            None => Err(failure),
        }
    }

    async fn cache_first(&self, request: &FetchRequest) -> Result<FetchOutcome, InterceptError> {
        let bucket = self.config.static_bucket();
        if let Some(cached) = self
            .cache
            .lookup(&bucket, request.url.as_str())
            .map_err(storage_error)?
        {
            tracing::debug!("Serving {} from cache", request.url);
            return Ok(FetchOutcome::Served {
                response: cached.response,
                source: ResponseSource::Cache {
                    stored_at: cached.stored_at,
                },
            });
        }

        match self.network.fetch(&request.url).await {
            Ok(response) => {
                if response.status == 200 {
                    self.cache
                        .put(&bucket, request.url.as_str(), &response)
                        .map_err(storage_error)?;
                }
                Ok(FetchOutcome::Served {
                    response,
                    source: ResponseSource::Network,
                })
            }
            Err(e) => {
                tracing::warn!("Fetch failed for {}: {}", request.url, e);
                if request.destination == Destination::Document {
                    let shell = self.config.origin.join("/").map_err(|e| InterceptError::Network(e.to_string()))?;
                    if let Some(cached) = self.cache.lookup(&bucket, shell.as_str()).map_err(storage_error)? {
                        return Ok(FetchOutcome::Served {
                            response: cached.response,
                            source: ResponseSource::Cache {
                                stored_at: cached.stored_at,
                            },
                        });
                    }
                }
                Err(InterceptError::Network(e.0))
            }
        }
    }

    pub fn handle_message(&mut self, message: WorkerMessage) -> Result<WorkerReply, InterceptError> {
        match message {
            WorkerMessage::SkipWaiting => {
                let deleted_buckets = self.activate()?;
                Ok(WorkerReply::Activated { deleted_buckets })
            }
            WorkerMessage::ClearForecastCache => {
                self.cache
                    .delete_bucket(&self.config.forecast_bucket())
                    .map_err(storage_error)?;
                tracing::info!("Cleared cached forecast responses");
                Ok(WorkerReply::ForecastCacheCleared)
            }
            WorkerMessage::GetStatus => Ok(WorkerReply::Status(WorkerStatus {
                state: self.state,
                version: self.config.version.clone(),
                static_entries: self
                    .cache
                    .len(&self.config.static_bucket())
                    .map_err(storage_error)?,
                forecast_entries: self
                    .cache
                    .len(&self.config.forecast_bucket())
                    .map_err(storage_error)?,
            })),
        }
    }
}

enum Command {
    Fetch {
        request: FetchRequest,
        reply: oneshot::Sender<Result<FetchOutcome, InterceptError>>,
    },
    Message {
        message: WorkerMessage,
        reply: oneshot::Sender<Result<WorkerReply, InterceptError>>,
    },
}

/// Page-side handle to a running worker
#[derive(Clone)]
pub struct WorkerHandle {
    tx: mpsc::Sender<Command>,
}

impl WorkerHandle {
    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchOutcome, InterceptError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Fetch { request, reply })
            .await
            .map_err(|_| InterceptError::WorkerGone)?;
        rx.await.map_err(|_| InterceptError::WorkerGone)?
    }

    pub async fn post(&self, message: WorkerMessage) -> Result<WorkerReply, InterceptError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Message { message, reply })
            .await
            .map_err(|_| InterceptError::WorkerGone)?;
        rx.await.map_err(|_| InterceptError::WorkerGone)?
    }
}

/// Install and activate `worker` on its own task, then serve requests one at
/// a time until every handle is dropped.
pub fn spawn_worker<N: Network>(mut worker: OfflineWorker<N>) -> WorkerHandle {
    let (tx, mut rx) = mpsc::channel::<Command>(32);

    tokio::spawn(async move {
        if let Err(e) = worker.install().await {
            tracing::error!("Offline worker install failed: {}", e);
        }
        if let Err(e) = worker.activate() {
            tracing::error!("Offline worker activation failed: {}", e);
        }

        while let Some(command) = rx.recv().await {
            match command {
                Command::Fetch { request, reply } => {
                    let _ = reply.send(worker.handle_fetch(&request).await);
                }
                Command::Message { message, reply } => {
                    let _ = reply.send(worker.handle_message(message));
                }
            }
        }
        tracing::debug!("Offline worker stopped");
    });

    WorkerHandle { tx }
}
