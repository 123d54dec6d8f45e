//! Offline resilience for WeatherFlow
//!
//! Last-known-good weather snapshots, persisted preferences and a
//! request-interception worker that keeps the app shell and the latest
//! forecast available without a network.

pub mod local_store;
pub mod network;
pub mod response_cache;
pub mod snapshot;
pub mod worker;

pub use local_store::{Favorite, LastLocation, LocalStore, StorageChange, MAX_RECENT_SEARCHES};
pub use network::{HttpNetwork, Network, NetworkFailure};
pub use response_cache::{CachedResponse, HttpResponse, ResponseCache};
pub use snapshot::{Snapshot, SnapshotData, SnapshotKind, SnapshotStore};
pub use worker::{
    spawn_worker, Destination, FetchOutcome, FetchRequest, InterceptError, OfflineWorker,
    ResponseSource, WorkerConfig, WorkerHandle, WorkerMessage, WorkerReply, WorkerState,
    WorkerStatus,
};
