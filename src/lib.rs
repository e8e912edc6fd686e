//! # fieldsync
//!
//! Offline-first data synchronization engine for a field-service maintenance
//! tracker. Technicians keep working when the network drops on site: reads
//! come from a durable local snapshot, writes queue up locally, and the queue
//! drains against the server once connectivity returns, without losing
//! operations, duplicating them, or corrupting the local view.
//!
//! ## Architecture
//!
//! Three components, composed bottom-up:
//!
//! - [`store::SnapshotStore`]: durable whole-document copy of every resource
//!   collection, with TTL expiry and a degraded "light" write under quota
//!   pressure
//! - [`store::OperationQueue`]: durable FIFO of not-yet-acknowledged
//!   mutations, with retry tracking and a terminal failed state
//! - [`SyncCoordinator`]: the single writer. Optimistic local mutations,
//!   connectivity tracking, queue draining, server refresh
//!
//! The UI, session layer, remote API, and business rules are external
//! collaborators; the engine consumes their signals
//! ([`SyncCoordinator::on_connectivity_change`], [`SyncCoordinator::on_login`],
//! [`SyncCoordinator::on_logout`]) and exposes a small read model
//! (collections, pending count, connectivity, snapshot age).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fieldsync::{OperationKind, SyncConfig, SyncCoordinator};
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), fieldsync::SyncError> {
//! let config = SyncConfig::builder()
//!     .server_url("https://api.example.com")
//!     .resources(["clients", "machines", "orders", "reports"])
//!     .build()
//!     .expect("valid config");
//!
//! let engine = SyncCoordinator::open(config).await?;
//! engine.refresh().await;
//!
//! // Works identically with or without network: applied locally, queued,
//! // delivered when the link is back.
//! let id = engine
//!     .mutate("clients", OperationKind::Create, None, json!({"name": "Acme"}))
//!     .await?;
//! println!("created {id}, {} operation(s) pending", engine.pending_count());
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod model;
pub mod store;

pub use api::{Action, ApiRequest, ApiResponse, HttpApi, RemoteApi};
pub use config::{ConfigError, SyncConfig, SyncConfigBuilder};
pub use coordinator::SyncCoordinator;
pub use error::{ApiError, SyncError};
pub use model::{
    Collections, DrainReport, OperationKind, OperationStatus, PendingOperation, Snapshot,
    SyncStatus,
};
pub use store::{LocalStore, OperationQueue, SnapshotStore};
