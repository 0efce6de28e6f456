//! Storage backends for rollups and alerts
//!
//! This module provides a trait-based abstraction over the two persisted
//! tables: per-domain utilization rollups and user-facing alerts.
//!
//! ## Design
//!
//! - **Trait-based**: `StorageBackend` trait allows swapping implementations
//! - **Async**: All operations are async for compatibility with Tokio
//! - **Cycle-oriented**: one transaction per cycle and table
//! - **Resilient**: [`ResilientSession`] reconnects and retries on lost connectivity
//!
//! ## Backends
//!
//! - **SQLite** (default): Embedded database shared by every host and the cloud stage
//! - **In-Memory** (fallback): No persistence, for testing or dry runs
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use cloud_monitoring::config::RetryConfig;
//! use cloud_monitoring::storage::{ResilientSession, sqlite::SqliteBackend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = SqliteBackend::new("./monitoring.db").await?;
//!     let session = ResilientSession::new(Arc::new(backend), RetryConfig::default());
//!     session.health_check().await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
pub mod session;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

use std::sync::Arc;

use tracing::info;

use crate::config::StorageConfig;

pub use backend::{HealthStatus, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use schema::{
    AlertChange, AlertRow, AlertStatus, EntityState, NewAlert, RollupBatch, RollupCommit,
    RollupRow, RollupWrite, SeriesColumns,
};
pub use session::ResilientSession;

/// Open the backend selected in the configuration, wrapped in a retrying session
pub async fn open(config: &StorageConfig) -> StorageResult<ResilientSession> {
    let backend: Arc<dyn StorageBackend> = match config {
        StorageConfig::None { .. } => {
            info!("using in-memory storage, nothing will be persisted");
            Arc::new(memory::MemoryBackend::new())
        }
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path, .. } => Arc::new(sqlite::SqliteBackend::new(path).await?),
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => {
            return Err(StorageError::InvalidConfig(
                "built without the storage-sqlite feature".to_string(),
            ));
        }
    };

    Ok(ResilientSession::new(backend, *config.retry()))
}
