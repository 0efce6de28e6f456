//! Storage backend trait definition
//!
//! This module defines the core `StorageBackend` trait that all
//! storage implementations must implement.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StorageResult;
use super::schema::{AlertChange, AlertRow, AlertStatus, RollupBatch, RollupCommit, RollupRow};

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: HashMap<String, String>,
}

/// Trait for persistent storage backends
///
/// The trait covers the rollup table, the alert table and the connection
/// lifecycle. It is designed to be:
///
/// - **Async**: All methods are async for compatibility with Tokio
/// - **Cycle-oriented**: writes of a cycle go through one `commit_*` call
///   each, so a failure never leaves a row half-written
/// - **Re-entrant**: every method may be called again after `reconnect`,
///   which is how [`ResilientSession`](super::session::ResilientSession)
///   retries transient failures
///
/// ## Error Handling
///
/// Methods return `StorageResult<T>`. Lost connectivity must surface as
/// `StorageError::ConnectionFailed` (or `IoError`) so it can be retried;
/// every other variant is treated as permanent.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    // ========================================================================
    // Rollups
    // ========================================================================

    /// UUIDs of every row owned by a host, soft-deleted ones included
    async fn hosted_entities(&self, hypervisor: &str) -> StorageResult<Vec<String>>;

    /// Rows of the given UUIDs, whatever their owning host
    async fn load_rollups(&self, uuids: &[String]) -> StorageResult<Vec<RollupRow>>;

    /// Owning host of the row stored for a UUID, if any
    async fn rollup_owner(&self, uuid: &str) -> StorageResult<Option<String>>;

    /// Apply a cycle's rollup writes in one transaction
    ///
    /// Soft-deletes every row of `batch.hypervisor`, then applies the
    /// updates and inserts. An insert that collides with an existing row is
    /// skipped and reported in [`RollupCommit::conflicts`].
    async fn commit_rollups(&self, batch: &RollupBatch) -> StorageResult<RollupCommit>;

    // ========================================================================
    // Alerts
    // ========================================================================

    /// Alerts of a project with the given status
    async fn project_alerts(
        &self,
        project: &str,
        status: AlertStatus,
    ) -> StorageResult<Vec<AlertRow>>;

    /// Apply a cycle's alert creations and updates in one transaction
    async fn commit_alert_changes(&self, changes: &[AlertChange]) -> StorageResult<()>;

    /// Tag alerts as read or unread, returning the number of rows changed
    async fn set_alert_status(
        &self,
        ids: &[i64],
        status: AlertStatus,
        at: DateTime<Utc>,
    ) -> StorageResult<usize>;

    /// Delete alerts read before the given instant
    async fn purge_read_alerts(&self, read_before: DateTime<Utc>) -> StorageResult<usize>;

    // ========================================================================
    // Connection lifecycle
    // ========================================================================

    /// Close the current connection and open a fresh one
    async fn reconnect(&self) -> StorageResult<()>;

    /// Performs a lightweight operation to verify the backend is operational
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}
