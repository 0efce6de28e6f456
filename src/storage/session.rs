//! Reconnecting wrapper around a storage backend
//!
//! Every persistence call of a cycle goes through a [`ResilientSession`].
//! When a call fails because the connection was lost, the session waits
//! `wait_base * attempt`, reopens the connection and issues the same call
//! again. After `max_retries` failed attempts the last error is returned as
//! [`StorageError::RetriesExhausted`]. Any other error is returned as is.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tracing::{error, warn};

use super::backend::{HealthStatus, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::schema::{AlertChange, AlertRow, AlertStatus, RollupBatch, RollupCommit, RollupRow};
use crate::config::RetryConfig;

#[derive(Clone)]
pub struct ResilientSession {
    backend: Arc<dyn StorageBackend>,
    retry: RetryConfig,
}

impl ResilientSession {
    pub fn new(backend: Arc<dyn StorageBackend>, retry: RetryConfig) -> Self {
        Self { backend, retry }
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Run `op` against the backend, reconnecting on transient failures
    pub async fn run<'s, T, F>(&'s self, operation: &str, mut op: F) -> StorageResult<T>
    where
        F: FnMut(&'s dyn StorageBackend) -> BoxFuture<'s, StorageResult<T>>,
    {
        let mut attempt = 0;

        loop {
            let err = match op(self.backend.as_ref()).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => err,
                Err(err) => return Err(err),
            };

            attempt += 1;
            if attempt > self.retry.max_retries {
                error!(
                    "{} failed after {} reconnect attempts: {}",
                    operation, self.retry.max_retries, err
                );
                return Err(StorageError::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts: self.retry.max_retries,
                    last: Box::new(err),
                });
            }

            let wait = self.retry.wait_base() * attempt;
            warn!(
                "{} lost its connection ({}), reconnecting in {:?} (attempt {}/{})",
                operation, err, wait, attempt, self.retry.max_retries
            );
            tokio::time::sleep(wait).await;

            if let Err(e) = self.backend.reconnect().await {
                warn!("reconnect failed: {}", e);
            }
        }
    }

    pub async fn hosted_entities(&self, hypervisor: &str) -> StorageResult<Vec<String>> {
        self.run("hosted_entities", |b| b.hosted_entities(hypervisor))
            .await
    }

    pub async fn load_rollups(&self, uuids: &[String]) -> StorageResult<Vec<RollupRow>> {
        self.run("load_rollups", |b| b.load_rollups(uuids)).await
    }

    pub async fn rollup_owner(&self, uuid: &str) -> StorageResult<Option<String>> {
        self.run("rollup_owner", |b| b.rollup_owner(uuid)).await
    }

    pub async fn commit_rollups(&self, batch: &RollupBatch) -> StorageResult<RollupCommit> {
        self.run("commit_rollups", |b| b.commit_rollups(batch)).await
    }

    pub async fn project_alerts(
        &self,
        project: &str,
        status: AlertStatus,
    ) -> StorageResult<Vec<AlertRow>> {
        self.run("project_alerts", |b| b.project_alerts(project, status))
            .await
    }

    pub async fn commit_alert_changes(&self, changes: &[AlertChange]) -> StorageResult<()> {
        self.run("commit_alert_changes", |b| b.commit_alert_changes(changes))
            .await
    }

    pub async fn set_alert_status(
        &self,
        ids: &[i64],
        status: AlertStatus,
        at: DateTime<Utc>,
    ) -> StorageResult<usize> {
        self.run("set_alert_status", |b| b.set_alert_status(ids, status, at))
            .await
    }

    pub async fn purge_read_alerts(&self, read_before: DateTime<Utc>) -> StorageResult<usize> {
        self.run("purge_read_alerts", |b| b.purge_read_alerts(read_before))
            .await
    }

    /// Backend status; an unhealthy report counts as a lost connection
    pub async fn health_check(&self) -> StorageResult<HealthStatus> {
        self.run("health_check", |b| {
            Box::pin(async move {
                let status = b.health_check().await?;
                if status.healthy {
                    Ok(status)
                } else {
                    Err(StorageError::ConnectionFailed(status.message))
                }
            })
        })
        .await
    }

    pub async fn close(&self) -> StorageResult<()> {
        self.backend.close().await
    }
}
