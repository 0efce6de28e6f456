//! In-memory storage backend (no persistence)
//!
//! This backend keeps both tables in process memory.
//! It's useful for:
//! - Testing without database dependencies
//! - Dry runs of the cloud stage (`"backend": "none"`)
//!
//! ## Limitations
//!
//! - **No persistence**: All data lost on restart
//! - **Single process**: hosts cannot share rows through it
//!
//! Connection loss can be simulated with
//! [`MemoryBackend::inject_connection_failures`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::backend::{HealthStatus, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::schema::{
    AlertChange, AlertRow, AlertStatus, EntityState, RollupBatch, RollupCommit, RollupRow,
    RollupWrite,
};

#[derive(Default)]
struct Tables {
    rollups: HashMap<String, RollupRow>,
    alerts: BTreeMap<i64, AlertRow>,
    next_alert_id: i64,
}

/// In-memory storage backend
#[derive(Default)]
pub struct MemoryBackend {
    tables: Mutex<Tables>,

    /// Number of upcoming calls that fail with a connection error
    pending_failures: AtomicU32,

    reconnects: AtomicU32,
}

impl MemoryBackend {
    /// Create a new in-memory backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` operations fail as if the connection dropped
    pub fn inject_connection_failures(&self, count: u32) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    /// Number of times `reconnect` has been called
    pub fn reconnect_count(&self) -> u32 {
        self.reconnects.load(Ordering::SeqCst)
    }

    /// Every stored alert, whatever its project or status
    pub fn all_alerts(&self) -> Vec<AlertRow> {
        self.lock()
            .map(|tables| tables.alerts.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Every stored rollup row
    pub fn all_rollups(&self) -> Vec<RollupRow> {
        self.lock()
            .map(|tables| tables.rollups.values().cloned().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> StorageResult<std::sync::MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| StorageError::QueryFailed("in-memory tables poisoned".to_string()))
    }

    fn connection(&self) -> StorageResult<std::sync::MutexGuard<'_, Tables>> {
        let failing = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StorageError::ConnectionFailed(
                "simulated connection loss".to_string(),
            ));
        }
        self.lock()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn hosted_entities(&self, hypervisor: &str) -> StorageResult<Vec<String>> {
        let tables = self.connection()?;
        Ok(tables
            .rollups
            .values()
            .filter(|row| row.hypervisor == hypervisor)
            .map(|row| row.uuid.clone())
            .collect())
    }

    async fn load_rollups(&self, uuids: &[String]) -> StorageResult<Vec<RollupRow>> {
        let tables = self.connection()?;
        Ok(uuids
            .iter()
            .filter_map(|uuid| tables.rollups.get(uuid).cloned())
            .collect())
    }

    async fn rollup_owner(&self, uuid: &str) -> StorageResult<Option<String>> {
        let tables = self.connection()?;
        Ok(tables.rollups.get(uuid).map(|row| row.hypervisor.clone()))
    }

    async fn commit_rollups(&self, batch: &RollupBatch) -> StorageResult<RollupCommit> {
        let mut tables = self.connection()?;
        let mut commit = RollupCommit::default();

        for row in tables.rollups.values_mut() {
            if row.hypervisor == batch.hypervisor {
                row.state = EntityState::SoftDeleted;
            }
        }

        for write in &batch.writes {
            match write {
                RollupWrite::Update(row) => {
                    if let Some(stored) = tables.rollups.get_mut(&row.uuid) {
                        *stored = row.clone();
                    }
                    commit.updated += 1;
                }
                RollupWrite::Insert(row) => {
                    if tables.rollups.contains_key(&row.uuid) {
                        commit.conflicts.push(row.uuid.clone());
                    } else {
                        tables.rollups.insert(row.uuid.clone(), row.clone());
                        commit.inserted += 1;
                    }
                }
            }
        }

        debug!(
            "in-memory rollup commit: {} updated, {} inserted",
            commit.updated, commit.inserted
        );
        Ok(commit)
    }

    async fn project_alerts(
        &self,
        project: &str,
        status: AlertStatus,
    ) -> StorageResult<Vec<AlertRow>> {
        let tables = self.connection()?;
        Ok(tables
            .alerts
            .values()
            .filter(|alert| alert.project == project && alert.status == status)
            .cloned()
            .collect())
    }

    async fn commit_alert_changes(&self, changes: &[AlertChange]) -> StorageResult<()> {
        let mut tables = self.connection()?;

        for change in changes {
            match change {
                AlertChange::Create(alert) => {
                    tables.next_alert_id += 1;
                    let id = tables.next_alert_id;
                    tables.alerts.insert(
                        id,
                        AlertRow {
                            id,
                            uuid: alert.uuid.clone(),
                            project: alert.project.clone(),
                            severity: alert.severity,
                            status: AlertStatus::Unread,
                            message: alert.message.clone(),
                            timestamp: alert.timestamp,
                            read_at: None,
                        },
                    );
                }
                AlertChange::Update {
                    id,
                    message,
                    timestamp,
                } => {
                    if let Some(alert) = tables
                        .alerts
                        .get_mut(id)
                        .filter(|alert| alert.status == AlertStatus::Unread)
                    {
                        alert.message = message.clone();
                        alert.timestamp = *timestamp;
                    }
                }
            }
        }

        Ok(())
    }

    async fn set_alert_status(
        &self,
        ids: &[i64],
        status: AlertStatus,
        at: DateTime<Utc>,
    ) -> StorageResult<usize> {
        let mut tables = self.connection()?;
        let mut changed = 0;

        for id in ids {
            if let Some(alert) = tables.alerts.get_mut(id) {
                alert.status = status;
                alert.read_at = match status {
                    AlertStatus::Read => Some(at),
                    AlertStatus::Unread => None,
                };
                changed += 1;
            }
        }

        Ok(changed)
    }

    async fn purge_read_alerts(&self, read_before: DateTime<Utc>) -> StorageResult<usize> {
        let mut tables = self.connection()?;
        let before = tables.alerts.len();

        tables.alerts.retain(|_, alert| {
            alert.status != AlertStatus::Read
                || alert.read_at.unwrap_or(alert.timestamp) >= read_before
        });

        Ok(before - tables.alerts.len())
    }

    async fn reconnect(&self) -> StorageResult<()> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let tables = self.connection()?;
        Ok(HealthStatus {
            healthy: true,
            message: "In-memory storage operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("rollups".to_string(), tables.rollups.len().to_string()),
                ("alerts".to_string(), tables.alerts.len().to_string()),
            ]),
        })
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory backend (no-op)");
        Ok(())
    }
}
