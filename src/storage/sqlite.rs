//! SQLite storage backend implementation
//!
//! This module provides a SQLite-based implementation of the `StorageBackend` trait.
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Readers (the alert CLI) are not blocked by a cycle's commit
//! - **Reconnectable**: the pool can be dropped and reopened in place
//! - **Migrations**: Automatic schema versioning with sqlx

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use super::backend::{HealthStatus, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::schema::{
    AlertChange, AlertRow, AlertStatus, EntityState, RollupBatch, RollupCommit, RollupRow,
    RollupWrite, SeriesColumns,
};
use crate::{Metric, Severity, Tier};

const ROLLUP_COLUMNS: &str = "uuid, hypervisor, vcores, vram, \
    hourly_vcpu_usage, daily_vcpu_usage, weekly_vcpu_usage, \
    hourly_cpu_usage, daily_cpu_usage, weekly_cpu_usage, \
    hourly_mem_usage, daily_mem_usage, weekly_mem_usage, \
    deleted, last_update";

const ALERT_COLUMNS: &str = "id, uuid, project, severity, status, message, timestamp, read_at";

/// SQLite storage backend
pub struct SqliteBackend {
    pool: RwLock<Pool<Sqlite>>,
    options: SqliteConnectOptions,
    db_path: String,
}

impl SqliteBackend {
    /// Create a new SQLite backend
    ///
    /// This will:
    /// 1. Create the database file if it doesn't exist
    /// 2. Run migrations to create tables
    /// 3. Configure SQLite for WAL journaling
    ///
    /// ## Example
    ///
    /// ```no_run
    /// # use cloud_monitoring::storage::sqlite::SqliteBackend;
    /// # async fn example() -> anyhow::Result<()> {
    /// let backend = SqliteBackend::new("./monitoring.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30));

        let pool = Self::connect(&options).await?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("database migrations complete");

        Ok(Self {
            pool: RwLock::new(pool),
            options,
            db_path: db_path_str,
        })
    }

    async fn connect(options: &SqliteConnectOptions) -> StorageResult<Pool<Sqlite>> {
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options.clone())
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))
    }

    /// Current pool (cheap handle clone, so a reconnect never waits on a query)
    async fn pool(&self) -> Pool<Sqlite> {
        self.pool.read().await.clone()
    }

    fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn millis_to_timestamp(millis: i64) -> StorageResult<DateTime<Utc>> {
        DateTime::from_timestamp_millis(millis).ok_or_else(|| {
            StorageError::SerializationError(format!("timestamp out of range: {}", millis))
        })
    }

    fn rollup_from_row(row: &SqliteRow) -> StorageResult<RollupRow> {
        let mut series = SeriesColumns::default();
        for tier in Tier::ALL {
            for metric in Metric::ALL {
                let column = SeriesColumns::column_name(tier, metric);
                let value: String = row.try_get(column.as_str())?;
                series.set(tier, metric, value);
            }
        }

        let vcores: i64 = row.try_get("vcores")?;
        let vram: i64 = row.try_get("vram")?;
        let deleted: i64 = row.try_get("deleted")?;
        let last_update = row
            .try_get::<Option<i64>, _>("last_update")?
            .map(Self::millis_to_timestamp)
            .transpose()?;

        Ok(RollupRow {
            uuid: row.try_get("uuid")?,
            hypervisor: row.try_get("hypervisor")?,
            vcores: u32::try_from(vcores).unwrap_or_default(),
            vram: u64::try_from(vram).unwrap_or_default(),
            series,
            state: EntityState::from_deleted_flag(deleted != 0),
            last_update,
        })
    }

    fn alert_from_row(row: &SqliteRow) -> StorageResult<AlertRow> {
        let severity: String = row.try_get("severity")?;
        let severity = Severity::parse(&severity).ok_or_else(|| {
            StorageError::SerializationError(format!("unknown severity: {}", severity))
        })?;

        Ok(AlertRow {
            id: row.try_get("id")?,
            uuid: row.try_get("uuid")?,
            project: row.try_get("project")?,
            severity,
            status: AlertStatus::from_flag(row.try_get("status")?),
            message: row.try_get("message")?,
            timestamp: Self::millis_to_timestamp(row.try_get("timestamp")?)?,
            read_at: row
                .try_get::<Option<i64>, _>("read_at")?
                .map(Self::millis_to_timestamp)
                .transpose()?,
        })
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    #[instrument(skip(self))]
    async fn hosted_entities(&self, hypervisor: &str) -> StorageResult<Vec<String>> {
        let rows = sqlx::query("SELECT uuid FROM instances_monitoring WHERE hypervisor = ?")
            .bind(hypervisor)
            .fetch_all(&self.pool().await)
            .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("uuid").map_err(Into::into))
            .collect()
    }

    #[instrument(skip(self, uuids), fields(count = uuids.len()))]
    async fn load_rollups(&self, uuids: &[String]) -> StorageResult<Vec<RollupRow>> {
        if uuids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; uuids.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM instances_monitoring WHERE uuid IN ({})",
            ROLLUP_COLUMNS, placeholders
        );

        let mut query = sqlx::query(&sql);
        for uuid in uuids {
            query = query.bind(uuid);
        }

        let rows = query.fetch_all(&self.pool().await).await?;
        debug!("loaded {} rollup rows", rows.len());

        rows.iter().map(Self::rollup_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn rollup_owner(&self, uuid: &str) -> StorageResult<Option<String>> {
        let owner: Option<(String,)> =
            sqlx::query_as("SELECT hypervisor FROM instances_monitoring WHERE uuid = ?")
                .bind(uuid)
                .fetch_optional(&self.pool().await)
                .await?;

        Ok(owner.map(|(hypervisor,)| hypervisor))
    }

    #[instrument(skip(self, batch), fields(hypervisor = %batch.hypervisor, writes = batch.writes.len()))]
    async fn commit_rollups(&self, batch: &RollupBatch) -> StorageResult<RollupCommit> {
        let pool = self.pool().await;
        let mut tx = pool.begin().await?;
        let mut commit = RollupCommit::default();

        sqlx::query("UPDATE instances_monitoring SET deleted = 1 WHERE hypervisor = ?")
            .bind(&batch.hypervisor)
            .execute(&mut *tx)
            .await?;

        for write in &batch.writes {
            let row = write.row();
            let last_update = row.last_update.as_ref().map(Self::timestamp_to_millis);

            match write {
                RollupWrite::Update(_) => {
                    let mut query = sqlx::query(
                        r#"
                        UPDATE instances_monitoring SET
                            hypervisor = ?, deleted = ?, last_update = ?, vcores = ?, vram = ?,
                            hourly_vcpu_usage = ?, hourly_cpu_usage = ?, hourly_mem_usage = ?,
                            daily_vcpu_usage = ?, daily_cpu_usage = ?, daily_mem_usage = ?,
                            weekly_vcpu_usage = ?, weekly_cpu_usage = ?, weekly_mem_usage = ?
                        WHERE uuid = ?
                        "#,
                    )
                    .bind(&row.hypervisor)
                    .bind(row.state.deleted_flag() as i64)
                    .bind(last_update)
                    .bind(row.vcores as i64)
                    .bind(row.vram as i64);

                    for (_, _, values) in row.series.iter() {
                        query = query.bind(values);
                    }

                    let result = query.bind(&row.uuid).execute(&mut *tx).await?;
                    if result.rows_affected() == 0 {
                        warn!("update of {} matched no row", row.uuid);
                    }
                    commit.updated += 1;
                }
                RollupWrite::Insert(_) => {
                    let mut query = sqlx::query(
                        r#"
                        INSERT INTO instances_monitoring (
                            uuid, hypervisor, vcores, vram, deleted, last_update,
                            hourly_vcpu_usage, hourly_cpu_usage, hourly_mem_usage,
                            daily_vcpu_usage, daily_cpu_usage, daily_mem_usage,
                            weekly_vcpu_usage, weekly_cpu_usage, weekly_mem_usage
                        )
                        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                        ON CONFLICT (uuid) DO NOTHING
                        "#,
                    )
                    .bind(&row.uuid)
                    .bind(&row.hypervisor)
                    .bind(row.vcores as i64)
                    .bind(row.vram as i64)
                    .bind(row.state.deleted_flag() as i64)
                    .bind(last_update);

                    for (_, _, values) in row.series.iter() {
                        query = query.bind(values);
                    }

                    let result = query.execute(&mut *tx).await?;
                    if result.rows_affected() == 0 {
                        commit.conflicts.push(row.uuid.clone());
                    } else {
                        commit.inserted += 1;
                    }
                }
            }
        }

        tx.commit().await?;

        debug!(
            "rollup commit complete ({} updated, {} inserted, {} conflicts)",
            commit.updated,
            commit.inserted,
            commit.conflicts.len()
        );
        Ok(commit)
    }

    #[instrument(skip(self))]
    async fn project_alerts(
        &self,
        project: &str,
        status: AlertStatus,
    ) -> StorageResult<Vec<AlertRow>> {
        let sql = format!(
            "SELECT {} FROM user_alerts WHERE project = ? AND status = ? ORDER BY id ASC",
            ALERT_COLUMNS
        );

        let rows = sqlx::query(&sql)
            .bind(project)
            .bind(status.as_flag())
            .fetch_all(&self.pool().await)
            .await?;

        rows.iter().map(Self::alert_from_row).collect()
    }

    #[instrument(skip(self, changes), fields(count = changes.len()))]
    async fn commit_alert_changes(&self, changes: &[AlertChange]) -> StorageResult<()> {
        if changes.is_empty() {
            return Ok(());
        }

        let pool = self.pool().await;
        let mut tx = pool.begin().await?;

        for change in changes {
            match change {
                AlertChange::Create(alert) => {
                    sqlx::query(
                        r#"
                        INSERT INTO user_alerts (uuid, project, severity, status, message, timestamp)
                        VALUES (?, ?, ?, ?, ?, ?)
                        "#,
                    )
                    .bind(&alert.uuid)
                    .bind(&alert.project)
                    .bind(alert.severity.as_str())
                    .bind(AlertStatus::Unread.as_flag())
                    .bind(&alert.message)
                    .bind(Self::timestamp_to_millis(&alert.timestamp))
                    .execute(&mut *tx)
                    .await?;
                }
                AlertChange::Update {
                    id,
                    message,
                    timestamp,
                } => {
                    sqlx::query(
                        "UPDATE user_alerts SET message = ?, timestamp = ? WHERE id = ? AND status = ?",
                    )
                    .bind(message)
                    .bind(Self::timestamp_to_millis(timestamp))
                    .bind(id)
                    .bind(AlertStatus::Unread.as_flag())
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        tx.commit().await?;
        debug!("alert commit complete");
        Ok(())
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn set_alert_status(
        &self,
        ids: &[i64],
        status: AlertStatus,
        at: DateTime<Utc>,
    ) -> StorageResult<usize> {
        let read_at = match status {
            AlertStatus::Read => Some(Self::timestamp_to_millis(&at)),
            AlertStatus::Unread => None,
        };

        let pool = self.pool().await;
        let mut tx = pool.begin().await?;
        let mut changed = 0;

        for id in ids {
            let result = sqlx::query("UPDATE user_alerts SET status = ?, read_at = ? WHERE id = ?")
                .bind(status.as_flag())
                .bind(read_at)
                .bind(id)
                .execute(&mut *tx)
                .await?;
            changed += result.rows_affected() as usize;
        }

        tx.commit().await?;
        Ok(changed)
    }

    #[instrument(skip(self), fields(read_before = %read_before))]
    async fn purge_read_alerts(&self, read_before: DateTime<Utc>) -> StorageResult<usize> {
        let result = sqlx::query(
            "DELETE FROM user_alerts WHERE status = ? AND COALESCE(read_at, timestamp) < ?",
        )
        .bind(AlertStatus::Read.as_flag())
        .bind(Self::timestamp_to_millis(&read_before))
        .execute(&self.pool().await)
        .await?;

        let deleted = result.rows_affected() as usize;
        if deleted > 0 {
            info!("deleted {} read alerts", deleted);
        }
        Ok(deleted)
    }

    async fn reconnect(&self) -> StorageResult<()> {
        info!("reopening SQLite connection pool");
        let fresh = Self::connect(&self.options).await?;
        let stale = std::mem::replace(&mut *self.pool.write().await, fresh);
        stale.close().await;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool().await).await {
            Ok(_) => {
                let mut metadata = HashMap::new();
                metadata.insert("backend".to_string(), "sqlite".to_string());
                metadata.insert("db_path".to_string(), self.db_path.clone());

                Ok(HealthStatus {
                    healthy: true,
                    message: "SQLite backend operational".to_string(),
                    metadata,
                })
            }
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite backend");
        self.pool.read().await.close().await;
        Ok(())
    }
}
