//! Operator-facing alert read API

use chrono::{DateTime, Duration, Utc};
use tracing::{info, instrument};

use crate::storage::{AlertRow, AlertStatus, ResilientSession, StorageResult};

/// List and tag the alerts of a project
#[derive(Clone)]
pub struct AlertService {
    session: ResilientSession,
}

impl AlertService {
    pub fn new(session: ResilientSession) -> Self {
        Self { session }
    }

    pub async fn unread(&self, project: &str) -> StorageResult<Vec<AlertRow>> {
        self.session
            .project_alerts(project, AlertStatus::Unread)
            .await
    }

    pub async fn read(&self, project: &str) -> StorageResult<Vec<AlertRow>> {
        self.session.project_alerts(project, AlertStatus::Read).await
    }

    /// Tag alerts as read in one transaction, returning how many exist
    #[instrument(skip(self))]
    pub async fn mark_read(&self, ids: &[i64]) -> StorageResult<usize> {
        self.session
            .set_alert_status(ids, AlertStatus::Read, Utc::now())
            .await
    }

    #[instrument(skip(self))]
    pub async fn mark_unread(&self, ids: &[i64]) -> StorageResult<usize> {
        self.session
            .set_alert_status(ids, AlertStatus::Unread, Utc::now())
            .await
    }

    /// Delete alerts read for longer than `retention`
    pub async fn purge_read(&self, retention: Duration, now: DateTime<Utc>) -> StorageResult<usize> {
        let deleted = self.session.purge_read_alerts(now - retention).await?;
        if deleted > 0 {
            info!("purged {} alerts read before {}", deleted, now - retention);
        }
        Ok(deleted)
    }
}
