//! Integration tests for alert deduplication and the read API on SQLite
//!
//! These tests verify that:
//! - An unchanged condition never adds or rewrites alerts
//! - A condition whose day count moved rewrites its alert in place
//! - Read alerts are not matched again and are purged after retention

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use cloud_monitoring::Severity;
use cloud_monitoring::alerts::{AlertService, reconcile};
use cloud_monitoring::config::CloudSettings;
use cloud_monitoring::inventory::CloudSnapshot;
use cloud_monitoring::rules::RuleEvaluator;
use cloud_monitoring::storage::sqlite::SqliteBackend;
use cloud_monitoring::storage::{AlertStatus, ResilientSession};
use pretty_assertions::assert_eq;
use tempfile::tempdir;

use super::helpers::{at, fast_retry, instance};

fn evaluator() -> RuleEvaluator {
    RuleEvaluator::from_settings(&CloudSettings {
        source_url: "http://localhost".to_string(),
        shutoff_delay_days: 7,
        active_delay_days: 90,
        volume_delay_days: 7,
        quotas: Default::default(),
        whitelist: HashSet::new(),
        trusted_subnets: Vec::new(),
        whitelisted_ports: HashSet::new(),
    })
}

fn snapshot() -> CloudSnapshot {
    CloudSnapshot {
        instances: vec![instance(
            "i-1",
            "ERROR",
            at(2024, 1, 1, 8, 0, 0),
            at(2024, 1, 5, 11, 0, 0),
        )],
        ..Default::default()
    }
}

async fn sqlite_session(dir: &tempfile::TempDir) -> ResilientSession {
    let backend = SqliteBackend::new(dir.path().join("monitoring.db"))
        .await
        .unwrap();
    ResilientSession::new(Arc::new(backend), fast_retry(3))
}

#[tokio::test]
async fn test_rerun_is_idempotent_and_day_change_updates() {
    let temp_dir = tempdir().unwrap();
    let session = sqlite_session(&temp_dir).await;
    let service = AlertService::new(session.clone());
    let evaluator = evaluator();
    let snapshot = snapshot();

    let day1 = at(2024, 1, 6, 12, 0, 0);
    let candidates = evaluator.evaluate(&snapshot, day1);
    let first = reconcile(&session, &candidates, day1).await.unwrap();
    assert_eq!(first.created, 1);

    let again = reconcile(&session, &candidates, day1).await.unwrap();
    assert_eq!((again.created, again.updated, again.unchanged), (0, 0, 1));

    let unread = service.unread("p1").await.unwrap();
    assert_eq!(unread.len(), 1);
    let id = unread[0].id;
    assert_eq!(unread[0].severity, Severity::Critical);
    assert_eq!(unread[0].uuid, "i-1");
    assert_eq!(
        unread[0].message,
        "Instance vm-i-1 created on 01/01/2024 (5 days ago) in error (ERROR) since 1 day."
    );

    let day2 = day1 + Duration::days(1);
    let candidates = evaluator.evaluate(&snapshot, day2);
    let second = reconcile(&session, &candidates, day2).await.unwrap();
    assert_eq!((second.created, second.updated), (0, 1));

    let unread = service.unread("p1").await.unwrap();
    assert_eq!(unread.len(), 1);
    assert_eq!(unread[0].id, id);
    assert_eq!(
        unread[0].message,
        "Instance vm-i-1 created on 01/01/2024 (6 days ago) in error (ERROR) since 2 days."
    );
    assert_eq!(unread[0].timestamp, day2);
}

#[tokio::test]
async fn test_read_alert_is_not_matched_again() {
    let temp_dir = tempdir().unwrap();
    let session = sqlite_session(&temp_dir).await;
    let service = AlertService::new(session.clone());
    let evaluator = evaluator();
    let now = at(2024, 1, 6, 12, 0, 0);
    let candidates = evaluator.evaluate(&snapshot(), now);

    reconcile(&session, &candidates, now).await.unwrap();
    let id = service.unread("p1").await.unwrap()[0].id;

    assert_eq!(service.mark_read(&[id, 9999]).await.unwrap(), 1);
    assert!(service.unread("p1").await.unwrap().is_empty());

    let read = service.read("p1").await.unwrap();
    assert_eq!(read.len(), 1);
    assert_eq!(read[0].status, AlertStatus::Read);
    assert!(read[0].read_at.is_some());

    let report = reconcile(&session, &candidates, now).await.unwrap();
    assert_eq!(report.created, 1);
    assert_eq!(service.unread("p1").await.unwrap().len(), 1);

    assert_eq!(service.mark_unread(&[id]).await.unwrap(), 1);
    let unread = service.unread("p1").await.unwrap();
    assert_eq!(unread.len(), 2);
    assert!(unread.iter().all(|alert| alert.read_at.is_none()));
}

#[tokio::test]
async fn test_read_alerts_are_purged_after_retention() {
    let temp_dir = tempdir().unwrap();
    let session = sqlite_session(&temp_dir).await;
    let service = AlertService::new(session.clone());
    let now = at(2024, 1, 6, 12, 0, 0);
    let candidates = evaluator().evaluate(&snapshot(), now);

    reconcile(&session, &candidates, now).await.unwrap();
    let id = service.unread("p1").await.unwrap()[0].id;
    service.mark_read(&[id]).await.unwrap();

    let retention = Duration::days(30);
    assert_eq!(service.purge_read(retention, Utc::now()).await.unwrap(), 0);
    assert_eq!(
        service
            .purge_read(retention, Utc::now() + Duration::days(31))
            .await
            .unwrap(),
        1
    );
    assert!(service.read("p1").await.unwrap().is_empty());
}
