//! Integration tests for rollup persistence on SQLite
//!
//! These tests verify that:
//! - A restarted host resumes its series from the stored rows
//! - A domain moving to another host keeps a single row
//! - The usage report reads what the hosts flushed

use std::sync::Arc;

use cloud_monitoring::rollup::RollupStore;
use cloud_monitoring::report::usage_report;
use cloud_monitoring::sampling::DomainUsage;
use cloud_monitoring::storage::sqlite::SqliteBackend;
use cloud_monitoring::storage::{EntityState, ResilientSession};
use cloud_monitoring::{Metric, Tier};
use tempfile::tempdir;

use super::helpers::{at, fast_retry, store};

fn usage(uuid: &str, vcpu: f64) -> DomainUsage {
    DomainUsage {
        uuid: uuid.to_string(),
        vcores: 2,
        vram: 4096,
        vcpu,
        cpu: vcpu / 2.0,
        mem: 25.0,
    }
}

async fn sqlite_session(path: &std::path::Path) -> ResilientSession {
    let backend = SqliteBackend::new(path).await.unwrap();
    ResilientSession::new(Arc::new(backend), fast_retry(3))
}

fn hourly(store: &RollupStore, uuid: &str) -> Vec<f64> {
    store
        .series(uuid, Metric::Vcpu)
        .unwrap()
        .tier(Tier::Hourly)
        .values()
        .collect()
}

#[tokio::test]
async fn test_restart_resumes_stored_series() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("monitoring.db");
    let uuids = vec!["d-1".to_string()];

    {
        let session = sqlite_session(&db_path).await;
        let mut store = store("node-1");
        store.load(&session, &uuids).await.unwrap();

        for (minute, value) in [(10, 10.0), (15, 20.0), (20, 30.0)] {
            store.begin_cycle();
            store.record(&usage("d-1", value), at(2024, 3, 4, 10, minute, 0));
            store.flush(&session, at(2024, 3, 4, 10, minute, 1)).await.unwrap();
        }
        session.close().await.unwrap();
    }

    let session = sqlite_session(&db_path).await;
    let mut restarted = store("node-1");
    restarted.load(&session, &uuids).await.unwrap();
    restarted.begin_cycle();
    restarted.record(&usage("d-1", 40.0), at(2024, 3, 4, 10, 25, 0));
    let report = restarted.flush(&session, at(2024, 3, 4, 10, 25, 1)).await.unwrap();

    assert_eq!(report.updated, 1);
    assert_eq!(report.inserted, 0);
    assert_eq!(hourly(&restarted, "d-1"), vec![10.0, 20.0, 30.0, 40.0]);

    let usage = usage_report(&session, &uuids).await.unwrap();
    assert_eq!(usage["d-1"].vcpu.hourly, 25.0);
    assert_eq!(usage["d-1"].vcpu.daily, -1.0);
    assert_eq!(usage["d-1"].mem.hourly, 25.0);
    assert_eq!(usage["d-1"].hypervisor, "node-1");
}

#[tokio::test]
async fn test_moved_domain_keeps_a_single_row() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("monitoring.db");
    let session = sqlite_session(&db_path).await;
    let uuids = vec!["d-1".to_string()];

    let mut node1 = store("node-1");
    node1.load(&session, &uuids).await.unwrap();
    node1.begin_cycle();
    node1.record(&usage("d-1", 10.0), at(2024, 3, 4, 10, 10, 0));
    node1.flush(&session, at(2024, 3, 4, 10, 10, 1)).await.unwrap();

    // d-1 is gone from node-1
    node1.load(&session, &[]).await.unwrap();
    node1.begin_cycle();
    node1.flush(&session, at(2024, 3, 4, 10, 15, 1)).await.unwrap();

    let rows = session.load_rollups(&uuids).await.unwrap();
    assert_eq!(rows[0].state, EntityState::SoftDeleted);
    assert!(usage_report(&session, &uuids).await.unwrap().is_empty());

    // and shows up on node-2
    let mut node2 = store("node-2");
    node2.load(&session, &uuids).await.unwrap();
    node2.begin_cycle();
    node2.record(&usage("d-1", 50.0), at(2024, 3, 4, 10, 15, 0));
    let first = node2.flush(&session, at(2024, 3, 4, 10, 15, 2)).await.unwrap();

    node2.begin_cycle();
    node2.record(&usage("d-1", 60.0), at(2024, 3, 4, 10, 20, 0));
    node2.flush(&session, at(2024, 3, 4, 10, 20, 1)).await.unwrap();

    let rows = session.load_rollups(&uuids).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].hypervisor, "node-2");
    assert_eq!(rows[0].state, EntityState::Active);
    assert!(first.migrated.is_empty());
    assert_eq!(first.updated, 1);
    assert_eq!(hourly(&node2, "d-1"), vec![10.0, 50.0, 60.0]);
}

#[tokio::test]
async fn test_concurrent_insert_is_reloaded() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("monitoring.db");
    let session = sqlite_session(&db_path).await;
    let uuids = vec!["d-1".to_string()];

    let mut node1 = store("node-1");
    let mut node2 = store("node-2");
    node1.load(&session, &uuids).await.unwrap();
    node2.load(&session, &uuids).await.unwrap();

    node1.begin_cycle();
    node1.record(&usage("d-1", 10.0), at(2024, 3, 4, 10, 10, 0));
    node1.flush(&session, at(2024, 3, 4, 10, 10, 1)).await.unwrap();

    node2.begin_cycle();
    node2.record(&usage("d-1", 20.0), at(2024, 3, 4, 10, 10, 0));
    let report = node2.flush(&session, at(2024, 3, 4, 10, 10, 2)).await.unwrap();

    assert_eq!(report.inserted, 0);
    assert_eq!(report.migrated, uuids);
    assert_eq!(hourly(&node2, "d-1"), vec![10.0, 20.0]);

    let rows = session.load_rollups(&uuids).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].hypervisor, "node-1");
}
