//! Integration tests for lost store connectivity
//!
//! These tests verify that:
//! - Transient connection losses are absorbed by reconnecting
//! - An exhausted retry budget fails the cycle without partial writes
//! - Nothing is lost once the store is back

use std::sync::Arc;

use assert_matches::assert_matches;
use cloud_monitoring::error::MonitorError;
use cloud_monitoring::sampling::DomainUsage;
use cloud_monitoring::storage::memory::MemoryBackend;
use cloud_monitoring::storage::{ResilientSession, StorageError};
use cloud_monitoring::{Metric, Tier};

use super::helpers::{at, fast_retry, memory_session, store};

fn usage(uuid: &str, vcpu: f64) -> DomainUsage {
    DomainUsage {
        uuid: uuid.to_string(),
        vcores: 1,
        vram: 1024,
        vcpu,
        cpu: vcpu,
        mem: 10.0,
    }
}

#[tokio::test]
async fn test_flush_survives_transient_failures() {
    let (backend, session) = memory_session();
    let mut store = store("node-1");
    store.begin_cycle();
    store.record(&usage("d-1", 5.0), at(2024, 3, 4, 10, 30, 0));

    backend.inject_connection_failures(2);
    let report = store.flush(&session, at(2024, 3, 4, 10, 30, 1)).await.unwrap();

    assert_eq!(report.inserted, 1);
    assert_eq!(backend.reconnect_count(), 2);
    assert_eq!(backend.all_rollups().len(), 1);
}

#[tokio::test]
async fn test_outage_fails_flush_and_keeps_memory() {
    let backend = Arc::new(MemoryBackend::new());
    let session = ResilientSession::new(backend.clone(), fast_retry(2));
    let mut store = store("node-1");
    store.begin_cycle();
    store.record(&usage("d-1", 5.0), at(2024, 3, 4, 10, 30, 0));

    backend.inject_connection_failures(u32::MAX);
    let err = store
        .flush(&session, at(2024, 3, 4, 10, 30, 1))
        .await
        .unwrap_err();

    assert_matches!(err, StorageError::RetriesExhausted { attempts: 2, .. });
    assert_matches!(MonitorError::from(err), MonitorError::Connectivity(_));
    assert!(backend.all_rollups().is_empty());

    // the store comes back before the next cycle
    backend.inject_connection_failures(0);
    store.begin_cycle();
    store.record(&usage("d-1", 7.0), at(2024, 3, 4, 10, 35, 0));
    let report = store.flush(&session, at(2024, 3, 4, 10, 35, 1)).await.unwrap();

    assert_eq!(report.inserted, 1);
    let values: Vec<f64> = store
        .series("d-1", Metric::Vcpu)
        .unwrap()
        .tier(Tier::Hourly)
        .values()
        .collect();
    assert_eq!(values, vec![5.0, 7.0]);

    let rows = backend.all_rollups();
    assert_eq!(rows[0].series.get(Tier::Hourly, Metric::Vcpu), "7.0");
}
