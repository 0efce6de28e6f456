//! Integration tests for full monitoring cycles
//!
//! These tests verify that:
//! - Sampled domains land in the rollup table with their computed usage
//! - Vanished and unlisted domains are skipped or soft-deleted
//! - A failed listing skips its stage without ending the cycle

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cloud_monitoring::config::CloudSettings;
use cloud_monitoring::cycle::{CloudStage, CycleHandle, HypervisorStage, MonitoringCycle};
use cloud_monitoring::inventory::{CloudSnapshot, StaticInventory};
use cloud_monitoring::report::usage_report;
use cloud_monitoring::rules::RuleEvaluator;
use cloud_monitoring::storage::EntityState;

use super::helpers::{FakeSource, domain, instance, memory_session, sampler, store};

/// 2 vCPUs busy for 1s out of 5 → 20% vCPU, 10% of the 4 host cores
const STEP_NS: u64 = 2_000_000_000;

fn hypervisor_stage(source: Arc<FakeSource>) -> HypervisorStage {
    HypervisorStage::new(sampler(source, "node-1"), store("node-1"))
}

fn cloud_stage() -> CloudStage {
    let settings = CloudSettings {
        source_url: "http://localhost".to_string(),
        shutoff_delay_days: 7,
        active_delay_days: 90,
        volume_delay_days: 7,
        quotas: Default::default(),
        whitelist: Default::default(),
        trusted_subnets: Vec::new(),
        whitelisted_ports: Default::default(),
    };
    let now = Utc::now();
    let snapshot = CloudSnapshot {
        instances: vec![instance(
            "i-1",
            "ERROR",
            now - chrono::Duration::days(10),
            now - chrono::Duration::days(2),
        )],
        ..Default::default()
    };

    CloudStage::new(
        Arc::new(StaticInventory { snapshot }),
        RuleEvaluator::from_settings(&settings),
        chrono::Duration::days(30),
    )
}

#[tokio::test(start_paused = true)]
async fn test_cycle_samples_and_flushes_domains() {
    let (backend, session) = memory_session();
    let source = Arc::new(FakeSource::new(vec![domain("d-1", 2), domain("d-2", 2)], STEP_NS));
    let mut cycle = MonitoringCycle::new(session.clone())
        .with_hypervisor(hypervisor_stage(source.clone()))
        .with_cloud(cloud_stage());

    let report = cycle.run_once().await.unwrap();

    let hypervisor = report.hypervisor.unwrap();
    assert_eq!((hypervisor.listed, hypervisor.sampled, hypervisor.skipped), (2, 2, 0));
    assert_eq!(hypervisor.flush.inserted, 2);
    assert_eq!(report.cloud.unwrap().alerts.created, 1);

    let usage = usage_report(&session, &["d-1".to_string()]).await.unwrap();
    let usage = &usage["d-1"];
    assert_eq!(usage.hypervisor, "node-1");
    assert_eq!(usage.vcores, 2);
    assert_eq!(usage.vram, 4096);
    assert_eq!(usage.vcpu.hourly, 20.0);
    assert_eq!(usage.cpu.hourly, 10.0);
    assert_eq!(usage.mem.hourly, 25.0);

    let second = cycle.run_once().await.unwrap();
    assert_eq!(second.hypervisor.unwrap().flush.updated, 2);
    assert_eq!(second.cloud.unwrap().alerts.unchanged, 1);
    assert_eq!(backend.all_rollups().len(), 2);
    assert_eq!(backend.all_alerts().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_vanished_and_unlisted_domains() {
    let (backend, session) = memory_session();
    let source = Arc::new(FakeSource::new(vec![domain("d-1", 2), domain("d-2", 2)], STEP_NS));
    let mut cycle = MonitoringCycle::new(session).with_hypervisor(hypervisor_stage(source.clone()));

    cycle.run_once().await.unwrap();

    source.vanish("d-2");
    let report = cycle.run_once().await.unwrap().hypervisor.unwrap();
    assert_eq!((report.sampled, report.skipped), (1, 1));

    let mut states: Vec<(String, EntityState)> = backend
        .all_rollups()
        .into_iter()
        .map(|row| (row.uuid, row.state))
        .collect();
    states.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        states,
        vec![
            ("d-1".to_string(), EntityState::Active),
            ("d-2".to_string(), EntityState::SoftDeleted),
        ]
    );

    source.set_domains(vec![domain("d-2", 4)]);
    cycle.run_once().await.unwrap();
    let stage = cycle.hypervisor().unwrap();
    assert!(stage.store().state("d-1").is_none());
    assert_eq!(stage.store().state("d-2"), Some(EntityState::Active));

    let resurrected = backend
        .all_rollups()
        .into_iter()
        .find(|row| row.uuid == "d-2")
        .unwrap();
    assert_eq!(resurrected.state, EntityState::Active);
    assert_eq!(resurrected.vcores, 4);
}

#[tokio::test(start_paused = true)]
async fn test_listing_failure_skips_only_its_stage() {
    let (_backend, session) = memory_session();
    let source = Arc::new(FakeSource::new(vec![domain("d-1", 2)], STEP_NS));
    source.set_listing_down(true);
    let mut cycle = MonitoringCycle::new(session)
        .with_hypervisor(hypervisor_stage(source))
        .with_cloud(cloud_stage());

    let report = cycle.run_once().await.unwrap();

    assert!(report.hypervisor.is_none());
    assert_eq!(report.cloud.unwrap().alerts.created, 1);
}

#[tokio::test(start_paused = true)]
async fn test_driver_ticks_every_interval() {
    let (backend, session) = memory_session();
    let source = Arc::new(FakeSource::new(vec![domain("d-1", 2)], STEP_NS));
    let cycle = MonitoringCycle::new(session).with_hypervisor(hypervisor_stage(source));

    let (handle, task) = CycleHandle::spawn(cycle, Duration::from_secs(300));
    tokio::time::sleep(Duration::from_secs(601)).await;
    handle.shutdown().await.unwrap();
    task.await.unwrap();

    let rows = backend.all_rollups();
    assert_eq!(rows.len(), 1);
    let hourly = rows[0]
        .series
        .get(cloud_monitoring::Tier::Hourly, cloud_monitoring::Metric::Vcpu);
    assert_eq!(hourly, "20.0,20.0,20.0");
}
