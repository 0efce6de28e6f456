//! Helper functions for integration tests

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use cloud_monitoring::config::RetryConfig;
use cloud_monitoring::error::CollectionError;
use cloud_monitoring::inventory::Instance;
use cloud_monitoring::rollup::RollupStore;
use cloud_monitoring::sampling::{DomainInfo, DomainReading, HostInfo, SampleSource, Sampler};
use cloud_monitoring::storage::ResilientSession;
use cloud_monitoring::storage::memory::MemoryBackend;

pub const GIB: u64 = 1024 * 1024 * 1024;

/// No wait between reconnect attempts
pub fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        wait_secs: 0,
    }
}

pub fn memory_session() -> (Arc<MemoryBackend>, ResilientSession) {
    let backend = Arc::new(MemoryBackend::new());
    let session = ResilientSession::new(backend.clone(), fast_retry(3));
    (backend, session)
}

pub fn at(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, mi, s).unwrap()
}

/// 4 cores, 16 GiB
pub fn test_host(hostname: &str) -> HostInfo {
    HostInfo::new(hostname, 4, 16 * GIB)
}

pub fn domain(uuid: &str, vcpus: u32) -> DomainInfo {
    DomainInfo {
        uuid: uuid.to_string(),
        vcpus,
        max_memory_kib: 4 * 1024 * 1024,
    }
}

/// Sample source whose domains burn a fixed CPU time between two reads
///
/// Every read advances the domain's cumulative CPU time by `cpu_step_ns`;
/// memory stays at 4 GiB.
#[derive(Default)]
pub struct FakeSource {
    domains: Mutex<Vec<DomainInfo>>,
    cpu_time: Mutex<HashMap<String, u64>>,
    vanished: Mutex<HashSet<String>>,
    listing_down: AtomicBool,
    cpu_step_ns: u64,
}

impl FakeSource {
    pub fn new(domains: Vec<DomainInfo>, cpu_step_ns: u64) -> Self {
        Self {
            domains: Mutex::new(domains),
            cpu_step_ns,
            ..Default::default()
        }
    }

    pub fn set_domains(&self, domains: Vec<DomainInfo>) {
        *self.domains.lock().unwrap() = domains;
    }

    pub fn set_listing_down(&self, down: bool) {
        self.listing_down.store(down, Ordering::SeqCst);
    }

    /// Keep listing the domain, but fail its reads
    pub fn vanish(&self, uuid: &str) {
        self.vanished.lock().unwrap().insert(uuid.to_string());
    }
}

#[async_trait]
impl SampleSource for FakeSource {
    async fn list_domains(&self) -> Result<Vec<DomainInfo>, CollectionError> {
        if self.listing_down.load(Ordering::SeqCst) {
            return Err(CollectionError::Unavailable("listing down".to_string()));
        }
        Ok(self.domains.lock().unwrap().clone())
    }

    async fn read_domain(&self, uuid: &str) -> Result<DomainReading, CollectionError> {
        if self.vanished.lock().unwrap().contains(uuid) {
            return Err(CollectionError::Vanished(uuid.to_string()));
        }

        let mut cpu_time = self.cpu_time.lock().unwrap();
        let counter = cpu_time.entry(uuid.to_string()).or_insert(0);
        *counter += self.cpu_step_ns;

        Ok(DomainReading {
            cpu_time_ns: *counter,
            actual_memory_kib: 4 * 1024 * 1024,
        })
    }
}

pub fn sampler(source: Arc<FakeSource>, hostname: &str) -> Sampler {
    Sampler::new(source, test_host(hostname), Duration::from_secs(5))
}

/// 5-minute cycles, 12 hourly values
pub fn store(hostname: &str) -> RollupStore {
    RollupStore::new(hostname, 12, Duration::from_secs(300))
}

pub fn instance(id: &str, status: &str, created: DateTime<Utc>, updated: DateTime<Utc>) -> Instance {
    Instance {
        id: id.to_string(),
        name: format!("vm-{id}"),
        user_id: "u1".to_string(),
        project_id: "p1".to_string(),
        status: status.to_string(),
        created,
        updated,
        flavor_id: "m1.small".to_string(),
    }
}
