//! Hypervisor domain sampling
//!
//! A [`Sampler`] turns two point-in-time reads of a domain's cumulative CPU
//! time and memory balloon into the three utilization percentages fed to the
//! rollup store:
//!
//! ```text
//! vcpu% = Δcpu_time_ns / vcpus      / 1e9 / sampling_time * 100
//! cpu%  = Δcpu_time_ns / host_cores / 1e9 / sampling_time * 100
//! mem%  = mean(actual_kib) / 1024 / estimated_capacity_mb * 100
//! ```

pub mod http;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::{debug, instrument};

use crate::Metric;
use crate::error::CollectionError;

/// A live domain as listed by the hypervisor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainInfo {
    pub uuid: String,

    /// Declared vCPU count
    pub vcpus: u32,

    /// Declared maximum memory (KiB)
    pub max_memory_kib: u64,
}

/// One point-in-time read of a domain's counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainReading {
    /// Cumulative CPU time (ns)
    pub cpu_time_ns: u64,

    /// Current memory balloon size (KiB)
    pub actual_memory_kib: u64,
}

/// Hypervisor introspection
#[async_trait]
pub trait SampleSource: Send + Sync {
    /// Domains currently running on the host
    async fn list_domains(&self) -> Result<Vec<DomainInfo>, CollectionError>;

    /// Current counters of a domain, [`CollectionError::Vanished`] if it is gone
    async fn read_domain(&self, uuid: &str) -> Result<DomainReading, CollectionError>;
}

/// Static description of the monitoring host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    pub hostname: String,
    pub cores: u32,
    pub memory_bytes: u64,

    /// Physical RAM in MiB, rounded up to a multiple of 4096
    pub estimated_capacity_mb: u64,
}

impl HostInfo {
    pub fn new(hostname: impl Into<String>, cores: u32, memory_bytes: u64) -> Self {
        Self {
            hostname: hostname.into(),
            cores,
            memory_bytes,
            estimated_capacity_mb: estimated_capacity_mb(memory_bytes),
        }
    }

    /// Read core count, RAM and hostname of the running system
    pub fn detect(hostname: Option<String>) -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        sys.refresh_cpu_all();

        let hostname = hostname
            .or_else(System::host_name)
            .unwrap_or_else(|| "localhost".to_string());
        let cores = (sys.cpus().len() as u32).max(1);

        let host = Self::new(hostname, cores, sys.total_memory());
        debug!(
            "host {}: {} cores, {} MB RAM ({} GB estimated)",
            host.hostname,
            host.cores,
            host.memory_bytes / 1024 / 1024,
            host.estimated_capacity_mb / 1024
        );
        host
    }
}

/// RAM in MiB, rounded up to the next multiple of 4096 unless already one
pub fn estimated_capacity_mb(memory_bytes: u64) -> u64 {
    let mb = memory_bytes / 1024 / 1024;
    mb.div_ceil(4096) * 4096
}

/// Utilization of one domain over one sampling interval
#[derive(Debug, Clone, PartialEq)]
pub struct DomainUsage {
    pub uuid: String,
    pub vcores: u32,

    /// Declared RAM (MiB)
    pub vram: u64,

    pub vcpu: f64,
    pub cpu: f64,
    pub mem: f64,
}

impl DomainUsage {
    pub fn compute(
        domain: &DomainInfo,
        first: DomainReading,
        second: DomainReading,
        host: &HostInfo,
        sampling_time: Duration,
    ) -> Self {
        let seconds = sampling_time.as_secs_f64();
        let cpu_seconds = second.cpu_time_ns.saturating_sub(first.cpu_time_ns) as f64 / 1e9;

        let vcpu = cpu_seconds / f64::from(domain.vcpus.max(1)) / seconds;
        let cpu = cpu_seconds / f64::from(host.cores.max(1)) / seconds;

        let memory_kib = (first.actual_memory_kib + second.actual_memory_kib) as f64 / 2.0;
        let mem = memory_kib / 1024.0 / host.estimated_capacity_mb.max(1) as f64;

        Self {
            uuid: domain.uuid.clone(),
            vcores: domain.vcpus,
            vram: domain.max_memory_kib / 1024,
            vcpu: round2(vcpu * 100.0),
            cpu: round2(cpu * 100.0),
            mem: round2(mem * 100.0),
        }
    }

    pub fn values(&self) -> [(Metric, f64); 3] {
        [
            (Metric::Vcpu, self.vcpu),
            (Metric::Cpu, self.cpu),
            (Metric::Mem, self.mem),
        ]
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Reads domains through a [`SampleSource`], one after another
#[derive(Clone)]
pub struct Sampler {
    source: Arc<dyn SampleSource>,
    host: HostInfo,
    sampling_time: Duration,
}

impl Sampler {
    pub fn new(source: Arc<dyn SampleSource>, host: HostInfo, sampling_time: Duration) -> Self {
        Self {
            source,
            host,
            sampling_time,
        }
    }

    pub fn host(&self) -> &HostInfo {
        &self.host
    }

    pub async fn list_domains(&self) -> Result<Vec<DomainInfo>, CollectionError> {
        self.source.list_domains().await
    }

    /// Read a domain twice, `sampling_time` apart
    #[instrument(skip(self, domain), fields(domain = %domain.uuid))]
    pub async fn sample(&self, domain: &DomainInfo) -> Result<DomainUsage, CollectionError> {
        let first = self.source.read_domain(&domain.uuid).await?;
        tokio::time::sleep(self.sampling_time).await;
        let second = self.source.read_domain(&domain.uuid).await?;

        Ok(DomainUsage::compute(
            domain,
            first,
            second,
            &self.host,
            self.sampling_time,
        ))
    }
}
