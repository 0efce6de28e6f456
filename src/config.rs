use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use tracing::trace;

use crate::error::ConfigError;
use crate::rules::net::Cidr;

/// Storage backend configuration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None {
        #[serde(default)]
        retry: RetryConfig,
    },

    /// SQLite database
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,

        #[serde(default)]
        retry: RetryConfig,
    },
}

impl StorageConfig {
    pub fn retry(&self) -> &RetryConfig {
        match self {
            StorageConfig::None { retry } | StorageConfig::Sqlite { retry, .. } => retry,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
            retry: RetryConfig::default(),
        }
    }
}

/// Reconnect policy for the persistence layer
#[derive(Debug, Clone, Copy, serde::Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base wait, multiplied by the attempt number
    #[serde(default = "default_retry_wait_secs")]
    pub wait_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            wait_secs: default_retry_wait_secs(),
        }
    }
}

impl RetryConfig {
    pub fn wait_base(&self) -> Duration {
        Duration::from_secs(self.wait_secs)
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct HypervisorConfig {
    /// Owning host name written into rollup rows (defaults to the system hostname)
    pub hostname: Option<String>,

    /// Seconds between two monitoring cycles
    #[serde(default = "default_monitoring_interval")]
    pub monitoring_interval: u64,

    /// Seconds between the two reads used to compute a rate
    #[serde(default = "default_sampling_time")]
    pub sampling_time: u64,

    /// Base URL of the domain introspection endpoint
    pub source_url: String,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Quotas {
    pub max_instances: Option<u64>,
    pub max_vcpus: Option<u64>,
    pub max_volumes: Option<u64>,
    pub max_storage_gb: Option<u64>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct CloudConfig {
    /// Base URL of the cloud listing endpoint
    pub source_url: String,

    /// Days an instance may stay SHUTOFF before an alert is raised
    #[serde(default = "default_shutoff_delay_days")]
    pub shutoff_delay_days: i64,

    /// Days an instance may stay ACTIVE without update before an alert is raised
    #[serde(default = "default_active_delay_days")]
    pub active_delay_days: i64,

    /// Days a volume may stay unattached before an alert is raised
    #[serde(default = "default_volume_delay_days")]
    pub volume_delay_days: i64,

    #[serde(default)]
    pub quotas: Quotas,

    /// Entity ids never reported by lifecycle rules
    #[serde(default)]
    pub whitelist: Vec<String>,

    /// Remote ranges that never raise exposure alerts
    #[serde(default)]
    pub trusted_subnets: Vec<String>,

    #[serde(default)]
    pub whitelisted_ports: Vec<u16>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct AlertsConfig {
    /// Read alerts older than this are deleted
    #[serde(default = "default_read_retention_days")]
    pub read_retention_days: i64,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            read_retention_days: default_read_retention_days(),
        }
    }
}

/// Raw configuration file contents
#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    pub hypervisor: Option<HypervisorConfig>,

    pub cloud: Option<CloudConfig>,

    #[serde(default)]
    pub alerts: AlertsConfig,
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./monitoring.db")
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_wait_secs() -> u64 {
    2
}

fn default_monitoring_interval() -> u64 {
    300
}

fn default_sampling_time() -> u64 {
    5
}

fn default_shutoff_delay_days() -> i64 {
    7
}

fn default_active_delay_days() -> i64 {
    90
}

fn default_volume_delay_days() -> i64 {
    7
}

fn default_read_retention_days() -> i64 {
    30
}

/// Validated hypervisor settings
#[derive(Debug, Clone)]
pub struct HypervisorSettings {
    pub hostname: Option<String>,
    pub monitoring_interval: Duration,
    pub sampling_time: Duration,
    pub source_url: String,
}

impl HypervisorSettings {
    /// Number of values kept in the hourly tier
    pub fn hourly_capacity(&self) -> usize {
        hourly_capacity(self.monitoring_interval.as_secs())
    }
}

/// Validated cloud rule settings
#[derive(Debug, Clone)]
pub struct CloudSettings {
    pub source_url: String,
    pub shutoff_delay_days: i64,
    pub active_delay_days: i64,
    pub volume_delay_days: i64,
    pub quotas: Quotas,
    pub whitelist: HashSet<String>,
    pub trusted_subnets: Vec<Cidr>,
    pub whitelisted_ports: HashSet<u16>,
}

/// Read-only configuration snapshot shared by every component of a cycle
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub storage: StorageConfig,
    pub hypervisor: Option<HypervisorSettings>,
    pub cloud: Option<CloudSettings>,
    pub read_retention: chrono::Duration,
}

/// Capacity of the hourly tier for a given cycle period
pub fn hourly_capacity(monitoring_interval_secs: u64) -> usize {
    3600_u64.div_ceil(monitoring_interval_secs.max(1)) as usize
}

impl Config {
    /// Check every setting and freeze the result into a snapshot
    pub fn validate(self) -> Result<MonitorConfig, ConfigError> {
        if self.storage.retry().max_retries == 0 {
            return Err(ConfigError::invalid(
                "storage.retry.max_retries",
                "must be at least 1",
            ));
        }

        let hypervisor = self
            .hypervisor
            .map(|hypervisor| {
                if hypervisor.monitoring_interval == 0 {
                    return Err(ConfigError::invalid(
                        "hypervisor.monitoring_interval",
                        "must be greater than zero",
                    ));
                }
                if hypervisor.sampling_time == 0
                    || hypervisor.sampling_time >= hypervisor.monitoring_interval
                {
                    return Err(ConfigError::invalid(
                        "hypervisor.sampling_time",
                        "must be greater than zero and shorter than the monitoring interval",
                    ));
                }
                Ok(HypervisorSettings {
                    hostname: hypervisor.hostname,
                    monitoring_interval: Duration::from_secs(hypervisor.monitoring_interval),
                    sampling_time: Duration::from_secs(hypervisor.sampling_time),
                    source_url: hypervisor.source_url,
                })
            })
            .transpose()?;

        let cloud = self
            .cloud
            .map(|cloud| {
                for (field, days) in [
                    ("cloud.shutoff_delay_days", cloud.shutoff_delay_days),
                    ("cloud.active_delay_days", cloud.active_delay_days),
                    ("cloud.volume_delay_days", cloud.volume_delay_days),
                ] {
                    if days < 0 {
                        return Err(ConfigError::invalid(field, "must not be negative"));
                    }
                }

                let trusted_subnets = cloud
                    .trusted_subnets
                    .iter()
                    .map(|subnet| {
                        subnet.parse::<Cidr>().map_err(|reason| {
                            ConfigError::invalid("cloud.trusted_subnets", &reason)
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(CloudSettings {
                    source_url: cloud.source_url,
                    shutoff_delay_days: cloud.shutoff_delay_days,
                    active_delay_days: cloud.active_delay_days,
                    volume_delay_days: cloud.volume_delay_days,
                    quotas: cloud.quotas,
                    whitelist: cloud.whitelist.into_iter().collect(),
                    trusted_subnets,
                    whitelisted_ports: cloud.whitelisted_ports.into_iter().collect(),
                })
            })
            .transpose()?;

        if self.alerts.read_retention_days < 0 {
            return Err(ConfigError::invalid(
                "alerts.read_retention_days",
                "must not be negative",
            ));
        }

        Ok(MonitorConfig {
            storage: self.storage,
            hypervisor,
            cloud,
            read_retention: chrono::Duration::days(self.alerts.read_retention_days),
        })
    }
}

pub fn parse_config(content: &str) -> Result<MonitorConfig, ConfigError> {
    let config: Config =
        serde_json::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
    trace!("loaded config: {config:?}");
    config.validate()
}

pub fn read_config_file(path: &str) -> Result<MonitorConfig, ConfigError> {
    let file_content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Read(format!("{path}: {e}")))?;
    parse_config(&file_content)
}
