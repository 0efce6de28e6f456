//! Cloud resource listings
//!
//! The cloud stage evaluates its rules against one [`CloudSnapshot`] taken
//! at the start of the pass.

pub mod http;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CollectionError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub name: String,
    pub user_id: String,
    pub project_id: String,

    /// Compute status, e.g. `ACTIVE`, `SHUTOFF`, `ERROR`
    pub status: String,

    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub flavor_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub id: String,

    #[serde(default)]
    pub name: String,

    pub user_id: String,
    pub project_id: String,

    /// Block storage status, e.g. `available`, `in-use`, `error`
    pub status: String,

    /// Size (GB)
    pub size: u64,

    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Ingress,
    Egress,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityRule {
    pub id: String,
    pub direction: Direction,

    /// `tcp`, `udp`, `icmp`... or `None` for any protocol
    #[serde(default)]
    pub protocol: Option<String>,

    #[serde(default)]
    pub port_range_min: Option<u16>,

    #[serde(default)]
    pub port_range_max: Option<u16>,

    #[serde(default)]
    pub remote_ip_prefix: Option<String>,

    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
}

impl SecurityRule {
    /// Opened port range, the whole range when unspecified
    pub fn ports(&self) -> (u16, u16) {
        match (self.port_range_min, self.port_range_max) {
            (Some(min), Some(max)) => (min.min(max), min.max(max)),
            (Some(port), None) | (None, Some(port)) => (port, port),
            (None, None) => (1, u16::MAX),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroup {
    pub id: String,
    pub name: String,
    pub project_id: String,

    #[serde(default)]
    pub rules: Vec<SecurityRule>,
}

impl SecurityGroup {
    pub fn is_default(&self) -> bool {
        self.name == "default"
    }

    pub fn ingress_rules(&self) -> impl Iterator<Item = &SecurityRule> {
        self.rules
            .iter()
            .filter(|rule| rule.direction == Direction::Ingress)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flavor {
    pub id: String,
    pub vcpus: u32,
}

/// Every listing of one cloud pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CloudSnapshot {
    pub instances: Vec<Instance>,
    pub volumes: Vec<Volume>,
    pub security_groups: Vec<SecurityGroup>,

    /// vCPU count per flavor id
    pub flavors: HashMap<String, u32>,
}

/// Cloud control plane listings
#[async_trait]
pub trait CloudInventory: Send + Sync {
    async fn instances(&self) -> Result<Vec<Instance>, CollectionError>;

    async fn volumes(&self) -> Result<Vec<Volume>, CollectionError>;

    async fn security_groups(&self) -> Result<Vec<SecurityGroup>, CollectionError>;

    async fn flavors(&self) -> Result<Vec<Flavor>, CollectionError>;

    /// Take every listing, one after another
    async fn snapshot(&self) -> Result<CloudSnapshot, CollectionError> {
        let snapshot = CloudSnapshot {
            instances: self.instances().await?,
            volumes: self.volumes().await?,
            security_groups: self.security_groups().await?,
            flavors: self
                .flavors()
                .await?
                .into_iter()
                .map(|flavor| (flavor.id, flavor.vcpus))
                .collect(),
        };

        debug!(
            "cloud snapshot: {} instances, {} volumes, {} security groups, {} flavors",
            snapshot.instances.len(),
            snapshot.volumes.len(),
            snapshot.security_groups.len(),
            snapshot.flavors.len()
        );
        Ok(snapshot)
    }
}

/// Fixed listings, for tests and replays
#[derive(Debug, Clone, Default)]
pub struct StaticInventory {
    pub snapshot: CloudSnapshot,
}

#[async_trait]
impl CloudInventory for StaticInventory {
    async fn instances(&self) -> Result<Vec<Instance>, CollectionError> {
        Ok(self.snapshot.instances.clone())
    }

    async fn volumes(&self) -> Result<Vec<Volume>, CollectionError> {
        Ok(self.snapshot.volumes.clone())
    }

    async fn security_groups(&self) -> Result<Vec<SecurityGroup>, CollectionError> {
        Ok(self.snapshot.security_groups.clone())
    }

    async fn flavors(&self) -> Result<Vec<Flavor>, CollectionError> {
        Ok(self
            .snapshot
            .flavors
            .iter()
            .map(|(id, vcpus)| Flavor {
                id: id.clone(),
                vcpus: *vcpus,
            })
            .collect())
    }
}
