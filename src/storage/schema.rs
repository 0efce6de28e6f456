//! Row definitions for the two persisted tables
//!
//! ## `instances_monitoring`
//!
//! One row per monitored domain, keyed by its UUID. The nine rollup series
//! (3 tiers x 3 metrics) are kept as comma-separated text, one decimal per
//! value, so the row stays readable from any SQL client. A row is never
//! removed: a domain missing from the latest listing of its host is
//! soft-deleted and resurrected in place when it shows up again.
//!
//! ## `user_alerts`
//!
//! One row per alert, identified by a surrogate id. Rows carry no key back
//! to the condition that produced them; identity is recovered from the
//! message text by the alert matcher.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Metric, Severity, Tier};

/// Lifecycle of a rollup row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityState {
    /// Seen in the latest listing of its owning host
    Active,

    /// Missing from the latest listing, kept for resurrection
    SoftDeleted,
}

impl EntityState {
    pub fn from_deleted_flag(deleted: bool) -> Self {
        if deleted {
            EntityState::SoftDeleted
        } else {
            EntityState::Active
        }
    }

    pub fn deleted_flag(&self) -> bool {
        matches!(self, EntityState::SoftDeleted)
    }
}

/// Serialized series of one rollup row, one text column per tier and metric
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesColumns {
    columns: BTreeMap<(Tier, Metric), String>,
}

impl SeriesColumns {
    /// Column name holding the series of a tier and metric
    pub fn column_name(tier: Tier, metric: Metric) -> String {
        format!("{}_{}_usage", tier, metric)
    }

    pub fn get(&self, tier: Tier, metric: Metric) -> &str {
        self.columns
            .get(&(tier, metric))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn set(&mut self, tier: Tier, metric: Metric, value: String) {
        self.columns.insert((tier, metric), value);
    }

    /// All nine columns in a stable order (tier-major)
    pub fn iter(&self) -> impl Iterator<Item = (Tier, Metric, &str)> + '_ {
        Tier::ALL.into_iter().flat_map(move |tier| {
            Metric::ALL
                .into_iter()
                .map(move |metric| (tier, metric, self.get(tier, metric)))
        })
    }
}

/// A row of the rollup table
#[derive(Debug, Clone, PartialEq)]
pub struct RollupRow {
    /// Stable external UUID of the domain
    pub uuid: String,

    /// Owning host
    pub hypervisor: String,

    /// Declared vCPU count
    pub vcores: u32,

    /// Declared RAM (MiB)
    pub vram: u64,

    pub series: SeriesColumns,

    pub state: EntityState,

    pub last_update: Option<DateTime<Utc>>,
}

/// A pending rollup write
#[derive(Debug, Clone, PartialEq)]
pub enum RollupWrite {
    /// Rewrite an existing row, reactivating it under the given host
    Update(RollupRow),

    /// Create the row of a never-seen domain
    Insert(RollupRow),
}

impl RollupWrite {
    pub fn row(&self) -> &RollupRow {
        match self {
            RollupWrite::Update(row) | RollupWrite::Insert(row) => row,
        }
    }
}

/// Every rollup write of one cycle, committed as a single transaction
///
/// All rows owned by `hypervisor` are soft-deleted first, then the writes
/// reactivate the domains observed in this cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct RollupBatch {
    pub hypervisor: String,
    pub writes: Vec<RollupWrite>,
}

/// Outcome of committing a rollup batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollupCommit {
    pub updated: usize,
    pub inserted: usize,

    /// Inserts skipped because a row already existed for the UUID
    pub conflicts: Vec<String>,
}

/// Read/unread status bit of an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Unread,
    Read,
}

impl AlertStatus {
    /// Stored flag: 1 for unread, 0 for read
    pub fn as_flag(&self) -> i64 {
        match self {
            AlertStatus::Unread => 1,
            AlertStatus::Read => 0,
        }
    }

    pub fn from_flag(flag: i64) -> Self {
        if flag == 0 {
            AlertStatus::Read
        } else {
            AlertStatus::Unread
        }
    }
}

/// A row of the alert table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRow {
    pub id: i64,

    /// UUID of the entity (or user) the alert is about
    pub uuid: String,

    /// Project the alert is scoped to
    pub project: String,

    pub severity: Severity,

    pub status: AlertStatus,

    pub message: String,

    pub timestamp: DateTime<Utc>,

    /// When the alert was last tagged as read
    pub read_at: Option<DateTime<Utc>>,
}

/// An alert about to be created
#[derive(Debug, Clone, PartialEq)]
pub struct NewAlert {
    pub uuid: String,
    pub project: String,
    pub severity: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// A pending alert write
#[derive(Debug, Clone, PartialEq)]
pub enum AlertChange {
    Create(NewAlert),

    /// Refresh the wording of an unread alert; severity and subject are kept
    Update {
        id: i64,
        message: String,
        timestamp: DateTime<Utc>,
    },
}
