//! Usage report over the persisted rollups
//!
//! Serves dashboards: for each requested domain, the mean of every tier of
//! every metric, rounded to two decimals, or `-1` when a tier is empty.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{instrument, warn};

use crate::rollup::{NO_DATA, TierSeries};
use crate::storage::{EntityState, ResilientSession, RollupRow, SeriesColumns, StorageResult};
use crate::{Metric, Tier};

/// Tier means of one metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TierAverages {
    pub hourly: f64,
    pub daily: f64,
    pub weekly: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityUsage {
    pub hypervisor: String,
    pub vcores: u32,

    /// Declared RAM (MiB)
    pub vram: u64,

    pub updated: Option<DateTime<Utc>>,
    pub vcpu: TierAverages,
    pub cpu: TierAverages,
    pub mem: TierAverages,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn column_average(row: &RollupRow, tier: Tier, metric: Metric) -> f64 {
    match TierSeries::parse_column(row.series.get(tier, metric)) {
        Ok(series) => round2(series.average_or_sentinel()),
        Err(reason) => {
            warn!(
                "unreadable {} of {}: {}",
                SeriesColumns::column_name(tier, metric),
                row.uuid,
                reason
            );
            NO_DATA
        }
    }
}

fn averages(row: &RollupRow, metric: Metric) -> TierAverages {
    TierAverages {
        hourly: column_average(row, Tier::Hourly, metric),
        daily: column_average(row, Tier::Daily, metric),
        weekly: column_average(row, Tier::Weekly, metric),
    }
}

impl From<&RollupRow> for EntityUsage {
    fn from(row: &RollupRow) -> Self {
        Self {
            hypervisor: row.hypervisor.clone(),
            vcores: row.vcores,
            vram: row.vram,
            updated: row.last_update,
            vcpu: averages(row, Metric::Vcpu),
            cpu: averages(row, Metric::Cpu),
            mem: averages(row, Metric::Mem),
        }
    }
}

/// Usage of the requested domains, keyed by UUID
///
/// Unknown and soft-deleted domains are left out.
#[instrument(skip_all, fields(requested = uuids.len()))]
pub async fn usage_report(
    session: &ResilientSession,
    uuids: &[String],
) -> StorageResult<BTreeMap<String, EntityUsage>> {
    let mut unique = uuids.to_vec();
    unique.sort();
    unique.dedup();

    let rows = session.load_rollups(&unique).await?;

    Ok(rows
        .iter()
        .filter(|row| row.state == EntityState::Active)
        .map(|row| (row.uuid.clone(), EntityUsage::from(row)))
        .collect())
}
