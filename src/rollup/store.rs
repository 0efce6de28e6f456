//! In-memory rollups of one host and their reconciliation with the store

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use tracing::{debug, info, instrument, warn};

use super::series::{MetricSeries, TierCapacity, TierSeries};
use crate::config::HypervisorSettings;
use crate::sampling::DomainUsage;
use crate::storage::{
    EntityState, ResilientSession, RollupBatch, RollupRow, RollupWrite, SeriesColumns,
    StorageResult,
};
use crate::{Metric, Tier};

/// Outcome of a flush
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub updated: usize,
    pub inserted: usize,

    /// Domains found stored under another host while about to be inserted
    pub migrated: Vec<String>,
}

#[derive(Debug, Clone)]
struct EntityRollup {
    vcores: u32,
    vram: u64,
    vcpu: MetricSeries,
    cpu: MetricSeries,
    mem: MetricSeries,
    state: EntityState,
}

impl EntityRollup {
    fn new(vcores: u32, vram: u64, state: EntityState) -> Self {
        Self {
            vcores,
            vram,
            vcpu: MetricSeries::default(),
            cpu: MetricSeries::default(),
            mem: MetricSeries::default(),
            state,
        }
    }

    fn series(&self, metric: Metric) -> &MetricSeries {
        match metric {
            Metric::Vcpu => &self.vcpu,
            Metric::Cpu => &self.cpu,
            Metric::Mem => &self.mem,
        }
    }

    fn series_mut(&mut self, metric: Metric) -> &mut MetricSeries {
        match metric {
            Metric::Vcpu => &mut self.vcpu,
            Metric::Cpu => &mut self.cpu,
            Metric::Mem => &mut self.mem,
        }
    }
}

/// Rollups of the domains of one host
///
/// A cycle drives the store in this order: [`load`](Self::load) the listed
/// domains, [`begin_cycle`](Self::begin_cycle), [`record`](Self::record)
/// each sample, then [`flush`](Self::flush). Domains not recorded in the
/// cycle are soft-deleted.
#[derive(Debug)]
pub struct RollupStore {
    hypervisor: String,
    capacity: TierCapacity,
    promotion_window: Duration,
    entities: BTreeMap<String, EntityRollup>,

    /// Domains whose persisted row has been merged into memory, or written by us
    loaded: HashSet<String>,

    /// Domains with a row stored under this host
    known: HashSet<String>,
}

impl RollupStore {
    /// `promotion_window` is the span after each hour boundary in which a
    /// sample triggers promotion, normally the monitoring interval.
    pub fn new(
        hypervisor: impl Into<String>,
        hourly_capacity: usize,
        promotion_window: Duration,
    ) -> Self {
        Self {
            hypervisor: hypervisor.into(),
            capacity: TierCapacity::with_hourly(hourly_capacity),
            promotion_window,
            entities: BTreeMap::new(),
            loaded: HashSet::new(),
            known: HashSet::new(),
        }
    }

    pub fn from_settings(hypervisor: impl Into<String>, settings: &HypervisorSettings) -> Self {
        Self::new(
            hypervisor,
            settings.hourly_capacity(),
            settings.monitoring_interval,
        )
    }

    pub fn hypervisor(&self) -> &str {
        &self.hypervisor
    }

    pub fn capacity(&self) -> TierCapacity {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn state(&self, uuid: &str) -> Option<EntityState> {
        self.entities.get(uuid).map(|entity| entity.state)
    }

    pub fn series(&self, uuid: &str, metric: Metric) -> Option<&MetricSeries> {
        self.entities.get(uuid).map(|entity| entity.series(metric))
    }

    /// Merge the persisted rows of domains not loaded yet
    ///
    /// Stored values are put in front of the values already in memory, as
    /// is; the next ingest rotates them back within bounds.
    #[instrument(skip(self, session, uuids), fields(hypervisor = %self.hypervisor))]
    pub async fn load(&mut self, session: &ResilientSession, uuids: &[String]) -> StorageResult<usize> {
        let hosted = session.hosted_entities(&self.hypervisor).await?;
        self.known.extend(hosted);

        let pending: Vec<String> = uuids
            .iter()
            .filter(|uuid| !self.loaded.contains(*uuid))
            .cloned()
            .collect();
        if pending.is_empty() {
            return Ok(0);
        }

        let rows = session.load_rollups(&pending).await?;
        for row in &rows {
            self.merge_row(row);
        }

        debug!("loaded {} of {} pending rollups", rows.len(), pending.len());
        Ok(rows.len())
    }

    fn merge_row(&mut self, row: &RollupRow) {
        let entity = self
            .entities
            .entry(row.uuid.clone())
            .or_insert_with(|| EntityRollup::new(row.vcores, row.vram, EntityState::SoftDeleted));

        for (tier, metric, column) in row.series.iter() {
            match TierSeries::parse_column(column) {
                Ok(stored) => entity.series_mut(metric).tier_mut(tier).prepend(stored),
                Err(reason) => warn!(
                    "ignoring unreadable {} of {}: {}",
                    SeriesColumns::column_name(tier, metric),
                    row.uuid,
                    reason
                ),
            }
        }

        self.loaded.insert(row.uuid.clone());
        self.known.insert(row.uuid.clone());
    }

    /// Mark every domain unobserved until recorded again
    pub fn begin_cycle(&mut self) {
        for entity in self.entities.values_mut() {
            entity.state = EntityState::SoftDeleted;
        }
    }

    /// Record one sampling of a domain, marking it observed
    pub fn record(&mut self, usage: &DomainUsage, now: DateTime<Utc>) {
        let entity = self
            .entities
            .entry(usage.uuid.clone())
            .or_insert_with(|| EntityRollup::new(usage.vcores, usage.vram, EntityState::Active));
        entity.vcores = usage.vcores;
        entity.vram = usage.vram;
        entity.state = EntityState::Active;

        for (metric, value) in usage.values() {
            self.ingest(&usage.uuid, metric, value, now);
        }
    }

    /// Append a value to the hourly tier, promote on boundaries, then rotate
    ///
    /// Hour and day boundaries are taken in UTC.
    pub fn ingest(&mut self, uuid: &str, metric: Metric, value: f64, now: DateTime<Utc>) {
        let promote_daily = self.in_promotion_window(now);
        let promote_weekly = promote_daily && now.hour() == 0;
        let capacity = self.capacity;

        let entity = self
            .entities
            .entry(uuid.to_string())
            .or_insert_with(|| EntityRollup::new(0, 0, EntityState::Active));
        let series = entity.series_mut(metric);

        series.hourly.push(value);

        if promote_daily {
            if let Some(mean) = series.hourly.mean() {
                series.daily.push(mean);
            }
        }
        if promote_weekly {
            if let Some(mean) = series.daily.mean() {
                series.weekly.push(mean);
            }
        }

        for tier in Tier::ALL {
            series.tier_mut(tier).rotate(capacity.get(tier));
        }
    }

    /// Trim a tier to its capacity, oldest values first
    pub fn rotate(&mut self, uuid: &str, metric: Metric, tier: Tier) -> usize {
        let capacity = self.capacity.get(tier);
        self.entities
            .get_mut(uuid)
            .map(|entity| entity.series_mut(metric).tier_mut(tier).rotate(capacity))
            .unwrap_or(0)
    }

    fn in_promotion_window(&self, now: DateTime<Utc>) -> bool {
        let into_hour = u64::from(now.minute()) * 60 + u64::from(now.second());
        into_hour < self.promotion_window.as_secs()
    }

    fn full_row(&self, uuid: &str, entity: &EntityRollup, now: DateTime<Utc>) -> RollupRow {
        let mut series = SeriesColumns::default();
        for metric in Metric::ALL {
            for tier in Tier::ALL {
                series.set(tier, metric, entity.series(metric).tier(tier).to_column());
            }
        }

        RollupRow {
            uuid: uuid.to_string(),
            hypervisor: self.hypervisor.clone(),
            vcores: entity.vcores,
            vram: entity.vram,
            series,
            state: EntityState::Active,
            last_update: Some(now),
        }
    }

    fn seed_row(&self, uuid: &str, entity: &EntityRollup, now: DateTime<Utc>) -> RollupRow {
        let mut series = SeriesColumns::default();
        for metric in Metric::ALL {
            let seed: TierSeries = entity.series(metric).hourly.latest().into_iter().collect();
            series.set(Tier::Hourly, metric, seed.to_column());
        }

        RollupRow {
            uuid: uuid.to_string(),
            hypervisor: self.hypervisor.clone(),
            vcores: entity.vcores,
            vram: entity.vram,
            series,
            state: EntityState::Active,
            last_update: Some(now),
        }
    }

    /// Persist the cycle in one transaction
    ///
    /// Rows of this host are soft-deleted, observed domains already stored
    /// are rewritten, new ones are inserted with their latest hourly value.
    /// A new domain that turns out to be stored already (it migrated from
    /// another host) is not inserted: its row is reloaded instead and
    /// written by the next flush. Memory is only changed once the commit
    /// succeeded.
    #[instrument(skip(self, session), fields(hypervisor = %self.hypervisor))]
    pub async fn flush(&mut self, session: &ResilientSession, now: DateTime<Utc>) -> StorageResult<FlushReport> {
        let mut writes = Vec::new();
        let mut migrated = Vec::new();

        for (uuid, entity) in &self.entities {
            if entity.state == EntityState::SoftDeleted {
                continue;
            }

            if self.loaded.contains(uuid) || self.known.contains(uuid) {
                writes.push(RollupWrite::Update(self.full_row(uuid, entity, now)));
                continue;
            }

            match session.rollup_owner(uuid).await? {
                Some(owner) => {
                    warn!(
                        "{} is already stored under {}, reloading instead of inserting",
                        uuid, owner
                    );
                    migrated.push(uuid.clone());
                }
                None => writes.push(RollupWrite::Insert(self.seed_row(uuid, entity, now))),
            }
        }

        let batch = RollupBatch {
            hypervisor: self.hypervisor.clone(),
            writes,
        };
        let commit = session.commit_rollups(&batch).await?;

        for uuid in &commit.conflicts {
            warn!("{} was inserted concurrently by another host", uuid);
        }
        migrated.extend(commit.conflicts.iter().cloned());

        for write in &batch.writes {
            if let RollupWrite::Insert(row) = write {
                if !commit.conflicts.contains(&row.uuid) {
                    self.loaded.insert(row.uuid.clone());
                    self.known.insert(row.uuid.clone());
                }
            }
        }

        let evicted: Vec<String> = self
            .entities
            .iter()
            .filter(|(_, entity)| entity.state == EntityState::SoftDeleted)
            .map(|(uuid, _)| uuid.clone())
            .collect();
        for uuid in &evicted {
            self.entities.remove(uuid);
            self.loaded.remove(uuid);
        }

        if !migrated.is_empty() {
            let observed: Vec<String> = self.entities.keys().cloned().collect();
            self.load(session, &observed).await?;
        }

        info!(
            "flushed {} updated, {} inserted, {} evicted, {} migrated",
            commit.updated,
            commit.inserted,
            evicted.len(),
            migrated.len()
        );

        Ok(FlushReport {
            updated: commit.updated,
            inserted: commit.inserted,
            migrated,
        })
    }
}
