//! Monitoring cycles and the task that drives them
//!
//! A cycle runs the enabled stages one after another:
//!
//! ```text
//! hypervisor: list domains → load rollups → sample each domain → flush
//! cloud:      snapshot → evaluate rules → reconcile alerts → purge read alerts
//! ```
//!
//! Nothing inside a cycle runs concurrently, and the [`CycleDriver`] never
//! starts a cycle before the previous one returned.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, instrument, warn};

use crate::alerts::{AlertService, ReconcileReport, reconcile};
use crate::config::MonitorConfig;
use crate::error::ConfigError;
use crate::error::{CollectionError, MonitorError, MonitorResult};
use crate::inventory::CloudInventory;
use crate::inventory::http::HttpInventory;
use crate::rollup::{FlushReport, RollupStore};
use crate::rules::RuleEvaluator;
use crate::sampling::http::HttpSampleSource;
use crate::sampling::{HostInfo, SampleSource, Sampler};
use crate::storage::ResilientSession;

/// Period used when no hypervisor stage sets one
pub const DEFAULT_CYCLE_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HypervisorReport {
    pub listed: usize,
    pub sampled: usize,
    pub skipped: usize,
    pub flush: FlushReport,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloudReport {
    pub candidates: usize,
    pub alerts: ReconcileReport,
    pub purged: usize,
}

/// Outcome of one cycle
///
/// A stage is `None` when it is disabled, or when its upstream listing
/// failed and it was skipped for this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub started: DateTime<Utc>,
    pub hypervisor: Option<HypervisorReport>,
    pub cloud: Option<CloudReport>,
}

/// Sampling of the local domains into the rollup store
pub struct HypervisorStage {
    sampler: Sampler,
    store: RollupStore,
}

impl HypervisorStage {
    pub fn new(sampler: Sampler, store: RollupStore) -> Self {
        Self { sampler, store }
    }

    pub fn store(&self) -> &RollupStore {
        &self.store
    }

    #[instrument(skip_all, fields(hypervisor = %self.store.hypervisor()))]
    pub async fn run(&mut self, session: &ResilientSession) -> MonitorResult<HypervisorReport> {
        let domains = self
            .sampler
            .list_domains()
            .await
            .map_err(|source| MonitorError::UpstreamCollection {
                entity: self.store.hypervisor().to_string(),
                source,
            })?;

        let uuids: Vec<String> = domains.iter().map(|domain| domain.uuid.clone()).collect();
        self.store.load(session, &uuids).await?;
        self.store.begin_cycle();

        let mut report = HypervisorReport {
            listed: domains.len(),
            ..Default::default()
        };

        for domain in &domains {
            match self.sampler.sample(domain).await {
                Ok(usage) => {
                    self.store.record(&usage, Utc::now());
                    report.sampled += 1;
                }
                Err(CollectionError::Vanished(uuid)) => {
                    debug!("domain {} vanished while being sampled", uuid);
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!("skipping domain {}: {}", domain.uuid, e);
                    report.skipped += 1;
                }
            }
        }

        report.flush = self.store.flush(session, Utc::now()).await?;
        Ok(report)
    }
}

/// Rule evaluation over the cloud inventory
pub struct CloudStage {
    inventory: Arc<dyn CloudInventory>,
    evaluator: RuleEvaluator,
    read_retention: chrono::Duration,
}

impl CloudStage {
    pub fn new(
        inventory: Arc<dyn CloudInventory>,
        evaluator: RuleEvaluator,
        read_retention: chrono::Duration,
    ) -> Self {
        Self {
            inventory,
            evaluator,
            read_retention,
        }
    }

    #[instrument(skip_all)]
    pub async fn run(&self, session: &ResilientSession) -> MonitorResult<CloudReport> {
        let snapshot =
            self.inventory
                .snapshot()
                .await
                .map_err(|source| MonitorError::UpstreamCollection {
                    entity: "cloud inventory".to_string(),
                    source,
                })?;

        let now = Utc::now();
        let candidates = self.evaluator.evaluate(&snapshot, now);
        let alerts = reconcile(session, &candidates, now).await?;
        let purged = AlertService::new(session.clone())
            .purge_read(self.read_retention, now)
            .await?;

        Ok(CloudReport {
            candidates: candidates.len(),
            alerts,
            purged,
        })
    }
}

/// The enabled stages and the session they share
pub struct MonitoringCycle {
    session: ResilientSession,
    hypervisor: Option<HypervisorStage>,
    cloud: Option<CloudStage>,
}

impl MonitoringCycle {
    pub fn new(session: ResilientSession) -> Self {
        Self {
            session,
            hypervisor: None,
            cloud: None,
        }
    }

    pub fn with_hypervisor(mut self, stage: HypervisorStage) -> Self {
        self.hypervisor = Some(stage);
        self
    }

    pub fn with_cloud(mut self, stage: CloudStage) -> Self {
        self.cloud = Some(stage);
        self
    }

    /// Build the stages configured in `config`, talking to their HTTP sources
    pub fn from_config(
        config: &MonitorConfig,
        session: ResilientSession,
        hypervisor: bool,
        cloud: bool,
    ) -> MonitorResult<Self> {
        let mut cycle = Self::new(session);

        if hypervisor {
            let settings = config.hypervisor.as_ref().ok_or_else(|| {
                ConfigError::invalid("hypervisor", "section required by the hypervisor stage")
            })?;
            let source: Arc<dyn SampleSource> = Arc::new(
                HttpSampleSource::new(&settings.source_url)
                    .map_err(|e| ConfigError::invalid("hypervisor.source_url", &e.to_string()))?,
            );
            let host = HostInfo::detect(settings.hostname.clone());
            let store = RollupStore::from_settings(host.hostname.clone(), settings);
            let sampler = Sampler::new(source, host, settings.sampling_time);
            cycle = cycle.with_hypervisor(HypervisorStage::new(sampler, store));
        }

        if cloud {
            let settings = config.cloud.as_ref().ok_or_else(|| {
                ConfigError::invalid("cloud", "section required by the cloud stage")
            })?;
            let inventory: Arc<dyn CloudInventory> = Arc::new(
                HttpInventory::new(&settings.source_url)
                    .map_err(|e| ConfigError::invalid("cloud.source_url", &e.to_string()))?,
            );
            cycle = cycle.with_cloud(CloudStage::new(
                inventory,
                RuleEvaluator::from_settings(settings),
                config.read_retention,
            ));
        }

        if cycle.hypervisor.is_none() && cycle.cloud.is_none() {
            return Err(ConfigError::invalid("stages", "no stage enabled").into());
        }

        Ok(cycle)
    }

    pub fn session(&self) -> &ResilientSession {
        &self.session
    }

    pub fn hypervisor(&self) -> Option<&HypervisorStage> {
        self.hypervisor.as_ref()
    }

    /// Run every enabled stage once
    ///
    /// A failed upstream listing skips its stage only; any other error ends
    /// the cycle.
    pub async fn run_once(&mut self) -> MonitorResult<CycleReport> {
        let started = Utc::now();
        let mut report = CycleReport {
            started,
            hypervisor: None,
            cloud: None,
        };

        if let Some(stage) = self.hypervisor.as_mut() {
            report.hypervisor = skip_upstream(stage.run(&self.session).await)?;
        }

        if let Some(stage) = self.cloud.as_ref() {
            report.cloud = skip_upstream(stage.run(&self.session).await)?;
        }

        info!(
            "cycle done in {}ms",
            (Utc::now() - started).num_milliseconds()
        );
        Ok(report)
    }
}

fn skip_upstream<T>(result: MonitorResult<T>) -> MonitorResult<Option<T>> {
    match result {
        Ok(report) => Ok(Some(report)),
        Err(e) if !e.is_fatal() => {
            warn!("stage skipped: {}", e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Commands accepted by a [`CycleDriver`]
#[derive(Debug)]
pub enum CycleCommand {
    /// Run a cycle immediately, outside the interval
    RunNow {
        respond_to: oneshot::Sender<MonitorResult<CycleReport>>,
    },

    /// Stop after the cycle in flight, if any
    Shutdown,
}

/// Runs a [`MonitoringCycle`] on every tick of its interval
pub struct CycleDriver {
    cycle: MonitoringCycle,
    command_rx: mpsc::Receiver<CycleCommand>,
    period: Duration,
}

impl CycleDriver {
    pub fn new(
        cycle: MonitoringCycle,
        command_rx: mpsc::Receiver<CycleCommand>,
        period: Duration,
    ) -> Self {
        Self {
            cycle,
            command_rx,
            period,
        }
    }

    #[instrument(skip(self), fields(period = ?self.period))]
    pub async fn run(mut self) {
        debug!("starting cycle driver");

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.cycle.run_once().await {
                        error!("cycle failed: {}", e);
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        CycleCommand::RunNow { respond_to } => {
                            debug!("received RunNow command");
                            let result = self.cycle.run_once().await;
                            let _ = respond_to.send(result);
                        }

                        CycleCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        if let Err(e) = self.cycle.session().close().await {
            warn!("failed to close the store: {}", e);
        }
        debug!("cycle driver stopped");
    }
}

/// Handle to a spawned [`CycleDriver`]
#[derive(Clone)]
pub struct CycleHandle {
    sender: mpsc::Sender<CycleCommand>,
}

impl CycleHandle {
    /// Spawn the driver on the current runtime
    ///
    /// The first cycle starts right away.
    pub fn spawn(cycle: MonitoringCycle, period: Duration) -> (Self, tokio::task::JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let driver = CycleDriver::new(cycle, cmd_rx, period);
        let task = tokio::spawn(driver.run());

        (Self { sender: cmd_tx }, task)
    }

    /// Run a cycle now and wait for its report
    pub async fn run_now(&self) -> Result<CycleReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CycleCommand::RunNow { respond_to: tx })
            .await
            .context("failed to send RunNow command")?;

        let report = rx.await.context("failed to receive response")??;
        Ok(report)
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(CycleCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}

/// Cycle period: the hypervisor monitoring interval when there is one
pub fn cycle_interval(config: &MonitorConfig) -> Duration {
    config
        .hypervisor
        .as_ref()
        .map_or(DEFAULT_CYCLE_INTERVAL, |settings| settings.monitoring_interval)
}
