//! Policy checks over a cloud snapshot
//!
//! Rules are stateless: each one looks at a [`CloudSnapshot`] and yields
//! at most one [`AlertCandidate`] per entity. Deduplication against alerts
//! raised by earlier passes is left to the alert matcher.
//!
//! Built-in rule types:
//!
//! - [`lifecycle::InstanceLifecycleRule`] / [`lifecycle::VolumeLifecycleRule`]:
//!   resources stuck in an error state or idle for too long
//! - [`quota::QuotaRule`]: per-user aggregates over their ceiling
//! - [`exposure::ExposureRule`]: ingress rules open to public ranges

pub mod exposure;
pub mod lifecycle;
pub mod net;
pub mod quota;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::alerts::AlertCandidate;
use crate::config::CloudSettings;
use crate::inventory::CloudSnapshot;

/// A policy evaluated once per cloud pass
pub trait Rule: Send + Sync {
    /// Short identifier used in logs (e.g. `"instance-lifecycle"`)
    fn name(&self) -> &str;

    /// Conditions met in the snapshot
    ///
    /// An entity that cannot be evaluated is logged and skipped, it never
    /// prevents the evaluation of the others.
    fn evaluate(&self, snapshot: &CloudSnapshot, now: DateTime<Utc>) -> Vec<AlertCandidate>;
}

/// The set of rules run by the cloud stage
#[derive(Default)]
pub struct RuleEvaluator {
    rules: Vec<Box<dyn Rule>>,
}

impl RuleEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(mut self, rule: impl Rule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    /// Every built-in rule, configured from the cloud settings
    pub fn from_settings(settings: &CloudSettings) -> Self {
        Self::new()
            .with_rule(lifecycle::InstanceLifecycleRule::from_settings(settings))
            .with_rule(lifecycle::VolumeLifecycleRule::from_settings(settings))
            .with_rule(quota::QuotaRule::new(settings.quotas.clone()))
            .with_rule(exposure::ExposureRule::from_settings(settings))
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|rule| rule.name()).collect()
    }

    pub fn evaluate(&self, snapshot: &CloudSnapshot, now: DateTime<Utc>) -> Vec<AlertCandidate> {
        self.rules
            .iter()
            .flat_map(|rule| {
                let candidates = rule.evaluate(snapshot, now);
                debug!("rule {} raised {} candidates", rule.name(), candidates.len());
                candidates
            })
            .collect()
    }
}

/// Whole days elapsed since `since`, never negative
pub(crate) fn days_since(since: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - since).num_days().max(0)
}

/// Creation date as shown in alert messages
pub(crate) fn display_date(date: DateTime<Utc>) -> String {
    date.format("%d/%m/%Y").to_string()
}
