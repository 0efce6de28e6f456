//! Per-user aggregate ceilings

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::warn;

use super::Rule;
use crate::Severity;
use crate::alerts::{AlertCandidate, MessageTemplate};
use crate::config::Quotas;
use crate::inventory::CloudSnapshot;

#[derive(Debug, Default)]
struct Usage<'a> {
    /// Alerts about the user are filed under their smallest project id
    project: Option<&'a str>,
    instances: u64,
    vcpus: u64,
    volumes: u64,
    storage_gb: u64,
}

impl<'a> Usage<'a> {
    fn file_under(&mut self, project: &'a str) {
        if self.project.is_none_or(|current| project < current) {
            self.project = Some(project);
        }
    }
}

/// Instance, vCPU, volume and storage totals of each user against the quotas
///
/// Not subject to the whitelist: an aggregate is never about a single entity.
///
/// A user's alerts are filed under the smallest id among the projects they own
/// something in. Once that project empties, the next evaluation files the same
/// breach under the new smallest project as a fresh unread alert, and the one
/// under the old project stays unread.
#[derive(Debug, Clone)]
pub struct QuotaRule {
    pub quotas: Quotas,
}

impl QuotaRule {
    pub fn new(quotas: Quotas) -> Self {
        Self { quotas }
    }
}

fn quota_template(user: &str, verb: &str, used: u64, unit: &str, limit: u64, limit_unit: &str) -> MessageTemplate {
    MessageTemplate::new()
        .literal(format!("User {} {} ", user, verb))
        .count(used)
        .literal(format!(" {} (limit: ", unit))
        .count(limit)
        .literal(format!("{}).", limit_unit))
}

impl Rule for QuotaRule {
    fn name(&self) -> &str {
        "quota"
    }

    fn evaluate(&self, snapshot: &CloudSnapshot, _now: DateTime<Utc>) -> Vec<AlertCandidate> {
        let mut users: BTreeMap<&str, Usage> = BTreeMap::new();

        for instance in &snapshot.instances {
            let usage = users.entry(instance.user_id.as_str()).or_default();
            usage.file_under(&instance.project_id);
            usage.instances += 1;

            match snapshot.flavors.get(&instance.flavor_id) {
                Some(vcpus) => usage.vcpus += u64::from(*vcpus),
                None => warn!(
                    "unknown flavor {} of instance {}, its vCPUs are not counted",
                    instance.flavor_id, instance.id
                ),
            }
        }

        for volume in &snapshot.volumes {
            let usage = users.entry(volume.user_id.as_str()).or_default();
            usage.file_under(&volume.project_id);
            usage.volumes += 1;
            usage.storage_gb += volume.size;
        }

        let mut candidates = Vec::new();
        for (user, usage) in users {
            let Some(project) = usage.project else {
                continue;
            };

            let checks = [
                (self.quotas.max_instances, usage.instances, "runs", "instances", ""),
                (self.quotas.max_vcpus, usage.vcpus, "uses", "vCPUs", ""),
                (self.quotas.max_volumes, usage.volumes, "owns", "volumes", ""),
                (self.quotas.max_storage_gb, usage.storage_gb, "stores", "GB on volumes", " GB"),
            ];

            for (limit, used, verb, unit, limit_unit) in checks {
                let Some(limit) = limit else {
                    continue;
                };
                if used > limit {
                    candidates.push(AlertCandidate::new(
                        user,
                        project,
                        Severity::Warning,
                        quota_template(user, verb, used, unit, limit, limit_unit),
                    ));
                }
            }
        }

        candidates
    }
}
