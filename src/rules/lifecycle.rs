//! Status and age checks on instances and volumes

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use super::{Rule, days_since, display_date};
use crate::Severity;
use crate::alerts::{AlertCandidate, MessageTemplate};
use crate::config::CloudSettings;
use crate::inventory::CloudSnapshot;

/// `ERROR` instances, and `SHUTOFF`/`ACTIVE` ones untouched for too long
#[derive(Debug, Clone)]
pub struct InstanceLifecycleRule {
    pub shutoff_delay_days: i64,
    pub active_delay_days: i64,
    pub whitelist: HashSet<String>,
}

impl InstanceLifecycleRule {
    pub fn from_settings(settings: &CloudSettings) -> Self {
        Self {
            shutoff_delay_days: settings.shutoff_delay_days,
            active_delay_days: settings.active_delay_days,
            whitelist: settings.whitelist.clone(),
        }
    }
}

/// `<kind> <name> created on <date> (<n days> ago) <state> since <n days>.`
fn lifecycle_template(
    kind: &str,
    name: MessageTemplate,
    created: DateTime<Utc>,
    state: &str,
    since_days: i64,
    now: DateTime<Utc>,
) -> MessageTemplate {
    MessageTemplate::new()
        .literal(format!("{} ", kind))
        .append(name)
        .literal(format!(" created on {} (", display_date(created)))
        .days(days_since(created, now))
        .literal(format!(" ago) {} since ", state))
        .days(since_days)
        .literal(".")
}

impl Rule for InstanceLifecycleRule {
    fn name(&self) -> &str {
        "instance-lifecycle"
    }

    fn evaluate(&self, snapshot: &CloudSnapshot, now: DateTime<Utc>) -> Vec<AlertCandidate> {
        snapshot
            .instances
            .iter()
            .filter(|instance| !self.whitelist.contains(&instance.id))
            .filter_map(|instance| {
                let since = days_since(instance.updated, now);
                let (severity, state) = match instance.status.as_str() {
                    "ERROR" => (Severity::Critical, "in error (ERROR)"),
                    "SHUTOFF" if since >= self.shutoff_delay_days => {
                        (Severity::Warning, "stopped (SHUTOFF)")
                    }
                    "ACTIVE" if since >= self.active_delay_days => {
                        (Severity::Info, "running (ACTIVE)")
                    }
                    _ => return None,
                };

                let template = lifecycle_template(
                    "Instance",
                    MessageTemplate::new().text(&instance.name),
                    instance.created,
                    state,
                    since,
                    now,
                );
                Some(AlertCandidate::new(
                    &instance.id,
                    &instance.project_id,
                    severity,
                    template,
                ))
            })
            .collect()
    }
}

/// `error` volumes, and `available` ones unattached for too long
#[derive(Debug, Clone)]
pub struct VolumeLifecycleRule {
    pub volume_delay_days: i64,
    pub whitelist: HashSet<String>,
}

impl VolumeLifecycleRule {
    pub fn from_settings(settings: &CloudSettings) -> Self {
        Self {
            volume_delay_days: settings.volume_delay_days,
            whitelist: settings.whitelist.clone(),
        }
    }
}

impl Rule for VolumeLifecycleRule {
    fn name(&self) -> &str {
        "volume-lifecycle"
    }

    fn evaluate(&self, snapshot: &CloudSnapshot, now: DateTime<Utc>) -> Vec<AlertCandidate> {
        snapshot
            .volumes
            .iter()
            .filter(|volume| !self.whitelist.contains(&volume.id))
            .filter_map(|volume| {
                let since = days_since(volume.updated, now);
                let label = if volume.name.is_empty() {
                    &volume.id
                } else {
                    &volume.name
                };

                let (severity, name, state) = match volume.status.as_str() {
                    "error" => (
                        Severity::Critical,
                        MessageTemplate::new().text(label),
                        "in error (error)",
                    ),
                    "available" if since >= self.volume_delay_days => (
                        Severity::Warning,
                        MessageTemplate::new()
                            .text(label)
                            .literal(" of ")
                            .count(volume.size)
                            .literal(" GB"),
                        "unused (available)",
                    ),
                    _ => return None,
                };

                let template =
                    lifecycle_template("Volume", name, volume.created, state, since, now);
                Some(AlertCandidate::new(
                    &volume.id,
                    &volume.project_id,
                    severity,
                    template,
                ))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{Instance, Volume};
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 6, 12, 0, 0).unwrap()
    }

    fn instance(id: &str, status: &str, updated_days_ago: i64) -> Instance {
        Instance {
            id: id.to_string(),
            name: "X".to_string(),
            user_id: "u1".to_string(),
            project_id: "p1".to_string(),
            status: status.to_string(),
            created: Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap(),
            updated: now() - Duration::days(updated_days_ago),
            flavor_id: "m1.small".to_string(),
        }
    }

    fn volume(id: &str, status: &str, updated_days_ago: i64) -> Volume {
        Volume {
            id: id.to_string(),
            name: "data".to_string(),
            user_id: "u1".to_string(),
            project_id: "p1".to_string(),
            status: status.to_string(),
            size: 50,
            created: Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap(),
            updated: now() - Duration::days(updated_days_ago),
        }
    }

    fn rule() -> InstanceLifecycleRule {
        InstanceLifecycleRule {
            shutoff_delay_days: 7,
            active_delay_days: 90,
            whitelist: HashSet::new(),
        }
    }

    #[test]
    fn test_error_instance_is_always_critical() {
        let snapshot = CloudSnapshot {
            instances: vec![instance("i-1", "ERROR", 1)],
            ..Default::default()
        };

        let candidates = rule().evaluate(&snapshot, now());

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].severity, Severity::Critical);
        assert_eq!(candidates[0].subject, "i-1");
        assert_eq!(candidates[0].project, "p1");
        assert_eq!(
            candidates[0].message,
            "Instance X created on 01/01/2024 (5 days ago) in error (ERROR) since 1 day."
        );
    }

    #[test]
    fn test_shutoff_instance_waits_for_delay() {
        let snapshot = CloudSnapshot {
            instances: vec![
                instance("i-1", "SHUTOFF", 6),
                instance("i-2", "SHUTOFF", 7),
                instance("i-3", "ACTIVE", 89),
                instance("i-4", "ACTIVE", 90),
            ],
            ..Default::default()
        };

        let candidates = rule().evaluate(&snapshot, now());
        let subjects: Vec<&str> = candidates.iter().map(|c| c.subject.as_str()).collect();

        assert_eq!(subjects, vec!["i-2", "i-4"]);
        assert_eq!(candidates[0].severity, Severity::Warning);
        assert!(candidates[0].message.ends_with("stopped (SHUTOFF) since 7 days."));
        assert_eq!(candidates[1].severity, Severity::Info);
    }

    #[test]
    fn test_whitelisted_instance_is_skipped() {
        let mut rule = rule();
        rule.whitelist.insert("i-1".to_string());
        let snapshot = CloudSnapshot {
            instances: vec![instance("i-1", "ERROR", 1)],
            ..Default::default()
        };

        assert!(rule.evaluate(&snapshot, now()).is_empty());
    }

    #[test]
    fn test_volume_rules() {
        let rule = VolumeLifecycleRule {
            volume_delay_days: 7,
            whitelist: HashSet::new(),
        };
        let snapshot = CloudSnapshot {
            volumes: vec![
                volume("v-1", "error", 0),
                volume("v-2", "available", 3),
                volume("v-3", "available", 8),
                volume("v-4", "in-use", 30),
            ],
            ..Default::default()
        };

        let candidates = rule.evaluate(&snapshot, now());

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].severity, Severity::Critical);
        assert_eq!(
            candidates[0].message,
            "Volume data created on 01/01/2024 (5 days ago) in error (error) since 0 days."
        );
        assert_eq!(candidates[1].severity, Severity::Warning);
        assert_eq!(
            candidates[1].message,
            "Volume data of 50 GB created on 01/01/2024 (5 days ago) unused (available) since 8 days."
        );
    }
}
