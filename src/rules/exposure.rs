//! Network exposure of security groups

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::warn;

use super::Rule;
use super::net::Cidr;
use crate::Severity;
use crate::alerts::{AlertCandidate, MessageTemplate};
use crate::config::CloudSettings;
use crate::inventory::{CloudSnapshot, SecurityGroup, SecurityRule};

/// Ingress rules opening ports to public ranges, and custom groups
#[derive(Debug, Clone)]
pub struct ExposureRule {
    /// Private ranges plus the configured trusted subnets
    pub trusted: Vec<Cidr>,
    pub whitelisted_ports: HashSet<u16>,
}

impl ExposureRule {
    pub fn new(trusted_subnets: &[Cidr], whitelisted_ports: HashSet<u16>) -> Self {
        let mut trusted = Cidr::private_ranges();
        trusted.extend_from_slice(trusted_subnets);
        Self {
            trusted,
            whitelisted_ports,
        }
    }

    pub fn from_settings(settings: &CloudSettings) -> Self {
        Self::new(&settings.trusted_subnets, settings.whitelisted_ports.clone())
    }

    fn is_trusted(&self, remote: &Cidr) -> bool {
        self.trusted.iter().any(|range| range.contains(remote))
    }

    fn exposed_ports(&self, min: u16, max: u16) -> u64 {
        (min..=max)
            .filter(|port| !self.whitelisted_ports.contains(port))
            .count() as u64
    }

    fn check_rule(&self, group: &SecurityGroup, rule: &SecurityRule) -> Option<AlertCandidate> {
        let prefix = rule.remote_ip_prefix.as_deref()?;
        let remote = match prefix.parse::<Cidr>() {
            Ok(remote) => remote,
            Err(reason) => {
                warn!("skipping rule {} of group {}: {}", rule.id, group.id, reason);
                return None;
            }
        };

        if self.is_trusted(&remote) {
            return None;
        }

        let (min, max) = rule.ports();
        let exposed = self.exposed_ports(min, max);
        // whitelisted ports only exempt rules scoped to a specific remote
        if exposed == 0 && !remote.is_wildcard() {
            return None;
        }

        let protocol = rule.protocol.as_deref().unwrap_or("any");
        let opening = if min == max {
            MessageTemplate::new()
                .literal(format!("Security group {} opens {} port {} to ", group.name, protocol, min))
        } else {
            MessageTemplate::new()
                .literal(format!("Security group {} opens ", group.name))
                .count(exposed)
                .literal(format!(" {} ports ({}-{}) to ", protocol, min, max))
        };

        let (severity, template) = if remote.is_wildcard() {
            (
                Severity::Critical,
                opening.literal(format!("the whole Internet ({}).", prefix)),
            )
        } else {
            (Severity::Alert, opening.literal(format!("{}.", prefix)))
        };

        Some(AlertCandidate::new(&rule.id, &group.project_id, severity, template))
    }
}

impl Rule for ExposureRule {
    fn name(&self) -> &str {
        "exposure"
    }

    fn evaluate(&self, snapshot: &CloudSnapshot, _now: DateTime<Utc>) -> Vec<AlertCandidate> {
        let mut candidates = Vec::new();

        for group in &snapshot.security_groups {
            candidates.extend(
                group
                    .ingress_rules()
                    .filter_map(|rule| self.check_rule(group, rule)),
            );

            let custom = group.ingress_rules().count() as u64;
            if !group.is_default() && custom > 0 {
                candidates.push(AlertCandidate::new(
                    &group.id,
                    &group.project_id,
                    Severity::Warning,
                    MessageTemplate::new()
                        .literal(format!("Security group {} defines custom ingress rules (", group.name))
                        .count(custom)
                        .literal(")."),
                ));
            }
        }

        candidates
    }
}
