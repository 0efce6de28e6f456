pub mod alerts;
pub mod config;
pub mod cycle;
pub mod error;
pub mod inventory;
pub mod report;
pub mod rollup;
pub mod rules;
pub mod sampling;
pub mod storage;
pub mod util;

use serde::{Deserialize, Serialize};

/// Utilization metrics tracked for every hypervisor domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// CPU usage relative to the domain's own vCPUs
    Vcpu,
    /// CPU usage relative to all host cores
    Cpu,
    /// Memory usage relative to the host's estimated capacity
    Mem,
}

impl Metric {
    pub const ALL: [Metric; 3] = [Metric::Vcpu, Metric::Cpu, Metric::Mem];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Vcpu => "vcpu",
            Metric::Cpu => "cpu",
            Metric::Mem => "mem",
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rolling windows of a metric's history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Hourly,
    Daily,
    Weekly,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Hourly, Tier::Daily, Tier::Weekly];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Hourly => "hourly",
            Tier::Daily => "daily",
            Tier::Weekly => "weekly",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert severity, ordered from least to most urgent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Alert,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Alert => "ALERT",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        }
    }

    pub fn parse(value: &str) -> Option<Severity> {
        match value.to_ascii_uppercase().as_str() {
            "INFO" => Some(Severity::Info),
            "ALERT" => Some(Severity::Alert),
            "WARNING" => Some(Severity::Warning),
            "CRITICAL" => Some(Severity::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_round_trip_through_text() {
        for severity in [
            Severity::Info,
            Severity::Alert,
            Severity::Warning,
            Severity::Critical,
        ] {
            assert_eq!(Severity::parse(severity.as_str()), Some(severity));
        }
        assert_eq!(Severity::parse("critical"), Some(Severity::Critical));
        assert_eq!(Severity::parse("PANIC"), None);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::Warning);
        assert!(Severity::Warning > Severity::Alert);
        assert!(Severity::Alert > Severity::Info);
    }
}
