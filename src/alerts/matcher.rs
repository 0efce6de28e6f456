//! Alert deduplication
//!
//! Stored alerts carry no key back to the condition that raised them, so
//! identity is recovered from their text: an unread alert is the same issue
//! as a candidate when it concerns the same subject and its message matches
//! the candidate's template.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::{debug, error, info, instrument, warn};

use super::template::MessageTemplate;
use crate::Severity;
use crate::storage::{AlertChange, AlertRow, AlertStatus, NewAlert, ResilientSession, StorageResult};

/// A computed alert condition, not yet reconciled with the alert table
#[derive(Debug, Clone, PartialEq)]
pub struct AlertCandidate {
    /// UUID of the entity (or user) the condition is about
    pub subject: String,

    /// Project the alert is filed under
    pub project: String,

    pub severity: Severity,
    pub template: MessageTemplate,
    pub message: String,
}

impl AlertCandidate {
    pub fn new(
        subject: impl Into<String>,
        project: impl Into<String>,
        severity: Severity,
        template: MessageTemplate,
    ) -> Self {
        let message = template.render();
        Self {
            subject: subject.into(),
            project: project.into(),
            severity,
            template,
            message,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// No unread alert for this condition
    Create,

    /// The unread alert `id` is this condition with an outdated message
    Update { id: i64 },

    /// The condition is already reported verbatim
    Noop,
}

/// An alert the matcher compares candidates against
#[derive(Debug, Clone)]
struct KnownAlert {
    /// `None` for alerts created earlier in the same pass
    id: Option<i64>,
    subject: String,
    message: String,
}

impl From<&AlertRow> for KnownAlert {
    fn from(row: &AlertRow) -> Self {
        Self {
            id: Some(row.id),
            subject: row.uuid.clone(),
            message: row.message.clone(),
        }
    }
}

fn decide_among(candidate: &AlertCandidate, pattern: &Regex, known: &[KnownAlert]) -> Decision {
    let mut matches = known
        .iter()
        .filter(|alert| alert.subject == candidate.subject && pattern.is_match(&alert.message));

    let Some(found) = matches.next() else {
        return Decision::Create;
    };

    let extra = matches.count();
    if extra > 0 {
        warn!(
            "{} unread alerts of {} match \"{}\", using the first one",
            extra + 1,
            candidate.subject,
            candidate.message
        );
    }

    match found.id {
        Some(id) if found.message != candidate.message => Decision::Update { id },
        _ => Decision::Noop,
    }
}

/// Decide what to do with a candidate given the unread alerts of its project
pub fn decide(candidate: &AlertCandidate, unread: &[AlertRow]) -> Result<Decision, regex::Error> {
    let pattern = candidate.template.pattern()?;
    let known: Vec<KnownAlert> = unread.iter().map(KnownAlert::from).collect();
    Ok(decide_among(candidate, &pattern, &known))
}

/// Outcome of reconciling a pass's candidates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,

    /// Candidates dropped because their template could not be compiled
    pub skipped: usize,
}

/// Reconcile every candidate of a pass against the alert table
///
/// Unread alerts are fetched once per project. All creations and updates
/// are committed together at the end.
#[instrument(skip_all, fields(candidates = candidates.len()))]
pub async fn reconcile(
    session: &ResilientSession,
    candidates: &[AlertCandidate],
    now: DateTime<Utc>,
) -> StorageResult<ReconcileReport> {
    let mut by_project: BTreeMap<&str, Vec<&AlertCandidate>> = BTreeMap::new();
    for candidate in candidates {
        by_project
            .entry(candidate.project.as_str())
            .or_default()
            .push(candidate);
    }

    let mut report = ReconcileReport::default();
    let mut changes = Vec::new();

    for (project, candidates) in by_project {
        let unread = session.project_alerts(project, AlertStatus::Unread).await?;
        let mut known: Vec<KnownAlert> = unread.iter().map(KnownAlert::from).collect();

        for candidate in candidates {
            let pattern = match candidate.template.pattern() {
                Ok(pattern) => pattern,
                Err(e) => {
                    error!("cannot match alert \"{}\": {}", candidate.message, e);
                    report.skipped += 1;
                    continue;
                }
            };

            match decide_among(candidate, &pattern, &known) {
                Decision::Create => {
                    debug!("new alert for {}: {}", candidate.subject, candidate.message);
                    changes.push(AlertChange::Create(NewAlert {
                        uuid: candidate.subject.clone(),
                        project: candidate.project.clone(),
                        severity: candidate.severity,
                        message: candidate.message.clone(),
                        timestamp: now,
                    }));
                    known.push(KnownAlert {
                        id: None,
                        subject: candidate.subject.clone(),
                        message: candidate.message.clone(),
                    });
                    report.created += 1;
                }
                Decision::Update { id } => {
                    debug!("refreshing alert {}: {}", id, candidate.message);
                    changes.push(AlertChange::Update {
                        id,
                        message: candidate.message.clone(),
                        timestamp: now,
                    });
                    if let Some(alert) = known.iter_mut().find(|alert| alert.id == Some(id)) {
                        alert.message = candidate.message.clone();
                    }
                    report.updated += 1;
                }
                Decision::Noop => report.unchanged += 1,
            }
        }
    }

    session.commit_alert_changes(&changes).await?;

    info!(
        "alerts: {} created, {} updated, {} unchanged",
        report.created, report.updated, report.unchanged
    );
    Ok(report)
}
