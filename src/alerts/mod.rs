//! Alert records: templates, deduplication and the read API

pub mod matcher;
pub mod service;
pub mod template;

pub use matcher::{AlertCandidate, Decision, ReconcileReport, decide, reconcile};
pub use service::AlertService;
pub use template::{MessageTemplate, plural_days};
