//! Error taxonomy of a monitoring cycle
//!
//! Three kinds of failure are kept apart because they call for different
//! reactions:
//!
//! - **Connectivity**: the store stayed unreachable after every reconnect
//!   attempt. Fatal for the current cycle.
//! - **Configuration**: a required setting is missing or invalid. Fatal
//!   immediately, never retried.
//! - **Upstream collection**: one entity's sample or listing failed. The
//!   entity is skipped and the cycle continues.

use std::fmt;

use crate::storage::StorageError;

/// Errors raised while loading or validating the configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The configuration file could not be read
    Read(String),

    /// The configuration file is not valid JSON for the expected shape
    Parse(String),

    /// A setting has an unusable value
    Invalid { field: String, reason: String },
}

impl ConfigError {
    pub fn invalid(field: &str, reason: &str) -> Self {
        ConfigError::Invalid {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read(msg) => write!(f, "failed to read configuration: {}", msg),
            ConfigError::Parse(msg) => write!(f, "failed to parse configuration: {}", msg),
            ConfigError::Invalid { field, reason } => {
                write!(f, "invalid configuration value for {}: {}", field, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Errors reported by the external sample and listing sources
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionError {
    /// The entity disappeared between listing and reading
    Vanished(String),

    /// The source could not be reached or answered with an error
    Unavailable(String),

    /// The source answered with data that could not be decoded
    Malformed(String),
}

impl fmt::Display for CollectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionError::Vanished(id) => write!(f, "entity {} vanished", id),
            CollectionError::Unavailable(msg) => write!(f, "source unavailable: {}", msg),
            CollectionError::Malformed(msg) => write!(f, "malformed source data: {}", msg),
        }
    }
}

impl std::error::Error for CollectionError {}

impl From<reqwest::Error> for CollectionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            CollectionError::Malformed(err.to_string())
        } else {
            CollectionError::Unavailable(err.to_string())
        }
    }
}

/// Errors that end (or skip part of) a monitoring cycle
#[derive(Debug)]
pub enum MonitorError {
    /// The store stayed unreachable after all retries
    Connectivity(StorageError),

    /// A non-transient persistence failure
    Storage(StorageError),

    /// Missing or invalid required setting
    Configuration(ConfigError),

    /// A single entity's sample or listing failed
    UpstreamCollection {
        entity: String,
        source: CollectionError,
    },
}

impl MonitorError {
    /// Whether the current cycle has to be abandoned
    pub fn is_fatal(&self) -> bool {
        !matches!(self, MonitorError::UpstreamCollection { .. })
    }
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorError::Connectivity(err) => write!(f, "connectivity lost: {}", err),
            MonitorError::Storage(err) => write!(f, "storage failure: {}", err),
            MonitorError::Configuration(err) => write!(f, "{}", err),
            MonitorError::UpstreamCollection { entity, source } => {
                write!(f, "collection failed for {}: {}", entity, source)
            }
        }
    }
}

impl std::error::Error for MonitorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MonitorError::Connectivity(err) | MonitorError::Storage(err) => Some(err),
            MonitorError::Configuration(err) => Some(err),
            MonitorError::UpstreamCollection { source, .. } => Some(source),
        }
    }
}

impl From<StorageError> for MonitorError {
    fn from(err: StorageError) -> Self {
        if err.is_transient() || matches!(err, StorageError::RetriesExhausted { .. }) {
            MonitorError::Connectivity(err)
        } else {
            MonitorError::Storage(err)
        }
    }
}

impl From<ConfigError> for MonitorError {
    fn from(err: ConfigError) -> Self {
        MonitorError::Configuration(err)
    }
}

pub type MonitorResult<T> = Result<T, MonitorError>;
