// src/error.rs
//! Error taxonomy of the harvester.
//!
//! Only [`ConfigError`] and [`HarvestError::WorkerJoin`] are fatal to the
//! process. Upstream and publish failures are recorded per page/record in the
//! run summary and never abort a run.

use serde::Serialize;

/// Invalid or missing configuration. The process refuses to start.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be a positive integer (got {value})")]
    NotPositive { field: &'static str, value: String },

    #[error("{field} must be at most {max} (got {value})")]
    TooLarge {
        field: &'static str,
        value: u64,
        max: u64,
    },

    #[error("{field} is not a valid integer: {value:?}")]
    NotInteger { field: &'static str, value: String },

    #[error("{0} must be provided")]
    Missing(&'static str),

    #[error("at least one source must be configured")]
    NoSources,

    #[error("duplicate source name {0:?}")]
    DuplicateSource(String),

    #[error("source {source_name:?}: {reason}")]
    InvalidSource { source_name: String, reason: String },

    #[error("broker: {0}")]
    InvalidBroker(String),

    #[error("environment variable {0} referenced by config is not set")]
    UnresolvedEnv(String),

    #[error("config file {path}: {reason}")]
    File { path: String, reason: String },
}

/// Failure reported by a [`SourceClient`](crate::extract::types::SourceClient).
///
/// Transient failures are retried by the worker a bounded number of times;
/// fatal ones fail the page immediately.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UpstreamError {
    #[error("transient upstream failure: {reason}")]
    Transient {
        status: Option<u16>,
        reason: String,
    },

    #[error("fatal upstream failure: {reason}")]
    Fatal {
        status: Option<u16>,
        reason: String,
    },
}

impl UpstreamError {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            status: None,
            reason: reason.into(),
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal {
            status: None,
            reason: reason.into(),
        }
    }

    /// Map a non-success HTTP status onto the retry taxonomy.
    /// 408, 429 and 5xx are retryable; everything else is not.
    pub fn from_status(status: u16, body_hint: &str) -> Self {
        let reason = if body_hint.is_empty() {
            format!("HTTP {status}")
        } else {
            format!("HTTP {status}: {body_hint}")
        };
        if status == 408 || status == 429 || (500..=599).contains(&status) {
            Self::Transient {
                status: Some(status),
                reason,
            }
        } else {
            Self::Fatal {
                status: Some(status),
                reason,
            }
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transient { status, .. } | Self::Fatal { status, .. } => *status,
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return Self::from_status(status.as_u16(), "");
        }
        if e.is_timeout() || e.is_connect() || e.is_request() {
            Self::transient(e.to_string())
        } else if e.is_decode() {
            Self::fatal(format!("undecodable body: {e}"))
        } else {
            Self::transient(e.to_string())
        }
    }
}

/// Failure while handing a record to the broker.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PublishError {
    /// The broker connection is gone; the publisher reconnects and retries once.
    #[error("broker connection lost: {0}")]
    Connection(String),

    #[error("broker rejected message: {0}")]
    Rejected(String),

    #[error("envelope serialization failed: {0}")]
    Serialize(String),
}

impl PublishError {
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

/// Crate-level error for the places where a failure does cross a boundary.
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("worker task failed to join: {0}")]
    WorkerJoin(String),
}

/// Kind tag stored in the run summary for each recorded failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transient,
    Fatal,
    Publish,
}

impl From<&UpstreamError> for FailureKind {
    fn from(e: &UpstreamError) -> Self {
        if e.is_transient() {
            FailureKind::Transient
        } else {
            FailureKind::Fatal
        }
    }
}
