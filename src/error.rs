//! Error types for the analysis orchestrator.
//!
//! Transient capability errors are retried by the stage runner and never
//! escape it directly; everything else ends up either as a stage error
//! descriptor on the job or as a [`ServiceError`] returned to the caller.

use crate::models::{JobId, JobStatus, StageName};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Failure returned by a capability gateway call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CapabilityError {
    /// Transport or authentication failure reaching the capability.
    #[error("capability unavailable: {0}")]
    Unavailable(String),

    /// The call did not complete in time.
    #[error("capability timed out after {0:?}")]
    Timeout(Duration),

    /// The response did not conform to the requested output schema.
    #[error("malformed capability response: {0}")]
    MalformedResponse(String),
}

impl CapabilityError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CapabilityError::Unavailable(_) | CapabilityError::Timeout(_)
        )
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CapabilityError::Unavailable(_) => ErrorKind::CapabilityUnavailable,
            CapabilityError::Timeout(_) => ErrorKind::CapabilityTimeout,
            CapabilityError::MalformedResponse(_) => ErrorKind::CapabilityMalformedResponse,
        }
    }
}

/// Serializable classification of every failure a job can record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    CapabilityUnavailable,
    CapabilityTimeout,
    CapabilityMalformedResponse,
    DocumentUnavailable,
    StageFailure,
    AggregationError,
    JobTimeout,
}

impl ErrorKind {
    /// Timeouts of either flavour.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ErrorKind::CapabilityTimeout | ErrorKind::JobTimeout)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Validation => "validation error",
            ErrorKind::CapabilityUnavailable => "capability unavailable",
            ErrorKind::CapabilityTimeout => "capability timeout",
            ErrorKind::CapabilityMalformedResponse => "malformed capability response",
            ErrorKind::DocumentUnavailable => "document unavailable",
            ErrorKind::StageFailure => "stage failure",
            ErrorKind::AggregationError => "aggregation error",
            ErrorKind::JobTimeout => "job timeout",
        };
        f.write_str(name)
    }
}

/// Error descriptor recorded on a failed stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageError {
    pub kind: ErrorKind,
    pub message: String,
}

impl StageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn job_timeout() -> Self {
        Self::new(ErrorKind::JobTimeout, "job deadline expired while the stage was in flight")
    }
}

impl From<&CapabilityError> for StageError {
    fn from(err: &CapabilityError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// A submission rejected before any job was created.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("at least one document is required")]
    NoDocuments,

    #[error("too many documents: {count} (limit {limit})")]
    TooManyDocuments { count: usize, limit: usize },

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("document is too large: {path} ({size} bytes, limit {limit})")]
    DocumentTooLarge { path: String, size: u64, limit: u64 },

    #[error("company name must not be blank when provided")]
    BlankCompanyName,
}

/// Failure reading a document that passed validation.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} is not valid UTF-8 text")]
    NotText(String),
}

/// The aggregator found no viable basis for a report.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AggregationError {
    #[error("every analysis stage failed; nothing to synthesize")]
    NoViableSections,

    #[error("synthesis failed: {0}")]
    SynthesisFailed(StageError),
}

impl AggregationError {
    pub fn to_stage_error(&self) -> StageError {
        match self {
            AggregationError::NoViableSections => {
                StageError::new(ErrorKind::AggregationError, self.to_string())
            }
            AggregationError::SynthesisFailed(inner) => inner.clone(),
        }
    }
}

/// Rejected write against the job store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("job {0} does not exist")]
    UnknownJob(JobId),

    #[error("illegal transition {from} -> {to}")]
    IllegalTransition { from: JobStatus, to: JobStatus },

    #[error("job {0} is finalized and can no longer change")]
    Finalized(JobId),

    #[error("stage {0} already reached a terminal state")]
    StageAlreadyTerminal(StageName),

    #[error("stage result for {0} is not terminal")]
    StageNotTerminal(StageName),

    #[error("job {id} is still running (status {status})")]
    StillRunning { id: JobId, status: JobStatus },
}

/// Errors returned by the public service operations.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("invalid submission: {0}")]
    Validation(#[from] ValidationError),

    #[error("job {0} not found")]
    JobNotFound(JobId),

    #[error("report for job {id} is not ready (status {status})")]
    ReportNotReady { id: JobId, status: JobStatus },

    #[error("job {id} is still running (status {status})")]
    JobStillRunning { id: JobId, status: JobStatus },

    #[error("job {0} ended without a report")]
    NoReport(JobId),
}
