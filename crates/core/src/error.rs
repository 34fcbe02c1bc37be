//! Unified error types for the segmentation engine.
//!
//! Error codes:
//! - DEF_001: Segment or cohort definition not found
//! - RULE_001: Criteria contain a rule the evaluator cannot execute
//! - DATA_001: Event store or persistence I/O failure
//! - INV_001: Internal invariant violated
//! - CONFLICT_001: A concurrent write superseded the data a result was computed from
//! - VALID_001-002: Validation errors

use thiserror::Error;
use uuid::Uuid;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Kind of definition an operation referenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionKind {
    Segment,
    Cohort,
}

impl std::fmt::Display for DefinitionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Segment => f.write_str("segment"),
            Self::Cohort => f.write_str("cohort"),
        }
    }
}

/// Which external collaborator failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    EventStore,
    Persistence,
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EventStore => f.write_str("event store"),
            Self::Persistence => f.write_str("persistence"),
        }
    }
}

/// Unified error type for the segmentation engine.
#[derive(Debug, Error)]
pub enum Error {
    /// An operation referenced a segment or cohort id that does not exist.
    #[error("{kind} {id} not found")]
    DefinitionNotFound { kind: DefinitionKind, id: Uuid },

    /// The rule evaluator met a rule it cannot execute.
    #[error("cannot classify: {0}")]
    Classification(String),

    /// Event store or persistence I/O failure. Safe to retry.
    #[error("{source_kind} failure: {message}")]
    DataSource {
        source_kind: DataSource,
        message: String,
    },

    /// A defensive check failed. Indicates a logic defect.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// The snapshot a computation read was replaced before it committed.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn segment_not_found(id: Uuid) -> Self {
        Self::DefinitionNotFound {
            kind: DefinitionKind::Segment,
            id,
        }
    }

    pub fn cohort_not_found(id: Uuid) -> Self {
        Self::DefinitionNotFound {
            kind: DefinitionKind::Cohort,
            id,
        }
    }

    pub fn classification(msg: impl Into<String>) -> Self {
        Self::Classification(msg.into())
    }

    pub fn event_store(msg: impl Into<String>) -> Self {
        Self::DataSource {
            source_kind: DataSource::EventStore,
            message: msg.into(),
        }
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::DataSource {
            source_kind: DataSource::Persistence,
            message: msg.into(),
        }
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Get the stable error code string.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DefinitionNotFound { .. } => "DEF_001",
            Self::Classification(_) => "RULE_001",
            Self::DataSource { .. } => "DATA_001",
            Self::InvariantViolation(_) => "INV_001",
            Self::Conflict(_) => "CONFLICT_001",
            Self::Validation(_) => "VALID_001",
            Self::Serialization(_) => "VALID_002",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::DefinitionNotFound { .. } => 404,
            Self::Classification(_) => 422,
            Self::DataSource { .. } => 503,
            Self::InvariantViolation(_) => 500,
            Self::Conflict(_) => 409,
            Self::Validation(_) => 400,
            Self::Serialization(_) => 400,
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::DataSource { .. } | Self::Conflict(_))
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}
