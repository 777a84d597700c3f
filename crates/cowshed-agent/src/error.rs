//! Error taxonomy for agent operations.
//!
//! Four kinds, each carrying a machine-readable code and a human message.
//! Create conflicts carry the existing record so the caller can treat the
//! operation as idempotent.

use thiserror::Error;

use crate::model::{CloneRecord, VolumeRecord};

/// Result type alias for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

/// Machine-readable error codes, mirrored into API responses by the
/// transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Request failed validation.
    Invalid,
    /// Tenant, volume, snapshot, or clone does not exist.
    NotFound,
    /// The target resource already exists.
    AlreadyExists,
    /// Tool failure, I/O failure, or metadata corruption.
    Internal,
}

impl ErrorCode {
    /// Wire representation of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Invalid => "INVALID",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::AlreadyExists => "ALREADY_EXISTS",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The existing record attached to a create conflict.
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictRecord {
    /// An existing volume.
    Volume(Box<VolumeRecord>),
    /// An existing clone.
    Clone(Box<CloneRecord>),
}

/// Error variants for agent operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The request failed validation; nothing was changed.
    #[error("{0}")]
    Invalid(String),

    /// The addressed resource does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The target resource already exists. For create operations the
    /// existing record is attached and authoritative.
    #[error("{message}")]
    AlreadyExists {
        /// Human-readable conflict description.
        message: String,
        /// The existing record, when the operation can produce one.
        record: Option<ConflictRecord>,
    },

    /// A tool, I/O, or metadata failure. The underlying error is kept as
    /// the source, not swallowed.
    #[error("{message}")]
    Internal {
        /// What the engine was doing.
        message: String,
        /// The wrapped cause, when one exists.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl AgentError {
    /// The machine-readable code of this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            AgentError::Invalid(_) => ErrorCode::Invalid,
            AgentError::NotFound(_) => ErrorCode::NotFound,
            AgentError::AlreadyExists { .. } => ErrorCode::AlreadyExists,
            AgentError::Internal { .. } => ErrorCode::Internal,
        }
    }

    /// The existing record of a create conflict, if any.
    pub fn conflict_record(&self) -> Option<&ConflictRecord> {
        match self {
            AgentError::AlreadyExists { record, .. } => record.as_ref(),
            _ => None,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        AgentError::Invalid(message.into())
    }

    pub(crate) fn not_found(message: impl Into<String>) -> Self {
        AgentError::NotFound(message.into())
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        AgentError::Internal {
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn internal_with(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AgentError::Internal {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}
