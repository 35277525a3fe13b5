//! Error types for the replication engine
//!
//! Every fallible operation in the crate returns [`Result`]. The variants map
//! onto the categories the API layer distinguishes (not found, conflict,
//! precondition, ...), see [`ErrorCode`].

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReplicationError>;

#[derive(Debug, Error)]
pub enum ReplicationError {
    /// The operation is refused because of the current state
    #[error("{0}")]
    Precondition(String),
    /// The referenced policy, registry, execution or task doesn't exist
    #[error("{0}")]
    NotFound(String),
    /// Uniqueness violation
    #[error("{0}")]
    Conflict(String),
    /// No adapter factory registered for the registry type
    #[error("adapter factory for registry type {0} not found")]
    AdapterNotFound(String),
    #[error("invalid pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    /// Network and other I/O failures talking to a registry
    #[error("I/O error: {0}")]
    TransientIo(String),
    /// Returned by transfers that observed a stop request
    #[error("the job is stopped")]
    JobStopped,
    #[error("{0}")]
    Timeout(String),
    #[error("validation error: {0}")]
    Validation(String),
    /// The adapter or transfer doesn't implement the requested capability
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse classification of [`ReplicationError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Precondition,
    NotFound,
    Conflict,
    BadRequest,
    Unavailable,
    Timeout,
    Stopped,
    Internal,
}

impl ErrorCode {
    /// HTTP status the API layer reports for this class of error
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::Precondition => 412,
            ErrorCode::NotFound => 404,
            ErrorCode::Conflict => 409,
            ErrorCode::BadRequest => 400,
            ErrorCode::Unavailable => 502,
            ErrorCode::Timeout => 504,
            ErrorCode::Stopped | ErrorCode::Internal => 500,
        }
    }
}

impl ReplicationError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ReplicationError::Precondition(_) => ErrorCode::Precondition,
            ReplicationError::NotFound(_) | ReplicationError::AdapterNotFound(_) => {
                ErrorCode::NotFound
            }
            ReplicationError::Conflict(_) => ErrorCode::Conflict,
            ReplicationError::InvalidPattern { .. }
            | ReplicationError::Validation(_)
            | ReplicationError::Unsupported(_) => ErrorCode::BadRequest,
            ReplicationError::TransientIo(_) => ErrorCode::Unavailable,
            ReplicationError::Timeout(_) => ErrorCode::Timeout,
            ReplicationError::JobStopped => ErrorCode::Stopped,
            ReplicationError::Serialization(_) | ReplicationError::Internal(_) => {
                ErrorCode::Internal
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.code() == ErrorCode::NotFound
    }

    pub fn is_job_stopped(&self) -> bool {
        matches!(self, ReplicationError::JobStopped)
    }

    pub fn invalid_pattern(pattern: &str, reason: impl Into<String>) -> Self {
        ReplicationError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.into(),
        }
    }

    /// Lock poisoning only happens after a panic while holding the lock
    pub(crate) fn poisoned<E: std::fmt::Display>(err: E) -> Self {
        ReplicationError::Internal(format!("lock poisoned: {}", err))
    }
}

impl From<reqwest::Error> for ReplicationError {
    fn from(err: reqwest::Error) -> Self {
        ReplicationError::TransientIo(err.to_string())
    }
}

impl From<std::io::Error> for ReplicationError {
    fn from(err: std::io::Error) -> Self {
        ReplicationError::TransientIo(err.to_string())
    }
}

impl From<url::ParseError> for ReplicationError {
    fn from(err: url::ParseError) -> Self {
        ReplicationError::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            ReplicationError::Precondition("stop the tasks first".into()).code(),
            ErrorCode::Precondition
        );
        assert_eq!(
            ReplicationError::AdapterNotFound("harbor".into()).code().http_status(),
            404
        );
        assert_eq!(
            ReplicationError::Conflict("dup".into()).code().http_status(),
            409
        );
        assert!(ReplicationError::JobStopped.is_job_stopped());
        assert!(!ReplicationError::TransientIo("reset".into()).is_job_stopped());
    }

    #[test]
    fn test_messages_are_user_readable() {
        let err = ReplicationError::Precondition(
            "the execution 1 has tasks that aren't in final status, stop the tasks first".into(),
        );
        assert_eq!(
            err.to_string(),
            "the execution 1 has tasks that aren't in final status, stop the tasks first"
        );
        let err = ReplicationError::invalid_pattern("[a-", "unclosed character class");
        assert!(err.to_string().contains("unclosed character class"));
    }
}
