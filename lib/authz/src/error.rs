//! Error types for the authz crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `AuthzError`: failures talking to the authorization graph
//! - `PoolError`: failures of the worker pool itself (never of a task)

use std::fmt;

/// Authorization errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthzError {
    /// Failed to build a client for the authorization service.
    ConnectionFailed {
        /// Error details.
        details: String,
    },
    /// A request to the authorization service failed.
    RequestFailed {
        /// Error details.
        details: String,
    },
    /// The service answered with a body we could not interpret.
    InvalidResponse {
        /// Error details.
        details: String,
    },
    /// The remote authorization model does not match the embedded one.
    InvalidAuthModel {
        /// Version of the embedded model that was expected.
        expected_version: String,
        /// What differs.
        details: String,
    },
    /// Invalid tuple, filter or model input.
    InvalidInput {
        /// Error details.
        details: String,
    },
}

impl fmt::Display for AuthzError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed { details } => {
                write!(f, "failed to connect to authorization service: {}", details)
            }
            Self::RequestFailed { details } => {
                write!(f, "authorization request failed: {}", details)
            }
            Self::InvalidResponse { details } => {
                write!(f, "invalid authorization service response: {}", details)
            }
            Self::InvalidAuthModel {
                expected_version,
                details,
            } => {
                write!(
                    f,
                    "authorization model does not match {}: {}",
                    expected_version, details
                )
            }
            Self::InvalidInput { details } => {
                write!(f, "invalid authorization input: {}", details)
            }
        }
    }
}

impl std::error::Error for AuthzError {}

/// Worker pool errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The pool configuration cannot run any work.
    InvalidConfig {
        /// Error details.
        details: String,
    },
    /// The pool has been stopped and accepts no more tasks.
    Stopped,
    /// The task panicked or was aborted before producing a result.
    TaskAborted,
    /// Workers were still busy when the drain timeout elapsed and were aborted.
    DrainTimedOut {
        /// Workers that had not exited.
        remaining_workers: usize,
    },
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig { details } => write!(f, "invalid worker pool config: {}", details),
            Self::Stopped => write!(f, "worker pool is stopped"),
            Self::TaskAborted => write!(f, "task aborted before completion"),
            Self::DrainTimedOut { remaining_workers } => {
                write!(
                    f,
                    "worker pool drain timed out with {} workers still running",
                    remaining_workers
                )
            }
        }
    }
}

impl std::error::Error for PoolError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_auth_model_display() {
        let err = AuthzError::InvalidAuthModel {
            expected_version: "v0".to_string(),
            details: "type 'client' is missing relation 'can_access'".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "authorization model does not match v0: type 'client' is missing relation 'can_access'"
        );
    }

    #[test]
    fn pool_error_display() {
        let err = PoolError::DrainTimedOut {
            remaining_workers: 3,
        };
        assert!(err.to_string().contains("3 workers"));
        assert_eq!(PoolError::Stopped.to_string(), "worker pool is stopped");
    }
}
