//! Error types for the access crate.
//!
//! Each variant names the layer a failure came from; the underlying
//! [`StoreError`](groupgate_store::StoreError) or
//! [`AuthzError`](groupgate_authz::AuthzError) report is kept as its child.

use std::fmt;

/// Access service errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// The membership store failed.
    Store,
    /// The authorization graph failed.
    Authz,
    /// Reconciling one application failed.
    Reconcile {
        /// Application being reconciled.
        application_id: String,
    },
}

impl fmt::Display for AccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store => write!(f, "membership store operation failed"),
            Self::Authz => write!(f, "authorization graph operation failed"),
            Self::Reconcile { application_id } => {
                write!(f, "failed to reconcile application '{}'", application_id)
            }
        }
    }
}

impl std::error::Error for AccessError {}
