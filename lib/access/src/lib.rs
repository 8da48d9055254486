//! Application access management for groupgate.
//!
//! Ties the membership store to the authorization graph: allow-list changes
//! land in the store and are mirrored as graph grants, and reconciliation
//! repairs any drift between the two.

mod error;
mod service;

pub use error::AccessError;
pub use service::{AccessService, ReconcileReport, ReconcileSummary};
