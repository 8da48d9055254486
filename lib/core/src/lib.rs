//! Core types shared by the groupgate crates.
//!
//! Provides the rootcause-based `Result` alias and the strongly-typed
//! identifiers used across the membership store and the authorization layer.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{GroupId, ParseIdError};
