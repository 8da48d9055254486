//! Authorization graph access for groupgate.
//!
//! Client applications are gated by group membership stored as tuples in an
//! OpenFGA-compatible service. This crate provides the tuple encoding, the
//! [`AuthzClient`] capability with HTTP and in-memory implementations, the
//! bounded [`WorkerPool`] used to fan out checks, and the [`Authorizer`]
//! facade the rest of the system calls.

mod authorizer;
mod client;
mod config;
mod error;
mod http;
mod memory;
mod model;
mod pool;
mod sweep;
pub mod tuple;

pub use authorizer::Authorizer;
pub use client::{AuthzClient, ReadTuplesFilter, ReadTuplesPage};
pub use config::AuthzConfig;
pub use error::{AuthzError, PoolError};
pub use http::HttpAuthzClient;
pub use memory::MemoryAuthzClient;
pub use model::{
    AuthorizationModel, ModelVersion, RelationMetadata, RelationReference, TypeDefinition,
    TypeMetadata,
};
pub use pool::{PoolConfig, TaskHandle, WorkerPool};
pub use sweep::{Sweep, SweepState, SweepSummary};
pub use tuple::{StoredTuple, Tuple, TupleWithContext};
