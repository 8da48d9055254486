//! Relational storage for groupgate.
//!
//! Records which users belong to which groups and which client applications
//! each group's members may use. The authorization graph mirrors the
//! allow-list; this store is the source of truth it is reconciled against.

mod error;
mod memory;
mod postgres;
mod store;
mod types;

pub use error::StoreError;
pub use memory::MemoryMembershipStore;
pub use postgres::{MIGRATOR, PgMembershipStore};
pub use store::MembershipStore;
pub use types::{AllowedApp, DEFAULT_ROLE, Group, GroupMember, GroupType, GroupUpdate, NewGroup};
