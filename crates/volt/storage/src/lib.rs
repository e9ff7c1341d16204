//! Volt Storage - the record store contract the economy core runs against.
//!
//! The authenticated record store itself (CRUD, validation, auth tokens,
//! schema migrations) is an external collaborator. This crate pins down the
//! narrow slice the core consumes:
//! - windowed listing and by-id reads per collection
//! - revision-conditioned saves that report stale writes as `Conflict`
//! - coupled two-record writes for the claim and approval atomic units
//!
//! Design stance:
//! - a transactional backend remains the source of truth in production
//! - the in-memory adapter is the deterministic reference implementation
//!   of the revision discipline, used by tests and the dev daemon

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

mod error;
pub mod memory;
mod traits;

pub use error::{StorageError, StorageResult};
pub use traits::{
    BazaarStore, CoupledWriteStore, HistoryStore, MissionStore, QueryWindow, UserStore, VoltStore,
};
