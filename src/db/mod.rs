//! SQLite-backed graph store.
//!
//! Owns the three persisted record kinds (entities, relations, observations)
//! and enforces their referential and cascading-delete rules.

mod connection;
mod queries;
mod snapshot;

pub use connection::Database;
