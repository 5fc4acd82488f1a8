//! convoq-store - SQLite storage layer
//!
//! Implements the `Store` trait on SQLite with the sqlite-vec extension for
//! vector search. Tenancy is enforced in the schema: chunks and vectors
//! carry their workspace id, and the vector table partitions on it so a
//! nearest-neighbor query can never cross workspaces.

mod schema;
mod sqlite;

pub use sqlite::SqliteStore;
