//! SQLite storage layer for jsync.
//!
//! This module provides the persistence layer using SQLite with:
//! - WAL mode for concurrent reads
//! - One IMMEDIATE transaction per issue write
//! - Audit events for history
//! - A run ledger for sync runs
//!
//! # Submodules
//!
//! - [`events`] - Audit event storage
//! - [`schema`] - Database schema definitions
//! - [`sqlite`] - Main SQLite storage implementation
//! - [`store`] - The [`LocalStore`] interface the sync engine writes through

pub mod events;
pub mod schema;
pub mod sqlite;
pub mod store;

pub use sqlite::{MutationContext, RunRecord, SqliteStore, StoreCounts};
pub use store::LocalStore;
