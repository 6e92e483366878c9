//! Data models for jsync.
//!
//! This module contains the domain types shared by the remote gateway,
//! the local store and the sync engine:
//! - Stamp / Issue and their parts
//! - Sprint

pub mod issue;
pub mod sprint;

pub use issue::{
    Account, ChangelogEntry, FixVersion, Issue, Label, ParentRef, Product, Progress, Stamp,
    STATUS_FIELD,
};
pub use sprint::{Sprint, SprintState};
