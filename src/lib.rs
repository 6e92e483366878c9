//! jsync - incremental Jira to SQLite synchronization
//!
//! This crate provides the core functionality for the `jsync` CLI tool.
//!
//! # Architecture
//!
//! - [`sync`] - Change detection, per-issue sync and sprint refresh
//! - [`remote`] - Remote gateway trait and the Jira REST client
//! - [`storage`] - Local store trait and the SQLite implementation
//! - [`model`] - Data types (Stamp, Issue, Sprint, ...)
//! - [`config`] - Configuration management
//! - [`validate`] - Input normalization for CLI arguments
//! - [`cli`] - Command-line interface using clap
//! - [`error`] - Error types and handling

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod error;
pub mod model;
pub mod remote;
pub mod storage;
pub mod sync;
pub mod validate;

pub use error::{Error, Result};
