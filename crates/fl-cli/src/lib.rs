//! Fleet work-time tracker CLI library.
//!
//! This crate provides the CLI interface for recording and reporting
//! driver work time.

mod cli;
pub mod commands;
mod config;

pub use cli::{Cli, Commands, EventArgs, ReportArgs};
pub use config::{Config, SyncSettings};
