//! CLI module
//!
//! Command-line interface for inspecting a registry on disk.
//!
//! # Commands
//!
//! - `dump` - Print the persisted records of a store
//! - `tail` - Replay (and follow) a change log
//! - `gc` - Run one garbage collection pass

mod commands;
mod runner;

pub use commands::{Cli, Commands, OutputFormat};
pub use runner::Runner;
