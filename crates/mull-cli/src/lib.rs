//! # mull-cli
//!
//! Command-line interface for the Mull reasoning engine.
//!
//! ## Commands
//!
//! - `mull planners`: List the registered planners
//! - `mull config`: Show the effective configuration
//! - `mull check`: Validate the configuration
//! - `mull run`: Run an agent against a scripted model, printing events
//! - `mull version`: Show version and build info

pub mod commands;

pub use commands::Cli;
