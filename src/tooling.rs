//! Tooling
//!
//! Command-line front end for running and inspecting nodes.

pub mod cli;

pub use cli::{BucketCommands, Cli, CliContext, Commands, ItemCommands, ServeArgs};
