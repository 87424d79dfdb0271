//! blex CLI library
//!
//! Argument parsing, configuration loading and the command handlers behind
//! the `blex` binary.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;

pub use cli::{Cli, Commands};
pub use commands::{decode_report, run_battery, run_ping, run_time, CommandDispatcher};
pub use config::AppConfig;
pub use error::{CliError, Result};
