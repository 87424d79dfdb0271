//! Command-line interface definitions and parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Device name placed in the demo server's advertisement
    #[arg(long, global = true)]
    pub device_name: Option<String>,

    /// Per-operation timeout in milliseconds
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Decode a raw advertising payload given as hex
    Decode {
        /// Payload bytes, e.g. 0201060302 0f18
        hex: String,
    },
    /// Ping a MagicPing server over the loopback link
    Ping {
        /// Number of pings to send
        #[arg(short = 'n', long)]
        count: Option<u32>,
        /// ATT MTU to request after connecting
        #[arg(short, long)]
        mtu: Option<usize>,
    },
    /// Read both battery service instances over the loopback link
    Battery,
    /// Read the current time and wait for one change notification
    Time,
}
