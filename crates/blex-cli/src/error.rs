//! Error handling for the blex CLI

use thiserror::Error;

use blex_core::{AdvertisementError, BlexError, GattError};

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Toolkit error: {0}")]
    Blex(#[from] BlexError),

    #[error("GATT error: {0}")]
    Gatt(#[from] GattError),

    #[error("Advertisement error: {0}")]
    Advertisement(#[from] AdvertisementError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Demo failed: {0}")]
    Demo(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("Hex decoding error: {0}")]
    HexDecoding(#[from] hex::FromHexError),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        CliError::Config(format!("{:#}", err))
    }
}
