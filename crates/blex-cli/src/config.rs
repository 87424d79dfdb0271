//! blex CLI configuration
//!
//! Settings come from an optional TOML file; command line flags override
//! whatever the file sets. Missing keys fall back to defaults, so an empty
//! file is a valid configuration.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use blex_gatt::config::LogConfig;
use blex_gatt::{GattConfig, Profile};

use crate::cli::Cli;
use crate::error::{CliError, Result};

// ----------------------------------------------------------------------------
// Application Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub gatt: GattSection,
    pub demo: DemoConfig,
}

/// GATT settings in file-friendly units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GattSection {
    pub device_name: String,
    /// Per-operation timeout; unset keeps each profile's own default
    pub operation_timeout_ms: Option<u64>,
    pub prepared_write_limit: usize,
    pub log: LogConfig,
}

/// Loopback demo behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Pings sent by `blex ping` without `--count`
    pub ping_count: u32,
    /// Pause between pings
    pub ping_interval_ms: u64,
    /// How long to wait for a reply or notification
    pub reply_timeout_ms: u64,
}

impl Default for GattSection {
    fn default() -> Self {
        let gatt = GattConfig::default();
        Self {
            device_name: gatt.device_name,
            operation_timeout_ms: None,
            prepared_write_limit: gatt.prepared_write_limit,
            log: gatt.log,
        }
    }
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            ping_count: 1,
            ping_interval_ms: 500,
            reply_timeout_ms: 5_000,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = Self::from_toml_str(&text)?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply command line flags on top of the loaded values.
    pub fn apply_overrides(&mut self, cli: &Cli) {
        if let Some(name) = &cli.device_name {
            self.gatt.device_name = name.clone();
        }
        if let Some(timeout_ms) = cli.timeout_ms {
            self.gatt.operation_timeout_ms = Some(timeout_ms);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.demo.reply_timeout_ms == 0 {
            return Err(CliError::Config(
                "demo.reply_timeout_ms must be greater than 0".to_string(),
            ));
        }
        self.gatt_config(Profile::MagicPing).validate()?;
        Ok(())
    }

    /// Session configuration for `profile` with the file and flag overrides.
    pub fn gatt_config(&self, profile: Profile) -> GattConfig {
        let mut config = GattConfig::for_profile(profile)
            .with_device_name(self.gatt.device_name.clone())
            .with_log(self.gatt.log);
        config.prepared_write_limit = self.gatt.prepared_write_limit;
        config.prepared_write_initial_capacity = config
            .prepared_write_initial_capacity
            .min(self.gatt.prepared_write_limit);
        match self.gatt.operation_timeout_ms {
            Some(timeout_ms) => config.with_operation_timeout(Duration::from_millis(timeout_ms)),
            None => config,
        }
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.demo.reply_timeout_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.demo.ping_interval_ms)
    }

    /// Sample configuration file content.
    pub fn example_config() -> String {
        r#"# blex configuration

[gatt]
device_name = "blex"
# operation_timeout_ms = 10000
prepared_write_limit = 65536

[gatt.log]
operation_log = true
data_log = false
scan_log = false

[demo]
ping_count = 1
ping_interval_ms = 500
reply_timeout_ms = 5000
"#
        .to_string()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.gatt.device_name, "blex");
        assert_eq!(config.demo.ping_count, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_example_config_parses() {
        let config = AppConfig::from_toml_str(&AppConfig::example_config()).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_partial_file() {
        let config = AppConfig::from_toml_str(
            r#"
            [gatt]
            operation_timeout_ms = 2500

            [gatt.log]
            scan_log = true
            "#,
        )
        .unwrap();
        assert_eq!(config.gatt.device_name, "blex");
        assert!(config.gatt.log.scan_log);
        assert!(config.gatt.log.operation_log);
        assert_eq!(
            config.gatt_config(Profile::MagicPing).operation_timeout,
            Duration::from_millis(2500)
        );
    }

    #[test]
    fn test_profile_timeout_kept_without_override() {
        let config = AppConfig::default();
        assert_eq!(
            config.gatt_config(Profile::MagicPing).operation_timeout,
            Duration::from_secs(15)
        );
        assert_eq!(
            config.gatt_config(Profile::BatteryService).operation_timeout,
            Duration::from_secs(10)
        );
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(AppConfig::from_toml_str("[demo]\nreply_timeout_ms = 0\n").is_err());
        assert!(AppConfig::from_toml_str("[gatt]\noperation_timeout_ms = 0\n").is_err());
        assert!(AppConfig::from_toml_str("[gatt]\ndevice_name = 7\n").is_err());
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut config = AppConfig::from_toml_str("[gatt]\ndevice_name = \"file\"\n").unwrap();
        let cli = Cli::parse_from(["blex", "--device-name", "flag", "--timeout-ms", "750", "battery"]);
        config.apply_overrides(&cli);
        assert_eq!(config.gatt.device_name, "flag");
        let gatt = config.gatt_config(Profile::BatteryService);
        assert_eq!(gatt.device_name, "flag");
        assert_eq!(gatt.operation_timeout, Duration::from_millis(750));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let error = AppConfig::load_from_file("/nonexistent/blex.toml").unwrap_err();
        assert!(matches!(error, CliError::Config(_)));
    }
}
