//! GATT layer configuration

use std::time::Duration;

use crate::profile::Profile;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Default deadline for a single GATT operation.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Initial capacity of a prepared-write accumulation buffer.
pub const DEFAULT_PREPARED_WRITE_CAPACITY: usize = 1024;

/// Upper bound for a single prepared-write accumulation buffer.
pub const DEFAULT_PREPARED_WRITE_LIMIT: usize = 64 * 1024;

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Per-category logging switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log operation start, completion and elapsed time
    pub operation_log: bool,
    /// Log payload bytes as hex at trace level
    pub data_log: bool,
    /// Log advertisement payloads seen while scanning
    pub scan_log: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            operation_log: true,
            data_log: false,
            scan_log: false,
        }
    }
}

/// Configuration shared by the coordinator and the sessions
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct GattConfig {
    /// Maximum time to wait for the completion event of one operation
    pub operation_timeout: Duration,
    /// Packet size used until an MTU exchange completes
    pub default_payload_size: usize,
    /// Initial prepared-write buffer capacity
    pub prepared_write_initial_capacity: usize,
    /// Prepared-write buffers never grow past this many bytes
    pub prepared_write_limit: usize,
    /// Name placed in the advertising payload of a peripheral
    pub device_name: String,
    pub log: LogConfig,
}

impl Default for GattConfig {
    fn default() -> Self {
        Self {
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            default_payload_size: blex_core::packets::DEFAULT_PACKET_SIZE,
            prepared_write_initial_capacity: DEFAULT_PREPARED_WRITE_CAPACITY,
            prepared_write_limit: DEFAULT_PREPARED_WRITE_LIMIT,
            device_name: "blex".to_string(),
            log: LogConfig::default(),
        }
    }
}

impl GattConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults adjusted for a profile's own timing requirements.
    pub fn for_profile(profile: Profile) -> Self {
        let config = Self::default();
        match profile.operation_timeout() {
            Some(timeout) => config.with_operation_timeout(timeout),
            None => config,
        }
    }

    /// Set the per-operation timeout
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Set the packet size used before MTU negotiation
    pub fn with_default_payload_size(mut self, size: usize) -> Self {
        self.default_payload_size = size;
        self
    }

    /// Set prepared-write buffer sizing
    pub fn with_prepared_write_buffer(mut self, initial_capacity: usize, limit: usize) -> Self {
        self.prepared_write_initial_capacity = initial_capacity;
        self.prepared_write_limit = limit;
        self
    }

    /// Set the advertised device name
    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }

    pub fn with_log(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }

    /// Check the values that would make sessions unusable.
    pub fn validate(&self) -> Result<(), blex_core::BlexError> {
        let invalid = |reason: &str| {
            Err(blex_core::BlexError::InvalidConfiguration {
                reason: reason.to_string(),
            })
        };
        if self.operation_timeout.is_zero() {
            return invalid("operation_timeout must be positive");
        }
        if self.default_payload_size == 0 {
            return invalid("default_payload_size must be positive");
        }
        if self.prepared_write_initial_capacity > self.prepared_write_limit {
            return invalid("prepared_write_initial_capacity exceeds prepared_write_limit");
        }
        Ok(())
    }
}
