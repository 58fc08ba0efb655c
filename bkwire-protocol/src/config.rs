//! Codec configuration.
//!
//! `WireConfig` is usually embedded in a larger config file; it can also be
//! read on its own with [`WireConfig::from_file`]. Environment variables are
//! applied on top with [`WireConfig::apply_env_overrides`].

use crate::frame::{Decoder, Limits};
use crate::{
    DEFAULT_MAX_COMMAND_LEN, DEFAULT_MAX_PAYLOAD_LEN, DEFAULT_READ_BUFFER_SIZE,
    DEFAULT_WRITE_BUFFER_SIZE, MAGIC_VERSION,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Minimum buffer size (1 KiB).
pub const MIN_BUFFER_SIZE: usize = 1024;

/// Maximum buffer size (1 MiB).
pub const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Tuning for a single codec instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WireConfig {
    /// Protocol version written by peers and required on read.
    pub protocol_version: u16,
    /// Buffered reader capacity in bytes.
    pub read_buffer_size: usize,
    /// Buffered writer capacity in bytes.
    pub write_buffer_size: usize,
    /// Largest accepted command length in bytes.
    pub max_command_len: u32,
    /// Largest accepted payload length in bytes.
    pub max_payload_len: u32,
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            protocol_version: MAGIC_VERSION,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            write_buffer_size: DEFAULT_WRITE_BUFFER_SIZE,
            max_command_len: DEFAULT_MAX_COMMAND_LEN,
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
        }
    }
}

impl WireConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: WireConfig = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(version) = std::env::var("BKWIRE_PROTOCOL_VERSION") {
            if let Some(v) = parse_version(&version) {
                self.protocol_version = v;
            }
        }

        if let Ok(size) = std::env::var("BKWIRE_READ_BUFFER_SIZE") {
            if let Ok(n) = size.parse() {
                self.read_buffer_size = n;
            }
        }

        if let Ok(size) = std::env::var("BKWIRE_WRITE_BUFFER_SIZE") {
            if let Ok(n) = size.parse() {
                self.write_buffer_size = n;
            }
        }

        if let Ok(max) = std::env::var("BKWIRE_MAX_COMMAND_LEN") {
            if let Ok(n) = max.parse() {
                self.max_command_len = n;
            }
        }

        if let Ok(max) = std::env::var("BKWIRE_MAX_PAYLOAD_LEN") {
            if let Ok(n) = max.parse() {
                self.max_payload_len = n;
            }
        }
    }

    pub fn with_protocol_version(mut self, version: u16) -> Self {
        self.protocol_version = version;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE);
        self
    }

    pub fn with_write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size.clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE);
        self
    }

    pub fn with_max_command_len(mut self, max: u32) -> Self {
        self.max_command_len = max;
        self
    }

    pub fn with_max_payload_len(mut self, max: u32) -> Self {
        self.max_payload_len = max;
        self
    }

    /// Validates configuration values that did not go through the builder.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, size) in [
            ("read_buffer_size", self.read_buffer_size),
            ("write_buffer_size", self.write_buffer_size),
        ] {
            if !(MIN_BUFFER_SIZE..=MAX_BUFFER_SIZE).contains(&size) {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be between {} and {} bytes, got {}",
                    name, MIN_BUFFER_SIZE, MAX_BUFFER_SIZE, size
                )));
            }
        }

        if self.max_command_len == 0 {
            return Err(ConfigError::ValidationError(
                "max_command_len must be non-zero".to_string(),
            ));
        }
        if self.max_payload_len == 0 {
            return Err(ConfigError::ValidationError(
                "max_payload_len must be non-zero".to_string(),
            ));
        }

        Ok(())
    }

    pub fn limits(&self) -> Limits {
        Limits {
            max_command_len: self.max_command_len,
            max_payload_len: self.max_payload_len,
        }
    }

    /// Returns an incremental decoder using this configuration's version and limits.
    pub fn decoder(&self) -> Decoder {
        Decoder::with_limits(self.protocol_version, self.limits())
    }
}

/// Parses a protocol version given in decimal or `0x`-prefixed hex.
fn parse_version(s: &str) -> Option<u16> {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
