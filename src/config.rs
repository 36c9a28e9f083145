//! # Configuration Management
//!
//! Centralized configuration for the codec library.
//!
//! This module provides structured configuration for streams opened on a
//! connection: wire revision, byte order, buffer strategy, pooling, and the
//! unresolved-indirection policy.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Programmatic overrides via `default_with_overrides()`

use crate::buffer::WriteStrategy;
use crate::error::{CdrError, Result};
use crate::protocol::indirection::IndirectionPolicy;
use crate::protocol::version::GiopVersion;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Max allowed message size (16 MB)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Default buffer pool size
pub const DEFAULT_POOL_SIZE: usize = 16;

/// Main codec configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct CodecConfig {
    /// Wire-format revision for the connection
    #[serde(default)]
    pub version: GiopVersion,

    /// Whether this side writes little-endian messages
    #[serde(default)]
    pub little_endian: bool,

    /// Buffer handling
    #[serde(default)]
    pub buffers: BufferConfig,

    /// What to do on an unresolved indirection
    #[serde(default)]
    pub indirection_policy: IndirectionPolicy,
}

impl CodecConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| CdrError::Config(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| CdrError::Config(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| CdrError::Config(format!("Failed to parse TOML: {e}")))
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        self.buffers.validate()
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(CdrError::Config(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Buffer handling configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BufferConfig {
    /// Overflow strategy for outgoing buffers
    pub write_strategy: WriteStrategy,

    /// Fragment size at which the streaming strategy flushes
    pub flush_threshold: usize,

    /// Number of pre-allocated pooled buffers
    pub pool_size: usize,

    /// Maximum allowed message size in bytes
    pub max_message_size: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            write_strategy: WriteStrategy::Grow,
            flush_threshold: 4096,
            pool_size: DEFAULT_POOL_SIZE,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

impl BufferConfig {
    /// Validate buffer configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_message_size == 0 {
            errors.push("Max message size cannot be 0".to_string());
        } else if self.max_message_size > 100 * 1024 * 1024 {
            errors.push(format!(
                "Max message size too large: {} bytes (maximum recommended: 100 MB)",
                self.max_message_size
            ));
        }

        if self.write_strategy == WriteStrategy::Stream {
            if self.flush_threshold < 64 {
                errors.push("Flush threshold too small (minimum: 64 bytes)".to_string());
            } else if self.flush_threshold > self.max_message_size {
                errors.push(
                    "Flush threshold cannot be larger than max message size".to_string(),
                );
            }
        }

        if self.pool_size > 10_000 {
            errors.push(format!(
                "Pool size very high: {} (ensure memory can support this)",
                self.pool_size
            ));
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(CodecConfig::default().validate().is_empty());
    }

    #[test]
    fn parses_toml() {
        let config = CodecConfig::from_toml(
            r#"
            version = "1.1"
            little_endian = true
            indirection_policy = "deferred"

            [buffers]
            write_strategy = "stream"
            flush_threshold = 1024
            pool_size = 4
            max_message_size = 65536
            "#,
        )
        .unwrap();
        assert_eq!(config.version, GiopVersion::V1_1);
        assert!(config.little_endian);
        assert_eq!(config.indirection_policy, IndirectionPolicy::Deferred);
        assert_eq!(config.buffers.write_strategy, WriteStrategy::Stream);
        assert_eq!(config.buffers.pool_size, 4);
    }

    #[test]
    fn validation_flags_bad_thresholds() {
        let config = CodecConfig::default_with_overrides(|c| {
            c.buffers.write_strategy = WriteStrategy::Stream;
            c.buffers.flush_threshold = 8;
        });
        assert!(!config.validate().is_empty());
        assert!(config.validate_strict().is_err());
    }
}
