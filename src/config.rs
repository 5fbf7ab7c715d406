//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! All timing constants and file paths of the bridge live here; every field
//! has a default matching the reference deployment, so an empty file (or no
//! file at all) yields a working configuration.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub send: SendConfig,
    #[serde(default)]
    pub joystick: JoystickConfig,
    #[serde(default)]
    pub files: FileConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Upper bound on a single byte read; a timeout is not an error.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

/// Link engine timing
#[derive(Debug, Deserialize, Clone)]
pub struct LinkConfig {
    /// Buffered partial frames older than this are flushed.
    #[serde(default = "default_packet_timeout_ms")]
    pub packet_timeout_ms: u64,

    /// Silence on the wire before the link is declared down.
    /// Two minutes, an operational choice to ride out deep fades.
    #[serde(default = "default_failsafe_timeout_ms")]
    pub failsafe_timeout_ms: u64,
}

/// Outbound RC channel frame scheduling
#[derive(Debug, Deserialize, Clone)]
pub struct SendConfig {
    /// Minimum spacing between RC frames (~100 Hz at 10 ms).
    #[serde(default = "default_send_period_ms")]
    pub period_ms: u64,

    /// Transmit even while the link is down (bench testing).
    #[serde(default)]
    pub ignore_telemetry: bool,
}

/// Joystick input configuration
#[derive(Debug, Deserialize, Clone)]
pub struct JoystickConfig {
    /// evdev node, e.g. "/dev/input/event0". Empty means auto-detect.
    #[serde(default)]
    pub device_path: String,
}

/// Shared file paths and the publish cadence
#[derive(Debug, Deserialize, Clone)]
pub struct FileConfig {
    #[serde(default = "default_telemetry_path")]
    pub telemetry_path: String,

    #[serde(default = "default_command_path")]
    pub command_path: String,

    #[serde(default = "default_publish_interval_ms")]
    pub publish_interval_ms: u64,
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyAMA0".to_string() }
fn default_baud_rate() -> u32 { 420_000 }
fn default_read_timeout_ms() -> u64 { 100 }

fn default_packet_timeout_ms() -> u64 { 100 }
fn default_failsafe_timeout_ms() -> u64 { 120_000 }

fn default_send_period_ms() -> u64 { 10 }

fn default_telemetry_path() -> String { "/tmp/crsf_telemetry.dat".to_string() }
fn default_command_path() -> String { "/tmp/crsf_command.txt".to_string() }
fn default_publish_interval_ms() -> u64 { 20 }

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            packet_timeout_ms: default_packet_timeout_ms(),
            failsafe_timeout_ms: default_failsafe_timeout_ms(),
        }
    }
}

impl Default for SendConfig {
    fn default() -> Self {
        Self {
            period_ms: default_send_period_ms(),
            ignore_telemetry: false,
        }
    }
}

impl Default for JoystickConfig {
    fn default() -> Self {
        Self { device_path: String::new() }
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            telemetry_path: default_telemetry_path(),
            command_path: default_command_path(),
            publish_interval_ms: default_publish_interval_ms(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            link: LinkConfig::default(),
            send: SendConfig::default(),
            joystick: JoystickConfig::default(),
            files: FileConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.serial.port.is_empty() {
            return Err(crate::error::BridgeError::Config(
                toml::de::Error::custom("serial port cannot be empty")
            ));
        }

        if self.serial.baud_rate == 0 {
            return Err(crate::error::BridgeError::Config(
                toml::de::Error::custom("baud_rate must be greater than 0")
            ));
        }

        if self.serial.read_timeout_ms == 0 || self.serial.read_timeout_ms > 10_000 {
            return Err(crate::error::BridgeError::Config(
                toml::de::Error::custom("read_timeout_ms must be between 1 and 10000")
            ));
        }

        if self.link.packet_timeout_ms == 0 {
            return Err(crate::error::BridgeError::Config(
                toml::de::Error::custom("packet_timeout_ms must be greater than 0")
            ));
        }

        if self.link.failsafe_timeout_ms <= self.link.packet_timeout_ms {
            return Err(crate::error::BridgeError::Config(
                toml::de::Error::custom("failsafe_timeout_ms must exceed packet_timeout_ms")
            ));
        }

        if self.send.period_ms == 0 || self.send.period_ms > 1_000 {
            return Err(crate::error::BridgeError::Config(
                toml::de::Error::custom("send period_ms must be between 1 and 1000")
            ));
        }

        if self.files.publish_interval_ms == 0 || self.files.publish_interval_ms > 60_000 {
            return Err(crate::error::BridgeError::Config(
                toml::de::Error::custom("publish_interval_ms must be between 1 and 60000")
            ));
        }

        if self.files.telemetry_path.is_empty() || self.files.command_path.is_empty() {
            return Err(crate::error::BridgeError::Config(
                toml::de::Error::custom("telemetry_path and command_path cannot be empty")
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.serial.baud_rate, 420_000);
        assert_eq!(config.serial.read_timeout_ms, 100);
        assert_eq!(config.link.packet_timeout_ms, 100);
        assert_eq!(config.link.failsafe_timeout_ms, 120_000);
        assert_eq!(config.send.period_ms, 10);
        assert!(!config.send.ignore_telemetry);
        assert_eq!(config.files.telemetry_path, "/tmp/crsf_telemetry.dat");
        assert_eq!(config.files.command_path, "/tmp/crsf_command.txt");
        assert_eq!(config.files.publish_interval_ms, 20);
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml_str = r#"
            [serial]
            port = "/dev/ttyUSB0"

            [send]
            ignore_telemetry = true
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.serial.port, "/dev/ttyUSB0");
        assert_eq!(config.serial.baud_rate, 420_000);
        assert!(config.send.ignore_telemetry);
        assert_eq!(config.link.failsafe_timeout_ms, 120_000);
    }

    #[test]
    fn test_parse_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.serial.port, "/dev/ttyAMA0");
    }

    #[test]
    fn test_validate_rejects_zero_period() {
        let mut config = Config::default();
        config.send.period_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_timeouts() {
        let mut config = Config::default();
        config.link.failsafe_timeout_ms = 50;
        assert!(config.validate().is_err());
    }
}
