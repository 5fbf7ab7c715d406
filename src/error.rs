//! # Error Types
//!
//! Custom error types for the CRSF bridge using `thiserror`.

use thiserror::Error;

/// Main error type for the CRSF bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Serial port errors
    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// CRSF protocol errors
    #[error("CRSF protocol error: {0}")]
    Protocol(String),

    /// evdev errors
    #[error("Input device error: {0}")]
    InputDevice(#[from] evdev::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP control-plane errors
    #[error("HTTP error: {0}")]
    Http(String),
}

/// Result type alias for the CRSF bridge
pub type Result<T> = std::result::Result<T, BridgeError>;
