//! Error types for lorahome-dongle.

use thiserror::Error;

/// Main error type for all dongle operations.
#[derive(Debug, Error)]
pub enum DongleError {
    /// I/O error on the serial transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while forwarding a host document to a node.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration could not be parsed or failed validation.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Protocol error (malformed frame, unknown type, wrong length).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Payload exceeds the protocol maximum.
    #[error("Payload size {size} exceeds maximum {max}")]
    PayloadTooLarge { size: usize, max: usize },

    /// Byte-stuffed frame would not fit the serial transport.
    #[error("Encoded frame size {size} exceeds transport maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// A bounded queue was full and the item was dropped.
    #[error("Queue full: {0}")]
    QueueFull(&'static str),

    /// Reliable send gave up without a matching ack.
    #[error("No ack from node {recipient:#04x} for counter {counter} after {attempts} attempts")]
    DeliveryFailed {
        recipient: u8,
        counter: u16,
        attempts: u8,
    },

    /// The radio driver refused to start.
    #[error("Radio init failed: {0}")]
    RadioInit(String),

    /// A channel or transport closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,
}

impl From<toml::de::Error> for DongleError {
    fn from(err: toml::de::Error) -> Self {
        DongleError::Config(err.to_string())
    }
}

/// Result type alias using DongleError.
pub type Result<T> = std::result::Result<T, DongleError>;
