//! Protocol error types

use thiserror::Error;

/// Errors produced while framing or parsing HLink messages
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer ended before the fixed-size header was complete
    #[error("Header too short: needed {needed} bytes, got {got}")]
    ShortHeader { needed: usize, got: usize },

    /// Buffer ended before the declared message name was complete
    #[error("Truncated message name: declared {declared} bytes, {available} available")]
    TruncatedName { declared: usize, available: usize },

    /// Message name bytes were not valid UTF-8
    #[error("Message name is not valid UTF-8")]
    InvalidName,

    /// Declared payload length exceeds the receive buffer ceiling
    #[error("Payload too large: {declared} bytes (max: {max})")]
    PayloadTooLarge { declared: usize, max: usize },

    /// Received payload length differs from the length the header declared
    #[error("Payload length mismatch: header declared {declared}, received {actual}")]
    PayloadLengthMismatch { declared: usize, actual: usize },
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;
