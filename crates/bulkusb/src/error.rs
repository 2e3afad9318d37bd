//! Service-level error types
//!
//! These are the errors host callbacks receive. The `code()` values exist
//! for binding layers that flatten errors into numbers: `-100` is the
//! unknown-cookie sentinel, transport errors keep their native (libusb)
//! numbering so "you referenced something that doesn't exist" stays
//! distinguishable from "the hardware rejected the call".

use crate::transport::TransportError;
use thiserror::Error;

/// Errors surfaced to host callers by the device service
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// The cookie was never issued, or the record behind it is gone
    #[error("Unknown cookie")]
    UnknownCookie,

    /// No vendor-specific (class 0xFF) interface on the device
    #[error("No vendor specific interface found")]
    InterfaceNotFound,

    /// The vendor-specific interface lacked a usable endpoint pair
    #[error("Endpoint error: {0}")]
    EndpointError(String),

    /// The transport rejected the operation
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ServiceError {
    /// Numeric result code for host binding layers
    pub fn code(&self) -> i32 {
        match self {
            ServiceError::UnknownCookie => -100,
            ServiceError::InterfaceNotFound => -101,
            ServiceError::EndpointError(_) => -102,
            ServiceError::Transport(err) => err.code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_cookie_keeps_the_sentinel_code() {
        assert_eq!(ServiceError::UnknownCookie.code(), -100);
    }

    #[test]
    fn transport_errors_keep_native_codes() {
        assert_eq!(ServiceError::Transport(TransportError::Timeout).code(), -7);
        assert_eq!(ServiceError::Transport(TransportError::NoDevice).code(), -4);
        assert_eq!(ServiceError::Transport(TransportError::Pipe).code(), -9);
    }
}
