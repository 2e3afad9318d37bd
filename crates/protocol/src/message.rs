//! Named message type
//!
//! A message is a name (what the device should do with it, or what it is a
//! reply to) and an opaque payload. The framing that puts both on the wire
//! lives in [`crate::codec`].

use serde::{Deserialize, Serialize};

/// One named message exchanged over an HLink connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message name, e.g. `"camera-info"` or `"camera-info_reply"`
    pub name: String,
    /// Raw payload bytes; the interpretation is up to the named command
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

impl Message {
    /// Create a message from a name and payload
    pub fn new(name: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    /// Name of the reply message a request named `self.name` expects
    pub fn reply_name(&self) -> String {
        format!("{}{}", self.name, crate::codec::REPLY_SUFFIX)
    }
}
