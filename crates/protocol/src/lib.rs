//! HLink protocol definitions for bulkusb
//!
//! This crate defines the application-level protocol spoken over a
//! vendor-specific bulk interface: the message type, the fixed binary frame
//! layout, the wire constants (salutation, control command names, chunk and
//! buffer sizes), and the opaque cookies handed out to host callers.
//!
//! # Frame format
//!
//! Every framed message is one contiguous buffer:
//!
//! ```text
//! [16-byte header][message name bytes][payload bytes]
//! ```
//!
//! The header encodes the name length as a u16 (little-endian, offset 10)
//! and the payload length as a u32 (little-endian, offset 12); the first ten
//! bytes are reserved and zero.
//!
//! # Example
//!
//! ```
//! use protocol::{Message, encode_message, parse_message};
//!
//! let msg = Message::new("camera-info", b"payload".to_vec());
//! let frame = encode_message(&msg);
//! let decoded = parse_message(&frame).unwrap();
//! assert_eq!(decoded.name, "camera-info");
//! ```

pub mod codec;
pub mod error;
pub mod message;
pub mod types;

pub use codec::{
    HDR_MESSAGE_SIZE_OFFSET, HDR_PAYLOAD_SIZE_OFFSET, HDR_SIZE, HEADER_READ_BUF_SIZE,
    MAX_OUT_CHUNK, PAYLOAD_READ_BUF_SIZE, REPLY_SUFFIX, SALUTATION, SUBSCRIBE_COMMAND,
    UNSUBSCRIBE_COMMAND, FrameHeader, encode_message, parse_header, parse_message,
};
pub use error::{ProtocolError, Result};
pub use message::Message;
pub use types::{DeviceCookie, DeviceIdentity, DeviceInfo, HandleCookie};
