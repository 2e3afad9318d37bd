//! HLink frame encoding and parsing
//!
//! Frame layout (all integers little-endian):
//!
//! ```text
//! offset 0..10   reserved, zero
//! offset 10..12  message name length, u16
//! offset 12..16  payload length, u32
//! offset 16..    name bytes, then payload bytes
//! ```
//!
//! On the wire the device sends the header and name in one bulk transfer and
//! the payload in the next, so [`parse_header`] accepts a buffer that stops
//! after the name while [`parse_message`] wants the whole frame.

use crate::error::{ProtocolError, Result};
use crate::message::Message;
use byteorder::{ByteOrder, LittleEndian};
use bytes::{BufMut, BytesMut};

/// Fixed header size in bytes
pub const HDR_SIZE: usize = 16;
/// Byte offset of the u16 message-name length field
pub const HDR_MESSAGE_SIZE_OFFSET: usize = 10;
/// Byte offset of the u32 payload length field
pub const HDR_PAYLOAD_SIZE_OFFSET: usize = 12;

/// Greeting the device must answer during the handshake
pub const SALUTATION: &[u8] = b"HLink v0";
/// Control message telling the device to start delivering a command name
pub const SUBSCRIBE_COMMAND: &str = "hlink-mb-subscribe";
/// Control message telling the device to stop delivering a command name
pub const UNSUBSCRIBE_COMMAND: &str = "hlink-mb-unsubscribe";
/// Suffix the device appends to a request name when replying
pub const REPLY_SUFFIX: &str = "_reply";

/// Ceiling for a single bulk OUT transfer; larger frames are chunked
pub const MAX_OUT_CHUNK: usize = 16 * 1024;
/// Buffer size for the header+name read
pub const HEADER_READ_BUF_SIZE: usize = 1024;
/// Buffer size (and ceiling) for the payload read
pub const PAYLOAD_READ_BUF_SIZE: usize = 4096;

/// Parsed fixed header plus the message name that follows it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    /// Message name carried between header and payload
    pub name: String,
    /// Payload length the header declares
    pub payload_len: usize,
}

/// Serialize a message into one contiguous frame buffer
pub fn encode_message(message: &Message) -> Vec<u8> {
    let name = message.name.as_bytes();
    let mut frame = BytesMut::with_capacity(HDR_SIZE + name.len() + message.payload.len());
    frame.put_bytes(0, HDR_MESSAGE_SIZE_OFFSET);
    frame.put_u16_le(name.len() as u16);
    frame.put_u32_le(message.payload.len() as u32);
    frame.put_slice(name);
    frame.put_slice(&message.payload);
    frame.to_vec()
}

/// Parse the header and message name from the first IN transfer
///
/// The buffer must contain the full 16-byte header and the complete name;
/// any trailing bytes are ignored here.
pub fn parse_header(buf: &[u8]) -> Result<FrameHeader> {
    if buf.len() < HDR_SIZE {
        return Err(ProtocolError::ShortHeader {
            needed: HDR_SIZE,
            got: buf.len(),
        });
    }
    let name_len = LittleEndian::read_u16(&buf[HDR_MESSAGE_SIZE_OFFSET..]) as usize;
    let payload_len = LittleEndian::read_u32(&buf[HDR_PAYLOAD_SIZE_OFFSET..]) as usize;
    let available = buf.len() - HDR_SIZE;
    if available < name_len {
        return Err(ProtocolError::TruncatedName {
            declared: name_len,
            available,
        });
    }
    let name = std::str::from_utf8(&buf[HDR_SIZE..HDR_SIZE + name_len])
        .map_err(|_| ProtocolError::InvalidName)?
        .to_owned();
    Ok(FrameHeader { name, payload_len })
}

/// Parse one complete frame (header, name and payload in one buffer)
pub fn parse_message(buf: &[u8]) -> Result<Message> {
    let header = parse_header(buf)?;
    let payload_offset = HDR_SIZE + header.name.len();
    let payload = &buf[payload_offset..];
    if payload.len() != header.payload_len {
        return Err(ProtocolError::PayloadLengthMismatch {
            declared: header.payload_len,
            actual: payload.len(),
        });
    }
    Ok(Message {
        name: header.name,
        payload: payload.to_vec(),
    })
}
