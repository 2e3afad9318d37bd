//! HLink application protocol over a bulk channel
//!
//! Layers the framed message protocol on top of any [`BulkChannel`]: the
//! reset handshake, chunked sends, the two-phase receive, subscription
//! bookkeeping and the request/reply convention.

use crate::config::HlinkConfig;
use crate::transport::{BulkChannel, TransportError};
use protocol::{
    HEADER_READ_BUF_SIZE, MAX_OUT_CHUNK, Message, PAYLOAD_READ_BUF_SIZE, ProtocolError,
    SALUTATION, SUBSCRIBE_COMMAND, UNSUBSCRIBE_COMMAND, encode_message, parse_header,
};
use std::fmt;
use std::sync::Mutex;
use tracing::{debug, trace, warn};

/// Errors from HLink conversations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HlinkError {
    /// The device answered the reset handshake with something other than
    /// the expected salutation
    #[error("Handshake failed: unexpected salutation {received:?}")]
    HandshakeMismatch { received: Vec<u8> },

    /// A request/reply exchange produced a message with the wrong name
    #[error("Reply mismatch: expected {expected:?}, received {received:?}")]
    ReplyMismatch { expected: String, received: String },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// HLink engine bound to one bulk channel
///
/// The channel sits behind a mutex so subscriptions can be held as guards
/// while other traffic continues; all transfers on one endpoint pair are
/// serialized anyway.
pub struct Hlink<C: BulkChannel> {
    channel: Mutex<C>,
    config: HlinkConfig,
}

// Manual impl: the channel itself need not be Debug.
impl<C: BulkChannel> fmt::Debug for Hlink<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hlink")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Live subscription to a device-originated command
///
/// Dropping the subscription sends the unsubscribe message. Failures on
/// that path are logged and swallowed; the device forgetting us is the
/// usual reason the send fails.
pub struct Subscription<'a, C: BulkChannel> {
    link: &'a Hlink<C>,
    command: String,
}

impl<C: BulkChannel> Hlink<C> {
    /// Perform the reset handshake and return a ready engine
    ///
    /// The handshake sends a zero-length transfer, then a single zero byte,
    /// then reads the salutation. Anything but an exact salutation match is
    /// a [`HlinkError::HandshakeMismatch`].
    pub fn open(channel: C, config: HlinkConfig) -> Result<Self, HlinkError> {
        let link = Self {
            channel: Mutex::new(channel),
            config,
        };
        link.handshake()?;
        Ok(link)
    }

    fn handshake(&self) -> Result<(), HlinkError> {
        let timeout = self.config.handshake_timeout;
        let mut channel = self.lock_channel();
        channel.out(&[], timeout)?;
        channel.out(&[0], timeout)?;

        let mut buf = [0u8; HEADER_READ_BUF_SIZE];
        let n = channel.read(&mut buf, timeout)?;
        let received = &buf[..n];
        if received != SALUTATION {
            return Err(HlinkError::HandshakeMismatch {
                received: received.to_vec(),
            });
        }
        debug!("Handshake complete");
        Ok(())
    }

    /// Send one message, chunking the frame as needed
    pub fn send(&self, message: &Message) -> Result<(), HlinkError> {
        let mut channel = self.lock_channel();
        self.send_locked(&mut channel, message)
    }

    fn send_locked(&self, channel: &mut C, message: &Message) -> Result<(), HlinkError> {
        let frame = encode_message(message);
        trace!(name = %message.name, frame_len = frame.len(), "Sending message");

        let mut offset = 0;
        while offset < frame.len() {
            let chunk = MAX_OUT_CHUNK.min(frame.len() - offset);
            // A short transfer is not an error; resume from where the
            // device stopped accepting.
            let transferred =
                channel.out(&frame[offset..offset + chunk], self.config.write_timeout)?;
            offset += transferred;
        }
        Ok(())
    }

    /// Receive one message
    ///
    /// Devices send the header and name in one transfer and the payload in
    /// a second, so the read happens in two phases.
    pub fn receive(&self) -> Result<Message, HlinkError> {
        let mut channel = self.lock_channel();
        self.receive_locked(&mut channel)
    }

    fn receive_locked(&self, channel: &mut C) -> Result<Message, HlinkError> {
        let mut header_buf = [0u8; HEADER_READ_BUF_SIZE];
        let n = channel.read(&mut header_buf, self.config.read_timeout)?;
        let header = parse_header(&header_buf[..n])?;

        if header.payload_len > PAYLOAD_READ_BUF_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                declared: header.payload_len,
                max: PAYLOAD_READ_BUF_SIZE,
            }
            .into());
        }

        // The payload phase always happens; a zero-length payload arrives as
        // a ZLP that must still be consumed, or it would be read as the next
        // message's header.
        let mut payload_buf = [0u8; PAYLOAD_READ_BUF_SIZE];
        let n = channel.read(&mut payload_buf, self.config.read_timeout)?;
        if n != header.payload_len {
            return Err(ProtocolError::PayloadLengthMismatch {
                declared: header.payload_len,
                actual: n,
            }
            .into());
        }
        let payload = payload_buf[..n].to_vec();

        trace!(name = %header.name, payload_len = payload.len(), "Received message");
        Ok(Message::new(header.name, payload))
    }

    /// Subscribe to a device-originated command
    ///
    /// The returned guard unsubscribes on drop. Guards may overlap and be
    /// released in any order.
    pub fn subscribe(&self, command: &str) -> Result<Subscription<'_, C>, HlinkError> {
        self.send(&Message::new(
            SUBSCRIBE_COMMAND.to_owned(),
            command.as_bytes().to_vec(),
        ))?;
        debug!(command, "Subscribed");
        Ok(Subscription {
            link: self,
            command: command.to_owned(),
        })
    }

    /// Send a request and await its reply
    ///
    /// The reply name is the request name with the reply suffix appended.
    /// The reply subscription is in place before the request goes out and
    /// is released whether or not the exchange succeeds.
    pub fn send_receive(&self, message: &Message) -> Result<Message, HlinkError> {
        let reply_name = message.reply_name();
        let _subscription = self.subscribe(&reply_name)?;

        self.send(message)?;
        let reply = self.receive()?;
        if reply.name != reply_name {
            return Err(HlinkError::ReplyMismatch {
                expected: reply_name,
                received: reply.name,
            });
        }
        Ok(reply)
    }

    fn lock_channel(&self) -> std::sync::MutexGuard<'_, C> {
        match self.channel.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<C: BulkChannel> Drop for Subscription<'_, C> {
    fn drop(&mut self) {
        let unsubscribe = Message::new(
            UNSUBSCRIBE_COMMAND.to_owned(),
            self.command.as_bytes().to_vec(),
        );
        if let Err(e) = self.link.send(&unsubscribe) {
            warn!(command = %self.command, "Unsubscribe failed: {}", e);
        } else {
            debug!(command = %self.command, "Unsubscribed");
        }
    }
}
