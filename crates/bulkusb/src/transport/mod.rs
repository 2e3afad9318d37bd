//! USB transport abstraction
//!
//! The worker thread talks to hardware exclusively through these traits so
//! that every dispatcher and protocol-engine code path can run against the
//! doubles in [`crate::testing`]. The production implementation backed by
//! rusb lives in [`rusb_backend`].

pub mod rusb_backend;

pub use rusb_backend::RusbTransport;

use protocol::DeviceIdentity;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Transport-level error taxonomy
///
/// `code()` follows libusb numbering so binding layers see familiar values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The transfer did not finish within its timeout
    #[error("Operation timed out")]
    Timeout,

    /// Permission to the device was denied
    #[error("Access denied")]
    Access,

    /// The device is gone; the operation can never succeed again
    #[error("No such device")]
    NoDevice,

    /// Endpoint stall; a halt-clear is needed before further transfers
    #[error("Pipe error (endpoint stalled)")]
    Pipe,

    /// The resource is held by someone else
    #[error("Resource busy")]
    Busy,

    /// Low-level I/O failure
    #[error("Input/output error")]
    Io,

    /// Anything the taxonomy does not name
    #[error("Transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Numeric code matching libusb's error numbering
    pub fn code(&self) -> i32 {
        match self {
            TransportError::Io => -1,
            TransportError::Access => -3,
            TransportError::NoDevice => -4,
            TransportError::Busy => -6,
            TransportError::Timeout => -7,
            TransportError::Pipe => -9,
            TransportError::Other(_) => -99,
        }
    }
}

/// One interface of a device's active configuration
///
/// Only what the vendor-interface scan needs: the interface number, its
/// class code, and the endpoint addresses of its first alternate setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    /// bInterfaceNumber
    pub number: u8,
    /// bInterfaceClass (0xFF marks a vendor-specific interface)
    pub class_code: u8,
    /// bEndpointAddress of every endpoint; bit 7 set means IN
    pub endpoints: Vec<u8>,
}

/// Entry point: enumerate the currently connected devices
pub trait Transport: Send {
    /// Snapshot the live device set in enumeration order
    fn list_devices(&mut self) -> Result<Vec<Box<dyn TransportDevice>>, TransportError>;
}

/// One enumerated, not-yet-opened device
pub trait TransportDevice: Send {
    /// Identity key for cookie reuse across scans
    fn identity(&self) -> DeviceIdentity;

    /// Fetch the serial number string (opens the device briefly)
    fn read_serial(&mut self) -> Result<String, TransportError>;

    /// Open the device for descriptor reads, claims and transfers
    fn open(&mut self) -> Result<Box<dyn OpenedDevice>, TransportError>;
}

/// An open device handle
pub trait OpenedDevice: Send {
    /// Interfaces of the active configuration
    fn interfaces(&mut self) -> Result<Vec<InterfaceInfo>, TransportError>;

    /// Claim an interface for exclusive use
    fn claim_interface(&mut self, number: u8) -> Result<(), TransportError>;

    /// Release a previously claimed interface
    fn release_interface(&mut self, number: u8) -> Result<(), TransportError>;

    /// Bulk OUT transfer; may move fewer bytes than requested
    fn bulk_out(
        &mut self,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;

    /// Bulk IN transfer into `buf`; returns the byte count received
    fn bulk_in(
        &mut self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;

    /// Clear a halted endpoint
    fn clear_halt(&mut self, endpoint: u8) -> Result<(), TransportError>;
}

/// A claimed interface bound to one OUT/IN bulk endpoint pair
///
/// Owns the open device handle; dropping it releases the claimed interface.
pub struct ClaimedEndpoint {
    device: Box<dyn OpenedDevice>,
    interface: u8,
    ep_out: u8,
    ep_in: u8,
}

impl ClaimedEndpoint {
    /// Wrap an opened device whose `interface` is already claimed
    pub fn new(device: Box<dyn OpenedDevice>, interface: u8, ep_out: u8, ep_in: u8) -> Self {
        debug_assert_eq!(ep_out & 0x80, 0);
        debug_assert_eq!(ep_in & 0x80, 0x80);
        Self {
            device,
            interface,
            ep_out,
            ep_in,
        }
    }

    /// OUT endpoint address
    pub fn out_address(&self) -> u8 {
        self.ep_out
    }

    /// IN endpoint address
    pub fn in_address(&self) -> u8 {
        self.ep_in
    }
}

impl Drop for ClaimedEndpoint {
    fn drop(&mut self) {
        if let Err(e) = self.device.release_interface(self.interface) {
            warn!("Failed to release interface {}: {}", self.interface, e);
        }
    }
}

/// Bulk access to one claimed endpoint pair
///
/// The seam the HLink engine is written against; [`ClaimedEndpoint`] is the
/// production implementation.
pub trait BulkChannel: Send {
    /// Bulk OUT; may move fewer bytes than requested
    fn out(&mut self, data: &[u8], timeout: Duration) -> Result<usize, TransportError>;

    /// Bulk IN into `buf`
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError>;

    /// Clear a halt on the OUT endpoint
    fn clear_halt_out(&mut self) -> Result<(), TransportError>;

    /// Clear a halt on the IN endpoint
    fn clear_halt_in(&mut self) -> Result<(), TransportError>;
}

impl BulkChannel for ClaimedEndpoint {
    fn out(&mut self, data: &[u8], timeout: Duration) -> Result<usize, TransportError> {
        self.device.bulk_out(self.ep_out, data, timeout)
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        self.device.bulk_in(self.ep_in, buf, timeout)
    }

    fn clear_halt_out(&mut self) -> Result<(), TransportError> {
        self.device.clear_halt(self.ep_out)
    }

    fn clear_halt_in(&mut self) -> Result<(), TransportError> {
        self.device.clear_halt(self.ep_in)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_follow_libusb_numbering() {
        assert_eq!(TransportError::Io.code(), -1);
        assert_eq!(TransportError::Access.code(), -3);
        assert_eq!(TransportError::NoDevice.code(), -4);
        assert_eq!(TransportError::Busy.code(), -6);
        assert_eq!(TransportError::Timeout.code(), -7);
        assert_eq!(TransportError::Pipe.code(), -9);
        assert_eq!(TransportError::Other("x".into()).code(), -99);
    }

    #[test]
    fn endpoint_direction_bit() {
        // Bit 7 set means IN, clear means OUT.
        assert_eq!(0x81 & 0x80, 0x80);
        assert_eq!(0x01 & 0x80, 0x00);
    }
}
