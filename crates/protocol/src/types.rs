//! Cookie and device type definitions
//!
//! Host callers never see transport-level resources; they see opaque nonzero
//! cookies. Device cookies identify enumerated devices, handle cookies
//! identify open endpoint claims. Both are minted from the same counter but
//! live in disjoint namespaces.

use serde::{Deserialize, Serialize};

/// Opaque identifier for an enumerated device
///
/// Stable across repeated enumerations as long as the device stays on the
/// same address and port path. Zero is reserved and never minted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceCookie(pub u32);

/// Opaque identifier for an open endpoint claim
///
/// Returned by `open_device` and consumed by the write/read/close operations.
/// Zero is reserved and never minted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandleCookie(pub u32);

/// Device information returned by `list_devices`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Cookie to pass to `open_device`
    pub cookie: DeviceCookie,
    /// USB vendor ID
    pub vendor_id: u16,
    /// USB product ID
    pub product_id: u16,
    /// Serial number string, fetched once per device lifetime. When the
    /// fetch failed, this carries the error text instead (the device is
    /// still usable).
    pub serial: String,
    /// Physical location: bus number followed by the port path
    #[serde(with = "serde_bytes")]
    pub location: Vec<u8>,
}

/// Identity key deciding whether a re-enumerated device is the same device
///
/// Two scans observing equal identities reuse the existing cookie and the
/// cached serial string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// USB vendor ID
    pub vendor_id: u16,
    /// USB product ID
    pub product_id: u16,
    /// Device address on its bus
    pub address: u8,
    /// Bus number followed by the port path
    #[serde(with = "serde_bytes")]
    pub location: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(address: u8) -> DeviceIdentity {
        DeviceIdentity {
            vendor_id: 0x2bd9,
            product_id: 0x0021,
            address,
            location: vec![1, 4, 2],
        }
    }

    #[test]
    fn identity_equality_covers_all_fields() {
        assert_eq!(identity(7), identity(7));
        assert_ne!(identity(7), identity(8));

        let mut moved = identity(7);
        moved.location = vec![1, 4, 3];
        assert_ne!(identity(7), moved);
    }

    #[test]
    fn cookie_newtypes_are_distinct() {
        let device = DeviceCookie(10001);
        let handle = HandleCookie(10001);
        assert_eq!(device.0, handle.0);
    }
}
