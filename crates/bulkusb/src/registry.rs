//! Device and handle registry
//!
//! Owns every transport-level resource behind opaque cookies: enumerated
//! devices (rebuilt on every scan, with stable cookies for devices that were
//! already known) and open endpoint claims (alive until closed or evicted).
//! Touched only by the worker thread, so no internal locking.

use crate::config::OpenRetryPolicy;
use crate::error::ServiceError;
use crate::transport::{
    ClaimedEndpoint, InterfaceInfo, OpenedDevice, Transport, TransportDevice, TransportError,
};
use protocol::{DeviceCookie, DeviceInfo, HandleCookie};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// First cookie value handed out; cookies wrap away from zero
const COOKIE_SEED: u32 = 10_000;

/// Vendor-specific interface class
const VENDOR_CLASS: u8 = 0xFF;

struct DeviceEntry {
    device: Box<dyn TransportDevice>,
    serial: String,
}

/// Registry of enumerated devices and open endpoint claims
pub struct DeviceRegistry {
    cookie_counter: u32,
    devices: HashMap<u32, DeviceEntry>,
    claims: HashMap<u32, ClaimedEndpoint>,
    retry: OpenRetryPolicy,
}

impl DeviceRegistry {
    /// Create an empty registry with the given retry policy
    pub fn new(retry: OpenRetryPolicy) -> Self {
        Self {
            cookie_counter: COOKIE_SEED,
            devices: HashMap::new(),
            claims: HashMap::new(),
            retry,
        }
    }

    fn mint_cookie(&mut self) -> u32 {
        self.cookie_counter = self.cookie_counter.wrapping_add(1);
        if self.cookie_counter == 0 {
            self.cookie_counter = 1;
        }
        self.cookie_counter
    }

    /// Scan the transport and rebuild the device map
    ///
    /// Devices whose identity was seen in the previous scan keep their cookie
    /// and cached serial (the serial is never re-fetched). New devices get a
    /// fresh cookie and one serial fetch; devices absent from this scan are
    /// dropped. Result order follows the transport's enumeration order.
    pub fn list_devices(
        &mut self,
        transport: &mut dyn Transport,
    ) -> Result<Vec<DeviceInfo>, ServiceError> {
        let mut previous = std::mem::take(&mut self.devices);

        let scanned = transport.list_devices()?;
        let mut listed = Vec::with_capacity(scanned.len());
        for mut device in scanned {
            let identity = device.identity();
            let known = previous
                .iter()
                .find(|(_, entry)| entry.device.identity() == identity)
                .map(|(cookie, _)| *cookie);

            let (cookie, serial) = match known.and_then(|c| Some((c, previous.remove(&c)?))) {
                Some((cookie, entry)) => (cookie, entry.serial),
                None => {
                    let cookie = self.mint_cookie();
                    let serial = self.fetch_serial(device.as_mut());
                    debug!(cookie, serial = %serial, "New device observed");
                    (cookie, serial)
                }
            };

            listed.push(DeviceInfo {
                cookie: DeviceCookie(cookie),
                vendor_id: identity.vendor_id,
                product_id: identity.product_id,
                serial: serial.clone(),
                location: identity.location,
            });
            self.devices.insert(cookie, DeviceEntry { device, serial });
        }

        // Whatever is left in `previous` vanished between scans. Open claims
        // are untouched: a gone device surfaces NoDevice on its next
        // transfer, which evicts the handle.
        for cookie in previous.keys() {
            debug!(cookie, "Device disappeared from scan");
        }
        Ok(listed)
    }

    /// Fetch a serial string, tolerating failure
    ///
    /// A device that momentarily reports NoDevice right after plug-in is
    /// retried; any final failure leaves the error text as the serial so the
    /// device is still listed.
    fn fetch_serial(&self, device: &mut dyn TransportDevice) -> String {
        let mut remaining = self.retry.serial_attempts.max(1);
        loop {
            remaining -= 1;
            match device.read_serial() {
                Ok(serial) => return serial,
                Err(TransportError::NoDevice) if remaining > 0 => {
                    std::thread::sleep(self.retry.serial_retry_delay / remaining);
                }
                Err(e) => {
                    warn!("Failed to read serial: {}", e);
                    return e.to_string();
                }
            }
        }
    }

    /// Open a device, claim its vendor interface and register the handle
    ///
    /// The full open+claim sequence is retried because claims frequently
    /// fail transiently right after hot-plug.
    pub fn open_device(&mut self, cookie: DeviceCookie) -> Result<HandleCookie, ServiceError> {
        let Some(entry) = self.devices.get_mut(&cookie.0) else {
            return Err(ServiceError::UnknownCookie);
        };

        let mut attempt = 1;
        let endpoint = loop {
            match open_and_claim(entry.device.as_mut(), &self.retry) {
                Ok(endpoint) => break endpoint,
                Err(err) if attempt < self.retry.claim_attempts => {
                    warn!("Opening device failed: {}. Retrying.", err);
                    attempt += 1;
                    std::thread::sleep(self.retry.claim_retry_delay);
                }
                Err(err) => return Err(err),
            }
        };

        let handle = self.mint_cookie();
        info!(
            cookie = cookie.0,
            handle,
            ep_out = endpoint.out_address(),
            ep_in = endpoint.in_address(),
            "Opened device"
        );
        self.claims.insert(handle, endpoint);
        Ok(HandleCookie(handle))
    }

    /// Endpoint claim behind a handle, if the handle is live
    pub fn endpoint_mut(&mut self, handle: HandleCookie) -> Option<&mut ClaimedEndpoint> {
        self.claims.get_mut(&handle.0)
    }

    /// Drop a handle whose device can never answer again
    pub fn evict_handle(&mut self, handle: HandleCookie) {
        if self.claims.remove(&handle.0).is_some() {
            info!(handle = handle.0, "Evicted handle");
        }
    }

    /// Close a handle; false when it was never issued or already gone
    pub fn close_device(&mut self, handle: HandleCookie) -> bool {
        let closed = self.claims.remove(&handle.0).is_some();
        if closed {
            debug!(handle = handle.0, "Closed device");
        }
        closed
    }
}

/// One open+claim attempt: open, settle, scan, claim
fn open_and_claim(
    device: &mut dyn TransportDevice,
    retry: &OpenRetryPolicy,
) -> Result<ClaimedEndpoint, ServiceError> {
    let mut opened = device.open()?;
    let interfaces = wait_for_config(opened.as_mut(), retry)?;

    let vendor = interfaces
        .iter()
        .find(|ifc| ifc.class_code == VENDOR_CLASS)
        .ok_or(ServiceError::InterfaceNotFound)?;

    if vendor.endpoints.len() < 2 {
        return Err(ServiceError::EndpointError(
            "Incorrect number of endpoints, at least two expected".into(),
        ));
    }
    let ep_out = vendor
        .endpoints
        .iter()
        .copied()
        .find(|ep| ep & 0x80 == 0)
        .ok_or_else(|| ServiceError::EndpointError("Out endpoint not found".into()))?;
    let ep_in = vendor
        .endpoints
        .iter()
        .copied()
        .find(|ep| ep & 0x80 != 0)
        .ok_or_else(|| ServiceError::EndpointError("In endpoint not found".into()))?;
    let interface = vendor.number;

    opened.claim_interface(interface)?;
    Ok(ClaimedEndpoint::new(opened, interface, ep_out, ep_in))
}

/// Wait until the active configuration is readable after open
fn wait_for_config(
    opened: &mut dyn OpenedDevice,
    retry: &OpenRetryPolicy,
) -> Result<Vec<InterfaceInfo>, ServiceError> {
    let mut attempt = 1;
    loop {
        match opened.interfaces() {
            Ok(interfaces) if !interfaces.is_empty() => return Ok(interfaces),
            // An empty or unreadable configuration right after plug-in
            // usually settles within a few reads.
            Ok(_) | Err(_) if attempt < retry.settle_attempts => {
                attempt += 1;
                std::thread::sleep(retry.settle_delay);
            }
            Ok(interfaces) => return Ok(interfaces),
            Err(e) => return Err(e.into()),
        }
    }
}
