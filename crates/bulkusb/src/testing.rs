//! Scriptable transport doubles for tests
//!
//! Everything here is shared-state over `Arc<Mutex<..>>` so a test can keep
//! a handle to a device or channel after handing ownership to the code
//! under test, script what the fake hardware returns, and inspect what was
//! written to it afterwards.

use crate::config::OpenRetryPolicy;
use crate::transport::{
    BulkChannel, InterfaceInfo, OpenedDevice, Transport, TransportDevice, TransportError,
};
use common::WakeHandle;
use protocol::{DeviceIdentity, Message, parse_message};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, mpsc};
use std::time::Duration;

/// Retry policy with no sleeps, for tests that exercise retry counting
pub fn fast_retry_policy() -> OpenRetryPolicy {
    OpenRetryPolicy {
        claim_attempts: 3,
        claim_retry_delay: Duration::ZERO,
        serial_attempts: 3,
        serial_retry_delay: Duration::ZERO,
        settle_attempts: 2,
        settle_delay: Duration::ZERO,
    }
}

#[derive(Default)]
struct IoState {
    out_log: Vec<Vec<u8>>,
    out_script: VecDeque<Result<usize, TransportError>>,
    in_script: VecDeque<Result<Vec<u8>, TransportError>>,
    clear_halt_log: Vec<u8>,
    clear_halt_script: VecDeque<Result<(), TransportError>>,
}

/// Scripted bulk endpoint state, shared between a test and the code under
/// test
///
/// OUT transfers are logged and succeed whole unless a result is scripted.
/// IN transfers pop the scripted queue; an empty queue reads as a timeout.
#[derive(Clone, Default)]
pub struct ScriptedIo {
    state: Arc<Mutex<IoState>>,
}

impl ScriptedIo {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, IoState> {
        self.state.lock().expect("io state mutex")
    }

    /// Queue data for the next IN transfer
    pub fn queue_in(&self, data: Vec<u8>) {
        self.state().in_script.push_back(Ok(data));
    }

    /// Queue an error for the next IN transfer
    pub fn queue_in_error(&self, err: TransportError) {
        self.state().in_script.push_back(Err(err));
    }

    /// Queue a result for the next OUT transfer, e.g. a short write
    pub fn queue_out(&self, result: Result<usize, TransportError>) {
        self.state().out_script.push_back(result);
    }

    /// Queue a result for the next clear-halt
    pub fn queue_clear_halt(&self, result: Result<(), TransportError>) {
        self.state().clear_halt_script.push_back(result);
    }

    /// Every OUT transfer so far, in order
    pub fn out_log(&self) -> Vec<Vec<u8>> {
        self.state().out_log.clone()
    }

    /// Forget recorded OUT transfers
    pub fn clear_out_log(&self) {
        self.state().out_log.clear();
    }

    /// Endpoints cleared so far, in order
    pub fn clear_halt_log(&self) -> Vec<u8> {
        self.state().clear_halt_log.clone()
    }

    /// Parse the recorded OUT bytes back into messages
    ///
    /// Transfers are concatenated first, so chunked sends reassemble into
    /// their original frames.
    pub fn sent_messages(&self) -> Vec<Message> {
        let bytes: Vec<u8> = self.state().out_log.concat();
        let mut messages = Vec::new();
        let mut offset = 0;
        while offset < bytes.len() {
            let header =
                protocol::parse_header(&bytes[offset..]).expect("recorded frame header");
            let total = protocol::HDR_SIZE + header.name.len() + header.payload_len;
            let frame = &bytes[offset..offset + total];
            messages.push(parse_message(frame).expect("recorded frame"));
            offset += total;
        }
        messages
    }

    fn write(&self, data: &[u8]) -> Result<usize, TransportError> {
        let mut state = self.state();
        state.out_log.push(data.to_vec());
        match state.out_script.pop_front() {
            Some(result) => result,
            None => Ok(data.len()),
        }
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        match self.state().in_script.pop_front() {
            Some(Ok(data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(n)
            }
            Some(Err(err)) => Err(err),
            None => Err(TransportError::Timeout),
        }
    }

    fn clear_halt(&self, endpoint: u8) -> Result<(), TransportError> {
        let mut state = self.state();
        state.clear_halt_log.push(endpoint);
        match state.clear_halt_script.pop_front() {
            Some(result) => result,
            None => Ok(()),
        }
    }
}

/// A [`BulkChannel`] backed by [`ScriptedIo`]
///
/// Clones share state, so keep one clone as the test probe.
#[derive(Clone, Default)]
pub struct ScriptedChannel {
    io: ScriptedIo,
}

/// Endpoint addresses a scripted channel reports in its clear-halt log
pub const SCRIPTED_EP_OUT: u8 = 0x01;
pub const SCRIPTED_EP_IN: u8 = 0x81;

impl ScriptedChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the salutation so a handshake against this channel succeeds
    pub fn queue_salutation(&self) {
        self.io.queue_in(protocol::SALUTATION.to_vec());
    }

    pub fn queue_in(&self, data: Vec<u8>) {
        self.io.queue_in(data);
    }

    pub fn queue_in_error(&self, err: TransportError) {
        self.io.queue_in_error(err);
    }

    pub fn queue_out(&self, result: Result<usize, TransportError>) {
        self.io.queue_out(result);
    }

    pub fn out_log(&self) -> Vec<Vec<u8>> {
        self.io.out_log()
    }

    pub fn clear_out_log(&self) {
        self.io.clear_out_log();
    }

    pub fn sent_messages(&self) -> Vec<Message> {
        self.io.sent_messages()
    }

    pub fn clear_halt_log(&self) -> Vec<u8> {
        self.io.clear_halt_log()
    }
}

impl BulkChannel for ScriptedChannel {
    fn out(&mut self, data: &[u8], _timeout: Duration) -> Result<usize, TransportError> {
        self.io.write(data)
    }

    fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize, TransportError> {
        self.io.read(buf)
    }

    fn clear_halt_out(&mut self) -> Result<(), TransportError> {
        self.io.clear_halt(SCRIPTED_EP_OUT)
    }

    fn clear_halt_in(&mut self) -> Result<(), TransportError> {
        self.io.clear_halt(SCRIPTED_EP_IN)
    }
}

struct DeviceState {
    identity: DeviceIdentity,
    serial: String,
    serial_error: Option<TransportError>,
    serial_reads: usize,
    interfaces: Vec<InterfaceInfo>,
    claim_failures: usize,
    claim_error: TransportError,
    claim_attempts: usize,
}

/// A scriptable device visible through a [`MockTransport`]
///
/// Clones share state; the default shape is a single vendor-class interface
/// with one OUT and one IN endpoint.
#[derive(Clone)]
pub struct MockDevice {
    state: Arc<Mutex<DeviceState>>,
    io: ScriptedIo,
}

impl MockDevice {
    /// Device exposing the standard vendor interface layout
    pub fn vendor_device(identity: DeviceIdentity, serial: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(DeviceState {
                identity,
                serial: serial.to_owned(),
                serial_error: None,
                serial_reads: 0,
                interfaces: vec![InterfaceInfo {
                    number: 0,
                    class_code: 0xFF,
                    endpoints: vec![0x01, 0x81],
                }],
                claim_failures: 0,
                claim_error: TransportError::Busy,
                claim_attempts: 0,
            })),
            io: ScriptedIo::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().expect("device state mutex")
    }

    /// Scripted endpoint IO shared with every opened instance of this device
    pub fn io(&self) -> ScriptedIo {
        self.io.clone()
    }

    /// Replace the interface layout reported after open
    pub fn set_interfaces(&self, interfaces: Vec<InterfaceInfo>) {
        self.state().interfaces = interfaces;
    }

    /// Make every serial read fail
    pub fn fail_serial(&self, err: TransportError) {
        self.state().serial_error = Some(err);
    }

    /// How many times the serial was read
    pub fn serial_reads(&self) -> usize {
        self.state().serial_reads
    }

    /// Fail the next `count` interface claims
    pub fn fail_claims(&self, count: usize, err: TransportError) {
        let mut state = self.state();
        state.claim_failures = count;
        state.claim_error = err;
    }

    /// How many claims were attempted
    pub fn claim_attempts(&self) -> usize {
        self.state().claim_attempts
    }
}

impl TransportDevice for MockDevice {
    fn identity(&self) -> DeviceIdentity {
        self.state().identity.clone()
    }

    fn read_serial(&mut self) -> Result<String, TransportError> {
        let mut state = self.state();
        state.serial_reads += 1;
        match &state.serial_error {
            Some(err) => Err(err.clone()),
            None => Ok(state.serial.clone()),
        }
    }

    fn open(&mut self) -> Result<Box<dyn OpenedDevice>, TransportError> {
        Ok(Box::new(self.clone()))
    }
}

impl OpenedDevice for MockDevice {
    fn interfaces(&mut self) -> Result<Vec<InterfaceInfo>, TransportError> {
        Ok(self.state().interfaces.clone())
    }

    fn claim_interface(&mut self, _number: u8) -> Result<(), TransportError> {
        let mut state = self.state();
        state.claim_attempts += 1;
        if state.claim_failures > 0 {
            state.claim_failures -= 1;
            return Err(state.claim_error.clone());
        }
        Ok(())
    }

    fn release_interface(&mut self, _number: u8) -> Result<(), TransportError> {
        Ok(())
    }

    fn bulk_out(
        &mut self,
        _endpoint: u8,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize, TransportError> {
        self.io.write(data)
    }

    fn bulk_in(
        &mut self,
        _endpoint: u8,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, TransportError> {
        self.io.read(buf)
    }

    fn clear_halt(&mut self, endpoint: u8) -> Result<(), TransportError> {
        self.io.clear_halt(endpoint)
    }
}

/// Test-side control over a [`MockTransport`]'s device list
#[derive(Clone)]
pub struct MockTransportHandle {
    devices: Arc<Mutex<Vec<MockDevice>>>,
}

impl MockTransportHandle {
    pub fn add_device(&self, device: MockDevice) {
        self.devices.lock().expect("device list mutex").push(device);
    }

    pub fn clear_devices(&self) {
        self.devices.lock().expect("device list mutex").clear();
    }

    pub fn set_devices(&self, devices: Vec<MockDevice>) {
        *self.devices.lock().expect("device list mutex") = devices;
    }
}

/// A [`Transport`] whose device list the test controls at runtime
pub struct MockTransport {
    devices: Arc<Mutex<Vec<MockDevice>>>,
}

impl MockTransport {
    pub fn new() -> (Self, MockTransportHandle) {
        let devices = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                devices: Arc::clone(&devices),
            },
            MockTransportHandle { devices },
        )
    }
}

impl Transport for MockTransport {
    fn list_devices(&mut self) -> Result<Vec<Box<dyn TransportDevice>>, TransportError> {
        let devices = self.devices.lock().expect("device list mutex");
        Ok(devices
            .iter()
            .map(|d| Box::new(d.clone()) as Box<dyn TransportDevice>)
            .collect())
    }
}

/// Wake handle that signals over a channel, so a test can block on wakes
pub struct ChannelWake {
    tx: mpsc::Sender<()>,
}

impl ChannelWake {
    pub fn new(tx: mpsc::Sender<()>) -> Self {
        Self { tx }
    }
}

impl WakeHandle for ChannelWake {
    fn wake(&self) {
        let _ = self.tx.send(());
    }
}
