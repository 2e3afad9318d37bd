//! End-to-end service behavior against a mock transport

use bulkusb::testing::{fast_retry_policy, ChannelWake, MockDevice, MockTransport};
use bulkusb::transport::TransportError;
use bulkusb::worker::Callback;
use bulkusb::{DeviceService, ServiceConfig, ServiceError};
use protocol::{DeviceCookie, DeviceIdentity, DeviceInfo, HandleCookie};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const IO_TIMEOUT: Duration = Duration::from_millis(50);

fn identity(address: u8) -> DeviceIdentity {
    DeviceIdentity {
        vendor_id: 0x2bd9,
        product_id: 0x0021,
        address,
        location: vec![2, address],
    }
}

fn start_service(transport: MockTransport) -> (DeviceService, mpsc::Receiver<()>) {
    let (wake_tx, wake_rx) = mpsc::channel();
    let config = ServiceConfig {
        open_retry: fast_retry_policy(),
    };
    let service = DeviceService::with_config(
        Box::new(transport),
        move || Box::new(ChannelWake::new(wake_tx.clone())),
        config,
    )
    .expect("service start");
    (service, wake_rx)
}

/// Submit one command and pump completions until its result arrives
fn await_result<T: Send + 'static>(
    service: &DeviceService,
    wake_rx: &mpsc::Receiver<()>,
    submit: impl FnOnce(Callback<T>),
) -> Result<T, ServiceError> {
    let (result_tx, result_rx) = mpsc::channel();
    submit(Box::new(move |result| {
        let _ = result_tx.send(result);
    }));
    loop {
        if let Ok(result) = result_rx.try_recv() {
            return result;
        }
        wake_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("worker wake");
        service.process();
    }
}

fn list(service: &DeviceService, wake_rx: &mpsc::Receiver<()>) -> Vec<DeviceInfo> {
    await_result(service, wake_rx, |cb| service.list_devices(cb)).expect("list_devices")
}

fn open(
    service: &DeviceService,
    wake_rx: &mpsc::Receiver<()>,
    cookie: DeviceCookie,
) -> Result<HandleCookie, ServiceError> {
    await_result(service, wake_rx, |cb| service.open_device(cookie, cb))
}

#[test]
fn cookies_are_stable_across_scans() {
    let (transport, devices) = MockTransport::new();
    devices.add_device(MockDevice::vendor_device(identity(1), "S1"));
    devices.add_device(MockDevice::vendor_device(identity(2), "S2"));
    let (service, wake_rx) = start_service(transport);

    let first = list(&service, &wake_rx);
    let second = list(&service, &wake_rx);
    assert_eq!(first.len(), 2);
    assert_eq!(first[0].cookie, second[0].cookie);
    assert_eq!(first[1].cookie, second[1].cookie);
    assert_eq!(second[0].serial, "S1");
}

#[test]
fn unknown_cookies_report_the_sentinel_code() {
    let (transport, _devices) = MockTransport::new();
    let (service, wake_rx) = start_service(transport);

    let stale = HandleCookie(777);
    let open_err = open(&service, &wake_rx, DeviceCookie(777)).unwrap_err();
    let write_err = await_result(&service, &wake_rx, |cb| {
        service.write_device(stale, vec![1], IO_TIMEOUT, cb)
    })
    .unwrap_err();
    let read_err = await_result(&service, &wake_rx, |cb| {
        service.read_device(stale, 64, IO_TIMEOUT, cb)
    })
    .unwrap_err();
    let close_err =
        await_result(&service, &wake_rx, |cb| service.close_device(stale, cb)).unwrap_err();

    for err in [open_err, write_err, read_err, close_err] {
        assert_eq!(err, ServiceError::UnknownCookie);
        assert_eq!(err.code(), -100);
    }
}

#[test]
fn open_write_read_round_trip() {
    let (transport, devices) = MockTransport::new();
    let device = MockDevice::vendor_device(identity(1), "S1");
    devices.add_device(device.clone());
    let (service, wake_rx) = start_service(transport);

    let cookie = list(&service, &wake_rx)[0].cookie;
    let handle = open(&service, &wake_rx, cookie).expect("open");

    let written = await_result(&service, &wake_rx, |cb| {
        service.write_device(handle, vec![1, 2, 3], IO_TIMEOUT, cb)
    })
    .expect("write");
    assert_eq!(written, 3);
    assert_eq!(device.io().out_log(), vec![vec![1, 2, 3]]);

    device.io().queue_in(vec![9, 8, 7]);
    let data = await_result(&service, &wake_rx, |cb| {
        service.read_device(handle, 64, IO_TIMEOUT, cb)
    })
    .expect("read");
    assert_eq!(data, vec![9, 8, 7]);

    await_result(&service, &wake_rx, |cb| service.close_device(handle, cb)).expect("close");
    let err = await_result(&service, &wake_rx, |cb| {
        service.write_device(handle, vec![0], IO_TIMEOUT, cb)
    })
    .unwrap_err();
    assert_eq!(err, ServiceError::UnknownCookie);
}

#[test]
fn open_retries_transient_claim_failures() {
    let (transport, devices) = MockTransport::new();
    let device = MockDevice::vendor_device(identity(1), "S1");
    device.fail_claims(2, TransportError::Busy);
    devices.add_device(device.clone());
    let (service, wake_rx) = start_service(transport);

    let cookie = list(&service, &wake_rx)[0].cookie;
    assert!(open(&service, &wake_rx, cookie).is_ok());
    assert_eq!(device.claim_attempts(), 3);
}

#[test]
fn open_gives_up_after_exhausting_retries() {
    let (transport, devices) = MockTransport::new();
    let device = MockDevice::vendor_device(identity(1), "S1");
    device.fail_claims(5, TransportError::Busy);
    devices.add_device(device.clone());
    let (service, wake_rx) = start_service(transport);

    let cookie = list(&service, &wake_rx)[0].cookie;
    assert_eq!(
        open(&service, &wake_rx, cookie).unwrap_err(),
        ServiceError::Transport(TransportError::Busy)
    );
    assert_eq!(device.claim_attempts(), 3);
}

#[test]
fn stalled_read_clears_the_in_endpoint_once() {
    let (transport, devices) = MockTransport::new();
    let device = MockDevice::vendor_device(identity(1), "S1");
    devices.add_device(device.clone());
    let (service, wake_rx) = start_service(transport);

    let cookie = list(&service, &wake_rx)[0].cookie;
    let handle = open(&service, &wake_rx, cookie).expect("open");

    device.io().queue_in_error(TransportError::Pipe);
    let err = await_result(&service, &wake_rx, |cb| {
        service.read_device(handle, 64, IO_TIMEOUT, cb)
    })
    .unwrap_err();
    // The stall itself is what the caller sees.
    assert_eq!(err, ServiceError::Transport(TransportError::Pipe));
    assert_eq!(device.io().clear_halt_log(), vec![0x81]);

    // The handle is still usable afterwards.
    device.io().queue_in(vec![5]);
    let data = await_result(&service, &wake_rx, |cb| {
        service.read_device(handle, 64, IO_TIMEOUT, cb)
    })
    .expect("read after recovery");
    assert_eq!(data, vec![5]);
}

#[test]
fn stalled_write_clears_the_out_endpoint() {
    let (transport, devices) = MockTransport::new();
    let device = MockDevice::vendor_device(identity(1), "S1");
    devices.add_device(device.clone());
    let (service, wake_rx) = start_service(transport);

    let cookie = list(&service, &wake_rx)[0].cookie;
    let handle = open(&service, &wake_rx, cookie).expect("open");

    device.io().queue_out(Err(TransportError::Pipe));
    let err = await_result(&service, &wake_rx, |cb| {
        service.write_device(handle, vec![1], IO_TIMEOUT, cb)
    })
    .unwrap_err();
    assert_eq!(err, ServiceError::Transport(TransportError::Pipe));
    assert_eq!(device.io().clear_halt_log(), vec![0x01]);
}

#[test]
fn failed_stall_recovery_on_a_gone_device_evicts_the_handle() {
    let (transport, devices) = MockTransport::new();
    let device = MockDevice::vendor_device(identity(1), "S1");
    devices.add_device(device.clone());
    let (service, wake_rx) = start_service(transport);

    let cookie = list(&service, &wake_rx)[0].cookie;
    let handle = open(&service, &wake_rx, cookie).expect("open");

    device.io().queue_in_error(TransportError::Pipe);
    device.io().queue_clear_halt(Err(TransportError::NoDevice));
    let err = await_result(&service, &wake_rx, |cb| {
        service.read_device(handle, 64, IO_TIMEOUT, cb)
    })
    .unwrap_err();
    assert_eq!(err, ServiceError::Transport(TransportError::Pipe));

    let err = await_result(&service, &wake_rx, |cb| {
        service.read_device(handle, 64, IO_TIMEOUT, cb)
    })
    .unwrap_err();
    assert_eq!(err, ServiceError::UnknownCookie);
}

#[test]
fn unplugged_device_evicts_the_handle() {
    let (transport, devices) = MockTransport::new();
    let device = MockDevice::vendor_device(identity(1), "S1");
    devices.add_device(device.clone());
    let (service, wake_rx) = start_service(transport);

    let cookie = list(&service, &wake_rx)[0].cookie;
    let handle = open(&service, &wake_rx, cookie).expect("open");

    device.io().queue_in_error(TransportError::NoDevice);
    let err = await_result(&service, &wake_rx, |cb| {
        service.read_device(handle, 64, IO_TIMEOUT, cb)
    })
    .unwrap_err();
    assert_eq!(err, ServiceError::Transport(TransportError::NoDevice));

    let err = await_result(&service, &wake_rx, |cb| {
        service.write_device(handle, vec![1], IO_TIMEOUT, cb)
    })
    .unwrap_err();
    assert_eq!(err, ServiceError::UnknownCookie);
}

#[test]
fn absent_device_loses_its_cookie_on_rescan() {
    let (transport, devices) = MockTransport::new();
    devices.add_device(MockDevice::vendor_device(identity(1), "S1"));
    let (service, wake_rx) = start_service(transport);

    let cookie = list(&service, &wake_rx)[0].cookie;
    devices.clear_devices();
    assert!(list(&service, &wake_rx).is_empty());
    assert_eq!(
        open(&service, &wake_rx, cookie).unwrap_err(),
        ServiceError::UnknownCookie
    );
}

#[test]
fn serial_failure_still_lists_the_device() {
    let (transport, devices) = MockTransport::new();
    let device = MockDevice::vendor_device(identity(1), "unused");
    device.fail_serial(TransportError::Access);
    devices.add_device(device);
    let (service, wake_rx) = start_service(transport);

    let listed = list(&service, &wake_rx);
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].serial, TransportError::Access.to_string());
}

#[test]
fn completions_are_delivered_in_submission_order() {
    let (transport, devices) = MockTransport::new();
    let device = MockDevice::vendor_device(identity(1), "S1");
    devices.add_device(device);
    let (service, wake_rx) = start_service(transport);

    let cookie = list(&service, &wake_rx)[0].cookie;
    let handle = open(&service, &wake_rx, cookie).expect("open");

    let order = Arc::new(Mutex::new(Vec::new()));
    for tag in 0..3usize {
        let order = Arc::clone(&order);
        service.write_device(
            handle,
            vec![tag as u8],
            IO_TIMEOUT,
            Box::new(move |_| order.lock().unwrap().push(tag)),
        );
    }

    while order.lock().unwrap().len() < 3 {
        wake_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("worker wake");
        service.process();
    }
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    assert_eq!(service.pending(), 0);
}

#[test]
fn shutdown_stops_the_worker() {
    let (transport, _devices) = MockTransport::new();
    let (mut service, _wake_rx) = start_service(transport);

    service.shutdown();
    // Idempotent, and safe to drop afterwards.
    service.shutdown();
}
