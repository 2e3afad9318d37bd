//! USB worker thread
//!
//! All transport access happens on one dedicated thread. Hosts push
//! [`WorkItem`]s onto the command queue; the worker executes each in order
//! and pushes exactly one [`Completion`] per command onto the completion
//! queue. Completions carry the caller's callback, so results are delivered
//! on whichever thread drains the completion queue.

use crate::error::ServiceError;
use crate::registry::DeviceRegistry;
use crate::transport::{BulkChannel, Transport, TransportError};
use common::{QueueReceiver, QueueSender};
use protocol::{DeviceCookie, DeviceInfo, HandleCookie};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result callback carried through a work item
pub type Callback<T> = Box<dyn FnOnce(Result<T, ServiceError>) + Send>;

/// One command for the worker thread
pub enum WorkItem {
    ListDevices {
        reply: Callback<Vec<DeviceInfo>>,
    },
    OpenDevice {
        cookie: DeviceCookie,
        reply: Callback<HandleCookie>,
    },
    WriteDevice {
        handle: HandleCookie,
        data: Vec<u8>,
        timeout: Duration,
        reply: Callback<usize>,
    },
    ReadDevice {
        handle: HandleCookie,
        max_len: usize,
        timeout: Duration,
        reply: Callback<Vec<u8>>,
    },
    CloseDevice {
        handle: HandleCookie,
        reply: Callback<()>,
    },
    /// Stop the worker loop after draining nothing further
    Shutdown,
}

/// One finished command, ready for delivery on the host side
pub struct Completion {
    name: &'static str,
    thunk: Box<dyn FnOnce() + Send>,
}

impl Completion {
    /// Outcome label, mostly for logs
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Run the caller's callback with the result
    pub fn deliver(self) {
        (self.thunk)()
    }
}

/// Direction of the transfer that failed, for stall recovery
#[derive(Clone, Copy)]
enum Direction {
    Out,
    In,
}

/// The worker thread's state: the transport and everything it owns
pub struct UsbWorker {
    transport: Box<dyn Transport>,
    registry: DeviceRegistry,
    commands: QueueReceiver<WorkItem>,
    completions: QueueSender<Completion>,
}

impl UsbWorker {
    pub fn new(
        transport: Box<dyn Transport>,
        registry: DeviceRegistry,
        commands: QueueReceiver<WorkItem>,
        completions: QueueSender<Completion>,
    ) -> Self {
        Self {
            transport,
            registry,
            commands,
            completions,
        }
    }

    /// Block on the command queue until shutdown or queue closure
    pub fn run(mut self) {
        info!("USB worker started");
        while let Ok(item) = self.commands.pop() {
            if matches!(item, WorkItem::Shutdown) {
                debug!("Shutdown requested");
                break;
            }
            self.handle(item);
        }
        info!("USB worker stopped");
    }

    fn handle(&mut self, item: WorkItem) {
        match item {
            WorkItem::ListDevices { reply } => {
                let result = self.registry.list_devices(self.transport.as_mut());
                let name = outcome_name(&result, OpNames::LIST_DEVICES);
                self.complete(name, reply, result);
            }
            WorkItem::OpenDevice { cookie, reply } => {
                let result = self.registry.open_device(cookie);
                let name = outcome_name(&result, OpNames::OPEN_DEVICE);
                self.complete(name, reply, result);
            }
            WorkItem::WriteDevice {
                handle,
                data,
                timeout,
                reply,
            } => {
                let result = self.write_device(handle, &data, timeout);
                let name = outcome_name(&result, OpNames::WRITE_DEVICE);
                self.complete(name, reply, result);
            }
            WorkItem::ReadDevice {
                handle,
                max_len,
                timeout,
                reply,
            } => {
                let result = self.read_device(handle, max_len, timeout);
                let name = outcome_name(&result, OpNames::READ_DEVICE);
                self.complete(name, reply, result);
            }
            WorkItem::CloseDevice { handle, reply } => {
                let result = if self.registry.close_device(handle) {
                    Ok(())
                } else {
                    Err(ServiceError::UnknownCookie)
                };
                let name = outcome_name(&result, OpNames::CLOSE_DEVICE);
                self.complete(name, reply, result);
            }
            WorkItem::Shutdown => {}
        }
    }

    fn write_device(
        &mut self,
        handle: HandleCookie,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, ServiceError> {
        let Some(endpoint) = self.registry.endpoint_mut(handle) else {
            return Err(ServiceError::UnknownCookie);
        };
        match endpoint.out(data, timeout) {
            Ok(n) => Ok(n),
            Err(err) => {
                self.recover(handle, &err, Direction::Out);
                Err(err.into())
            }
        }
    }

    fn read_device(
        &mut self,
        handle: HandleCookie,
        max_len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, ServiceError> {
        let Some(endpoint) = self.registry.endpoint_mut(handle) else {
            return Err(ServiceError::UnknownCookie);
        };
        let mut buf = vec![0u8; max_len];
        match endpoint.read(&mut buf, timeout) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(err) => {
                self.recover(handle, &err, Direction::In);
                Err(err.into())
            }
        }
    }

    /// Clean up after a failed transfer; the original error is always the
    /// one surfaced to the caller
    fn recover(&mut self, handle: HandleCookie, err: &TransportError, direction: Direction) {
        match err {
            TransportError::Pipe => {
                let Some(endpoint) = self.registry.endpoint_mut(handle) else {
                    return;
                };
                let cleared = match direction {
                    Direction::Out => endpoint.clear_halt_out(),
                    Direction::In => endpoint.clear_halt_in(),
                };
                match cleared {
                    Ok(()) => debug!(handle = handle.0, "Cleared endpoint halt"),
                    Err(TransportError::NoDevice) => self.registry.evict_handle(handle),
                    Err(e) => warn!(handle = handle.0, "Clear halt failed: {}", e),
                }
            }
            TransportError::NoDevice => self.registry.evict_handle(handle),
            _ => {}
        }
    }

    fn complete<T: Send + 'static>(
        &self,
        name: &'static str,
        reply: Callback<T>,
        result: Result<T, ServiceError>,
    ) {
        let completion = Completion {
            name,
            thunk: Box::new(move || reply(result)),
        };
        if self.completions.push(completion).is_err() {
            // Host side is gone; the result has nowhere to go.
            warn!(name, "Dropping completion, queue closed");
        }
    }
}

/// Completion labels for one operation, picked by outcome
struct OpNames {
    ok: &'static str,
    unknown_cookie: &'static str,
    err: &'static str,
}

impl OpNames {
    const LIST_DEVICES: Self = Self {
        ok: "list_devices reply",
        unknown_cookie: "list_devices error",
        err: "list_devices error",
    };
    const OPEN_DEVICE: Self = Self {
        ok: "open_device reply",
        unknown_cookie: "open_device unknown cookie",
        err: "open_device error",
    };
    const WRITE_DEVICE: Self = Self {
        ok: "write_device reply",
        unknown_cookie: "write_device unknown cookie",
        err: "write_device error",
    };
    const READ_DEVICE: Self = Self {
        ok: "read_device reply",
        unknown_cookie: "read_device unknown cookie",
        err: "read_device error",
    };
    const CLOSE_DEVICE: Self = Self {
        ok: "close_device reply",
        unknown_cookie: "close_device unknown cookie",
        err: "close_device error",
    };
}

fn outcome_name<T>(result: &Result<T, ServiceError>, names: OpNames) -> &'static str {
    match result {
        Ok(_) => names.ok,
        Err(ServiceError::UnknownCookie) => names.unknown_cookie,
        Err(_) => names.err,
    }
}
