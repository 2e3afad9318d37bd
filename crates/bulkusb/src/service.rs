//! Host-side service facade
//!
//! Owns the worker thread and the two queues connecting it to the host.
//! Commands are fire-and-forget pushes with a result callback; finished
//! work is delivered by calling [`DeviceService::process`] from whatever
//! thread the embedder wakes on. The wake signal itself comes from a
//! [`CompletionRelay`], so the embedder only pays for a wake resource while
//! completions are actually outstanding.

use crate::config::ServiceConfig;
use crate::registry::DeviceRegistry;
use crate::transport::Transport;
use crate::worker::{Callback, Completion, UsbWorker, WorkItem};
use common::{CompletionRelay, QueueReceiver, QueueSender, WakeHandle, queue, queue_with_notify};
use protocol::{DeviceCookie, DeviceInfo, HandleCookie};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Handle to a running USB worker
pub struct DeviceService {
    commands: QueueSender<WorkItem>,
    completions: QueueReceiver<Completion>,
    relay: Arc<CompletionRelay>,
    worker: Option<thread::JoinHandle<()>>,
}

impl DeviceService {
    /// Start the worker thread with default configuration
    pub fn start(
        transport: Box<dyn Transport>,
        wake_factory: impl Fn() -> Box<dyn WakeHandle> + Send + Sync + 'static,
    ) -> common::Result<Self> {
        Self::with_config(transport, wake_factory, ServiceConfig::default())
    }

    /// Start the worker thread
    pub fn with_config(
        transport: Box<dyn Transport>,
        wake_factory: impl Fn() -> Box<dyn WakeHandle> + Send + Sync + 'static,
        config: ServiceConfig,
    ) -> common::Result<Self> {
        let relay = Arc::new(CompletionRelay::new(wake_factory));
        let (commands_tx, commands_rx) = queue();
        let notify_relay = Arc::clone(&relay);
        let (completions_tx, completions_rx) =
            queue_with_notify(move || notify_relay.send());

        let registry = DeviceRegistry::new(config.open_retry);
        let worker = UsbWorker::new(transport, registry, commands_rx, completions_tx);
        let handle = thread::Builder::new()
            .name("bulkusb-worker".into())
            .spawn(move || worker.run())
            .map_err(|e| common::Error::Config(format!("Failed to spawn worker: {e}")))?;

        Ok(Self {
            commands: commands_tx,
            completions: completions_rx,
            relay,
            worker: Some(handle),
        })
    }

    /// Enumerate devices; the callback fires from [`process`](Self::process)
    pub fn list_devices(&self, reply: Callback<Vec<DeviceInfo>>) {
        self.submit(WorkItem::ListDevices { reply });
    }

    /// Open a device and claim its vendor interface
    pub fn open_device(&self, cookie: DeviceCookie, reply: Callback<HandleCookie>) {
        self.submit(WorkItem::OpenDevice { cookie, reply });
    }

    /// Bulk OUT transfer on an open handle
    pub fn write_device(
        &self,
        handle: HandleCookie,
        data: Vec<u8>,
        timeout: Duration,
        reply: Callback<usize>,
    ) {
        self.submit(WorkItem::WriteDevice {
            handle,
            data,
            timeout,
            reply,
        });
    }

    /// Bulk IN transfer on an open handle
    pub fn read_device(
        &self,
        handle: HandleCookie,
        max_len: usize,
        timeout: Duration,
        reply: Callback<Vec<u8>>,
    ) {
        self.submit(WorkItem::ReadDevice {
            handle,
            max_len,
            timeout,
            reply,
        });
    }

    /// Release an open handle
    pub fn close_device(&self, handle: HandleCookie, reply: Callback<()>) {
        self.submit(WorkItem::CloseDevice { handle, reply });
    }

    /// The ref must exist before the worker can possibly complete the item,
    /// otherwise a fast completion could find the relay without a wake
    /// handle.
    fn submit(&self, item: WorkItem) {
        self.relay.add_ref();
        if self.commands.push(item).is_err() {
            // Worker is gone; the item never ran, so take the ref back.
            warn!("Command queue closed, dropping work item");
            self.relay.retire(1);
        }
    }

    /// Drain and deliver every finished completion; returns how many ran
    pub fn process(&self) -> usize {
        let mut processed = 0;
        while let Some(completion) = self.completions.pop_nowait() {
            debug!(name = completion.name(), "Delivering completion");
            completion.deliver();
            processed += 1;
        }
        if processed > 0 {
            self.relay.retire(processed);
        }
        processed
    }

    /// Completions accepted but not yet delivered
    pub fn pending(&self) -> usize {
        self.relay.outstanding()
    }

    /// Stop the worker thread and wait for it to exit
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.worker.take() {
            if self.commands.push(WorkItem::Shutdown).is_err() {
                debug!("Worker already stopped");
            }
            if handle.join().is_err() {
                warn!("Worker thread panicked");
            }
        }
    }
}

impl Drop for DeviceService {
    fn drop(&mut self) {
        self.shutdown();
    }
}
