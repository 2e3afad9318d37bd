//! Host-side access to HLink bulk USB devices
//!
//! The crate is split along the thread boundary. A single worker thread
//! owns the USB transport, the device registry and every open endpoint
//! claim; the host talks to it through [`DeviceService`], which queues
//! commands and delivers results as callbacks when the embedder drains the
//! completion queue. On top of a claimed endpoint pair, [`Hlink`] speaks
//! the framed HLink application protocol.
//!
//! ```no_run
//! use bulkusb::{DeviceService, transport::RusbTransport};
//! use bulkusb::testing::ChannelWake;
//! use std::sync::mpsc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let (wake_tx, wake_rx) = mpsc::channel();
//! let transport = RusbTransport::new()?;
//! let service = DeviceService::start(Box::new(transport), move || {
//!     Box::new(ChannelWake::new(wake_tx.clone()))
//! })?;
//!
//! service.list_devices(Box::new(|devices| {
//!     for info in devices.unwrap_or_default() {
//!         println!("{:04x}:{:04x} {}", info.vendor_id, info.product_id, info.serial);
//!     }
//! }));
//!
//! wake_rx.recv()?;
//! service.process();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod hlink;
pub mod registry;
pub mod service;
pub mod testing;
pub mod transport;
pub mod worker;

pub use config::{HlinkConfig, OpenRetryPolicy, ServiceConfig};
pub use error::ServiceError;
pub use hlink::{Hlink, HlinkError, Subscription};
pub use registry::DeviceRegistry;
pub use service::DeviceService;
pub use transport::{BulkChannel, Transport, TransportError};
pub use worker::{Callback, Completion, WorkItem};
