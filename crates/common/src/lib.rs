//! Common utilities for bulkusb
//!
//! This crate provides the thread-bridging primitives shared by the host
//! side and the USB worker thread: the FIFO work queues, the wake-coalescing
//! completion relay, error handling, and logging setup.

pub mod channel;
pub mod error;
pub mod logging;
pub mod relay;

pub use channel::{QueueReceiver, QueueSender, queue, queue_with_notify};
pub use error::{Error, Result};
pub use logging::setup_logging;
pub use relay::{CompletionRelay, WakeHandle};
