//! FIFO queues bridging the host thread and the USB worker thread
//!
//! Two independent queue instances exist at runtime: one carrying work items
//! host -> worker and one carrying completions worker -> host. Each queue may
//! carry a notify hook that runs after every push; the completion queue uses
//! it to poke the completion relay.
//!
//! `push` never blocks (the underlying channel is unbounded), `pop` blocks
//! until an item arrives, `pop_nowait` returns immediately.

use std::sync::Arc;

/// Sending half of a queue
pub struct QueueSender<T> {
    tx: async_channel::Sender<T>,
    notify: Option<Arc<dyn Fn() + Send + Sync>>,
}

// Derived Clone would require T: Clone.
impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            notify: self.notify.clone(),
        }
    }
}

impl<T> QueueSender<T> {
    /// Enqueue an item and run the notify hook
    ///
    /// Fails only when the receiving half is gone.
    pub fn push(&self, item: T) -> crate::Result<()> {
        self.tx
            .try_send(item)
            .map_err(|e| crate::Error::Channel(e.to_string()))?;
        if let Some(notify) = &self.notify {
            notify();
        }
        Ok(())
    }
}

/// Receiving half of a queue
pub struct QueueReceiver<T> {
    rx: async_channel::Receiver<T>,
}

impl<T> QueueReceiver<T> {
    /// Dequeue the oldest item, blocking the calling thread until one arrives
    pub fn pop(&self) -> crate::Result<T> {
        self.rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Dequeue the oldest item if one is already queued
    pub fn pop_nowait(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

/// Create a queue without a notify hook
pub fn queue<T>() -> (QueueSender<T>, QueueReceiver<T>) {
    let (tx, rx) = async_channel::unbounded();
    (QueueSender { tx, notify: None }, QueueReceiver { rx })
}

/// Create a queue whose notify hook runs after every push
pub fn queue_with_notify<T>(
    notify: impl Fn() + Send + Sync + 'static,
) -> (QueueSender<T>, QueueReceiver<T>) {
    let (tx, rx) = async_channel::unbounded();
    (
        QueueSender {
            tx,
            notify: Some(Arc::new(notify)),
        },
        QueueReceiver { rx },
    )
}
