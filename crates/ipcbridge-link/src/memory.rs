use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use ipcbridge_frame::DataMessage;

use crate::callbacks::CallbackSet;
use crate::transport::{MessageCallback, Transport};

/// A message handed to [`MemoryTransport`] for sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub message: DataMessage,
    /// `None` for immediate sends.
    pub delay: Option<Duration>,
}

/// In-process link.
///
/// Outbound messages are recorded instead of transmitted, and inbound
/// messages are injected with [`deliver`](MemoryTransport::deliver) on the
/// caller's thread.
#[derive(Default)]
pub struct MemoryTransport {
    callbacks: CallbackSet,
    outbox: Mutex<Vec<Outbound>>,
    registrations: AtomicUsize,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every registered callback with `message`. Returns how many completed.
    pub fn deliver(&self, message: &DataMessage) -> usize {
        self.callbacks.emit(message)
    }

    /// Snapshot of everything sent so far.
    pub fn sent(&self) -> Vec<Outbound> {
        self.outbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drain the recorded outbound messages.
    pub fn take_sent(&self) -> Vec<Outbound> {
        std::mem::take(&mut *self.outbox.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Currently registered callbacks.
    pub fn callback_count(&self) -> usize {
        self.callbacks.len()
    }

    /// Successful registrations over the transport's lifetime.
    pub fn registration_count(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    fn record(&self, message: DataMessage, delay: Option<Duration>) {
        self.outbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Outbound { message, delay });
    }
}

impl Transport for MemoryTransport {
    fn register_callback(&self, name: &str, callback: MessageCallback) {
        if self.callbacks.register(name, callback) {
            self.registrations.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn unregister_callback(&self, callback: &MessageCallback) {
        self.callbacks.unregister(callback);
    }

    fn send(&self, message: DataMessage) {
        self.record(message, None);
    }

    fn send_delayed(&self, message: DataMessage, delay: Duration) {
        self.record(message, Some(delay));
    }
}
