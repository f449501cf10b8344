use std::sync::Arc;
use std::time::Duration;

use ipcbridge_frame::DataMessage;

/// Callback invoked by a transport for every inbound message.
///
/// Runs on a transport-owned thread; the message is only borrowed for the
/// duration of the call.
pub type MessageCallback = Arc<dyn Fn(&DataMessage) + Send + Sync>;

/// Compare two callbacks by allocation, ignoring vtable identity.
pub fn same_callback(a: &MessageCallback, b: &MessageCallback) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// The native IPC link.
///
/// All operations are infallible from the caller's point of view: delivery
/// failures are the transport's own concern and are logged where they occur.
pub trait Transport: Send + Sync {
    /// Start delivering inbound messages to `callback`.
    ///
    /// Registering the same callback twice is a no-op.
    fn register_callback(&self, name: &str, callback: MessageCallback);

    /// Stop delivering to `callback`. Unknown callbacks are ignored.
    fn unregister_callback(&self, callback: &MessageCallback);

    /// Hand `message` to the link for immediate delivery.
    fn send(&self, message: DataMessage);

    /// Hand `message` to the link for delivery once `delay` has elapsed.
    fn send_delayed(&self, message: DataMessage, delay: Duration);
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn register_callback(&self, name: &str, callback: MessageCallback) {
        (**self).register_callback(name, callback);
    }

    fn unregister_callback(&self, callback: &MessageCallback) {
        (**self).unregister_callback(callback);
    }

    fn send(&self, message: DataMessage) {
        (**self).send(message);
    }

    fn send_delayed(&self, message: DataMessage, delay: Duration) {
        (**self).send_delayed(message, delay);
    }
}
