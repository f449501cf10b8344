use std::time::Duration;

use ipcbridge_link::{DataMessage, Transport};
use tracing::trace;

use crate::bridge::Bridge;
use crate::runtime::ManagedRuntime;

impl<R: ManagedRuntime, T: Transport + 'static> Bridge<R, T> {
    /// Hand a message to the transport for immediate delivery.
    ///
    /// Fire-and-forget: the bridge neither buffers nor retries.
    pub fn send(&self, group: u8, id: u8, payload: &[u8]) {
        trace!(group, id, size = payload.len(), "send");
        self.transport
            .send(DataMessage::copy_from(group, id, payload));
    }

    /// Hand a message to the transport for delivery after `delay`.
    pub fn send_delayed(&self, group: u8, id: u8, payload: &[u8], delay: Duration) {
        trace!(group, id, size = payload.len(), ?delay, "send delayed");
        self.transport
            .send_delayed(DataMessage::copy_from(group, id, payload), delay);
    }

    /// [`send_delayed`](Bridge::send_delayed) with a millisecond delay as
    /// passed by managed callers; negative values mean no delay.
    pub fn send_delayed_ms(&self, group: u8, id: u8, payload: &[u8], delay_ms: i32) {
        let delay = Duration::from_millis(u64::try_from(delay_ms).unwrap_or(0));
        self.send_delayed(group, id, payload, delay);
    }
}
