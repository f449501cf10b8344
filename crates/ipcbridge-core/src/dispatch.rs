use ipcbridge_link::{DataMessage, Transport};
use tracing::{debug, trace, warn};

use crate::bridge::Bridge;
use crate::buffer::SubscriberBuffer;
use crate::entry::{SubscriberEntry, SubscriberId};
use crate::error::{BridgeError, Result};
use crate::runtime::{ManagedRuntime, ManagedThread, ThreadAttachment};

/// Outcome of one [`Bridge::dispatch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Subscribers whose receive method returned normally.
    pub delivered: usize,
    /// Subscribers skipped or faulted.
    pub failed: usize,
}

impl<R: ManagedRuntime, T: Transport + 'static> Bridge<R, T> {
    /// Deliver `message` to every current subscriber.
    ///
    /// Runs on the calling thread, attaching it to the runtime for the
    /// duration if needed. Failures are logged per subscriber and never
    /// stop delivery to the others.
    pub fn dispatch(&self, message: &DataMessage) -> DispatchReport {
        let mut report = DispatchReport::default();
        let Some(runtime) = self.runtime.get() else {
            debug!(group = message.group, id = message.id, "no managed runtime; message dropped");
            return report;
        };
        let mut thread = match ThreadAttachment::acquire(runtime) {
            Ok(thread) => thread,
            Err(err) => {
                warn!(
                    group = message.group,
                    id = message.id,
                    err = %BridgeError::AttachFailed(err),
                    "message dropped"
                );
                return report;
            }
        };

        let snapshot = self.registry.snapshot();
        for (id, entry) in &snapshot {
            match self.deliver(&mut *thread, *id, entry, message) {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(
                        subscriber = %id,
                        group = message.group,
                        id = message.id,
                        %err,
                        "delivery to subscriber failed"
                    );
                }
            }
        }
        // Release snapshot references while still attached.
        drop(snapshot);
        trace!(
            delivered = report.delivered,
            failed = report.failed,
            "message dispatched"
        );
        report
    }

    fn deliver(
        &self,
        thread: &mut R::Thread<'_>,
        id: SubscriberId,
        entry: &SubscriberEntry<R>,
        message: &DataMessage,
    ) -> Result<()> {
        let payload = message.payload.as_ref();
        let mut buffer = entry.buffer().clone();

        if let Some(target) = buffer.growth_target(payload.len(), self.config.max_buffer_capacity) {
            let grown = SubscriberBuffer::allocate(thread, target).map_err(|source| {
                BridgeError::BufferAllocation {
                    size: target,
                    source,
                }
            })?;
            debug!(
                subscriber = %id,
                from = buffer.capacity(),
                to = target,
                "subscriber buffer grown"
            );
            self.registry.replace_buffer(id, &buffer, grown.clone());
            buffer = grown;
        }

        let len = buffer.copy_len(payload.len());
        if len < payload.len() {
            debug!(
                subscriber = %id,
                size = payload.len(),
                capacity = buffer.capacity(),
                "message truncated to buffer capacity"
            );
        }
        thread
            .write_buffer(buffer.array(), &payload[..len])
            .map_err(BridgeError::BufferWrite)?;
        thread
            .invoke(
                entry.handle(),
                entry.method(),
                message.group,
                message.id,
                buffer.array(),
            )
            .map_err(BridgeError::SubscriberFault)
    }
}
