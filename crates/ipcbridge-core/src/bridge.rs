use std::sync::{Arc, OnceLock, Weak};

use ipcbridge_link::{DataMessage, MessageCallback, Transport};
use tracing::{debug, info, warn};

use crate::buffer::SubscriberBuffer;
use crate::config::BridgeConfig;
use crate::entry::{SubscriberEntry, SubscriberId};
use crate::error::{BridgeError, Result};
use crate::registry::{Activation, SubscriberRegistry};
use crate::runtime::{ManagedRuntime, ManagedThread, ThreadAttachment};

/// Whether the dispatch callback is installed on the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// No subscribers; the transport does not call into the bridge.
    Inactive,
    /// At least one subscriber; inbound messages are dispatched.
    Active,
}

/// Connects subscribers living in a managed runtime to a [`Transport`].
///
/// Created inactive and without a runtime. [`init`](Bridge::init) captures
/// the runtime; the first [`register`](Bridge::register) installs the
/// dispatch callback, and removing the last subscriber uninstalls it.
pub struct Bridge<R: ManagedRuntime, T: Transport + 'static> {
    pub(crate) transport: T,
    pub(crate) config: BridgeConfig,
    pub(crate) runtime: OnceLock<R>,
    pub(crate) registry: SubscriberRegistry<R>,
    callback: MessageCallback,
}

struct TransportHook<'a, T: Transport> {
    transport: &'a T,
    callback: &'a MessageCallback,
    name: &'a str,
}

impl<T: Transport> Activation for TransportHook<'_, T> {
    fn activate(&self) {
        self.transport
            .register_callback(self.name, Arc::clone(self.callback));
        info!(callback = self.name, "dispatch callback installed");
    }

    fn deactivate(&self) {
        self.transport.unregister_callback(self.callback);
        info!(callback = self.name, "no subscribers left; dispatch callback removed");
    }
}

impl<R: ManagedRuntime, T: Transport + 'static> Bridge<R, T> {
    pub fn new(transport: T, config: BridgeConfig) -> Arc<Self> {
        Arc::new_cyclic(|bridge: &Weak<Self>| {
            let bridge = bridge.clone();
            let callback: MessageCallback = Arc::new(move |message: &DataMessage| {
                if let Some(bridge) = bridge.upgrade() {
                    bridge.dispatch(message);
                }
            });
            Self {
                transport,
                config,
                runtime: OnceLock::new(),
                registry: SubscriberRegistry::new(),
                callback,
            }
        })
    }

    /// Capture the managed runtime. Returns false if one was already set;
    /// the first runtime is kept.
    pub fn init(&self, runtime: R) -> bool {
        let stored = self.runtime.set(runtime).is_ok();
        if stored {
            debug!("managed runtime captured");
        } else {
            debug!("managed runtime already captured; keeping the first");
        }
        stored
    }

    pub fn runtime(&self) -> Option<&R> {
        self.runtime.get()
    }

    /// Subscribe `object` under `id`, replacing any previous subscriber with
    /// that identity.
    ///
    /// Nothing changes if the receive method cannot be resolved or the
    /// initial buffer cannot be allocated.
    pub fn register(&self, id: SubscriberId, object: R::Object) -> Result<()> {
        let runtime = self.runtime.get().ok_or(BridgeError::NotInitialized)?;
        let mut thread = ThreadAttachment::acquire(runtime).map_err(BridgeError::AttachFailed)?;

        let (class, method) = thread
            .resolve_receiver(&object)
            .map_err(BridgeError::MethodResolution)?;
        let capacity = self.config.initial_buffer_capacity;
        let buffer = SubscriberBuffer::allocate(&mut *thread, capacity).map_err(|source| {
            BridgeError::BufferAllocation {
                size: capacity,
                source,
            }
        })?;

        let entry = SubscriberEntry::new(object, class, method, buffer);
        if self.registry.insert(id, entry, &self.hook()) {
            debug!(subscriber = %id, "subscriber replaced");
        } else {
            debug!(subscriber = %id, "subscriber registered");
        }
        Ok(())
    }

    /// Like [`register`](Bridge::register), logging failures instead of
    /// returning them.
    pub fn register_or_log(&self, id: SubscriberId, object: R::Object) {
        if let Err(err) = self.register(id, object) {
            warn!(subscriber = %id, %err, "subscriber not registered");
        }
    }

    /// Drop the subscriber with `id`. Returns false if there was none.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        let removed = self.registry.remove(id, &self.hook());
        if removed {
            debug!(subscriber = %id, "subscriber unregistered");
        }
        removed
    }

    /// Drop every subscriber and uninstall the dispatch callback.
    pub fn shutdown(&self) -> usize {
        let removed = self.registry.clear(&self.hook());
        debug!(removed, "bridge shut down");
        removed
    }

    pub fn state(&self) -> BridgeState {
        if self.registry.is_active() {
            BridgeState::Active
        } else {
            BridgeState::Inactive
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }

    pub fn is_registered(&self, id: SubscriberId) -> bool {
        self.registry.contains(id)
    }

    /// Registered identities in ascending order.
    pub fn subscriber_ids(&self) -> Vec<SubscriberId> {
        let mut ids: Vec<SubscriberId> = self
            .registry
            .snapshot()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// First identity, in ascending order, whose subscriber satisfies
    /// `matches`.
    ///
    /// Runs on a snapshot, so `matches` may call into the runtime.
    pub fn find_subscriber(
        &self,
        mut matches: impl FnMut(SubscriberId, &R::Object) -> bool,
    ) -> Option<SubscriberId> {
        let mut entries = self.registry.snapshot();
        entries.sort_unstable_by_key(|(id, _)| *id);
        entries
            .iter()
            .find(|(id, entry)| matches(*id, entry.handle()))
            .map(|(id, _)| *id)
    }

    /// Current buffer capacity of subscriber `id`.
    pub fn buffer_capacity(&self, id: SubscriberId) -> Option<usize> {
        self.registry.buffer_capacity(id)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// The callback handed to the transport while active.
    pub fn callback(&self) -> &MessageCallback {
        &self.callback
    }

    fn hook(&self) -> TransportHook<'_, T> {
        TransportHook {
            transport: &self.transport,
            callback: &self.callback,
            name: &self.config.callback_name,
        }
    }
}

impl<R: ManagedRuntime, T: Transport + 'static> Drop for Bridge<R, T> {
    fn drop(&mut self) {
        if self.registry.is_active() {
            self.transport.unregister_callback(&self.callback);
        }
    }
}
