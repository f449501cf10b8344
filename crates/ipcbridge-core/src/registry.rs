use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::buffer::SubscriberBuffer;
use crate::entry::{SubscriberEntry, SubscriberId};
use crate::runtime::ManagedRuntime;

/// Transitions run when the registry stops or starts being empty.
///
/// Called with the registry lock held, so activation always agrees with the
/// registry contents.
pub trait Activation {
    fn activate(&self);
    fn deactivate(&self);
}

struct RegistryState<R: ManagedRuntime> {
    entries: HashMap<SubscriberId, SubscriberEntry<R>>,
    active: bool,
}

/// Subscribers keyed by identity, with at most one entry per identity.
///
/// Entries that leave the registry are dropped after the lock is released.
pub struct SubscriberRegistry<R: ManagedRuntime> {
    state: Mutex<RegistryState<R>>,
}

impl<R: ManagedRuntime> Default for SubscriberRegistry<R> {
    fn default() -> Self {
        Self {
            state: Mutex::new(RegistryState {
                entries: HashMap::new(),
                active: false,
            }),
        }
    }
}

impl<R: ManagedRuntime> SubscriberRegistry<R> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState<R>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install `entry`, replacing any entry with the same identity.
    ///
    /// Returns true if an entry was replaced.
    pub fn insert(&self, id: SubscriberId, entry: SubscriberEntry<R>, hook: &dyn Activation) -> bool {
        let replaced = {
            let mut state = self.lock();
            let replaced = state.entries.insert(id, entry);
            if !state.active {
                hook.activate();
                state.active = true;
            }
            replaced
        };
        replaced.is_some()
    }

    /// Remove the entry for `id`. Returns true if one was present.
    pub fn remove(&self, id: SubscriberId, hook: &dyn Activation) -> bool {
        let removed = {
            let mut state = self.lock();
            let removed = state.entries.remove(&id);
            if state.entries.is_empty() && state.active {
                hook.deactivate();
                state.active = false;
            }
            removed
        };
        removed.is_some()
    }

    /// Remove every entry. Returns how many were removed.
    pub fn clear(&self, hook: &dyn Activation) -> usize {
        let drained: Vec<SubscriberEntry<R>> = {
            let mut state = self.lock();
            let drained = state.entries.drain().map(|(_, entry)| entry).collect();
            if state.active {
                hook.deactivate();
                state.active = false;
            }
            drained
        };
        drained.len()
    }

    /// Shallow copies of every entry.
    pub fn snapshot(&self) -> Vec<(SubscriberId, SubscriberEntry<R>)> {
        self.lock()
            .entries
            .iter()
            .map(|(id, entry)| (*id, entry.clone()))
            .collect()
    }

    /// Swap in `grown` if `id` still holds `previous`.
    ///
    /// Returns false when the entry was removed or replaced in the meantime;
    /// the grown buffer is then only used by the caller.
    pub fn replace_buffer(
        &self,
        id: SubscriberId,
        previous: &SubscriberBuffer<R>,
        grown: SubscriberBuffer<R>,
    ) -> bool {
        let old = {
            let mut state = self.lock();
            match state.entries.get_mut(&id) {
                Some(entry) if entry.buffer.same_array(previous) => {
                    Some(std::mem::replace(&mut entry.buffer, grown))
                }
                _ => None,
            }
        };
        if old.is_none() {
            debug!(subscriber = %id, "subscriber changed during dispatch; grown buffer not kept");
        }
        old.is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True while the dispatch callback is installed.
    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.lock().entries.contains_key(&id)
    }

    pub fn buffer_capacity(&self, id: SubscriberId) -> Option<usize> {
        self.lock()
            .entries
            .get(&id)
            .map(|entry| entry.buffer.capacity())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::local::{LocalRuntime, ReceiveError};
    use crate::runtime::ManagedThread;

    #[derive(Default)]
    struct CountingHook {
        activations: AtomicUsize,
        deactivations: AtomicUsize,
    }

    impl Activation for CountingHook {
        fn activate(&self) {
            self.activations.fetch_add(1, Ordering::SeqCst);
        }

        fn deactivate(&self) {
            self.deactivations.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn entry(runtime: &LocalRuntime) -> SubscriberEntry<LocalRuntime> {
        let object = runtime.object(|_: u8, _: u8, _: &[u8]| -> Result<(), ReceiveError> { Ok(()) });
        let mut thread = runtime.attach_current_thread().unwrap();
        let (class, method) = thread.resolve_receiver(&object).unwrap();
        let buffer = SubscriberBuffer::allocate(&mut thread, 1024).unwrap();
        SubscriberEntry::new(object, class, method, buffer)
    }

    #[test]
    fn activation_follows_emptiness() {
        let runtime = LocalRuntime::new();
        let registry = SubscriberRegistry::new();
        let hook = CountingHook::default();

        registry.insert(SubscriberId(1), entry(&runtime), &hook);
        registry.insert(SubscriberId(2), entry(&runtime), &hook);
        assert!(registry.is_active());
        assert_eq!(hook.activations.load(Ordering::SeqCst), 1);

        registry.remove(SubscriberId(1), &hook);
        assert!(registry.is_active());
        registry.remove(SubscriberId(2), &hook);
        assert!(!registry.is_active());
        assert_eq!(hook.deactivations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn replacing_releases_previous_references() {
        let runtime = LocalRuntime::new();
        let registry = SubscriberRegistry::new();
        let hook = CountingHook::default();

        assert!(!registry.insert(SubscriberId(7), entry(&runtime), &hook));
        let after_first = runtime.live_refs();
        assert!(registry.insert(SubscriberId(7), entry(&runtime), &hook));
        assert_eq!(registry.len(), 1);
        assert_eq!(runtime.live_refs(), after_first);

        registry.remove(SubscriberId(7), &hook);
        assert_eq!(runtime.live_refs(), 0);
    }

    #[test]
    fn removing_absent_identity_is_noop() {
        let registry = SubscriberRegistry::<LocalRuntime>::new();
        let hook = CountingHook::default();
        assert!(!registry.remove(SubscriberId(3), &hook));
        assert_eq!(hook.deactivations.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn snapshot_keeps_references_alive() {
        let runtime = LocalRuntime::new();
        let registry = SubscriberRegistry::new();
        let hook = CountingHook::default();
        registry.insert(SubscriberId(1), entry(&runtime), &hook);

        let snapshot = registry.snapshot();
        registry.remove(SubscriberId(1), &hook);
        assert_eq!(runtime.live_refs(), 3);
        drop(snapshot);
        assert_eq!(runtime.live_refs(), 0);
    }

    #[test]
    fn stale_growth_is_not_written_back() {
        let runtime = LocalRuntime::new();
        let registry = SubscriberRegistry::new();
        let hook = CountingHook::default();
        registry.insert(SubscriberId(1), entry(&runtime), &hook);
        let seen = registry.snapshot().remove(0).1.buffer().clone();

        registry.insert(SubscriberId(1), entry(&runtime), &hook);
        let mut thread = runtime.attach_current_thread().unwrap();
        let grown = SubscriberBuffer::allocate(&mut thread, 4096).unwrap();
        assert!(!registry.replace_buffer(SubscriberId(1), &seen, grown));
        assert_eq!(registry.buffer_capacity(SubscriberId(1)), Some(1024));

        let current = registry.snapshot().remove(0).1.buffer().clone();
        let grown = SubscriberBuffer::allocate(&mut thread, 4096).unwrap();
        assert!(registry.replace_buffer(SubscriberId(1), &current, grown));
        assert_eq!(registry.buffer_capacity(SubscriberId(1)), Some(4096));
    }

    #[test]
    fn clear_drains_and_deactivates() {
        let runtime = LocalRuntime::new();
        let registry = SubscriberRegistry::new();
        let hook = CountingHook::default();
        registry.insert(SubscriberId(1), entry(&runtime), &hook);
        registry.insert(SubscriberId(2), entry(&runtime), &hook);

        assert_eq!(registry.clear(&hook), 2);
        assert!(registry.is_empty());
        assert!(!registry.is_active());
        assert_eq!(runtime.live_refs(), 0);
    }
}
