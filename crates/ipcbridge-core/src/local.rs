use std::cell::RefCell;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::RuntimeError;
use crate::runtime::{ManagedRuntime, ManagedThread};

/// Error returned by a [`Receive`] implementation.
pub type ReceiveError = Box<dyn std::error::Error + Send + Sync>;

/// Receive method of a [`LocalObject`].
///
/// `buffer` is the subscriber's whole array: the message occupies its
/// prefix, and any bytes past it are left over from earlier messages.
pub trait Receive: Send + Sync {
    fn on_message(&self, group: u8, id: u8, buffer: &[u8]) -> Result<(), ReceiveError>;
}

impl<F> Receive for F
where
    F: Fn(u8, u8, &[u8]) -> Result<(), ReceiveError> + Send + Sync,
{
    fn on_message(&self, group: u8, id: u8, buffer: &[u8]) -> Result<(), ReceiveError> {
        self(group, id, buffer)
    }
}

/// Settings for a [`LocalRuntime`].
#[derive(Debug, Clone, Default)]
pub struct LocalRuntimeConfig {
    /// Largest array [`ManagedThread::new_buffer`] will allocate.
    pub max_array_len: Option<usize>,
}

static NEXT_RUNTIME_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static ATTACHED: RefCell<HashSet<u64>> = RefCell::new(HashSet::new());
}

struct Counters {
    live_refs: AtomicUsize,
    attaches: AtomicUsize,
    detaches: AtomicUsize,
    invocations: AtomicUsize,
    next_method: AtomicU64,
}

/// Owned reference into a [`LocalRuntime`]; counted while alive.
struct LocalRef {
    counters: Arc<Counters>,
}

impl LocalRef {
    fn new(counters: &Arc<Counters>) -> Self {
        counters.live_refs.fetch_add(1, Ordering::SeqCst);
        Self {
            counters: Arc::clone(counters),
        }
    }
}

impl Drop for LocalRef {
    fn drop(&mut self) {
        self.counters.live_refs.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Subscriber object of a [`LocalRuntime`].
pub struct LocalObject {
    receiver: Option<Arc<dyn Receive>>,
    _ref: LocalRef,
}

impl LocalObject {
    pub fn has_receiver(&self) -> bool {
        self.receiver.is_some()
    }
}

pub struct LocalClass {
    _ref: LocalRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalMethod(u64);

/// Managed byte array of a [`LocalRuntime`].
pub struct LocalArray {
    data: Mutex<Vec<u8>>,
    _ref: LocalRef,
}

impl LocalArray {
    pub fn len(&self) -> usize {
        self.data.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// In-process managed runtime.
///
/// Threads count as attached per runtime instance. Every object, class and
/// array handed out is an owned reference tracked by
/// [`live_refs`](LocalRuntime::live_refs), so leaks and double releases
/// show up in the counters.
pub struct LocalRuntime {
    id: u64,
    config: LocalRuntimeConfig,
    counters: Arc<Counters>,
    shut_down: AtomicBool,
}

impl Default for LocalRuntime {
    fn default() -> Self {
        Self::with_config(LocalRuntimeConfig::default())
    }
}

impl LocalRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: LocalRuntimeConfig) -> Self {
        Self {
            id: NEXT_RUNTIME_ID.fetch_add(1, Ordering::Relaxed),
            config,
            counters: Arc::new(Counters {
                live_refs: AtomicUsize::new(0),
                attaches: AtomicUsize::new(0),
                detaches: AtomicUsize::new(0),
                invocations: AtomicUsize::new(0),
                next_method: AtomicU64::new(1),
            }),
            shut_down: AtomicBool::new(false),
        }
    }

    /// A subscriber whose receive method is `receiver`.
    pub fn object(&self, receiver: impl Receive + 'static) -> LocalObject {
        LocalObject {
            receiver: Some(Arc::new(receiver)),
            _ref: LocalRef::new(&self.counters),
        }
    }

    /// An object without a receive method.
    pub fn plain_object(&self) -> LocalObject {
        LocalObject {
            receiver: None,
            _ref: LocalRef::new(&self.counters),
        }
    }

    /// Treat the calling thread as a runtime-owned thread until the guard drops.
    pub fn enter_managed_thread(&self) -> ManagedScope {
        let newly = ATTACHED.with(|set| set.borrow_mut().insert(self.id));
        ManagedScope {
            runtime_id: self.id,
            release: newly,
        }
    }

    /// Refuse further attaches.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }

    pub fn is_current_thread_attached(&self) -> bool {
        ATTACHED.with(|set| set.borrow().contains(&self.id))
    }

    /// Owned references currently alive.
    pub fn live_refs(&self) -> usize {
        self.counters.live_refs.load(Ordering::SeqCst)
    }

    pub fn attach_count(&self) -> usize {
        self.counters.attaches.load(Ordering::SeqCst)
    }

    pub fn detach_count(&self) -> usize {
        self.counters.detaches.load(Ordering::SeqCst)
    }

    pub fn invocation_count(&self) -> usize {
        self.counters.invocations.load(Ordering::SeqCst)
    }
}

/// Guard returned by [`LocalRuntime::enter_managed_thread`].
pub struct ManagedScope {
    runtime_id: u64,
    release: bool,
}

impl Drop for ManagedScope {
    fn drop(&mut self) {
        if self.release {
            ATTACHED.with(|set| set.borrow_mut().remove(&self.runtime_id));
        }
    }
}

impl ManagedRuntime for LocalRuntime {
    type Object = LocalObject;
    type Class = LocalClass;
    type Method = LocalMethod;
    type Buffer = LocalArray;
    type Thread<'rt> = LocalThread<'rt>;

    fn current_thread(&self) -> Option<LocalThread<'_>> {
        self.is_current_thread_attached()
            .then_some(LocalThread { runtime: self })
    }

    fn attach_current_thread(&self) -> Result<LocalThread<'_>, RuntimeError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(RuntimeError::AttachFailed("runtime is shut down".to_string()));
        }
        ATTACHED.with(|set| set.borrow_mut().insert(self.id));
        self.counters.attaches.fetch_add(1, Ordering::SeqCst);
        Ok(LocalThread { runtime: self })
    }

    fn detach_current_thread(&self) {
        if ATTACHED.with(|set| set.borrow_mut().remove(&self.id)) {
            self.counters.detaches.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Attached-thread context of a [`LocalRuntime`].
pub struct LocalThread<'rt> {
    runtime: &'rt LocalRuntime,
}

impl ManagedThread<LocalRuntime> for LocalThread<'_> {
    fn resolve_receiver(
        &mut self,
        object: &LocalObject,
    ) -> Result<(LocalClass, LocalMethod), RuntimeError> {
        if object.receiver.is_none() {
            return Err(RuntimeError::MissingReceiver("on_message".to_string()));
        }
        let counters = &self.runtime.counters;
        let method = LocalMethod(counters.next_method.fetch_add(1, Ordering::Relaxed));
        Ok((
            LocalClass {
                _ref: LocalRef::new(counters),
            },
            method,
        ))
    }

    fn new_buffer(&mut self, len: usize) -> Result<LocalArray, RuntimeError> {
        if let Some(max) = self.runtime.config.max_array_len {
            if len > max {
                return Err(RuntimeError::AllocationFailed {
                    size: len,
                    reason: format!("exceeds limit of {max} bytes"),
                });
            }
        }
        Ok(LocalArray {
            data: Mutex::new(vec![0; len]),
            _ref: LocalRef::new(&self.runtime.counters),
        })
    }

    fn write_buffer(&mut self, buffer: &LocalArray, bytes: &[u8]) -> Result<(), RuntimeError> {
        let mut data = buffer.data.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(target) = data.get_mut(..bytes.len()) else {
            return Err(RuntimeError::WriteFailed(format!(
                "{} bytes do not fit a {}-byte array",
                bytes.len(),
                data.len()
            )));
        };
        target.copy_from_slice(bytes);
        Ok(())
    }

    fn invoke(
        &mut self,
        object: &LocalObject,
        _method: LocalMethod,
        group: u8,
        id: u8,
        buffer: &LocalArray,
    ) -> Result<(), RuntimeError> {
        self.runtime
            .counters
            .invocations
            .fetch_add(1, Ordering::SeqCst);
        let Some(receiver) = object.receiver.as_ref() else {
            return Err(RuntimeError::MissingReceiver("on_message".to_string()));
        };

        // Hand the receiver a view of its own, so it never runs under the
        // array's lock.
        let view = buffer.to_vec();
        match std::panic::catch_unwind(AssertUnwindSafe(|| receiver.on_message(group, id, &view))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(RuntimeError::Invocation(err.to_string())),
            Err(panic) => Err(RuntimeError::Invocation(panic_message(panic.as_ref()))),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "receiver panicked".to_string()
    }
}
