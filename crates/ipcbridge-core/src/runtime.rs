use std::ops::{Deref, DerefMut};

use tracing::debug;

use crate::error::RuntimeError;

/// A managed runtime that subscribers live in.
///
/// Associated handle types are owned references: dropping one releases it.
/// They must stay valid on any thread, since dispatch runs on transport
/// threads.
pub trait ManagedRuntime: Send + Sync + 'static {
    /// A subscriber object.
    type Object: Send + Sync + 'static;
    /// The class a receive method was resolved on. Held to keep the method valid.
    type Class: Send + Sync + 'static;
    /// A resolved receive method.
    type Method: Copy + Send + Sync + 'static;
    /// A managed byte array.
    type Buffer: Send + Sync + 'static;
    /// Per-thread execution context.
    type Thread<'rt>: ManagedThread<Self>
    where
        Self: 'rt;

    /// Context of the calling thread if it is already attached.
    fn current_thread(&self) -> Option<Self::Thread<'_>>;

    /// Attach the calling thread.
    fn attach_current_thread(&self) -> Result<Self::Thread<'_>, RuntimeError>;

    /// Detach the calling thread.
    ///
    /// Only called after a successful [`attach_current_thread`] on the same
    /// thread, once its context has been dropped.
    ///
    /// [`attach_current_thread`]: ManagedRuntime::attach_current_thread
    fn detach_current_thread(&self);
}

/// Operations that need an attached thread.
pub trait ManagedThread<R: ManagedRuntime + ?Sized> {
    /// Find the receive method on `object`'s class.
    fn resolve_receiver(&mut self, object: &R::Object)
        -> Result<(R::Class, R::Method), RuntimeError>;

    /// Allocate a zeroed array of `len` bytes.
    fn new_buffer(&mut self, len: usize) -> Result<R::Buffer, RuntimeError>;

    /// Copy `bytes` into `buffer` starting at offset 0.
    fn write_buffer(&mut self, buffer: &R::Buffer, bytes: &[u8]) -> Result<(), RuntimeError>;

    /// Call the receive method. A fault raised by the receiver is returned
    /// as [`RuntimeError::Invocation`] and left cleared.
    fn invoke(
        &mut self,
        object: &R::Object,
        method: R::Method,
        group: u8,
        id: u8,
        buffer: &R::Buffer,
    ) -> Result<(), RuntimeError>;
}

/// Scoped runtime context for the calling thread.
///
/// Reuses the existing context when the thread is already attached.
/// Otherwise attaches, and detaches again on drop. A thread this guard did
/// not attach is never detached.
pub struct ThreadAttachment<'rt, R: ManagedRuntime> {
    // Fields drop in order: the context goes before the thread is detached.
    thread: R::Thread<'rt>,
    detach: DetachOnDrop<'rt, R>,
}

struct DetachOnDrop<'rt, R: ManagedRuntime> {
    runtime: &'rt R,
    attached_here: bool,
}

impl<R: ManagedRuntime> Drop for DetachOnDrop<'_, R> {
    fn drop(&mut self) {
        if self.attached_here {
            self.runtime.detach_current_thread();
            debug!("detached thread from managed runtime");
        }
    }
}

impl<'rt, R: ManagedRuntime> ThreadAttachment<'rt, R> {
    pub fn acquire(runtime: &'rt R) -> Result<Self, RuntimeError> {
        if let Some(thread) = runtime.current_thread() {
            return Ok(Self {
                thread,
                detach: DetachOnDrop {
                    runtime,
                    attached_here: false,
                },
            });
        }

        let thread = runtime.attach_current_thread()?;
        debug!("attached thread to managed runtime");
        Ok(Self {
            thread,
            detach: DetachOnDrop {
                runtime,
                attached_here: true,
            },
        })
    }

    /// True if dropping this guard will detach the thread.
    pub fn attached_here(&self) -> bool {
        self.detach.attached_here
    }
}

impl<'rt, R: ManagedRuntime> Deref for ThreadAttachment<'rt, R> {
    type Target = R::Thread<'rt>;

    fn deref(&self) -> &Self::Target {
        &self.thread
    }
}

impl<'rt, R: ManagedRuntime> DerefMut for ThreadAttachment<'rt, R> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.thread
    }
}
