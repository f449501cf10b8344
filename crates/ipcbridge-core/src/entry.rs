use std::fmt;
use std::sync::Arc;

use crate::buffer::SubscriberBuffer;
use crate::runtime::ManagedRuntime;

/// Identity of a subscriber object.
///
/// Derived from the object by the binding; registering a second object with
/// the same identity replaces the first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<u64> for SubscriberId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Everything the bridge holds for one subscriber.
///
/// Cloning shares the underlying runtime references; they are released once
/// the registry and every dispatch snapshot have dropped their copies.
pub struct SubscriberEntry<R: ManagedRuntime> {
    handle: Arc<R::Object>,
    class: Arc<R::Class>,
    method: R::Method,
    pub(crate) buffer: SubscriberBuffer<R>,
}

impl<R: ManagedRuntime> Clone for SubscriberEntry<R> {
    fn clone(&self) -> Self {
        Self {
            handle: Arc::clone(&self.handle),
            class: Arc::clone(&self.class),
            method: self.method,
            buffer: self.buffer.clone(),
        }
    }
}

impl<R: ManagedRuntime> SubscriberEntry<R> {
    pub fn new(handle: R::Object, class: R::Class, method: R::Method, buffer: SubscriberBuffer<R>) -> Self {
        Self {
            handle: Arc::new(handle),
            class: Arc::new(class),
            method,
            buffer,
        }
    }

    pub fn handle(&self) -> &R::Object {
        &self.handle
    }

    pub fn class(&self) -> &R::Class {
        &self.class
    }

    pub fn method(&self) -> R::Method {
        self.method
    }

    pub fn buffer(&self) -> &SubscriberBuffer<R> {
        &self.buffer
    }
}
