use std::panic::AssertUnwindSafe;
use std::sync::{Mutex, PoisonError};

use ipcbridge_frame::DataMessage;
use tracing::{debug, warn};

use crate::transport::{same_callback, MessageCallback};

struct NamedCallback {
    name: String,
    callback: MessageCallback,
}

/// Registered inbound callbacks of a transport.
///
/// [`emit`](CallbackSet::emit) calls each callback outside the set's lock, so
/// a callback may register or unregister callbacks while it runs. A panicking
/// callback is contained and does not prevent delivery to the others.
#[derive(Default)]
pub struct CallbackSet {
    entries: Mutex<Vec<NamedCallback>>,
}

impl CallbackSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `callback` unless it is already present. Returns true if added.
    pub fn register(&self, name: &str, callback: MessageCallback) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries
            .iter()
            .any(|entry| same_callback(&entry.callback, &callback))
        {
            debug!(name, "callback already registered");
            return false;
        }
        debug!(name, "callback registered");
        entries.push(NamedCallback {
            name: name.to_string(),
            callback,
        });
        true
    }

    /// Remove `callback`. Returns true if it was present.
    pub fn unregister(&self, callback: &MessageCallback) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|entry| {
            let matched = same_callback(&entry.callback, callback);
            if matched {
                debug!(name = %entry.name, "callback unregistered");
            }
            !matched
        });
        entries.len() != before
    }

    /// Deliver `message` to every callback registered at the time of the call.
    ///
    /// Returns the number of callbacks that completed without panicking.
    pub fn emit(&self, message: &DataMessage) -> usize {
        let snapshot: Vec<(String, MessageCallback)> = {
            let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            entries
                .iter()
                .map(|entry| (entry.name.clone(), entry.callback.clone()))
                .collect()
        };

        let mut completed = 0usize;
        for (name, callback) in snapshot {
            match std::panic::catch_unwind(AssertUnwindSafe(|| callback(message))) {
                Ok(()) => completed += 1,
                Err(_) => warn!(
                    name = %name,
                    group = message.group,
                    id = message.id,
                    "message callback panicked"
                ),
            }
        }
        completed
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
