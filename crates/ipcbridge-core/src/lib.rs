//! Callback bridge between a native IPC link and a managed runtime.
//!
//! Managed-runtime objects subscribe by identity. The first subscription
//! installs a single dispatch callback on the [`Transport`]; every inbound
//! message is then copied into each subscriber's reusable buffer and handed
//! to its receive method on whatever thread the transport calls from.
//!
//! The runtime itself sits behind [`ManagedRuntime`], so the bridge runs
//! unchanged against a JVM (see the `ipcbridge-jvm` binding) or the
//! in-process [`LocalRuntime`].

pub mod bridge;
pub mod buffer;
pub mod config;
pub mod dispatch;
pub mod entry;
pub mod error;
pub mod local;
pub mod registry;
pub mod runtime;
pub mod send;

pub use bridge::{Bridge, BridgeState};
pub use buffer::SubscriberBuffer;
pub use config::{BridgeConfig, DEFAULT_BUFFER_CAPACITY, DEFAULT_CALLBACK_NAME};
pub use dispatch::DispatchReport;
pub use entry::{SubscriberEntry, SubscriberId};
pub use error::{BridgeError, Result, RuntimeError};
pub use ipcbridge_link::{DataMessage, Transport};
pub use local::{
    LocalArray, LocalClass, LocalMethod, LocalObject, LocalRuntime, LocalRuntimeConfig,
    LocalThread, ManagedScope, Receive, ReceiveError,
};
pub use registry::{Activation, SubscriberRegistry};
pub use runtime::{ManagedRuntime, ManagedThread, ThreadAttachment};
