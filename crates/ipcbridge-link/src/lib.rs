//! The native IPC link consumed by the callback bridge.
//!
//! A [`Transport`] delivers inbound messages to registered callbacks on its
//! own threads and accepts outbound messages, immediately or after a delay.
//! Two implementations ship here:
//!
//! - [`SocketTransport`]: reconnecting client of the IPC service socket
//! - [`MemoryTransport`]: in-process link for embedding and tests

pub mod callbacks;
pub mod config;
pub mod delay;
pub mod error;
pub mod memory;
pub mod socket;
pub mod transport;

pub use callbacks::CallbackSet;
pub use config::LinkConfig;
pub use delay::DelayQueue;
pub use error::{LinkError, Result};
pub use ipcbridge_frame::DataMessage;
pub use memory::{MemoryTransport, Outbound};
pub use socket::SocketTransport;
pub use transport::{same_callback, MessageCallback, Transport};
