//! Callback bridge between a native IPC link and managed-runtime subscribers.
//!
//! # Crate Structure
//!
//! - [`transport`]: Unix domain socket streams and listeners
//! - [`frame`]: `DataMessage` wire codec, reader and writer
//! - [`link`]: The native link: `Transport` trait, socket and in-memory links, delayed sends
//! - [`bridge`]: Subscriber registry, dispatch and the managed-runtime seam
//!
//! The JNI exports live in the separate `ipcbridge-jvm` cdylib.

/// Re-export transport types.
pub mod transport {
    pub use ipcbridge_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use ipcbridge_frame::*;
}

/// Re-export link types.
pub mod link {
    pub use ipcbridge_link::*;
}

/// Re-export bridge types.
pub mod bridge {
    pub use ipcbridge_core::*;
}
