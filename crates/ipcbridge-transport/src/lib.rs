//! Unix domain socket stream layer.
//!
//! The lowest layer of ipcbridge: a connected [`IpcStream`] plus the
//! [`SocketListener`] used by local IPC services and tests. Message framing
//! lives one layer up in `ipcbridge-frame`.

pub mod error;

#[cfg(unix)]
pub mod stream;
#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};

#[cfg(unix)]
pub use stream::IpcStream;
#[cfg(unix)]
pub use uds::{connect, SocketListener};
