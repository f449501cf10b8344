/// Errors raised by link implementations.
///
/// The [`Transport`](crate::Transport) surface is fire-and-forget, so these
/// only reach callers through explicit APIs such as
/// [`SocketTransport::try_send`](crate::SocketTransport::try_send); everywhere
/// else they are logged.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// No connection to the IPC service is currently established.
    #[error("not connected to {0}")]
    NotConnected(std::path::PathBuf),

    #[error("transport error: {0}")]
    Transport(#[from] ipcbridge_transport::TransportError),

    #[error("frame error: {0}")]
    Frame(#[from] ipcbridge_frame::FrameError),

    /// A background thread could not be started.
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, LinkError>;
