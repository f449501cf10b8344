use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::IpcStream;

/// `sockaddr_un.sun_path` capacity.
#[cfg(target_os = "linux")]
const MAX_PATH_LEN: usize = 108;
#[cfg(not(target_os = "linux"))]
const MAX_PATH_LEN: usize = 104;

/// Listening side of the IPC service socket.
///
/// The socket file is removed on drop, unless something else has replaced the
/// path in the meantime.
pub struct SocketListener {
    listener: UnixListener,
    path: PathBuf,
    identity: (u64, u64),
}

impl SocketListener {
    /// Permission mode applied to created socket files.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;

    /// Bind with [`Self::DEFAULT_SOCKET_MODE`].
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_mode(path, Self::DEFAULT_SOCKET_MODE)
    }

    /// Bind a filesystem socket, replacing a stale socket file at `path`.
    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        check_path_len(&path)?;
        remove_stale_socket(&path)?;

        let bind_err = |source| TransportError::Bind {
            path: path.clone(),
            source,
        };

        let listener = UnixListener::bind(&path).map_err(bind_err)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).map_err(bind_err)?;
        let metadata = std::fs::symlink_metadata(&path).map_err(bind_err)?;

        info!(?path, "ipc service socket listening");

        Ok(Self {
            listener,
            path,
            identity: (metadata.dev(), metadata.ino()),
        })
    }

    /// Block until a client connects.
    pub fn accept(&self) -> Result<IpcStream> {
        let (stream, _addr) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(path = ?self.path, "accepted client");
        Ok(IpcStream::from_unix(stream))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SocketListener {
    fn drop(&mut self) {
        let Ok(metadata) = std::fs::symlink_metadata(&self.path) else {
            return;
        };
        let unchanged = metadata.file_type().is_socket()
            && (metadata.dev(), metadata.ino()) == self.identity;
        if unchanged {
            debug!(path = ?self.path, "removing socket file");
            let _ = std::fs::remove_file(&self.path);
        } else {
            debug!(path = ?self.path, "socket path replaced; leaving it in place");
        }
    }
}

/// Connect to the IPC service listening at `path`.
pub fn connect(path: impl AsRef<Path>) -> Result<IpcStream> {
    let path = path.as_ref();
    check_path_len(path)?;
    let stream = UnixStream::connect(path).map_err(|source| TransportError::Connect {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(?path, "connected to ipc service");
    Ok(IpcStream::from_unix(stream))
}

fn check_path_len(path: &Path) -> Result<()> {
    let len = path.as_os_str().len();
    if len >= MAX_PATH_LEN {
        return Err(TransportError::PathTooLong {
            path: path.to_path_buf(),
            len,
            max: MAX_PATH_LEN,
        });
    }
    Ok(())
}

/// Never removes anything that is not a socket.
fn remove_stale_socket(path: &Path) -> Result<()> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(source) => {
            return Err(TransportError::Bind {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    if !metadata.file_type().is_socket() {
        return Err(TransportError::Bind {
            path: path.to_path_buf(),
            source: std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "existing path is not a unix socket",
            ),
        });
    }

    debug!(?path, "removing stale socket");
    std::fs::remove_file(path).map_err(|source| TransportError::Bind {
        path: path.to_path_buf(),
        source,
    })
}
