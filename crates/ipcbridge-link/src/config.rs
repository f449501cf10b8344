use std::path::PathBuf;
use std::time::Duration;

use ipcbridge_frame::FrameConfig;
use tracing::warn;

/// Default location of the IPC service socket.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/ipcbridge/ipc.sock";

/// Environment variable overriding [`LinkConfig::socket_path`].
pub const ENV_SOCKET: &str = "IPCBRIDGE_SOCKET";
/// Environment variable overriding [`LinkConfig::reconnect_interval`], in milliseconds.
pub const ENV_RECONNECT_MS: &str = "IPCBRIDGE_RECONNECT_MS";
/// Environment variable overriding the maximum payload size, in bytes.
pub const ENV_MAX_PAYLOAD: &str = "IPCBRIDGE_MAX_PAYLOAD";

/// Settings for [`SocketTransport`](crate::SocketTransport).
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// IPC service socket to connect to.
    pub socket_path: PathBuf,
    /// Pause between connection attempts.
    pub reconnect_interval: Duration,
    pub frame: FrameConfig,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            reconnect_interval: Duration::from_millis(500),
            frame: FrameConfig::default(),
        }
    }
}

impl LinkConfig {
    pub fn with_socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = path.into();
        self
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    /// Defaults overridden by `IPCBRIDGE_*` environment variables.
    ///
    /// Unparseable numeric values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = lookup(ENV_SOCKET).filter(|value| !value.trim().is_empty()) {
            config.socket_path = PathBuf::from(path.trim());
        }
        if let Some(ms) = parse_number(&lookup, ENV_RECONNECT_MS) {
            config.reconnect_interval = Duration::from_millis(ms.max(1));
        }
        if let Some(max) = parse_number(&lookup, ENV_MAX_PAYLOAD) {
            config.frame.max_payload_size = usize::try_from(max).unwrap_or(usize::MAX);
        }

        config
    }
}

fn parse_number(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(key, value = %raw, %err, "ignoring invalid environment override");
            None
        }
    }
}
