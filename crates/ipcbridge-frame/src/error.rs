/// Errors raised while encoding or decoding messages.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The header does not start with the `"IB"` magic.
    #[error("invalid message magic (expected 0x4942 \"IB\")")]
    InvalidMagic,

    /// The payload exceeds the configured maximum.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// I/O failure on the underlying stream.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the stream, possibly mid-message.
    #[error("connection closed")]
    ConnectionClosed,
}

impl FrameError {
    /// True for read/write timeouts, which leave the stream usable.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            FrameError::Io(err)
                if matches!(err.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut)
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
