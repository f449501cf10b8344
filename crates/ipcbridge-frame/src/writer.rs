use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use ipcbridge_transport::{IpcStream, TransportError};

use crate::codec::{encode_message, FrameConfig};
use crate::error::{FrameError, Result};
use crate::message::DataMessage;

const INITIAL_BUFFER_CAPACITY: usize = 4 * 1024;

/// Writes whole [`DataMessage`]s to a byte stream.
pub struct MessageWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> MessageWriter<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Encode and write one message, then flush.
    pub fn write_message(&mut self, message: &DataMessage) -> Result<()> {
        if message.size() > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: message.size(),
                max: self.config.max_payload_size,
            });
        }

        self.buf.clear();
        encode_message(message, &mut self.buf)?;

        let mut written = 0usize;
        while written < self.buf.len() {
            match self.inner.write(&self.buf[written..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => written += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl MessageWriter<IpcStream> {
    /// Wrap an [`IpcStream`], applying the configured write timeout.
    pub fn for_stream(stream: IpcStream, config: FrameConfig) -> Result<Self> {
        stream
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(stream, config))
    }
}

pub(crate) fn transport_to_frame_error(err: TransportError) -> FrameError {
    match err {
        TransportError::Io(io) | TransportError::Accept(io) => FrameError::Io(io),
        TransportError::Bind { source, .. } | TransportError::Connect { source, .. } => {
            FrameError::Io(source)
        }
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}
