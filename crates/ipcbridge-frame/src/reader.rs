use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use ipcbridge_transport::IpcStream;

use crate::codec::{decode_message, FrameConfig};
use crate::error::{FrameError, Result};
use crate::message::DataMessage;

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads whole [`DataMessage`]s from a byte stream.
///
/// Partially received messages stay buffered across calls, so a read timeout
/// surfaces as an error without losing stream position.
pub struct MessageReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Read> MessageReader<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(READ_CHUNK_SIZE),
            config,
        }
    }

    /// Block until the next complete message arrives.
    ///
    /// EOF yields [`FrameError::ConnectionClosed`], including EOF in the middle
    /// of a message.
    pub fn read_message(&mut self) -> Result<DataMessage> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            if let Some(message) = decode_message(&mut self.buf, self.config.max_payload_size)? {
                return Ok(message);
            }

            let read = match self.inner.read(&mut chunk) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };
            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Bytes received but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buf.len()
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

impl MessageReader<IpcStream> {
    /// Wrap an [`IpcStream`], applying the configured read timeout.
    pub fn for_stream(stream: IpcStream, config: FrameConfig) -> Result<Self> {
        stream
            .set_read_timeout(config.read_timeout)
            .map_err(crate::writer::transport_to_frame_error)?;
        Ok(Self::with_config(stream, config))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::BufMut;

    use super::*;
    use crate::codec::{encode_message, MAGIC};

    fn wire(messages: &[DataMessage]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for message in messages {
            encode_message(message, &mut buf).unwrap();
        }
        buf.to_vec()
    }

    #[test]
    fn reads_messages_in_order() {
        let bytes = wire(&[
            DataMessage::copy_from(1, 10, b"one"),
            DataMessage::copy_from(1, 11, b"two"),
            DataMessage::copy_from(3, 0, b""),
        ]);
        let mut reader = MessageReader::new(Cursor::new(bytes));

        let ids: Vec<(u8, u8)> = (0..3)
            .map(|_| {
                let m = reader.read_message().unwrap();
                (m.group, m.id)
            })
            .collect();
        assert_eq!(ids, vec![(1, 10), (1, 11), (3, 0)]);
        assert!(matches!(
            reader.read_message(),
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[test]
    fn payload_larger_than_read_chunk() {
        let payload = vec![0x5A; READ_CHUNK_SIZE * 3 + 17];
        let mut reader =
            MessageReader::new(Cursor::new(wire(&[DataMessage::copy_from(2, 2, &payload)])));

        let message = reader.read_message().unwrap();
        assert_eq!(message.payload.as_ref(), payload.as_slice());
    }

    #[test]
    fn eof_mid_message_is_connection_closed() {
        let mut partial = BytesMut::new();
        partial.put_slice(&MAGIC);
        partial.put_u32_le(32);
        partial.put_u8(1);
        partial.put_u8(1);
        partial.put_slice(b"short");

        let mut reader = MessageReader::new(Cursor::new(partial.to_vec()));
        assert!(matches!(
            reader.read_message(),
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[test]
    fn timeout_keeps_partial_message() {
        let bytes = wire(&[DataMessage::copy_from(4, 4, b"resumed")]);
        let (head, tail) = bytes.split_at(5);
        let source = Scripted {
            steps: vec![
                Step::Data(head.to_vec()),
                Step::Fail(ErrorKind::WouldBlock),
                Step::Fail(ErrorKind::Interrupted),
                Step::Data(tail.to_vec()),
            ],
        };
        let mut reader = MessageReader::new(source);

        let err = reader.read_message().unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(reader.buffered(), 5);

        let message = reader.read_message().unwrap();
        assert_eq!(message.payload.as_ref(), b"resumed");
        assert_eq!(reader.buffered(), 0);
    }

    #[test]
    fn oversized_message_is_rejected() {
        let bytes = wire(&[DataMessage::copy_from(1, 1, &[0u8; 64])]);
        let config = FrameConfig {
            max_payload_size: 16,
            ..FrameConfig::default()
        };
        let mut reader = MessageReader::with_config(Cursor::new(bytes), config);
        assert!(matches!(
            reader.read_message(),
            Err(FrameError::PayloadTooLarge { size: 64, max: 16 })
        ));
    }

    #[test]
    fn reads_over_ipc_stream_pair() {
        let (left, right) = IpcStream::pair().unwrap();
        let mut writer = crate::writer::MessageWriter::new(left);
        let mut reader = MessageReader::for_stream(right, FrameConfig::default()).unwrap();

        writer
            .write_message(&DataMessage::copy_from(9, 8, b"over the wire"))
            .unwrap();
        let message = reader.read_message().unwrap();
        assert_eq!((message.group, message.id), (9, 8));
        assert_eq!(message.payload.as_ref(), b"over the wire");
    }

    enum Step {
        Data(Vec<u8>),
        Fail(ErrorKind),
    }

    struct Scripted {
        steps: Vec<Step>,
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.steps.is_empty() {
                return Ok(0);
            }
            match self.steps.remove(0) {
                Step::Fail(kind) => Err(std::io::Error::from(kind)),
                Step::Data(mut data) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    if n < data.len() {
                        self.steps.insert(0, Step::Data(data.split_off(n)));
                    }
                    Ok(n)
                }
            }
        }
    }
}
