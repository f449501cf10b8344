use bytes::Bytes;

/// One IPC message: a group/id pair classifying it and an opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataMessage {
    /// Channel class of the message.
    pub group: u8,
    /// Message type within the group.
    pub id: u8,
    pub payload: Bytes,
}

impl DataMessage {
    pub fn new(group: u8, id: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            group,
            id,
            payload: payload.into(),
        }
    }

    /// Build a message by copying a borrowed payload.
    pub fn copy_from(group: u8, id: u8, payload: &[u8]) -> Self {
        Self::new(group, id, Bytes::copy_from_slice(payload))
    }

    /// Payload length in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// Header plus payload.
    pub fn wire_size(&self) -> usize {
        crate::codec::HEADER_SIZE + self.payload.len()
    }
}
