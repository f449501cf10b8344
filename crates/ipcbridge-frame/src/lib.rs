//! Message framing for the native IPC link.
//!
//! Every [`DataMessage`] travels as an 8-byte header followed by its payload:
//! - 2-byte magic `"IB"` for stream synchronization
//! - 4-byte little-endian payload length
//! - 1-byte message group
//! - 1-byte message id

pub mod codec;
pub mod error;
pub mod message;
pub mod reader;
pub mod writer;

pub use codec::{decode_message, encode_message, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE};
pub use error::{FrameError, Result};
pub use message::DataMessage;
pub use reader::MessageReader;
pub use writer::MessageWriter;
