//! COBS framing and the PORP wire codecs.
//!
//! This is the core value-add layer of the stack. On the wire, every
//! frame is:
//! - COBS-encoded, so the payload contains no zero byte
//! - terminated by a single 0x00 delimiter
//!
//! Inside a decoded frame, the first byte disambiguates the two PORP
//! frame kinds: a non-zero byte is a datagram length prefix, a zero byte
//! marks a command or command response. Datagrams and command replies may
//! carry a trailing region of tagged telemetry attributes.
//!
//! No partial reads, no buffer management in user code.

pub mod attrs;
pub mod cobs;
pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use attrs::{decode_metadata, encode_metadata, AttrId, AttrValue, Attributes, MAX_ATTR_VALUE};
pub use codec::{
    classify, decode_command, decode_datagram, encode_command, encode_datagram, is_ack_for,
    Command, Datagram, FrameClass, ACK, DELIMITER, MAX_COMMAND_ARGS, MAX_DATAGRAM_PAYLOAD,
};
pub use error::{FrameError, Result};
pub use reader::{dispatch, FrameReader, FrameSink, DEFAULT_MAX_FRAME};
pub use writer::FrameWriter;
