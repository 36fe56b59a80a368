use bytes::Bytes;

use crate::error::{FrameError, Result};

/// Frame delimiter byte appended after every COBS-encoded frame.
pub const DELIMITER: u8 = 0x00;

/// The generic bare acknowledgement frame (decoded form).
///
/// Structurally this is `encode_command(0)`: an empty-head frame carrying
/// attribute 0 with no value.
pub const ACK: [u8; 3] = [0x00, 0x01, 0x00];

/// Largest payload a single datagram can carry; the length prefix is one
/// byte. Longer payloads must be segmented above this layer.
pub const MAX_DATAGRAM_PAYLOAD: usize = 255;

/// Largest argument list a command frame can carry.
pub const MAX_COMMAND_ARGS: usize = 254;

/// The two logical channels a decoded frame can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameClass {
    /// Leading zero byte: a command acknowledgement or value reply.
    Response,
    /// Leading non-zero byte: an asynchronous application datagram.
    Datagram,
}

/// Inspect the leading byte of a decoded frame and pick its channel.
///
/// Returns `None` for an empty frame (keepalive; discarded upstream).
pub fn classify(frame: &[u8]) -> Option<FrameClass> {
    match frame.first() {
        None => None,
        Some(0) => Some(FrameClass::Response),
        Some(_) => Some(FrameClass::Datagram),
    }
}

/// A decoded application datagram: self-delimited payload plus trailing
/// telemetry metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    /// The application payload.
    pub data: Bytes,
    /// Raw attribute region; decode with [`crate::attrs::decode_metadata`].
    pub metadata: Bytes,
}

/// A decoded command frame: id plus raw argument bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub id: u8,
    pub args: Bytes,
}

/// Encode a datagram frame: `[len][payload][..metadata appended later]`.
pub fn encode_datagram(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_DATAGRAM_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_DATAGRAM_PAYLOAD,
        });
    }
    let mut frame = Vec::with_capacity(payload.len() + 1);
    frame.push(payload.len() as u8);
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Decode a datagram frame into payload and metadata regions.
///
/// A declared length that exceeds the available bytes is a protocol
/// violation and yields [`FrameError::LengthMismatch`]; earlier
/// generations of this protocol logged a warning and carried on with
/// truncated data, which hid real link corruption.
pub fn decode_datagram(frame: &[u8]) -> Result<Datagram> {
    let Some(&len) = frame.first() else {
        return Err(FrameError::Malformed("empty datagram frame"));
    };
    let len = len as usize;
    let available = frame.len() - 1;
    if len > available {
        return Err(FrameError::LengthMismatch {
            declared: len,
            available,
        });
    }
    Ok(Datagram {
        data: Bytes::copy_from_slice(&frame[1..1 + len]),
        metadata: Bytes::copy_from_slice(&frame[1 + len..]),
    })
}

/// Encode a command frame: `[0x00][1 + len(args)][id][args...]`.
pub fn encode_command(id: u8, args: &[u8]) -> Result<Vec<u8>> {
    if args.len() > MAX_COMMAND_ARGS {
        return Err(FrameError::PayloadTooLarge {
            size: args.len(),
            max: MAX_COMMAND_ARGS,
        });
    }
    let mut frame = Vec::with_capacity(args.len() + 3);
    frame.push(0x00);
    frame.push(1 + args.len() as u8);
    frame.push(id);
    frame.extend_from_slice(args);
    Ok(frame)
}

/// Decode a command frame.
///
/// Trailing bytes beyond the declared length are tolerated on read (a
/// reply may append a metadata region) but never produced by
/// [`encode_command`].
pub fn decode_command(frame: &[u8]) -> Result<Command> {
    if frame.first() != Some(&0x00) {
        return Err(FrameError::Malformed("command frame must start with 0x00"));
    }
    let Some(&frame_len) = frame.get(1) else {
        return Err(FrameError::Malformed("command frame missing length byte"));
    };
    if frame_len == 0 {
        return Err(FrameError::Malformed("command frame with zero length"));
    }
    let declared = frame_len as usize;
    let available = frame.len() - 2;
    if declared > available {
        return Err(FrameError::LengthMismatch {
            declared,
            available,
        });
    }
    Ok(Command {
        id: frame[2],
        args: Bytes::copy_from_slice(&frame[3..2 + declared]),
    })
}

/// Does `reply` acknowledge command `id`?
///
/// Two conventions are in the field: the device echoes the bare command
/// frame (`encode_command(id)`), or answers with the generic [`ACK`].
/// Both mean success; anything else is a command failure the caller must
/// surface.
pub fn is_ack_for(reply: &[u8], id: u8) -> bool {
    reply == ACK || reply == [0x00, 0x01, id]
}
