use std::io::{ErrorKind, Read};

use bytes::{Buf, Bytes, BytesMut};
use tracing::{trace, warn};

use crate::cobs;
use crate::codec::{classify, FrameClass, DELIMITER};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 2 * 1024;
const READ_CHUNK_SIZE: usize = 2 * 1024;

/// Largest encoded frame the reader will buffer before declaring the
/// stream out of sync. Generous compared to the 255-byte datagram cap
/// plus metadata and COBS overhead.
pub const DEFAULT_MAX_FRAME: usize = 1024;

/// Reads delimiter-separated, COBS-encoded frames from any `Read` stream.
///
/// Handles partial reads internally — callers always get complete,
/// decoded frames. Empty frames (back-to-back delimiters, used as
/// keepalives) are skipped silently. A malformed frame is consumed and
/// reported as [`FrameError::Malformed`]; the reader stays usable, so a
/// caller recovers by simply reading again.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    max_frame_size: usize,
    /// Set while discarding bytes up to the next delimiter after an
    /// oversized-frame resync.
    resyncing: bool,
    discarded: u64,
}

impl<T: Read> FrameReader<T> {
    /// Create a frame reader with the default frame size cap.
    pub fn new(inner: T) -> Self {
        Self::with_max_frame(inner, DEFAULT_MAX_FRAME)
    }

    /// Create a frame reader with an explicit frame size cap.
    pub fn with_max_frame(inner: T, max_frame_size: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            max_frame_size,
            resyncing: false,
            discarded: 0,
        }
    }

    /// Read the next complete, decoded, non-empty frame (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` at EOF. Read timeouts
    /// on the underlying stream surface as `FrameError::Io` with
    /// `WouldBlock`/`TimedOut`; buffered partial frames survive across
    /// such calls.
    pub fn read_frame(&mut self) -> Result<Bytes> {
        loop {
            while let Some(pos) = self.buf.iter().position(|&b| b == DELIMITER) {
                let chunk = self.buf.split_to(pos + 1);
                let encoded = &chunk[..pos];

                if self.resyncing {
                    // Tail of an oversized frame; the error was already
                    // reported when the cap tripped.
                    self.resyncing = false;
                    trace!(dropped = encoded.len(), "resynced at delimiter");
                    continue;
                }
                if encoded.is_empty() {
                    continue; // keepalive
                }

                match cobs::decode(encoded) {
                    Ok(decoded) if decoded.is_empty() => continue,
                    Ok(decoded) => return Ok(Bytes::from(decoded)),
                    Err(err) => {
                        self.discarded += 1;
                        warn!(%err, len = pos, "discarding malformed frame");
                        return Err(err);
                    }
                }
            }

            if self.resyncing {
                // Everything buffered precedes the next delimiter.
                self.buf.clear();
            } else if self.buf.len() > self.max_frame_size {
                self.discarded += 1;
                self.resyncing = true;
                let dropped = self.buf.len();
                self.buf.advance(dropped);
                warn!(
                    dropped,
                    max = self.max_frame_size,
                    "no delimiter within frame size cap; resyncing"
                );
                return Err(FrameError::Malformed("frame exceeds maximum size"));
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Frames dropped so far (malformed or oversized).
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

/// Receives classified frames from a reader task.
///
/// The two methods mirror the two logical PORP channels. Returning
/// `false` tells the task its consumer is gone and it should stop.
pub trait FrameSink {
    /// A command acknowledgement or value reply arrived.
    fn on_response(&self, frame: Bytes) -> bool;
    /// An asynchronous application datagram arrived.
    fn on_datagram(&self, frame: Bytes) -> bool;
}

/// Route one decoded frame to the appropriate sink channel.
///
/// Returns `false` when the sink reports its consumer is gone. Empty
/// frames never reach this point; the reader drops them.
pub fn dispatch<S: FrameSink>(sink: &S, frame: Bytes) -> bool {
    match classify(&frame) {
        Some(FrameClass::Response) => sink.on_response(frame),
        Some(FrameClass::Datagram) => sink.on_datagram(frame),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Mutex;

    use super::*;
    use crate::cobs::encode;
    use crate::codec::encode_datagram;

    fn wire_with(frames: &[&[u8]]) -> Vec<u8> {
        let mut wire = Vec::new();
        for frame in frames {
            wire.extend_from_slice(&encode(frame));
            wire.push(DELIMITER);
        }
        wire
    }

    #[test]
    fn read_single_frame() {
        let wire = wire_with(&[b"\x05hello"]);
        let mut reader = FrameReader::new(Cursor::new(wire));
        let frame = reader.read_frame().unwrap();
        assert_eq!(frame.as_ref(), b"\x05hello");
    }

    #[test]
    fn read_multiple_frames() {
        let wire = wire_with(&[b"\x03one", b"\x03two", b"\x05three"]);
        let mut reader = FrameReader::new(Cursor::new(wire));

        assert_eq!(reader.read_frame().unwrap().as_ref(), b"\x03one");
        assert_eq!(reader.read_frame().unwrap().as_ref(), b"\x03two");
        assert_eq!(reader.read_frame().unwrap().as_ref(), b"\x05three");
    }

    #[test]
    fn embedded_zero_survives_framing() {
        let payload = b"Hello world\x00This is a test";
        let frame = encode_datagram(payload).unwrap();
        let wire = wire_with(&[&frame]);

        let mut reader = FrameReader::new(Cursor::new(wire));
        let got = reader.read_frame().unwrap();
        assert_eq!(got.as_ref(), frame.as_slice());
    }

    #[test]
    fn keepalives_are_skipped() {
        let mut wire = vec![DELIMITER, DELIMITER, DELIMITER];
        wire.extend_from_slice(&wire_with(&[b"\x01x"]));
        wire.push(DELIMITER);

        let mut reader = FrameReader::new(Cursor::new(wire));
        assert_eq!(reader.read_frame().unwrap().as_ref(), b"\x01x");
        assert!(matches!(
            reader.read_frame().unwrap_err(),
            FrameError::ConnectionClosed
        ));
    }

    #[test]
    fn malformed_frame_is_reported_then_reading_continues() {
        // First frame: code byte promises more than the frame holds.
        let mut wire = vec![0x20, 0x11, 0x22, DELIMITER];
        wire.extend_from_slice(&wire_with(&[b"\x02ok"]));

        let mut reader = FrameReader::new(Cursor::new(wire));
        assert!(matches!(
            reader.read_frame().unwrap_err(),
            FrameError::Malformed(_)
        ));
        assert_eq!(reader.read_frame().unwrap().as_ref(), b"\x02ok");
        assert_eq!(reader.discarded(), 1);
    }

    #[test]
    fn oversized_garbage_resyncs_at_next_delimiter() {
        let mut wire = vec![0xAAu8; 64]; // no delimiter for a long stretch
        wire.push(DELIMITER);
        wire.extend_from_slice(&wire_with(&[b"\x02ok"]));

        // Byte-by-byte delivery so the cap trips before the delimiter is
        // ever seen.
        let mut reader =
            FrameReader::with_max_frame(ByteByByteReader { bytes: wire, pos: 0 }, 16);
        assert!(matches!(
            reader.read_frame().unwrap_err(),
            FrameError::Malformed(_)
        ));
        assert_eq!(reader.read_frame().unwrap().as_ref(), b"\x02ok");
        assert_eq!(reader.discarded(), 1);
    }

    #[test]
    fn connection_closed_at_eof() {
        let mut reader = FrameReader::new(Cursor::new(Vec::<u8>::new()));
        assert!(matches!(
            reader.read_frame().unwrap_err(),
            FrameError::ConnectionClosed
        ));
    }

    #[test]
    fn partial_frame_at_eof_is_connection_closed() {
        // Encoded bytes but no delimiter before EOF.
        let wire = encode(b"\x04half");
        let mut reader = FrameReader::new(Cursor::new(wire));
        assert!(matches!(
            reader.read_frame().unwrap_err(),
            FrameError::ConnectionClosed
        ));
    }

    #[test]
    fn byte_by_byte_delivery() {
        let wire = wire_with(&[b"\x04slow"]);
        let mut reader = FrameReader::new(ByteByByteReader { bytes: wire, pos: 0 });
        assert_eq!(reader.read_frame().unwrap().as_ref(), b"\x04slow");
    }

    #[test]
    fn interrupted_read_retries() {
        let wire = wire_with(&[b"\x02ok"]);
        let mut reader = FrameReader::new(InterruptedThenData {
            interrupted: false,
            bytes: wire,
            pos: 0,
        });
        assert_eq!(reader.read_frame().unwrap().as_ref(), b"\x02ok");
    }

    #[test]
    fn would_block_propagates_and_preserves_buffer() {
        // Half a frame, then WouldBlock, then the rest.
        let wire = wire_with(&[b"\x06porp!!"]);
        let split = wire.len() / 2;
        let mut reader = FrameReader::new(SplitWithWouldBlock {
            first: wire[..split].to_vec(),
            second: wire[split..].to_vec(),
            state: 0,
        });

        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::WouldBlock));
        assert_eq!(reader.read_frame().unwrap().as_ref(), b"\x06porp!!");
    }

    #[test]
    fn dispatch_routes_by_leading_byte() {
        let sink = RecordingSink::default();
        assert!(dispatch(&sink, Bytes::from_static(&[0x00, 0x01, 0x00])));
        assert!(dispatch(&sink, Bytes::from_static(b"\x02hi")));

        let responses = sink.responses.lock().unwrap();
        let datagrams = sink.datagrams.lock().unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(datagrams.len(), 1);
        assert_eq!(responses[0].as_ref(), &[0x00, 0x01, 0x00]);
        assert_eq!(datagrams[0].as_ref(), b"\x02hi");
    }

    #[derive(Default)]
    struct RecordingSink {
        responses: Mutex<Vec<Bytes>>,
        datagrams: Mutex<Vec<Bytes>>,
    }

    impl FrameSink for RecordingSink {
        fn on_response(&self, frame: Bytes) -> bool {
            self.responses.lock().unwrap().push(frame);
            true
        }

        fn on_datagram(&self, frame: Bytes) -> bool {
            self.datagrams.lock().unwrap().push(frame);
            true
        }
    }

    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    struct InterruptedThenData {
        interrupted: bool,
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for InterruptedThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            let remaining = self.bytes.len() - self.pos;
            let n = remaining.min(buf.len());
            buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    struct SplitWithWouldBlock {
        first: Vec<u8>,
        second: Vec<u8>,
        state: u8,
    }

    impl Read for SplitWithWouldBlock {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.state {
                0 => {
                    self.state = 1;
                    let n = self.first.len().min(buf.len());
                    buf[..n].copy_from_slice(&self.first[..n]);
                    Ok(n)
                }
                1 => {
                    self.state = 2;
                    Err(std::io::Error::from(ErrorKind::WouldBlock))
                }
                _ => {
                    let n = self.second.len().min(buf.len());
                    buf[..n].copy_from_slice(&self.second[..n]);
                    self.second.drain(..n);
                    Ok(n)
                }
            }
        }
    }
}
