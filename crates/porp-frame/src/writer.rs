use std::io::{ErrorKind, Write};

use crate::cobs;
use crate::codec::DELIMITER;
use crate::error::{FrameError, Result};
use crate::reader::DEFAULT_MAX_FRAME;

/// Writes COBS-framed, delimiter-terminated frames to any `Write` stream.
pub struct FrameWriter<T> {
    inner: T,
    max_frame_size: usize,
}

impl<T: Write> FrameWriter<T> {
    /// Create a frame writer with the default frame size cap.
    pub fn new(inner: T) -> Self {
        Self::with_max_frame(inner, DEFAULT_MAX_FRAME)
    }

    /// Create a frame writer with an explicit frame size cap.
    pub fn with_max_frame(inner: T, max_frame_size: usize) -> Self {
        Self {
            inner,
            max_frame_size,
        }
    }

    /// COBS-encode a decoded frame, append the delimiter, and write it
    /// out in full (blocking).
    pub fn send(&mut self, frame: &[u8]) -> Result<()> {
        if frame.len() > self.max_frame_size {
            return Err(FrameError::PayloadTooLarge {
                size: frame.len(),
                max: self.max_frame_size,
            });
        }

        let mut wire = cobs::encode(frame);
        wire.push(DELIMITER);

        let mut offset = 0usize;
        while offset < wire.len() {
            match self.inner.write(&wire[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::reader::FrameReader;

    #[test]
    fn written_frames_decode() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        writer.send(b"\x05hello").unwrap();
        writer.send(b"\x00\x01\x06").unwrap();

        let wire = writer.into_inner().into_inner();
        assert_eq!(wire.iter().filter(|&&b| b == DELIMITER).count(), 2);

        let mut reader = FrameReader::new(Cursor::new(wire));
        assert_eq!(reader.read_frame().unwrap().as_ref(), b"\x05hello");
        assert_eq!(reader.read_frame().unwrap().as_ref(), b"\x00\x01\x06");
    }

    #[test]
    fn delimiter_only_terminates() {
        // Payload with embedded zero: the only on-wire zero must be the
        // trailing delimiter.
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        writer.send(b"a\x00b").unwrap();

        let wire = writer.into_inner().into_inner();
        assert_eq!(wire.iter().filter(|&&b| b == 0).count(), 1);
        assert_eq!(wire.last(), Some(&DELIMITER));
    }

    #[test]
    fn oversized_frame_rejected() {
        let mut writer = FrameWriter::with_max_frame(Cursor::new(Vec::<u8>::new()), 4);
        let err = writer.send(b"too big for four").unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
    }

    #[test]
    fn zero_write_is_connection_closed() {
        struct ZeroWriter;
        impl Write for ZeroWriter {
            fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
                Ok(0)
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let mut writer = FrameWriter::new(ZeroWriter);
        let err = writer.send(b"\x01x").unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn interrupted_write_retries() {
        struct InterruptedOnce {
            interrupted: bool,
            data: Vec<u8>,
        }
        impl Write for InterruptedOnce {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                if !self.interrupted {
                    self.interrupted = true;
                    return Err(std::io::Error::from(ErrorKind::Interrupted));
                }
                self.data.extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let mut writer = FrameWriter::new(InterruptedOnce {
            interrupted: false,
            data: Vec::new(),
        });
        writer.send(b"\x05retry").unwrap();
        assert!(!writer.into_inner().data.is_empty());
    }
}
