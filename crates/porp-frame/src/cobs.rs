//! Consistent Overhead Byte Stuffing.
//!
//! COBS rewrites a payload so that it contains no zero byte, which frees
//! 0x00 to act as an unambiguous frame delimiter on a raw byte stream.
//! Each block starts with a code byte `n` (1..=255): the block carries
//! `n - 1` literal non-zero bytes, followed by an implicit zero unless
//! `n == 0xFF` (a full 254-byte run with no zero) or the block ends the
//! frame.

use crate::error::{FrameError, Result};

/// Longest literal run one code byte can describe.
const MAX_BLOCK: usize = 254;

/// Encode a payload into a zero-free byte sequence.
///
/// Worst-case expansion is one byte per 254 bytes of input, plus one.
/// The frame delimiter is *not* appended here; that is the writer's job.
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + payload.len() / MAX_BLOCK + 1);
    let mut code_idx = 0;
    let mut code: u8 = 1;
    out.push(0); // placeholder for the first code byte

    for &byte in payload {
        if byte == 0 {
            out[code_idx] = code;
            code_idx = out.len();
            out.push(0);
            code = 1;
        } else {
            out.push(byte);
            code += 1;
            if code == 0xFF {
                out[code_idx] = code;
                code_idx = out.len();
                out.push(0);
                code = 1;
            }
        }
    }

    out[code_idx] = code;
    out
}

/// Decode a COBS-encoded frame body. Exact inverse of [`encode`].
///
/// The input is the bytes *between* delimiters. An empty input decodes to
/// an empty payload (two back-to-back delimiters on the wire; the reader
/// discards those upstream). Inconsistent code bytes mean the frame was
/// corrupted in transit and yield [`FrameError::Malformed`].
pub fn decode(encoded: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(encoded.len());
    let mut idx = 0;

    while idx < encoded.len() {
        let code = encoded[idx];
        if code == 0 {
            return Err(FrameError::Malformed("zero byte inside encoded frame"));
        }
        idx += 1;

        let run = code as usize - 1;
        if idx + run > encoded.len() {
            return Err(FrameError::Malformed("length code runs past end of frame"));
        }
        for &byte in &encoded[idx..idx + run] {
            if byte == 0 {
                return Err(FrameError::Malformed("zero byte inside encoded frame"));
            }
            out.push(byte);
        }
        idx += run;

        // Implicit zero, except after a maximal block or at frame end.
        if code != 0xFF && idx < encoded.len() {
            out.push(0);
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(payload: &[u8]) {
        let encoded = encode(payload);
        assert!(
            !encoded.contains(&0),
            "encoded form must be zero-free: {encoded:?}"
        );
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, payload, "roundtrip mismatch for {payload:?}");
    }

    #[test]
    fn empty_payload() {
        assert_eq!(encode(&[]), vec![0x01]);
        assert_eq!(decode(&[0x01]).unwrap(), Vec::<u8>::new());
        assert_eq!(decode(&[]).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn single_zero() {
        assert_eq!(encode(&[0x00]), vec![0x01, 0x01]);
        roundtrip(&[0x00]);
    }

    #[test]
    fn known_vectors() {
        assert_eq!(encode(&[0x11, 0x22, 0x00, 0x33]), vec![0x03, 0x11, 0x22, 0x02, 0x33]);
        assert_eq!(encode(&[0x11, 0x00, 0x00, 0x00]), vec![0x02, 0x11, 0x01, 0x01, 0x01]);
        assert_eq!(encode(&[0x00, 0x00]), vec![0x01, 0x01, 0x01]);
    }

    #[test]
    fn embedded_zero_text() {
        roundtrip(b"Hello world\x00This is a test");
    }

    #[test]
    fn all_lengths_up_to_255() {
        for len in 0..=255usize {
            let payload: Vec<u8> = (0..len).map(|i| (i % 7) as u8).collect();
            roundtrip(&payload);
        }
    }

    #[test]
    fn boundary_patterns() {
        for len in [1usize, 8, 64, 253, 254, 255, 300] {
            roundtrip(&vec![0x00; len]);
            roundtrip(&vec![0xFF; len]);
        }
    }

    #[test]
    fn maximal_block_boundaries() {
        // 254 non-zero bytes need the 0xFF code and no implicit zero.
        let payload: Vec<u8> = (0..254).map(|i| (i % 255) as u8 + 1).collect();
        let encoded = encode(&payload);
        assert_eq!(encoded[0], 0xFF);
        roundtrip(&payload);

        // One more byte spills into a second block.
        let mut longer = payload.clone();
        longer.push(0xAB);
        roundtrip(&longer);

        // Zero right after a maximal run.
        let mut with_zero = payload;
        with_zero.push(0x00);
        roundtrip(&with_zero);
    }

    #[test]
    fn truncated_frame_is_malformed() {
        let mut encoded = encode(b"some payload bytes");
        encoded.truncate(encoded.len() - 3);
        // Corrupt in a way that the leading code now overruns.
        let err = decode(&[0x20, 0x11, 0x22]).unwrap_err();
        assert!(matches!(err, FrameError::Malformed(_)));
        let _ = encoded;
    }

    #[test]
    fn interior_zero_is_malformed() {
        let err = decode(&[0x03, 0x00, 0x11]).unwrap_err();
        assert!(matches!(err, FrameError::Malformed(_)));
    }

    #[test]
    fn code_overrun_is_distinct_from_empty() {
        // An empty frame is fine; a frame whose code byte promises more
        // bytes than exist is not.
        assert!(decode(&[]).is_ok());
        assert!(matches!(
            decode(&[0x05, 0x01]).unwrap_err(),
            FrameError::Malformed(_)
        ));
    }
}
