//! Link-quality measurement over a PORP channel.
//!
//! A trial pushes a pattern of datagrams through a sending channel,
//! watches for them on a receiving channel, and tallies what arrived
//! intact, what arrived damaged (down to the bit), and what never
//! arrived at all. [`emulator::EmulatedLink`] provides a scripted
//! back-to-back device pair so the whole stack can be exercised with no
//! hardware on the bench.

pub mod emulator;
pub mod pattern;
pub mod trial;

pub use emulator::{EmulatedLink, EmulatorOptions};
pub use pattern::PayloadPattern;
pub use trial::{run_trial, TrialConfig, TrialReport};

/// Hamming distance over the common prefix of two payloads. Length
/// differences are not counted here; callers track those separately.
pub fn count_bit_errors(sent: &[u8], received: &[u8]) -> u32 {
    sent.iter()
        .zip(received)
        .map(|(a, b)| (a ^ b).count_ones())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_payloads_have_zero_errors() {
        assert_eq!(count_bit_errors(b"hello", b"hello"), 0);
    }

    #[test]
    fn counts_flipped_bits() {
        assert_eq!(count_bit_errors(&[0x00], &[0xFF]), 8);
        assert_eq!(count_bit_errors(&[0b1010_0000], &[0b0101_0000]), 4);
    }

    #[test]
    fn extra_trailing_bytes_do_not_count() {
        assert_eq!(count_bit_errors(&[0xAA], &[0xAA, 0xFF, 0xFF]), 0);
        assert_eq!(count_bit_errors(&[0xAA, 0xFF], &[0xAA]), 0);
    }
}
