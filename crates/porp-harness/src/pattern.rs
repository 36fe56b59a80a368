//! Deterministic payload generators for bit-error trials.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use porp_frame::MAX_DATAGRAM_PAYLOAD;

/// Fixed text corpus for the plain-words pattern. Short, mixed-length
/// payloads that read back sensibly on a serial console.
const WORDS: &[&str] = &[
    "the", "quick", "brown", "fox", "jumps", "over", "a", "lazy", "dog",
    "pack", "my", "box", "with", "five", "dozen", "liquor", "jugs",
    "sphinx", "of", "black", "quartz", "judge", "vow",
];

/// A family of trial payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadPattern {
    /// The embedded word corpus, one word per datagram.
    Words,
    /// Random contents with a random length in `min_len..=max_len`.
    Random { min_len: usize, max_len: usize },
    /// Random contents at a fixed length.
    RandomFixed { len: usize },
    /// Every byte the same `value` (stresses the COBS run-length path
    /// when the value is 0x00, and maximal blocks when it is 0xFF).
    Solid { value: u8, len: usize },
    /// One payload per single set bit, sweeping the upper half of the
    /// bit positions (`len * 4 .. len * 8`).
    BitSweep { len: usize },
}

impl PayloadPattern {
    /// Generate up to `limit` payloads. Deterministic for a given
    /// pattern, seed, and limit.
    pub fn payloads(&self, limit: usize, seed: u64) -> Vec<Vec<u8>> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut out = Vec::new();
        match *self {
            Self::Words => {
                out.extend(WORDS.iter().map(|w| w.as_bytes().to_vec()));
            }
            Self::Random { min_len, max_len } => {
                let max_len = max_len.min(MAX_DATAGRAM_PAYLOAD);
                let min_len = min_len.min(max_len);
                for _ in 0..limit {
                    let len = rng.gen_range(min_len..=max_len);
                    out.push(random_bytes(&mut rng, len));
                }
            }
            Self::RandomFixed { len } => {
                let len = len.min(MAX_DATAGRAM_PAYLOAD);
                for _ in 0..limit {
                    out.push(random_bytes(&mut rng, len));
                }
            }
            Self::Solid { value, len } => {
                out.push(vec![value; len.min(MAX_DATAGRAM_PAYLOAD)]);
            }
            Self::BitSweep { len } => {
                let len = len.min(MAX_DATAGRAM_PAYLOAD);
                for bit in len * 4..len * 8 {
                    let mut payload = vec![0u8; len];
                    payload[bit / 8] |= 1 << (bit % 8);
                    out.push(payload);
                }
            }
        }
        out.truncate(limit);
        out
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Words => "words",
            Self::Random { .. } => "random",
            Self::RandomFixed { .. } => "random-fixed",
            Self::Solid { .. } => "solid",
            Self::BitSweep { .. } => "bitsweep",
        }
    }
}

fn random_bytes(rng: &mut StdRng, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    rng.fill(&mut buf[..]);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_are_nonempty_and_bounded() {
        let payloads = PayloadPattern::Words.payloads(usize::MAX, 0);
        assert_eq!(payloads.len(), WORDS.len());
        for p in &payloads {
            assert!(!p.is_empty());
            assert!(p.len() <= MAX_DATAGRAM_PAYLOAD);
        }
    }

    #[test]
    fn random_is_deterministic_per_seed() {
        let pattern = PayloadPattern::Random {
            min_len: 1,
            max_len: 64,
        };
        assert_eq!(pattern.payloads(20, 0), pattern.payloads(20, 0));
        assert_ne!(pattern.payloads(20, 0), pattern.payloads(20, 1));
    }

    #[test]
    fn random_respects_length_bounds() {
        let pattern = PayloadPattern::Random {
            min_len: 3,
            max_len: 9,
        };
        for p in pattern.payloads(50, 42) {
            assert!((3..=9).contains(&p.len()));
        }
    }

    #[test]
    fn solid_is_a_single_uniform_payload() {
        let payloads = PayloadPattern::Solid { value: 0x00, len: 40 }.payloads(10, 0);
        assert_eq!(payloads, vec![vec![0u8; 40]]);
    }

    #[test]
    fn bit_sweep_sets_exactly_one_bit_per_payload() {
        let payloads = PayloadPattern::BitSweep { len: 4 }.payloads(usize::MAX, 0);
        assert_eq!(payloads.len(), 16); // bits 16..32
        for (i, p) in payloads.iter().enumerate() {
            let ones: u32 = p.iter().map(|b| b.count_ones()).sum();
            assert_eq!(ones, 1, "payload {i}");
            assert_eq!(p.len(), 4);
        }
        // First payload is the lowest bit of the upper half.
        assert_eq!(payloads[0], vec![0x00, 0x00, 0x01, 0x00]);
    }

    #[test]
    fn limit_truncates() {
        let payloads = PayloadPattern::Words.payloads(3, 0);
        assert_eq!(payloads.len(), 3);
    }

    #[test]
    fn lengths_are_clamped_to_the_datagram_maximum() {
        let payloads = PayloadPattern::RandomFixed { len: 10_000 }.payloads(1, 0);
        assert_eq!(payloads[0].len(), MAX_DATAGRAM_PAYLOAD);
    }
}
