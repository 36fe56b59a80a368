//! Tagged telemetry attributes carried after datagrams and command
//! replies.
//!
//! The metadata region is a run of `[attr_len][attr_id][value]` tuples,
//! where `attr_len` counts the id byte plus the value bytes; decoding
//! therefore advances `attr_len + 1` from each tuple's start. Tuples are
//! consumed while at least two bytes remain.

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;

use crate::error::{FrameError, Result};

/// Known attribute ids. The id space is a single byte; ids outside this
/// set pass through as raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum AttrId {
    /// Average bit strength over the last reception, as a fixed-point
    /// ratio scaled by 0xFFFF.
    AvgStrength = 96,
    /// Minimum bit strength over the last reception, same scaling.
    MinStrength = 97,
    /// Number of errors the receiver detected.
    DetectedErrors = 98,
    /// Active coding-mode word (conventionally shown in hex).
    CodingMode = 99,
    /// Receive signal variance.
    RxVariance = 100,
}

impl AttrId {
    /// Map a raw id byte to a known attribute.
    pub fn from_raw(id: u8) -> Option<Self> {
        match id {
            96 => Some(Self::AvgStrength),
            97 => Some(Self::MinStrength),
            98 => Some(Self::DetectedErrors),
            99 => Some(Self::CodingMode),
            100 => Some(Self::RxVariance),
            _ => None,
        }
    }

    /// Human-readable attribute name.
    pub fn name(self) -> &'static str {
        match self {
            Self::AvgStrength => "Average bit strength",
            Self::MinStrength => "Minimum bit strength",
            Self::DetectedErrors => "Num detected errors",
            Self::CodingMode => "Coding mode",
            Self::RxVariance => "Rx signal variance",
        }
    }

    /// Decode a raw value according to this id's convention.
    pub fn decode(self, raw: &[u8]) -> AttrValue {
        match self {
            Self::AvgStrength | Self::MinStrength => AttrValue::Ratio(ratio_le(raw)),
            Self::DetectedErrors | Self::RxVariance => AttrValue::Uint(uint_le(raw)),
            Self::CodingMode => AttrValue::CodingWord(uint_le(raw) as u32),
        }
    }
}

/// A decoded attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    /// Little-endian unsigned integer.
    Uint(u64),
    /// Fixed-point ratio in `[0, 1]`, scaled by 0xFFFF on the wire.
    Ratio(f64),
    /// Coding-mode word, displayed hexadecimal.
    CodingWord(u32),
    /// Unknown id: raw bytes, preserved untouched.
    Raw(Bytes),
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uint(v) => write!(f, "{v}"),
            Self::Ratio(v) => write!(f, "{v:.4}"),
            Self::CodingWord(v) => write!(f, "{v:#010x}"),
            Self::Raw(bytes) => write!(f, "{bytes:02x?}"),
        }
    }
}

fn uint_le(raw: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    let take = raw.len().min(8);
    buf[..take].copy_from_slice(&raw[..take]);
    u64::from_le_bytes(buf)
}

fn ratio_le(raw: &[u8]) -> f64 {
    uint_le(raw) as f64 / f64::from(0xFFFFu16)
}

/// An ordered map of attribute id to raw value bytes.
///
/// Raw bytes are the canonical representation; typed views are produced
/// on demand so unknown ids survive a decode/encode cycle byte-exact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes(BTreeMap<u8, Bytes>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Raw value bytes for an id.
    pub fn raw(&self, id: u8) -> Option<&Bytes> {
        self.0.get(&id)
    }

    /// Value decoded as a little-endian unsigned integer.
    pub fn uint(&self, id: u8) -> Option<u64> {
        self.0.get(&id).map(|raw| uint_le(raw))
    }

    /// Value decoded as a fixed-point ratio scaled by 0xFFFF.
    pub fn ratio(&self, id: u8) -> Option<f64> {
        self.0.get(&id).map(|raw| ratio_le(raw))
    }

    /// Value decoded as a coding-mode word.
    pub fn coding_word(&self, id: u8) -> Option<u32> {
        self.0.get(&id).map(|raw| uint_le(raw) as u32)
    }

    /// Typed view of one attribute; unknown ids come back as `Raw`.
    pub fn value(&self, id: u8) -> Option<AttrValue> {
        let raw = self.0.get(&id)?;
        Some(match AttrId::from_raw(id) {
            Some(known) => known.decode(raw),
            None => AttrValue::Raw(raw.clone()),
        })
    }

    pub fn insert(&mut self, id: u8, value: impl Into<Bytes>) {
        self.0.insert(id, value.into());
    }

    pub fn insert_u16(&mut self, id: u8, value: u16) {
        self.insert(id, value.to_le_bytes().to_vec());
    }

    pub fn insert_u32(&mut self, id: u8, value: u32) {
        self.insert(id, value.to_le_bytes().to_vec());
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, &Bytes)> {
        self.0.iter().map(|(&id, raw)| (id, raw))
    }
}

/// Decode a metadata region into attributes.
///
/// Tolerant by design: a truncated final tuple yields whatever value
/// bytes are present, and a duplicated id keeps the last occurrence —
/// corruption of the metadata region must not take the datagram payload
/// down with it.
pub fn decode_metadata(mut region: &[u8]) -> Attributes {
    let mut attrs = Attributes::new();
    while region.len() >= 2 {
        let attr_len = region[0] as usize;
        let id = region[1];
        let tuple_end = (1 + attr_len).min(region.len());
        let value = if tuple_end > 2 { &region[2..tuple_end] } else { &[][..] };
        attrs.insert(id, Bytes::copy_from_slice(value));
        if 1 + attr_len >= region.len() {
            break;
        }
        region = &region[1 + attr_len..];
    }
    attrs
}

/// Largest value one attribute tuple can carry; the length byte also
/// counts the id.
pub const MAX_ATTR_VALUE: usize = 254;

/// Encode attributes into a metadata region. Exact inverse of
/// [`decode_metadata`].
///
/// A value longer than [`MAX_ATTR_VALUE`] cannot be described by the
/// one-byte tuple length and is rejected rather than wrapped into a
/// corrupt region.
pub fn encode_metadata(attrs: &Attributes) -> Result<Vec<u8>> {
    let mut region = Vec::new();
    for (id, raw) in attrs.iter() {
        if raw.len() > MAX_ATTR_VALUE {
            return Err(FrameError::PayloadTooLarge {
                size: raw.len(),
                max: MAX_ATTR_VALUE,
            });
        }
        region.push(1 + raw.len() as u8);
        region.push(id);
        region.extend_from_slice(raw);
    }
    Ok(region)
}
