//! Fingerprint value types: exact content digests and perceptual bitstrings.

use crate::error::HashError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// SHA-256 digest of an image's canonical pixel data.
///
/// The all-zero value is reserved for degenerate images (no pixels) and is
/// treated as unattributable everywhere.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Digest produced for degenerate images
    pub const EMPTY: ContentHash = ContentHash([0; 32]);

    /// Wrap raw digest bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse a 64-character hex string
    pub fn from_hex(hex_str: &str) -> Option<Self> {
        let bytes = hex::decode(hex_str).ok()?;
        let array: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// True for the digest of a degenerate image
    pub fn is_empty(&self) -> bool {
        self.0 == [0; 32]
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First eight hex characters, for log lines
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({}…)", self.short())
    }
}

/// A fixed-length perceptual bitstring.
///
/// Bits are packed most-significant first; padding bits in the final byte are
/// always zero so byte-wise XOR gives an exact Hamming distance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PerceptualHash {
    bits: Vec<u8>,
    len: usize,
}

impl PerceptualHash {
    /// The hash of a degenerate image
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a hash from individual bits
    pub fn from_bits<I: IntoIterator<Item = bool>>(bits: I) -> Self {
        let mut packed = Vec::new();
        let mut len = 0;
        for bit in bits {
            if len % 8 == 0 {
                packed.push(0u8);
            }
            if bit {
                let last = packed.len() - 1;
                packed[last] |= 0x80 >> (len % 8);
            }
            len += 1;
        }
        Self { bits: packed, len }
    }

    /// An all-zero hash of the given length
    pub fn zeros(len: usize) -> Self {
        Self {
            bits: vec![0; len.div_ceil(8)],
            len,
        }
    }

    /// Number of bits
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read a single bit
    pub fn bit(&self, index: usize) -> bool {
        index < self.len && self.bits[index / 8] & (0x80 >> (index % 8)) != 0
    }

    pub fn count_ones(&self) -> u32 {
        self.bits.iter().map(|b| b.count_ones()).sum()
    }

    /// Whether the source grid had any frequency content.
    ///
    /// A flat grid has no AC energy and always hashes to all zeros, so such
    /// hashes say nothing about structure.
    pub fn carries_detail(&self) -> bool {
        self.count_ones() > 0
    }

    /// Number of differing bits.
    ///
    /// Hashes of different lengths come from different grid sizes and cannot
    /// be compared; that is reported rather than truncated.
    pub fn hamming(&self, other: &Self) -> Result<u32, HashError> {
        if self.len != other.len {
            return Err(HashError::LengthMismatch {
                left: self.len,
                right: other.len,
            });
        }
        Ok(self
            .bits
            .iter()
            .zip(other.bits.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum())
    }

    /// Normalized Hamming distance in [0, 1]
    pub fn distance(&self, other: &Self) -> Result<f64, HashError> {
        let differing = self.hamming(other)?;
        if self.len == 0 {
            return Ok(0.0);
        }
        Ok(differing as f64 / self.len as f64)
    }

    /// Render as a string of `0` and `1`
    pub fn to_bit_string(&self) -> String {
        (0..self.len)
            .map(|i| if self.bit(i) { '1' } else { '0' })
            .collect()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bits)
    }
}

impl fmt::Display for PerceptualHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_bit_string())
    }
}

/// Exact and perceptual identity of one image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageFingerprint {
    pub content_hash: ContentHash,
    pub perceptual_hash: PerceptualHash,
}

impl ImageFingerprint {
    /// Fingerprint of a degenerate image
    pub fn empty() -> Self {
        Self {
            content_hash: ContentHash::EMPTY,
            perceptual_hash: PerceptualHash::empty(),
        }
    }

    /// False for degenerate images; those must not take part in fuzzy matching
    pub fn is_attributable(&self) -> bool {
        !self.content_hash.is_empty() && !self.perceptual_hash.is_empty()
    }
}
