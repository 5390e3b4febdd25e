use crate::crypto::hash::Hash256;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Proof-of-work target expressed as required leading zero bits.
///
/// A hash meets the target when, read as a big-endian 256-bit unsigned
/// integer, it is at most `2^(256 - bits)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DifficultyTarget {
    bits: u32,
}

impl DifficultyTarget {
    pub const MAX_BITS: u32 = 256;

    pub fn new(bits: u32) -> Self {
        Self { bits }
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// `2^(256 - bits)` as 32 big-endian bytes. `None` for zero bits, whose
    /// target does not fit in 256 bits, and above the maximum.
    pub fn target_hash(&self) -> Option<[u8; 32]> {
        if self.bits == 0 || self.bits > Self::MAX_BITS {
            return None;
        }

        let position = (self.bits - 1) as usize;
        let mut target = [0u8; 32];
        target[position / 8] = 0x80 >> (position % 8);
        Some(target)
    }

    pub fn is_met_by(&self, hash: &Hash256) -> bool {
        if self.bits == 0 {
            return true;
        }
        if self.bits > Self::MAX_BITS {
            return hash.is_zero();
        }

        let zeros = hash.leading_zero_bits();
        if zeros >= self.bits {
            return true;
        }

        // Only the target value itself has exactly bits - 1 leading zeros.
        zeros + 1 == self.bits && self.target_hash().as_ref() == Some(hash.as_bytes())
    }

    /// Mean number of trials to find a solution.
    pub fn expected_hashes(&self) -> f64 {
        2f64.powi(self.bits.min(Self::MAX_BITS) as i32)
    }

    pub fn estimate_time(&self, hashrate: f64) -> Option<Duration> {
        if hashrate <= 0.0 {
            return None;
        }
        Duration::try_from_secs_f64(self.expected_hashes() / hashrate).ok()
    }
}
