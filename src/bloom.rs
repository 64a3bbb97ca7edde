//! Bloom Filter
//!
//! A space-efficient probabilistic set used in front of the memtable and
//! embedded in every SSTable. It can say with certainty that a key is **not**
//! present (no false negatives) and is wrong about presence at roughly the
//! configured false-positive rate.

use serde::{Deserialize, Serialize};

/// A bloom filter backed by a bit vector with `k` hash functions.
///
/// Uses double hashing: `h(i) = h1 + i * h2` where `h1` and `h2` are FNV-1a
/// with two different seeds.
#[derive(Clone, Serialize, Deserialize)]
pub struct BloomFilter {
    bits: Vec<u8>,
    num_bits: u64,
    num_hashes: u32,
}

impl BloomFilter {
    /// Creates a filter sized for `expected_items` at `false_positive_rate`.
    ///
    /// Degenerate inputs are clamped: zero items sizes for one item and the
    /// rate is kept inside `(0, 1)`.
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        let n = expected_items.max(1) as f64;
        let p = false_positive_rate.clamp(1e-9, 0.5);

        // m = -n * ln(p) / ln(2)^2
        let m = (-n * p.ln() / std::f64::consts::LN_2.powi(2)).ceil() as u64;
        let m = m.max(8);

        // k = (m/n) * ln(2)
        let k = ((m as f64 / n) * std::f64::consts::LN_2).ceil() as u32;
        let k = k.clamp(1, 30);

        Self {
            bits: vec![0u8; ((m + 7) / 8) as usize],
            num_bits: m,
            num_hashes: k,
        }
    }

    pub fn insert(&mut self, key: &[u8]) {
        let (h1, h2) = hash_pair(key);
        for i in 0..self.num_hashes {
            let idx = self.bit_index(h1, h2, i);
            self.bits[(idx / 8) as usize] |= 1 << (idx % 8);
        }
    }

    /// `false` means definitely absent
    #[must_use]
    pub fn may_contain(&self, key: &[u8]) -> bool {
        let (h1, h2) = hash_pair(key);
        (0..self.num_hashes).all(|i| {
            let idx = self.bit_index(h1, h2, i);
            (self.bits[(idx / 8) as usize] >> (idx % 8)) & 1 == 1
        })
    }

    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Rejects filters whose bit vector does not match the declared size,
    /// which would otherwise index out of bounds.
    pub fn is_consistent(&self) -> bool {
        self.num_bits > 0
            && self.num_hashes > 0
            && self.bits.len() as u64 == (self.num_bits + 7) / 8
    }

    fn bit_index(&self, h1: u64, h2: u64, i: u32) -> u64 {
        h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.num_bits
    }
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("num_bits", &self.num_bits)
            .field("num_hashes", &self.num_hashes)
            .field("bytes", &self.bits.len())
            .finish()
    }
}

fn hash_pair(key: &[u8]) -> (u64, u64) {
    (
        fnv1a_64(key, FNV_OFFSET_BASIS),
        fnv1a_64(key, 0x517cc1b727220a95),
    )
}

pub(crate) const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;

/// FNV-1a 64-bit hash with a configurable starting basis.
pub(crate) fn fnv1a_64(data: &[u8], basis: u64) -> u64 {
    const FNV_PRIME: u64 = 0x00000100000001b3;
    let mut hash = basis;
    for &byte in data {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}
