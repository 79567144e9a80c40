pub mod builder;

use xxhash_rust::xxh3::xxh3_128;

use crate::error::{Error, Result};

/// Probabilistic membership test over the key bytes of a component.
///
/// - If any bit is 0 → key is DEFINITELY NOT in the component
/// - If all bits are 1 → key is PROBABLY in the component
///
/// Point lookups consult it before reading any data block.
///
/// Sizing:
///   bits_per_key = -1.44 * log2(false_positive_rate)
///   num_hashes = bits_per_key * ln(2)
///
/// Double hashing: h_i(key) = h1(key) + i * h2(key) (mod m), where h1 and
/// h2 are the two halves of one xxh3-128 hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_hashes: u32,
    num_bits: u32,
}

impl BloomFilter {
    /// Create a new bloom filter sized for expected_items at the given FPR.
    ///
    /// # Panics
    /// Panics if expected_items is 0 or FPR is not in (0, 1).
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        assert!(expected_items > 0, "expected_items must be > 0");
        assert!(
            false_positive_rate > 0.0 && false_positive_rate < 1.0,
            "FPR must be in (0, 1)"
        );

        let bits_per_key = -1.44 * false_positive_rate.log2();
        let num_bits = ((expected_items as f64) * bits_per_key).ceil() as u32;
        let num_bits = num_bits.max(64);

        let num_hashes = (bits_per_key * 2.0f64.ln()).ceil() as u32;
        let num_hashes = num_hashes.max(1);

        let num_u64s = (num_bits as usize).div_ceil(64);
        Self {
            bits: vec![0u64; num_u64s],
            num_hashes,
            num_bits,
        }
    }

    /// Add a key to the bloom filter.
    pub fn insert(&mut self, key: &[u8]) {
        let (h1, h2) = hash_key(key);
        self.insert_hash(h1, h2);
    }

    pub(crate) fn insert_hash(&mut self, h1: u64, h2: u64) {
        for pos in self.bit_positions(h1, h2) {
            self.bits[pos / 64] |= 1 << (pos % 64);
        }
    }

    /// Check if a key MIGHT be in the component.
    pub fn may_contain(&self, key: &[u8]) -> bool {
        let (h1, h2) = hash_key(key);
        self.bit_positions(h1, h2)
            .all(|pos| self.bits[pos / 64] & (1 << (pos % 64)) != 0)
    }

    /// Encode as `[num_hashes u32][num_bits u32][words u64...]`, little endian.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + self.bits.len() * 8);
        buf.extend_from_slice(&self.num_hashes.to_le_bytes());
        buf.extend_from_slice(&self.num_bits.to_le_bytes());
        for word in &self.bits {
            buf.extend_from_slice(&word.to_le_bytes());
        }
        buf
    }

    /// Decode a filter written by [`serialize`](Self::serialize).
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() < 8 {
            return Err(Error::Corruption("bloom filter too short".into()));
        }
        let num_hashes = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let num_bits = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        let words = &data[8..];

        let expected_words = (num_bits as usize).div_ceil(64);
        if num_bits == 0 || num_hashes == 0 || words.len() != expected_words * 8 {
            return Err(Error::Corruption(format!(
                "bloom filter header ({num_hashes} hashes, {num_bits} bits) does not match {} payload bytes",
                words.len()
            )));
        }

        let bits = words
            .chunks_exact(8)
            .map(|chunk| {
                let mut word = [0u8; 8];
                word.copy_from_slice(chunk);
                u64::from_le_bytes(word)
            })
            .collect();

        Ok(Self {
            bits,
            num_hashes,
            num_bits,
        })
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    pub fn num_bits(&self) -> u32 {
        self.num_bits
    }

    /// Bit positions h1 + i * h2 (mod num_bits) for i in 0..num_hashes.
    fn bit_positions(&self, h1: u64, h2: u64) -> impl Iterator<Item = usize> + use<> {
        let num_bits = u64::from(self.num_bits);
        (0..u64::from(self.num_hashes))
            .map(move |i| (h1.wrapping_add(i.wrapping_mul(h2)) % num_bits) as usize)
    }
}

/// Split one 128-bit hash into the (h1, h2) pair used for double hashing.
pub(crate) fn hash_key(key: &[u8]) -> (u64, u64) {
    let hash128 = xxh3_128(key);
    (hash128 as u64, (hash128 >> 64) as u64)
}
