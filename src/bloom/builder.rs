use crate::bloom::{hash_key, BloomFilter};

/// Collects key hashes while a component is written, then sizes the
/// filter for the exact key count once the component is finished.
///
/// Usage during a component build:
/// 1. Create BloomFilterBuilder with the target false-positive rate
/// 2. Call add_key() for every tuple key written
/// 3. Call build() to get the filter for serialization
pub struct BloomFilterBuilder {
    hashes: Vec<(u64, u64)>,
    false_positive_rate: f64,
}

impl BloomFilterBuilder {
    pub fn new(false_positive_rate: f64) -> Self {
        BloomFilterBuilder {
            hashes: Vec::new(),
            false_positive_rate,
        }
    }

    pub fn add_key(&mut self, key: &[u8]) {
        self.hashes.push(hash_key(key));
    }

    pub fn key_count(&self) -> usize {
        self.hashes.len()
    }

    /// Finalize the filter. An empty component still gets a (tiny) filter.
    pub fn build(self) -> BloomFilter {
        let mut filter = BloomFilter::new(self.hashes.len().max(1), self.false_positive_rate);
        for (h1, h2) in self.hashes {
            filter.insert_hash(h1, h2);
        }
        filter
    }
}
