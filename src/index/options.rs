use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::merge::prefix::{MAX_MERGABLE_COMPONENT_SIZE, MAX_TOLERANCE_COMPONENT_COUNT};
use crate::types::Properties;

/// Configuration for an [`LsmIndex`](super::LsmIndex).
#[derive(Debug, Clone)]
pub struct IndexOptions {
    /// Directory holding the component files.
    pub dir: PathBuf,
    /// Memory component size that triggers a flush.
    pub memory_budget_bytes: usize,
    /// Target size of a data block inside a component file.
    pub block_size: usize,
    pub bloom_false_positive_rate: f64,
    /// Leading fields that identify a tuple.
    pub key_field_count: usize,
    /// Registry tag of the merge policy.
    pub merge_policy: String,
    pub merge_policy_properties: Properties,
    pub merge_threads: usize,
}

impl IndexOptions {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        IndexOptions {
            dir: dir.into(),
            ..Self::default()
        }
    }

    pub fn merge_policy(mut self, tag: &str, properties: Properties) -> Self {
        self.merge_policy = tag.to_string();
        self.merge_policy_properties = properties;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        let invalid = |key: &str, reason: &str| {
            Err(Error::Config {
                key: key.into(),
                reason: reason.into(),
            })
        };
        if self.block_size == 0 {
            return invalid("block-size", "must be positive");
        }
        if !(self.bloom_false_positive_rate > 0.0 && self.bloom_false_positive_rate < 1.0) {
            return invalid("bloom-false-positive-rate", "must lie in (0, 1)");
        }
        if self.key_field_count == 0 {
            return invalid("key-field-count", "must be at least 1");
        }
        Ok(())
    }
}

impl Default for IndexOptions {
    fn default() -> Self {
        let mut merge_policy_properties = Properties::new();
        merge_policy_properties.insert(
            MAX_MERGABLE_COMPONENT_SIZE.to_string(),
            (64 * 1024 * 1024).to_string(),
        );
        merge_policy_properties.insert(MAX_TOLERANCE_COMPONENT_COUNT.to_string(), "5".to_string());

        IndexOptions {
            dir: PathBuf::from("lsm-index"),
            memory_budget_bytes: 4 * 1024 * 1024,
            block_size: 4096,
            bloom_false_positive_rate: 0.01,
            key_field_count: 1,
            merge_policy: "prefix".to_string(),
            merge_policy_properties,
            merge_threads: 1,
        }
    }
}
