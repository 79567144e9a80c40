use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::merge::{ConstantMergePolicy, MergeMetrics, MergePolicy, NoMergePolicy, PrefixMergePolicy};
use crate::types::Properties;

type PolicyConstructor = fn(&Properties, Arc<MergeMetrics>) -> Result<Arc<dyn MergePolicy>>;

fn prefix_policy(properties: &Properties, metrics: Arc<MergeMetrics>) -> Result<Arc<dyn MergePolicy>> {
    Ok(Arc::new(PrefixMergePolicy::from_properties(properties, metrics)?))
}

fn constant_policy(
    properties: &Properties,
    metrics: Arc<MergeMetrics>,
) -> Result<Arc<dyn MergePolicy>> {
    Ok(Arc::new(ConstantMergePolicy::from_properties(properties, metrics)?))
}

fn no_merge_policy(_: &Properties, _: Arc<MergeMetrics>) -> Result<Arc<dyn MergePolicy>> {
    Ok(Arc::new(NoMergePolicy))
}

/// Registered merge policy tags.
const POLICIES: &[(&str, PolicyConstructor)] = &[
    ("prefix", prefix_policy),
    ("constant", constant_policy),
    ("no-merge", no_merge_policy),
];

/// Tags accepted by [`create_merge_policy`].
pub fn policy_names() -> impl Iterator<Item = &'static str> {
    POLICIES.iter().map(|(name, _)| *name)
}

/// Build the merge policy registered under `tag`.
pub fn create_merge_policy(
    tag: &str,
    properties: &Properties,
    metrics: Arc<MergeMetrics>,
) -> Result<Arc<dyn MergePolicy>> {
    let (_, constructor) = POLICIES
        .iter()
        .find(|(name, _)| *name == tag)
        .ok_or_else(|| Error::Config {
            key: "merge-policy".into(),
            reason: format!("unknown merge policy `{tag}`"),
        })?;
    constructor(properties, metrics)
}

pub(crate) fn parse_property<T>(properties: &Properties, key: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    let raw = properties.get(key).ok_or_else(|| Error::Config {
        key: key.into(),
        reason: "missing".into(),
    })?;
    raw.trim().parse().map_err(|e: T::Err| Error::Config {
        key: key.into(),
        reason: format!("`{raw}`: {e}"),
    })
}
