// In: src/config.rs

//! The single source of truth for redimension sizing configuration.
//!
//! `RedimConfig` is created once at the operator boundary (from a JSON document or
//! from the operator's `key=value` directives) and then shared read-only through
//! an `Arc<RedimConfig>`. Every byte ceiling used by the pipeline is derived from
//! `merge_sort_buffer_mb` unless an explicit override is present; the derivation
//! itself lives in `Settings`, which also knows the destination schema.

use std::num::NonZeroU64;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::RedimError;

//==================================================================================
// I. Directive Keys
//==================================================================================

pub const EST_TUPLE_SIZE_BYTES: &str = "est_tuple_size_bytes";
pub const SORTED_ARRAY_CHUNK_SIZE: &str = "sorted_array_chunk_size";
pub const SORT_CHUNK_SIZE_LIMIT_BYTES: &str = "sort_chunk_size_limit_bytes";
pub const SG_CHUNK_SIZE_LIMIT_BYTES: &str = "sg_chunk_size_limit_bytes";

//==================================================================================
// II. The Unified RedimConfig
//==================================================================================

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct RedimConfig {
    /// The per-worker memory budget for sorting and merging, in MiB. All byte
    /// ceilings not overridden below are carved out of it.
    #[serde(default = "default_merge_sort_buffer_mb")]
    pub merge_sort_buffer_mb: u64,

    /// Expected encoded size of one tuple, used to bound tuples per transit chunk.
    #[serde(default)]
    pub est_tuple_size_bytes: Option<NonZeroU64>,

    /// Number of tuples per transit chunk.
    #[serde(default)]
    pub sorted_array_chunk_size: Option<NonZeroU64>,

    /// Byte ceiling of a staging chunk fed to the local sort.
    #[serde(default)]
    pub sort_chunk_size_limit_bytes: Option<NonZeroU64>,

    /// Byte ceiling of a packed chunk sent through the shuffle.
    #[serde(default)]
    pub sg_chunk_size_limit_bytes: Option<NonZeroU64>,

    /// Directory for external-sort run files. Defaults to the system temp dir.
    #[serde(default)]
    pub spill_dir: Option<PathBuf>,
}

impl Default for RedimConfig {
    fn default() -> Self {
        Self {
            merge_sort_buffer_mb: default_merge_sort_buffer_mb(),
            est_tuple_size_bytes: None,
            sorted_array_chunk_size: None,
            sort_chunk_size_limit_bytes: None,
            sg_chunk_size_limit_bytes: None,
            spill_dir: None,
        }
    }
}

/// Helper for `serde` to provide a default for `merge_sort_buffer_mb`.
fn default_merge_sort_buffer_mb() -> u64 {
    128
}

impl RedimConfig {
    /// Loads a config from a JSON document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, RedimError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies the operator's `key=value` sizing directives on top of the
    /// defaults. Each key may appear once and must carry a positive integer.
    pub fn from_directives(directives: &[&str]) -> Result<Self, RedimError> {
        let mut config = Self::default();
        config.apply_directives(directives)?;
        Ok(config)
    }

    pub fn apply_directives(&mut self, directives: &[&str]) -> Result<(), RedimError> {
        for directive in directives {
            let (key, raw) = directive.split_once('=').ok_or_else(|| {
                RedimError::Config(format!("unrecognized parameter '{}'", directive))
            })?;
            let key = key.trim();
            let value = parse_positive(key, raw.trim())?;
            let slot = match key {
                EST_TUPLE_SIZE_BYTES => &mut self.est_tuple_size_bytes,
                SORTED_ARRAY_CHUNK_SIZE => &mut self.sorted_array_chunk_size,
                SORT_CHUNK_SIZE_LIMIT_BYTES => &mut self.sort_chunk_size_limit_bytes,
                SG_CHUNK_SIZE_LIMIT_BYTES => &mut self.sg_chunk_size_limit_bytes,
                other => {
                    return Err(RedimError::Config(format!(
                        "unrecognized parameter '{}'",
                        other
                    )))
                }
            };
            if slot.is_some() {
                return Err(RedimError::Config(format!(
                    "illegal attempt to set {} multiple times",
                    key
                )));
            }
            *slot = Some(value);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), RedimError> {
        if self.merge_sort_buffer_mb == 0 {
            return Err(RedimError::Config(
                "merge_sort_buffer_mb must be positive".into(),
            ));
        }
        Ok(())
    }

    /// The total sort/merge budget in bytes.
    pub fn sort_buffer_bytes(&self) -> u64 {
        self.merge_sort_buffer_mb.saturating_mul(1024 * 1024)
    }
}

fn parse_positive(key: &str, raw: &str) -> Result<NonZeroU64, RedimError> {
    raw.parse::<u64>()
        .ok()
        .and_then(NonZeroU64::new)
        .ok_or_else(|| {
            RedimError::Config(format!(
                "{} must be a positive integer, got '{}'",
                key, raw
            ))
        })
}
