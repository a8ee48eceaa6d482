//! Engine configuration.

use std::path::PathBuf;

use katra_core::record::MAX_CONTENT_BYTES;
use serde::Deserialize;

const MIB: u64 = 1024 * 1024;

/// Runtime engine configuration. Every field except `base_dir` has a
/// default, so a config file only needs to name the data directory.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
  /// Root holding `memory/` and `checkpoints/`.
  pub base_dir:             PathBuf,
  #[serde(default = "default_max_file_bytes")]
  pub tier1_max_file_bytes: u64,
  #[serde(default = "default_max_file_bytes")]
  pub tier2_max_file_bytes: u64,
  #[serde(default = "default_max_content_bytes")]
  pub max_content_bytes:    usize,
  /// Use the SQLite digest index. When off, every digest query takes the
  /// directory-scan path.
  #[serde(default = "default_index_enabled")]
  pub index_enabled:        bool,
}

impl EngineConfig {
  pub fn new(base_dir: impl Into<PathBuf>) -> Self {
    Self {
      base_dir:             base_dir.into(),
      tier1_max_file_bytes: default_max_file_bytes(),
      tier2_max_file_bytes: default_max_file_bytes(),
      max_content_bytes:    default_max_content_bytes(),
      index_enabled:        default_index_enabled(),
    }
  }
}

fn default_max_file_bytes() -> u64 { 50 * MIB }

fn default_max_content_bytes() -> usize { MAX_CONTENT_BYTES }

fn default_index_enabled() -> bool { true }
