//! Checkpoint metadata and save options.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Format version written into every checkpoint header.
pub const CHECKPOINT_FORMAT_VERSION: &str = "1.0.0";

/// Whether a checkpoint produced by `version` can be loaded by this build.
/// Compatibility is decided by the major component alone.
pub fn is_compatible_version(version: &str) -> bool {
  fn major(v: &str) -> Option<&str> { v.split('.').next().filter(|m| !m.is_empty()) }
  major(version).is_some() && major(version) == major(CHECKPOINT_FORMAT_VERSION)
}

/// Everything known about a checkpoint without loading its records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
  pub checkpoint_id: String,
  pub ci_id:         String,
  pub created_at:    DateTime<Utc>,
  pub version:       String,
  pub record_count:  usize,
  pub tier1_records: usize,
  pub tier2_records: usize,
  pub tier3_records: usize,
  pub file_size:     u64,
  pub checksum:      String,
  pub compressed:    bool,
  pub notes:         Option<String>,
}

/// A listing entry: metadata plus the outcome of validating the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckpointInfo {
  #[serde(flatten)]
  pub metadata: CheckpointMetadata,
  pub valid:    bool,
}

/// What to put in a new checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOptions {
  pub ci_id:         String,
  pub notes:         Option<String>,
  pub compress:      bool,
  pub include_tier1: bool,
  /// Reserved until Tier 2 snapshots exist.
  pub include_tier2: bool,
  /// Reserved until Tier 3 exists.
  pub include_tier3: bool,
}

impl SaveOptions {
  pub fn new(ci_id: impl Into<String>) -> Self {
    Self {
      ci_id:         ci_id.into(),
      notes:         None,
      compress:      false,
      include_tier1: true,
      include_tier2: false,
      include_tier3: false,
    }
  }

  pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
    self.notes = Some(notes.into());
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn same_major_is_compatible() {
    assert!(is_compatible_version("1.0.0"));
    assert!(is_compatible_version("1.4.2"));
    assert!(!is_compatible_version("2.0.0"));
    assert!(!is_compatible_version("0.9.0"));
    assert!(!is_compatible_version(""));
  }
}
