//! On-disk directory layout.
//!
//! ```text
//! <base>/memory/tier1/<ci_id>/<YYYY-MM-DD>.jsonl
//! <base>/memory/tier2/weekly/<period_id>.jsonl
//! <base>/memory/tier2/monthly/<period_id>.jsonl
//! <base>/memory/tier2/index/digests.db
//! <base>/checkpoints/checkpoint_<checkpoint_id>.kcp
//! ```

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use katra_core::{digest::PeriodType, period::day_id};

pub const JSONL_EXTENSION: &str = "jsonl";
pub const CHECKPOINT_PREFIX: &str = "checkpoint_";
pub const CHECKPOINT_EXTENSION: &str = "kcp";

#[derive(Debug, Clone)]
pub struct Layout {
  base: PathBuf,
}

impl Layout {
  pub fn new(base: impl Into<PathBuf>) -> Self { Self { base: base.into() } }

  // ── Tier 1 ────────────────────────────────────────────────────────────────

  pub fn tier1_root(&self) -> PathBuf { self.base.join("memory").join("tier1") }

  pub fn tier1_ci_dir(&self, ci_id: &str) -> PathBuf { self.tier1_root().join(ci_id) }

  pub fn tier1_day_file(&self, ci_id: &str, date: NaiveDate) -> PathBuf {
    self
      .tier1_ci_dir(ci_id)
      .join(format!("{}.{JSONL_EXTENSION}", day_id(date)))
  }

  // ── Tier 2 ────────────────────────────────────────────────────────────────

  pub fn tier2_root(&self) -> PathBuf { self.base.join("memory").join("tier2") }

  /// Path of a period file relative to [`Layout::tier2_root`]. This is the
  /// form stored in the index.
  pub fn tier2_relative(period_type: PeriodType, period_id: &str) -> PathBuf {
    Path::new(period_type.as_str()).join(format!("{period_id}.{JSONL_EXTENSION}"))
  }

  pub fn tier2_period_dir(&self, period_type: PeriodType) -> PathBuf {
    self.tier2_root().join(period_type.as_str())
  }

  pub fn index_db(&self) -> PathBuf { self.tier2_root().join("index").join("digests.db") }

  // ── Checkpoints ───────────────────────────────────────────────────────────

  pub fn checkpoint_dir(&self) -> PathBuf { self.base.join("checkpoints") }

  pub fn checkpoint_file(&self, checkpoint_id: &str) -> PathBuf {
    self
      .checkpoint_dir()
      .join(format!("{CHECKPOINT_PREFIX}{checkpoint_id}.{CHECKPOINT_EXTENSION}"))
  }

  /// Recover a checkpoint id from a file name, if it has the right shape.
  pub fn checkpoint_id_from_file_name(name: &str) -> Option<&str> {
    name
      .strip_prefix(CHECKPOINT_PREFIX)?
      .strip_suffix(CHECKPOINT_EXTENSION)?
      .strip_suffix('.')
      .filter(|id| !id.is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn paths_follow_the_documented_layout() {
    let layout = Layout::new("/data");
    let date = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
    assert_eq!(
      layout.tier1_day_file("alice", date),
      Path::new("/data/memory/tier1/alice/2025-01-15.jsonl")
    );
    assert_eq!(
      layout.tier2_root().join(Layout::tier2_relative(PeriodType::Weekly, "2025-W03")),
      Path::new("/data/memory/tier2/weekly/2025-W03.jsonl")
    );
    assert_eq!(
      layout.index_db(),
      Path::new("/data/memory/tier2/index/digests.db")
    );
    assert_eq!(
      layout.checkpoint_file("alice_1736899200000"),
      Path::new("/data/checkpoints/checkpoint_alice_1736899200000.kcp")
    );
  }

  #[test]
  fn checkpoint_ids_come_back_out_of_file_names() {
    assert_eq!(
      Layout::checkpoint_id_from_file_name("checkpoint_alice_17.kcp"),
      Some("alice_17")
    );
    assert_eq!(Layout::checkpoint_id_from_file_name("checkpoint_.kcp"), None);
    assert_eq!(Layout::checkpoint_id_from_file_name("notes.txt"), None);
    assert_eq!(Layout::checkpoint_id_from_file_name("checkpoint_a.kcp.tmp"), None);
  }
}
