//! Query parameters and result containers shared by every backend.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  digest::{DigestRecord, DigestType, PeriodType},
  record::{MemoryRecord, MemoryType},
};

// ─── Ordering ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
  #[default]
  NewestFirst,
  OldestFirst,
}

// ─── Tier 1 ──────────────────────────────────────────────────────────────────

/// Parameters for a Tier 1 record query.
#[derive(Debug, Clone, Default)]
pub struct MemoryQuery {
  /// Required; only this CI's records are considered.
  pub ci_id:          String,
  /// Inclusive lower bound on `timestamp`.
  pub start:          Option<DateTime<Utc>>,
  /// Inclusive upper bound on `timestamp`.
  pub end:            Option<DateTime<Utc>>,
  pub memory_type:    Option<MemoryType>,
  pub min_importance: Option<f64>,
  pub personal_only:  bool,
  pub collection:     Option<String>,
  pub order:          SortOrder,
  pub limit:          Option<usize>,
}

impl MemoryQuery {
  pub fn for_ci(ci_id: impl Into<String>) -> Self {
    Self {
      ci_id: ci_id.into(),
      ..Default::default()
    }
  }

  pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
    self.start = Some(start);
    self.end = Some(end);
    self
  }

  pub fn matches(&self, record: &MemoryRecord) -> bool {
    record.ci_id == self.ci_id
      && self.start.is_none_or(|start| record.timestamp >= start)
      && self.end.is_none_or(|end| record.timestamp <= end)
      && self.memory_type.is_none_or(|t| record.memory_type == t)
      && self.min_importance.is_none_or(|min| record.importance >= min)
      && (!self.personal_only || record.personal)
      && self
        .collection
        .as_deref()
        .is_none_or(|c| record.collection.as_deref() == Some(c))
  }
}

// ─── Tier 2 ──────────────────────────────────────────────────────────────────

/// Parameters for a Tier 2 digest query.
///
/// The index and the file-scan fallback apply exactly these predicates, so
/// both paths agree on the matching set. Time bounds are compared at
/// microsecond precision; theme and keyword filters are ASCII
/// case-insensitive substring matches. Archived digests never match.
#[derive(Debug, Clone, Default)]
pub struct DigestQuery {
  pub ci_id:       String,
  pub start:       Option<DateTime<Utc>>,
  pub end:         Option<DateTime<Utc>>,
  pub period_type: Option<PeriodType>,
  pub digest_type: Option<DigestType>,
  pub theme:       Option<String>,
  pub keyword:     Option<String>,
  pub limit:       Option<usize>,
}

impl DigestQuery {
  pub fn for_ci(ci_id: impl Into<String>) -> Self {
    Self {
      ci_id: ci_id.into(),
      ..Default::default()
    }
  }

  pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
    self.start = Some(start);
    self.end = Some(end);
    self
  }

  pub fn matches(&self, digest: &DigestRecord) -> bool {
    let at = digest.timestamp.timestamp_micros();
    !digest.archived
      && digest.ci_id == self.ci_id
      && self.start.is_none_or(|s| at >= s.timestamp_micros())
      && self.end.is_none_or(|e| at <= e.timestamp_micros())
      && self.period_type.is_none_or(|p| digest.period_type == p)
      && self.digest_type.is_none_or(|t| digest.digest_type == t)
      && self
        .theme
        .as_deref()
        .is_none_or(|needle| any_contains(&digest.themes, needle))
      && self
        .keyword
        .as_deref()
        .is_none_or(|needle| any_contains(&digest.keywords, needle))
  }
}

fn any_contains(haystack: &[String], needle: &str) -> bool {
  let needle = needle.to_ascii_lowercase();
  haystack
    .iter()
    .any(|item| item.to_ascii_lowercase().contains(&needle))
}

// ─── Locations and results ───────────────────────────────────────────────────

/// A physical pointer to the start of one JSON line in a Tier 2 file.
///
/// `file_path` is relative to the Tier 2 root, e.g. `weekly/2025-W03.jsonl`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexLocation {
  pub file_path: PathBuf,
  pub offset:    u64,
}

/// One index match: a digest id and where its body lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexHit {
  pub digest_id: String,
  pub location:  IndexLocation,
}

/// Items recovered from a multi-record source, plus how many lines had to be
/// skipped as corrupt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Scanned<T> {
  pub items:   Vec<T>,
  pub skipped: usize,
}

impl<T> Default for Scanned<T> {
  fn default() -> Self {
    Self {
      items:   Vec::new(),
      skipped: 0,
    }
  }
}

/// Diagnostic counts reported by a digest index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
  pub digests:  usize,
  pub themes:   usize,
  pub keywords: usize,
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  fn digest() -> DigestRecord {
    let mut d = DigestRecord::new(
      "alice",
      PeriodType::Weekly,
      "2025-W03",
      DigestType::Learning,
    );
    d.timestamp = Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap();
    d.themes = vec!["Rust Ownership".into()];
    d.keywords = vec!["borrow".into(), "lifetime".into()];
    d
  }

  #[test]
  fn theme_match_is_case_insensitive_substring() {
    let mut q = DigestQuery::for_ci("alice");
    q.theme = Some("ownER".into());
    assert!(q.matches(&digest()));
    q.theme = Some("python".into());
    assert!(!q.matches(&digest()));
  }

  #[test]
  fn time_bounds_are_inclusive() {
    let at = Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap();
    assert!(DigestQuery::for_ci("alice").between(at, at).matches(&digest()));
  }

  #[test]
  fn archived_and_foreign_digests_never_match() {
    let mut d = digest();
    d.archived = true;
    assert!(!DigestQuery::for_ci("alice").matches(&d));
    assert!(!DigestQuery::for_ci("bob").matches(&digest()));
  }

  #[test]
  fn memory_query_filters_combine() {
    let r = MemoryRecord::new("alice", MemoryType::Decision, "use sqlite", 0.7)
      .with_personal(true);
    let mut q = MemoryQuery::for_ci("alice");
    q.memory_type = Some(MemoryType::Decision);
    q.min_importance = Some(0.7);
    q.personal_only = true;
    assert!(q.matches(&r));
    q.min_importance = Some(0.71);
    assert!(!q.matches(&r));
  }
}
