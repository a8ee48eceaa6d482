//! Encoding helpers between domain values and index columns.
//!
//! Timestamps are stored as integer microseconds so that range filters in
//! SQL agree with [`DigestQuery::matches`](katra_core::query::DigestQuery).
//! Paths are stored as UTF-8 text relative to the Tier 2 root.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use katra_core::query::{IndexHit, IndexLocation};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_ts(dt: DateTime<Utc>) -> i64 { dt.timestamp_micros() }

// ─── Counts and offsets ──────────────────────────────────────────────────────

pub fn encode_count(n: usize) -> i64 { i64::try_from(n).unwrap_or(i64::MAX) }

pub fn decode_count(n: i64) -> Result<usize> {
  usize::try_from(n).map_err(|_| Error::MalformedRow(format!("negative count {n}")))
}

pub fn encode_offset(offset: u64) -> Result<i64> {
  i64::try_from(offset).map_err(|_| Error::MalformedRow(format!("offset {offset} too large")))
}

// ─── Paths ───────────────────────────────────────────────────────────────────

pub fn encode_path(path: &Path) -> Result<String> {
  path
    .to_str()
    .map(str::to_owned)
    .ok_or_else(|| Error::MalformedRow(format!("non-UTF-8 path {path:?}")))
}

// ─── LIKE patterns ───────────────────────────────────────────────────────────

/// A `%needle%` pattern for `LIKE ... ESCAPE '\'`, with wildcards in the
/// needle matched literally.
pub fn contains_pattern(needle: &str) -> String {
  let mut out = String::with_capacity(needle.len() + 2);
  out.push('%');
  for c in needle.chars() {
    if matches!(c, '%' | '_' | '\\') {
      out.push('\\');
    }
    out.push(c);
  }
  out.push('%');
  out
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw values read from a `digests` row by an index query.
pub struct RawHit {
  pub digest_id:   String,
  pub file_path:   String,
  pub file_offset: i64,
}

impl RawHit {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      digest_id:   row.get(0)?,
      file_path:   row.get(1)?,
      file_offset: row.get(2)?,
    })
  }

  pub fn into_hit(self) -> Result<IndexHit> {
    let offset = u64::try_from(self.file_offset).map_err(|_| {
      Error::MalformedRow(format!(
        "digest {} has negative offset {}",
        self.digest_id, self.file_offset
      ))
    })?;
    Ok(IndexHit {
      digest_id: self.digest_id,
      location:  IndexLocation {
        file_path: PathBuf::from(self.file_path),
        offset,
      },
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn like_wildcards_are_escaped() {
    assert_eq!(contains_pattern("rust"), "%rust%");
    assert_eq!(contains_pattern("50%_off\\"), "%50\\%\\_off\\\\%");
  }

  #[test]
  fn negative_offsets_are_rejected() {
    let raw = RawHit {
      digest_id:   "d1".into(),
      file_path:   "weekly/2025-W03.jsonl".into(),
      file_offset: -1,
    };
    assert!(matches!(raw.into_hit(), Err(Error::MalformedRow(_))));
  }
}
