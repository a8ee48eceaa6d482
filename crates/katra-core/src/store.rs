//! Capability traits implemented by storage backends.
//!
//! `katra-store` provides the file-backed Tier 1 store and the SQLite digest
//! index. The engine dispatches over a closed set of backend variants chosen
//! at construction time; these traits are the interface those variants
//! share.

use crate::{
  digest::DigestRecord,
  query::{DigestQuery, IndexHit, IndexLocation, IndexStats, MemoryQuery, Scanned},
  record::MemoryRecord,
};

// ─── Tier 1 ──────────────────────────────────────────────────────────────────

/// Append-only persistence for raw memory records.
///
/// All calls are synchronous and may be made from any thread.
pub trait RecordStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Validate and append one record. Nothing is written if validation fails.
  fn store(&self, record: &MemoryRecord) -> Result<(), Self::Error>;

  /// Return matching records plus a count of lines skipped as corrupt. A bad
  /// line never fails the whole query.
  fn query(
    &self,
    query: &MemoryQuery,
  ) -> Result<Scanned<MemoryRecord>, Self::Error>;

  /// Move records older than `max_age_days` to a colder tier.
  ///
  /// Backends without archival must return an error of the not-implemented
  /// kind rather than silently succeeding.
  fn archive(&self, ci_id: &str, max_age_days: u32) -> Result<usize, Self::Error>;
}

// ─── Tier 2 index ────────────────────────────────────────────────────────────

/// A secondary index over Tier 2 digest files.
///
/// The index stores positions, not content, and may be dropped and rebuilt
/// from the digest files at any time.
pub trait DigestIndex: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Record where `digest` was written. Re-adding an id replaces its row.
  fn add(
    &self,
    digest: &DigestRecord,
    location: &IndexLocation,
  ) -> Result<(), Self::Error>;

  /// Return ids and locations of matching digests, newest first.
  fn query(&self, query: &DigestQuery) -> Result<Vec<IndexHit>, Self::Error>;

  fn stats(&self, ci_id: &str) -> Result<IndexStats, Self::Error>;
}
