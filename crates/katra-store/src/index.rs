//! The Tier 2 digest index.
//!
//! [`SqliteIndex`] maps query predicates to `(file, offset)` locations inside
//! Tier 2 files. [`Tier2Index`] is the closed set of index backends the
//! engine chooses between when it is constructed.

use std::{
  fs,
  ops::ControlFlow,
  path::Path,
  sync::{Mutex, MutexGuard},
};

use katra_core::{
  digest::DigestRecord,
  error::validate_identifier,
  query::{DigestQuery, IndexHit, IndexLocation, IndexStats},
  store::DigestIndex,
};
use rusqlite::{Connection, ToSql};
use serde::Serialize;

use crate::{
  Error, Result,
  encode::{RawHit, contains_pattern, decode_count, encode_count, encode_offset, encode_path, encode_ts},
  layout::Layout,
  schema::{DROP_OUTDATED, SCHEMA, SCHEMA_VERSION},
  tier2::Tier2Store,
};

/// Outcome of [`SqliteIndex::rebuild`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
  pub indexed: usize,
  /// Corrupt lines passed over while scanning the digest files.
  pub skipped: usize,
}

// ─── SQLite ──────────────────────────────────────────────────────────────────

/// A digest index in a single SQLite file. One mutex guards the connection,
/// so reads, writes and rebuilds are serialised.
pub struct SqliteIndex {
  conn: Mutex<Connection>,
}

impl SqliteIndex {
  /// Open (or create) the index at `path` and run schema initialisation.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).map_err(Error::io(parent))?;
    }
    Self::init(Connection::open(path)?)
  }

  /// Open a throwaway in-memory index.
  pub fn open_in_memory() -> Result<Self> { Self::init(Connection::open_in_memory()?) }

  fn init(conn: Connection) -> Result<Self> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    if version != 0 && version < SCHEMA_VERSION {
      tracing::warn!(version, "dropping outdated tier2 index; rebuild to repopulate");
      conn.execute_batch(DROP_OUTDATED)?;
    }
    conn.execute_batch(SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|_| Error::LockPoisoned("tier2 index"))
  }

  /// Drop every row for `ci_id` and repopulate from the digest files.
  ///
  /// The index lock is held throughout and the work happens in one
  /// transaction, so concurrent readers see either the old rows or the
  /// complete new set. A digest appended while this runs is either read from
  /// its file here or added by its own `add` once the lock is released.
  pub fn rebuild(&self, ci_id: &str, tier2: &Tier2Store) -> Result<RebuildReport> {
    validate_identifier("ci_id", ci_id)?;
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;

    delete_ci(&tx, ci_id)?;

    let mut indexed = 0;
    let mut failure = None;
    let skipped = tier2.visit(None, |location, digest| {
      if digest.ci_id != ci_id {
        return ControlFlow::Continue(());
      }
      match insert(&tx, &digest, &location) {
        Ok(()) => {
          indexed += 1;
          ControlFlow::Continue(())
        }
        Err(e) => {
          failure = Some(e);
          ControlFlow::Break(())
        }
      }
    })?;
    if let Some(e) = failure {
      return Err(e);
    }
    tx.commit()?;

    tracing::info!(ci_id = %ci_id, indexed, skipped, "rebuilt tier2 index");
    Ok(RebuildReport { indexed, skipped })
  }
}

fn delete_ci(conn: &Connection, ci_id: &str) -> Result<()> {
  conn.execute("DELETE FROM digest_themes WHERE ci_id = ?1", [ci_id])?;
  conn.execute("DELETE FROM digest_keywords WHERE ci_id = ?1", [ci_id])?;
  conn.execute("DELETE FROM digests WHERE ci_id = ?1", [ci_id])?;
  Ok(())
}

fn insert(conn: &Connection, digest: &DigestRecord, location: &IndexLocation) -> Result<()> {
  let file_path = encode_path(&location.file_path)?;
  let offset = encode_offset(location.offset)?;
  let ci = digest.ci_id.as_str();
  let id = digest.digest_id.as_str();

  conn.execute(
    "DELETE FROM digest_themes WHERE ci_id = ?1 AND digest_id = ?2",
    [ci, id],
  )?;
  conn.execute(
    "DELETE FROM digest_keywords WHERE ci_id = ?1 AND digest_id = ?2",
    [ci, id],
  )?;
  conn.execute(
    "INSERT OR REPLACE INTO digests (
       digest_id, ci_id, timestamp, period_type, period_id, digest_type,
       source_record_count, questions_asked, archived, file_path, file_offset
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
    rusqlite::params![
      id,
      ci,
      encode_ts(digest.timestamp),
      digest.period_type.as_str(),
      digest.period_id,
      digest.digest_type.as_str(),
      encode_count(digest.source_record_count),
      encode_count(digest.questions_asked),
      digest.archived,
      file_path,
      offset,
    ],
  )?;

  let mut theme_stmt = conn.prepare_cached(
    "INSERT INTO digest_themes (ci_id, digest_id, theme) VALUES (?1, ?2, ?3)",
  )?;
  for theme in &digest.themes {
    theme_stmt.execute([ci, id, theme.as_str()])?;
  }
  let mut keyword_stmt = conn.prepare_cached(
    "INSERT INTO digest_keywords (ci_id, digest_id, keyword) VALUES (?1, ?2, ?3)",
  )?;
  for keyword in &digest.keywords {
    keyword_stmt.execute([ci, id, keyword.as_str()])?;
  }
  Ok(())
}

impl DigestIndex for SqliteIndex {
  type Error = Error;

  fn add(&self, digest: &DigestRecord, location: &IndexLocation) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    insert(&tx, digest, location)?;
    tx.commit()?;
    Ok(())
  }

  fn query(&self, query: &DigestQuery) -> Result<Vec<IndexHit>> {
    validate_identifier("ci_id", &query.ci_id)?;

    let mut sql = String::from(
      "SELECT d.digest_id, d.file_path, d.file_offset
       FROM digests d
       WHERE d.ci_id = ? AND d.archived = 0",
    );
    let mut params: Vec<Box<dyn ToSql>> = vec![Box::new(query.ci_id.clone())];

    if let Some(start) = query.start {
      sql.push_str(" AND d.timestamp >= ?");
      params.push(Box::new(encode_ts(start)));
    }
    if let Some(end) = query.end {
      sql.push_str(" AND d.timestamp <= ?");
      params.push(Box::new(encode_ts(end)));
    }
    if let Some(period_type) = query.period_type {
      sql.push_str(" AND d.period_type = ?");
      params.push(Box::new(period_type.as_str()));
    }
    if let Some(digest_type) = query.digest_type {
      sql.push_str(" AND d.digest_type = ?");
      params.push(Box::new(digest_type.as_str()));
    }
    if let Some(theme) = &query.theme {
      sql.push_str(
        " AND EXISTS (SELECT 1 FROM digest_themes t
                      WHERE t.ci_id = d.ci_id AND t.digest_id = d.digest_id
                        AND t.theme LIKE ? ESCAPE '\\')",
      );
      params.push(Box::new(contains_pattern(theme)));
    }
    if let Some(keyword) = &query.keyword {
      sql.push_str(
        " AND EXISTS (SELECT 1 FROM digest_keywords k
                      WHERE k.ci_id = d.ci_id AND k.digest_id = d.digest_id
                        AND k.keyword LIKE ? ESCAPE '\\')",
      );
      params.push(Box::new(contains_pattern(keyword)));
    }
    sql.push_str(" ORDER BY d.timestamp DESC, d.digest_id DESC");
    if let Some(limit) = query.limit {
      sql.push_str(" LIMIT ?");
      params.push(Box::new(encode_count(limit)));
    }

    let conn = self.lock()?;
    let mut stmt = conn.prepare(&sql)?;
    let raw = stmt
      .query_map(rusqlite::params_from_iter(params.iter()), RawHit::from_row)?
      .collect::<rusqlite::Result<Vec<_>>>()?;

    raw.into_iter().map(RawHit::into_hit).collect()
  }

  fn stats(&self, ci_id: &str) -> Result<IndexStats> {
    validate_identifier("ci_id", ci_id)?;
    let conn = self.lock()?;

    let count = |sql: &str| -> Result<usize> {
      let n: i64 = conn.query_row(sql, [ci_id], |r| r.get(0))?;
      decode_count(n)
    };

    Ok(IndexStats {
      digests:  count("SELECT COUNT(*) FROM digests WHERE ci_id = ?1")?,
      themes:   count(
        "SELECT COUNT(DISTINCT theme) FROM digest_themes WHERE ci_id = ?1",
      )?,
      keywords: count(
        "SELECT COUNT(DISTINCT keyword) FROM digest_keywords WHERE ci_id = ?1",
      )?,
    })
  }
}

// ─── Backend selection ───────────────────────────────────────────────────────

/// The index backends the engine can run with, chosen at construction time.
pub enum Tier2Index {
  Sqlite(SqliteIndex),
  /// No index. Every call fails with [`Error::IndexUnavailable`], which sends
  /// queries down the directory-scan path.
  Disabled,
}

impl Tier2Index {
  /// Open the SQLite index when `enabled`. A database that cannot be opened
  /// degrades to [`Tier2Index::Disabled`] with a warning rather than failing
  /// engine start-up.
  pub fn open(layout: &Layout, enabled: bool) -> Self {
    if !enabled {
      return Self::Disabled;
    }
    let path = layout.index_db();
    match SqliteIndex::open(&path) {
      Ok(index) => Self::Sqlite(index),
      Err(e) => {
        tracing::warn!(path = %path.display(), error = %e, "tier2 index unavailable; using file scans");
        Self::Disabled
      }
    }
  }

  pub fn is_available(&self) -> bool { matches!(self, Self::Sqlite(_)) }

  pub fn rebuild(&self, ci_id: &str, tier2: &Tier2Store) -> Result<RebuildReport> {
    match self {
      Self::Sqlite(index) => index.rebuild(ci_id, tier2),
      Self::Disabled => Err(Error::IndexUnavailable),
    }
  }
}

impl DigestIndex for Tier2Index {
  type Error = Error;

  fn add(&self, digest: &DigestRecord, location: &IndexLocation) -> Result<()> {
    match self {
      Self::Sqlite(index) => index.add(digest, location),
      Self::Disabled => Err(Error::IndexUnavailable),
    }
  }

  fn query(&self, query: &DigestQuery) -> Result<Vec<IndexHit>> {
    match self {
      Self::Sqlite(index) => index.query(query),
      Self::Disabled => Err(Error::IndexUnavailable),
    }
  }

  fn stats(&self, ci_id: &str) -> Result<IndexStats> {
    match self {
      Self::Sqlite(index) => index.stats(ci_id),
      Self::Disabled => Err(Error::IndexUnavailable),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;

  use chrono::{TimeZone, Utc};
  use katra_core::digest::{DigestType, PeriodType};

  use super::*;

  fn digest(ci_id: &str, hour: u32, digest_type: DigestType) -> DigestRecord {
    let mut d = DigestRecord::new(ci_id, PeriodType::Weekly, "2025-W03", digest_type);
    d.timestamp = Utc.with_ymd_and_hms(2025, 1, 15, hour, 0, 0).unwrap();
    d
  }

  fn location(offset: u64) -> IndexLocation {
    IndexLocation {
      file_path: PathBuf::from("weekly/2025-W03.jsonl"),
      offset,
    }
  }

  #[test]
  fn query_returns_newest_first_with_limit() {
    let index = SqliteIndex::open_in_memory().unwrap();
    let early = digest("alice", 8, DigestType::Interaction);
    let late = digest("alice", 20, DigestType::Interaction);
    index.add(&early, &location(0)).unwrap();
    index.add(&late, &location(100)).unwrap();

    let hits = index.query(&DigestQuery::for_ci("alice")).unwrap();
    assert_eq!(
      hits.iter().map(|h| h.digest_id.as_str()).collect::<Vec<_>>(),
      vec![late.digest_id.as_str(), early.digest_id.as_str()]
    );

    let mut limited = DigestQuery::for_ci("alice");
    limited.limit = Some(1);
    let hits = index.query(&limited).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].location, location(100));
  }

  #[test]
  fn filters_by_type_theme_and_time() {
    let index = SqliteIndex::open_in_memory().unwrap();
    let mut learning = digest("alice", 9, DigestType::Learning);
    learning.themes = vec!["Graph Theory".into()];
    learning.keywords = vec!["dijkstra".into()];
    let other = digest("alice", 10, DigestType::Project);
    index.add(&learning, &location(0)).unwrap();
    index.add(&other, &location(50)).unwrap();

    let mut q = DigestQuery::for_ci("alice");
    q.digest_type = Some(DigestType::Learning);
    assert_eq!(index.query(&q).unwrap().len(), 1);

    let mut q = DigestQuery::for_ci("alice");
    q.theme = Some("graph".into());
    q.keyword = Some("DIJK".into());
    let hits = index.query(&q).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].digest_id, learning.digest_id);

    let mut q = DigestQuery::for_ci("alice");
    q.theme = Some("%".into());
    assert!(index.query(&q).unwrap().is_empty());

    let at = Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap();
    let q = DigestQuery::for_ci("alice").between(at, at);
    let hits = index.query(&q).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].digest_id, other.digest_id);
  }

  #[test]
  fn readding_replaces_membership_rows() {
    let index = SqliteIndex::open_in_memory().unwrap();
    let mut d = digest("alice", 9, DigestType::Mixed);
    d.themes = vec!["a".into(), "b".into()];
    index.add(&d, &location(0)).unwrap();
    d.themes = vec!["c".into()];
    index.add(&d, &location(0)).unwrap();

    let stats = index.stats("alice").unwrap();
    assert_eq!(stats, IndexStats {
      digests:  1,
      themes:   1,
      keywords: 0,
    });
  }

  #[test]
  fn archived_and_foreign_rows_are_excluded() {
    let index = SqliteIndex::open_in_memory().unwrap();
    let mut archived = digest("alice", 9, DigestType::Mixed);
    archived.archived = true;
    index.add(&archived, &location(0)).unwrap();
    index.add(&digest("bob", 9, DigestType::Mixed), &location(10)).unwrap();

    assert!(index.query(&DigestQuery::for_ci("alice")).unwrap().is_empty());
    assert_eq!(index.stats("bob").unwrap().digests, 1);
  }

  #[test]
  fn digest_ids_are_scoped_to_their_ci() {
    let index = SqliteIndex::open_in_memory().unwrap();
    let mut alice = digest("alice", 9, DigestType::Mixed);
    alice.digest_id = "shared".into();
    alice.themes = vec!["rivers".into()];
    let mut bob = digest("bob", 9, DigestType::Mixed);
    bob.digest_id = "shared".into();
    bob.themes = vec!["mountains".into()];
    index.add(&alice, &location(0)).unwrap();
    index.add(&bob, &location(200)).unwrap();

    {
      let conn = index.lock().unwrap();
      delete_ci(&conn, "alice").unwrap();
    }

    assert!(index.query(&DigestQuery::for_ci("alice")).unwrap().is_empty());
    let mut q = DigestQuery::for_ci("bob");
    q.theme = Some("mountain".into());
    let hits = index.query(&q).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].location, location(200));
    assert_eq!(index.stats("bob").unwrap().themes, 1);
  }

  #[test]
  fn outdated_schema_is_replaced() {
    let conn = Connection::open_in_memory().unwrap();
    conn
      .execute_batch(
        "CREATE TABLE digests (digest_id TEXT PRIMARY KEY, ci_id TEXT NOT NULL);
         PRAGMA user_version = 1;",
      )
      .unwrap();

    let index = SqliteIndex::init(conn).unwrap();
    index.add(&digest("alice", 9, DigestType::Mixed), &location(0)).unwrap();
    assert_eq!(index.stats("alice").unwrap().digests, 1);

    let version: i64 = index
      .lock()
      .unwrap()
      .query_row("PRAGMA user_version", [], |r| r.get(0))
      .unwrap();
    assert_eq!(version, SCHEMA_VERSION);
  }

  #[test]
  fn disabled_backend_reports_unavailable() {
    let index = Tier2Index::Disabled;
    assert!(!index.is_available());
    assert!(matches!(
      index.query(&DigestQuery::for_ci("alice")),
      Err(Error::IndexUnavailable)
    ));
  }
}
