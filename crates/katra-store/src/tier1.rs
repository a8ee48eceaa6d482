//! [`Tier1Store`] — append-only per-CI, per-day record logs.

use std::{
  collections::BTreeMap,
  fs,
  io::ErrorKind,
  ops::ControlFlow,
  path::{Path, PathBuf},
  sync::{Mutex, MutexGuard},
};

use chrono::NaiveDate;
use katra_core::{
  error::validate_identifier,
  period::{day_id, parse_day_id},
  query::{MemoryQuery, Scanned, SortOrder},
  record::{MemoryRecord, MetadataUpdate},
  store::RecordStore,
};
use serde::Serialize;
use uuid::Uuid;

use crate::{
  Error, Result,
  jsonl,
  layout::{JSONL_EXTENSION, Layout},
};

/// Per-CI totals for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Tier1Stats {
  pub records: usize,
  pub files:   usize,
  pub bytes:   u64,
  pub skipped: usize,
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// Raw record persistence. One lock serialises every write to every CI's day
/// files; reads take no lock.
pub struct Tier1Store {
  layout:            Layout,
  max_file_bytes:    u64,
  max_content_bytes: usize,
  write_lock:        Mutex<()>,
}

impl Tier1Store {
  pub fn new(layout: Layout, max_file_bytes: u64, max_content_bytes: usize) -> Self {
    Self {
      layout,
      max_file_bytes,
      max_content_bytes,
      write_lock: Mutex::new(()),
    }
  }

  fn lock(&self) -> Result<MutexGuard<'_, ()>> {
    self
      .write_lock
      .lock()
      .map_err(|_| Error::LockPoisoned("tier1 write"))
  }

  /// Day files for a CI, oldest first, restricted to `[from, to]` when
  /// given. Non-day files (temp files, stray names) are ignored.
  fn day_files(
    &self,
    ci_id: &str,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
  ) -> Result<Vec<(NaiveDate, PathBuf)>> {
    let dir = self.layout.tier1_ci_dir(ci_id);
    let entries = match fs::read_dir(&dir) {
      Ok(entries) => entries,
      Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(Error::io(&dir)(e)),
    };

    let mut files = Vec::new();
    for entry in entries {
      let path = entry.map_err(Error::io(&dir))?.path();
      if path.extension().and_then(|e| e.to_str()) != Some(JSONL_EXTENSION) {
        continue;
      }
      let Some(date) = path
        .file_stem()
        .and_then(|s| s.to_str())
        .and_then(parse_day_id)
      else {
        continue;
      };
      if from.is_some_and(|f| date < f) || to.is_some_and(|t| date > t) {
        continue;
      }
      files.push((date, path));
    }
    files.sort();
    Ok(files)
  }

  fn scan_files(
    &self,
    files: &[(NaiveDate, PathBuf)],
    query: &MemoryQuery,
  ) -> Result<Scanned<MemoryRecord>> {
    let mut out = Scanned::default();
    for (_, path) in files {
      let skipped = jsonl::scan(path, |_, record: MemoryRecord| {
        if query.matches(&record) {
          out.items.push(record);
        }
        ControlFlow::Continue(())
      })?;
      out.skipped += skipped;
    }

    match query.order {
      SortOrder::NewestFirst => out.items.sort_by(|a, b| {
        b.timestamp
          .cmp(&a.timestamp)
          .then_with(|| b.record_id.cmp(&a.record_id))
      }),
      SortOrder::OldestFirst => out.items.sort_by(|a, b| {
        a.timestamp
          .cmp(&b.timestamp)
          .then_with(|| a.record_id.cmp(&b.record_id))
      }),
    }
    if let Some(limit) = query.limit {
      out.items.truncate(limit);
    }
    Ok(out)
  }

  /// Every record of a CI, oldest first, read under the write lock so the
  /// result is a point-in-time view.
  pub fn snapshot(&self, ci_id: &str) -> Result<Scanned<MemoryRecord>> {
    validate_identifier("ci_id", ci_id)?;
    let mut query = MemoryQuery::for_ci(ci_id);
    query.order = SortOrder::OldestFirst;

    let _guard = self.lock()?;
    let files = self.day_files(ci_id, None, None)?;
    self.scan_files(&files, &query)
  }

  /// Update the owner-mutable fields of one record in place.
  ///
  /// The containing day file is rewritten atomically; every other line is
  /// preserved byte for byte.
  pub fn update_metadata(
    &self,
    ci_id: &str,
    record_id: &str,
    update: &MetadataUpdate,
  ) -> Result<MemoryRecord> {
    validate_identifier("ci_id", ci_id)?;
    let _guard = self.lock()?;

    for (_, path) in self.day_files(ci_id, None, None)? {
      let raw = fs::read(&path).map_err(Error::io(&path))?;
      let mut chunks: Vec<Vec<u8>> =
        raw.split_inclusive(|b| *b == b'\n').map(<[u8]>::to_vec).collect();

      let mut updated = None;
      for chunk in &mut chunks {
        let Some(body) = chunk.strip_suffix(b"\n") else {
          continue;
        };
        let Ok(mut record) = serde_json::from_slice::<MemoryRecord>(body) else {
          continue;
        };
        if record.record_id != record_id || record.ci_id != ci_id {
          continue;
        }
        update.apply(&mut record);
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        *chunk = line;
        updated = Some(record);
        break;
      }

      if let Some(record) = updated {
        jsonl::write_atomic(&path, &chunks)?;
        tracing::debug!(ci_id = %ci_id, record_id = %record_id, "updated record metadata");
        return Ok(record);
      }
    }

    Err(Error::RecordNotFound(record_id.to_owned()))
  }

  pub fn stats(&self, ci_id: &str) -> Result<Tier1Stats> {
    validate_identifier("ci_id", ci_id)?;
    let mut stats = Tier1Stats::default();
    for (_, path) in self.day_files(ci_id, None, None)? {
      stats.files += 1;
      stats.bytes += jsonl::file_len(&path)?;
      let skipped = jsonl::scan(&path, |_, _: MemoryRecord| {
        stats.records += 1;
        ControlFlow::Continue(())
      })?;
      stats.skipped += skipped;
    }
    Ok(stats)
  }

  /// Replace a CI's entire Tier 1 state with `records`.
  ///
  /// The new day files are written to a staging directory first and swapped
  /// in with renames, so a failure while writing leaves the live state
  /// untouched.
  pub fn replace_all(&self, ci_id: &str, records: &[MemoryRecord]) -> Result<()> {
    validate_identifier("ci_id", ci_id)?;
    for record in records {
      record.validate(self.max_content_bytes)?;
      if record.ci_id != ci_id {
        return Err(Error::CiMismatch {
          expected: ci_id.to_owned(),
          found:    record.ci_id.clone(),
        });
      }
    }

    let _guard = self.lock()?;

    let root = self.layout.tier1_root();
    let nonce = Uuid::new_v4().simple();
    let staging = root.join(format!(".{ci_id}.staging-{nonce}"));
    let previous = root.join(format!(".{ci_id}.previous-{nonce}"));
    let live = self.layout.tier1_ci_dir(ci_id);

    if let Err(e) = write_day_files(&staging, records) {
      let _ = fs::remove_dir_all(&staging);
      return Err(e);
    }

    let had_live = live.exists();
    if had_live {
      fs::rename(&live, &previous).map_err(Error::io(&live))?;
    }
    if let Err(e) = fs::rename(&staging, &live) {
      if had_live {
        let _ = fs::rename(&previous, &live);
      }
      let _ = fs::remove_dir_all(&staging);
      return Err(Error::io(&live)(e));
    }
    if had_live && let Err(e) = fs::remove_dir_all(&previous) {
      tracing::warn!(path = %previous.display(), error = %e, "failed to remove replaced tier1 directory");
    }

    tracing::info!(ci_id = %ci_id, records = records.len(), "replaced tier1 state");
    Ok(())
  }
}

fn write_day_files(dir: &Path, records: &[MemoryRecord]) -> Result<()> {
  fs::create_dir_all(dir).map_err(Error::io(dir))?;

  let mut days: BTreeMap<NaiveDate, Vec<u8>> = BTreeMap::new();
  for record in records {
    let buf = days.entry(record.timestamp.date_naive()).or_default();
    serde_json::to_writer(&mut *buf, record)?;
    buf.push(b'\n');
  }

  for (date, buf) in days {
    let path = dir.join(format!("{}.{JSONL_EXTENSION}", day_id(date)));
    jsonl::write_atomic(&path, &[buf])?;
  }
  Ok(())
}

// ─── RecordStore impl ────────────────────────────────────────────────────────

impl RecordStore for Tier1Store {
  type Error = Error;

  fn store(&self, record: &MemoryRecord) -> Result<()> {
    record.validate(self.max_content_bytes)?;
    let path = self
      .layout
      .tier1_day_file(&record.ci_id, record.timestamp.date_naive());

    let _guard = self.lock()?;
    let size = jsonl::file_len(&path)?;
    if size >= self.max_file_bytes {
      return Err(Error::TierFull {
        path,
        size,
        max: self.max_file_bytes,
      });
    }
    jsonl::append(&path, record)?;

    tracing::debug!(
      ci_id = %record.ci_id,
      record_id = %record.record_id,
      "stored tier1 record"
    );
    Ok(())
  }

  fn query(&self, query: &MemoryQuery) -> Result<Scanned<MemoryRecord>> {
    validate_identifier("ci_id", &query.ci_id)?;
    let files = self.day_files(
      &query.ci_id,
      query.start.map(|s| s.date_naive()),
      query.end.map(|e| e.date_naive()),
    )?;
    let result = self.scan_files(&files, query)?;
    if result.skipped > 0 {
      tracing::warn!(ci_id = %query.ci_id, skipped = result.skipped, "tier1 query skipped corrupt lines");
    }
    Ok(result)
  }

  fn archive(&self, _ci_id: &str, _max_age_days: u32) -> Result<usize> {
    Err(Error::NotImplemented("tier1 archive"))
  }
}
