//! [`Tier2Store`] — period-named digest files and the directory-scan query
//! path used when the index cannot answer.

use std::{
  fs,
  io::ErrorKind,
  ops::ControlFlow,
  path::{Component, Path, PathBuf},
  sync::{Mutex, MutexGuard},
};

use katra_core::{
  digest::{DigestRecord, PeriodType},
  error::validate_identifier,
  query::{DigestQuery, IndexLocation, Scanned},
};
use serde::Serialize;

use crate::{
  Error, Result,
  jsonl,
  layout::{JSONL_EXTENSION, Layout},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Tier2Stats {
  /// Digests owned by the CI, archived ones included.
  pub digests: usize,
  /// Period files holding at least one of the CI's digests.
  pub files:   usize,
  pub skipped: usize,
}

pub struct Tier2Store {
  layout:         Layout,
  max_file_bytes: u64,
  append_lock:    Mutex<()>,
}

impl Tier2Store {
  pub fn new(layout: Layout, max_file_bytes: u64) -> Self {
    Self {
      layout,
      max_file_bytes,
      append_lock: Mutex::new(()),
    }
  }

  fn lock(&self) -> Result<MutexGuard<'_, ()>> {
    self
      .append_lock
      .lock()
      .map_err(|_| Error::LockPoisoned("tier2 append"))
  }

  /// Append a digest to its period file and return where it landed.
  ///
  /// A file already at the size ceiling is left untouched and the call fails
  /// with [`Error::TierFull`].
  pub fn store_digest(&self, digest: &DigestRecord) -> Result<IndexLocation> {
    digest.validate()?;
    let relative = Layout::tier2_relative(digest.period_type, &digest.period_id);
    let path = self.layout.tier2_root().join(&relative);

    let _guard = self.lock()?;
    let size = jsonl::file_len(&path)?;
    if size >= self.max_file_bytes {
      return Err(Error::TierFull {
        path,
        size,
        max: self.max_file_bytes,
      });
    }
    let offset = jsonl::append(&path, digest)?;

    tracing::debug!(
      ci_id = %digest.ci_id,
      digest_id = %digest.digest_id,
      file = %relative.display(),
      offset,
      "stored tier2 digest"
    );
    Ok(IndexLocation {
      file_path: relative,
      offset,
    })
  }

  /// Relative paths of every period file, newest name first.
  fn period_files(&self, period_type: Option<PeriodType>) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for period in PeriodType::ALL {
      if period_type.is_some_and(|p| p != period) {
        continue;
      }
      let dir = self.layout.tier2_period_dir(period);
      let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => continue,
        Err(e) => return Err(Error::io(&dir)(e)),
      };
      let mut names: Vec<String> = Vec::new();
      for entry in entries {
        let name = entry.map_err(Error::io(&dir))?.file_name();
        let Some(name) = name.to_str() else { continue };
        if Path::new(name).extension().and_then(|e| e.to_str()) == Some(JSONL_EXTENSION) {
          names.push(name.to_owned());
        }
      }
      names.sort_unstable_by(|a, b| b.cmp(a));
      files.extend(names.into_iter().map(|n| Path::new(period.as_str()).join(n)));
    }
    Ok(files)
  }

  /// Visit every well-formed digest line with its location. Returns the
  /// number of corrupt lines skipped.
  pub fn visit<F>(&self, period_type: Option<PeriodType>, mut visit: F) -> Result<usize>
  where
    F: FnMut(IndexLocation, DigestRecord) -> ControlFlow<()>,
  {
    let root = self.layout.tier2_root();
    let mut skipped = 0;
    let mut stopped = false;

    for relative in self.period_files(period_type)? {
      let path = root.join(&relative);
      skipped += jsonl::scan(&path, |offset, digest: DigestRecord| {
        let location = IndexLocation {
          file_path: relative.clone(),
          offset,
        };
        let flow = visit(location, digest);
        stopped = flow.is_break();
        flow
      })?;
      if stopped {
        break;
      }
    }
    Ok(skipped)
  }

  /// The fallback query path: read every candidate file and filter line by
  /// line. Stops reading once `limit` matches are found. The result is sorted
  /// newest first.
  pub fn scan(&self, query: &DigestQuery) -> Result<Scanned<DigestRecord>> {
    validate_identifier("ci_id", &query.ci_id)?;
    if query.limit == Some(0) {
      return Ok(Scanned::default());
    }
    let mut items = Vec::new();
    let skipped = self.visit(query.period_type, |_, digest| {
      if query.matches(&digest) {
        items.push(digest);
        if query.limit.is_some_and(|limit| items.len() >= limit) {
          return ControlFlow::Break(());
        }
      }
      ControlFlow::Continue(())
    })?;

    sort_newest_first(&mut items);
    Ok(Scanned { items, skipped })
  }

  /// Read exactly one line per location. Locations that no longer point at
  /// a well-formed digest line are skipped and counted.
  pub fn load_by_locations(&self, locations: &[IndexLocation]) -> Scanned<DigestRecord> {
    let root = self.layout.tier2_root();
    let mut out = Scanned::default();
    for location in locations {
      let confined = location
        .file_path
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
      if !confined {
        tracing::warn!(file = %location.file_path.display(), "index location escapes tier2 root");
        out.skipped += 1;
        continue;
      }

      match jsonl::read_at(&root.join(&location.file_path), location.offset) {
        Ok(digest) => out.items.push(digest),
        Err(e) => {
          tracing::warn!(
            file = %location.file_path.display(),
            offset = location.offset,
            error = %e,
            "stale index location"
          );
          out.skipped += 1;
        }
      }
    }
    out
  }

  /// Archival to a colder tier. No colder tier exists, so nothing moves.
  pub fn archive(&self, ci_id: &str, max_age_days: u32) -> Result<usize> {
    validate_identifier("ci_id", ci_id)?;
    tracing::debug!(ci_id = %ci_id, max_age_days, "tier2 archive has no colder tier; nothing archived");
    Ok(0)
  }

  pub fn stats(&self, ci_id: &str) -> Result<Tier2Stats> {
    validate_identifier("ci_id", ci_id)?;
    let mut stats = Tier2Stats::default();
    let mut last_file: Option<PathBuf> = None;
    let skipped = self.visit(None, |location, digest| {
      if digest.ci_id == ci_id {
        stats.digests += 1;
        if last_file.as_ref() != Some(&location.file_path) {
          stats.files += 1;
          last_file = Some(location.file_path);
        }
      }
      ControlFlow::Continue(())
    })?;
    stats.skipped = skipped;
    Ok(stats)
  }
}

pub(crate) fn sort_newest_first(digests: &mut [DigestRecord]) {
  digests.sort_by(|a, b| {
    b.timestamp
      .cmp(&a.timestamp)
      .then_with(|| b.digest_id.cmp(&a.digest_id))
  });
}
