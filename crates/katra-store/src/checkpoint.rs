//! Checkpoints — versioned, checksummed snapshots of a CI's memory.
//!
//! # File format
//!
//! ```text
//! KATRA_CHECKPOINT_V1
//! {"checkpoint_id":"alice_1736899200000","ci_id":"alice",...}
//! checksum:<sha-256 hex>
//! ---RECORDS---
//! {"record_id":...}
//! {"record_id":...}
//! ```
//!
//! The checksum is SHA-256 over the header line, a newline, and the record
//! payload: every byte of the file except the checksum line itself.

use std::{
  fs::{self, File},
  io::{ErrorKind, Write as _},
  path::Path,
  sync::{Mutex, MutexGuard},
};

use chrono::{DateTime, Utc};
use katra_core::{
  checkpoint::{
    CHECKPOINT_FORMAT_VERSION, CheckpointInfo, CheckpointMetadata, SaveOptions,
    is_compatible_version,
  },
  error::validate_identifier,
  record::MemoryRecord,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{Error, Result, layout::Layout, tier1::Tier1Store};

pub const CHECKPOINT_MAGIC: &str = "KATRA_CHECKPOINT_V1";
const CHECKSUM_PREFIX: &str = "checksum:";
const RECORDS_SEPARATOR: &str = "---RECORDS---";

/// The JSON header line.
#[derive(Debug, Serialize, Deserialize)]
struct CheckpointHeader {
  checkpoint_id: String,
  ci_id:         String,
  created_at:    DateTime<Utc>,
  version:       String,
  record_count:  usize,
  tier1_records: usize,
  tier2_records: usize,
  tier3_records: usize,
  compressed:    bool,
  notes:         Option<String>,
}

/// A checkpoint file split into its sections, not yet verified.
struct RawCheckpoint {
  checkpoint_id: String,
  header_line:   Vec<u8>,
  checksum:      String,
  payload:       Vec<u8>,
  file_size:     u64,
}

fn compute_checksum(header_line: &[u8], payload: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(header_line);
  hasher.update(b"\n");
  hasher.update(payload);
  hex::encode(hasher.finalize())
}

/// Split off the first line, without its terminator.
fn take_line(buf: &[u8]) -> Option<(&[u8], &[u8])> {
  let end = buf.iter().position(|b| *b == b'\n')?;
  Some((&buf[..end], &buf[end + 1..]))
}

impl RawCheckpoint {
  fn parse(checkpoint_id: &str, bytes: &[u8]) -> Result<Self> {
    let malformed = |reason: &str| Error::MalformedCheckpoint {
      checkpoint_id: checkpoint_id.to_owned(),
      reason:        reason.to_owned(),
    };

    let (magic, rest) = take_line(bytes).ok_or_else(|| malformed("truncated before header"))?;
    if magic != CHECKPOINT_MAGIC.as_bytes() {
      return Err(malformed("bad magic"));
    }
    let (header_line, rest) = take_line(rest).ok_or_else(|| malformed("truncated header"))?;
    let (checksum_line, rest) = take_line(rest).ok_or_else(|| malformed("truncated checksum"))?;
    let checksum = std::str::from_utf8(checksum_line)
      .ok()
      .and_then(|l| l.strip_prefix(CHECKSUM_PREFIX))
      .ok_or_else(|| malformed("bad checksum line"))?;
    let (separator, payload) = take_line(rest).ok_or_else(|| malformed("missing record separator"))?;
    if separator != RECORDS_SEPARATOR.as_bytes() {
      return Err(malformed("bad record separator"));
    }

    Ok(Self {
      checkpoint_id: checkpoint_id.to_owned(),
      header_line:   header_line.to_vec(),
      checksum:      checksum.to_owned(),
      payload:       payload.to_vec(),
      file_size:     bytes.len() as u64,
    })
  }

  fn header(&self) -> Result<CheckpointHeader> {
    let header: CheckpointHeader =
      serde_json::from_slice(&self.header_line).map_err(|e| Error::MalformedCheckpoint {
        checkpoint_id: self.checkpoint_id.clone(),
        reason:        format!("unreadable header: {e}"),
      })?;
    if header.checkpoint_id != self.checkpoint_id {
      return Err(Error::MalformedCheckpoint {
        checkpoint_id: self.checkpoint_id.clone(),
        reason:        format!("header names checkpoint {}", header.checkpoint_id),
      });
    }
    Ok(header)
  }

  /// Checksum first, then version. Returns the trusted header.
  fn verify(&self) -> Result<CheckpointHeader> {
    let actual = compute_checksum(&self.header_line, &self.payload);
    if actual != self.checksum {
      return Err(Error::ChecksumMismatch {
        checkpoint_id: self.checkpoint_id.clone(),
        expected:      self.checksum.clone(),
        actual,
      });
    }
    let header = self.header()?;
    if !is_compatible_version(&header.version) {
      return Err(Error::IncompatibleVersion {
        checkpoint_id: self.checkpoint_id.clone(),
        found:         header.version,
        supported:     CHECKPOINT_FORMAT_VERSION,
      });
    }
    Ok(header)
  }

  fn metadata(&self, header: CheckpointHeader) -> CheckpointMetadata {
    CheckpointMetadata {
      checkpoint_id: header.checkpoint_id,
      ci_id:         header.ci_id,
      created_at:    header.created_at,
      version:       header.version,
      record_count:  header.record_count,
      tier1_records: header.tier1_records,
      tier2_records: header.tier2_records,
      tier3_records: header.tier3_records,
      file_size:     self.file_size,
      checksum:      self.checksum.clone(),
      compressed:    header.compressed,
      notes:         header.notes,
    }
  }
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// The checkpoint directory. Writers (save, delete) are serialised by one
/// lock; readers rely on files appearing atomically via rename.
pub struct CheckpointStore {
  layout: Layout,
  lock:   Mutex<()>,
}

impl CheckpointStore {
  pub fn new(layout: Layout) -> Self {
    Self {
      layout,
      lock: Mutex::new(()),
    }
  }

  fn lock(&self) -> Result<MutexGuard<'_, ()>> {
    self
      .lock
      .lock()
      .map_err(|_| Error::LockPoisoned("checkpoint directory"))
  }

  fn read(&self, checkpoint_id: &str) -> Result<RawCheckpoint> {
    validate_identifier("checkpoint_id", checkpoint_id)?;
    let path = self.layout.checkpoint_file(checkpoint_id);
    let bytes = match fs::read(&path) {
      Ok(bytes) => bytes,
      Err(e) if e.kind() == ErrorKind::NotFound => {
        return Err(Error::CheckpointNotFound(checkpoint_id.to_owned()));
      }
      Err(e) => return Err(Error::io(&path)(e)),
    };
    RawCheckpoint::parse(checkpoint_id, &bytes)
  }

  /// Write a checkpoint of `options.ci_id` and return its id,
  /// `<ci_id>_<unix-millis>`.
  pub fn save(&self, options: &SaveOptions, tier1: &Tier1Store) -> Result<String> {
    validate_identifier("ci_id", &options.ci_id)?;
    if options.compress {
      return Err(Error::NotImplemented("checkpoint compression"));
    }
    if options.include_tier2 {
      return Err(Error::NotImplemented("tier2 checkpoints"));
    }
    if options.include_tier3 {
      return Err(Error::NotImplemented("tier3 checkpoints"));
    }

    let records = if options.include_tier1 {
      let snapshot = tier1.snapshot(&options.ci_id)?;
      if snapshot.skipped > 0 {
        tracing::warn!(
          ci_id = %options.ci_id,
          skipped = snapshot.skipped,
          "corrupt tier1 lines left out of checkpoint"
        );
      }
      snapshot.items
    } else {
      Vec::new()
    };

    let mut payload = Vec::new();
    for record in &records {
      serde_json::to_writer(&mut payload, record)?;
      payload.push(b'\n');
    }

    let _guard = self.lock()?;
    let dir = self.layout.checkpoint_dir();
    fs::create_dir_all(&dir).map_err(Error::io(&dir))?;

    let created_at = Utc::now();
    let mut millis = created_at.timestamp_millis();
    let (checkpoint_id, path) = loop {
      let id = format!("{}_{millis}", options.ci_id);
      let path = self.layout.checkpoint_file(&id);
      if !path.exists() {
        break (id, path);
      }
      millis += 1;
    };

    let header = CheckpointHeader {
      checkpoint_id: checkpoint_id.clone(),
      ci_id:         options.ci_id.clone(),
      created_at,
      version:       CHECKPOINT_FORMAT_VERSION.to_owned(),
      record_count:  records.len(),
      tier1_records: records.len(),
      tier2_records: 0,
      tier3_records: 0,
      compressed:    false,
      notes:         options.notes.clone(),
    };
    let header_line = serde_json::to_vec(&header)?;
    let checksum = compute_checksum(&header_line, &payload);

    let mut contents = Vec::with_capacity(header_line.len() + payload.len() + 128);
    contents.extend_from_slice(CHECKPOINT_MAGIC.as_bytes());
    contents.push(b'\n');
    contents.extend_from_slice(&header_line);
    contents.push(b'\n');
    contents.extend_from_slice(CHECKSUM_PREFIX.as_bytes());
    contents.extend_from_slice(checksum.as_bytes());
    contents.push(b'\n');
    contents.extend_from_slice(RECORDS_SEPARATOR.as_bytes());
    contents.push(b'\n');
    contents.extend_from_slice(&payload);

    write_new(&path, &contents)?;

    tracing::info!(
      checkpoint_id = %checkpoint_id,
      records = records.len(),
      "saved checkpoint"
    );
    Ok(checkpoint_id)
  }

  /// Verify checksum and version without touching live memory.
  pub fn validate(&self, checkpoint_id: &str) -> Result<CheckpointMetadata> {
    let raw = self.read(checkpoint_id)?;
    let header = raw.verify()?;
    Ok(raw.metadata(header))
  }

  /// Replace `ci_id`'s Tier 1 state with the checkpoint's records.
  ///
  /// Every check runs and every record is parsed before live state is
  /// touched; any failure leaves the CI's memory as it was.
  pub fn load(&self, checkpoint_id: &str, ci_id: &str, tier1: &Tier1Store) -> Result<usize> {
    validate_identifier("ci_id", ci_id)?;
    let raw = self.read(checkpoint_id)?;
    let header = raw.verify()?;
    if header.ci_id != ci_id {
      return Err(Error::CiMismatch {
        expected: ci_id.to_owned(),
        found:    header.ci_id,
      });
    }

    let mut records = Vec::with_capacity(header.record_count);
    for (n, line) in raw.payload.split(|b| *b == b'\n').enumerate() {
      if line.is_empty() {
        continue;
      }
      let record: MemoryRecord =
        serde_json::from_slice(line).map_err(|e| Error::MalformedCheckpoint {
          checkpoint_id: checkpoint_id.to_owned(),
          reason:        format!("record {n}: {e}"),
        })?;
      records.push(record);
    }
    if records.len() != header.record_count {
      return Err(Error::MalformedCheckpoint {
        checkpoint_id: checkpoint_id.to_owned(),
        reason:        format!(
          "header declares {} records, payload holds {}",
          header.record_count,
          records.len()
        ),
      });
    }

    tier1.replace_all(ci_id, &records)?;
    tracing::info!(checkpoint_id = %checkpoint_id, ci_id = %ci_id, records = records.len(), "loaded checkpoint");
    Ok(records.len())
  }

  /// Header fields and file size, read without verifying the checksum.
  pub fn metadata(&self, checkpoint_id: &str) -> Result<CheckpointMetadata> {
    let raw = self.read(checkpoint_id)?;
    let header = raw.header()?;
    Ok(raw.metadata(header))
  }

  /// Checkpoints for one CI (or all when `None`), newest first, each marked
  /// with whether it currently validates.
  pub fn list(&self, ci_id: Option<&str>) -> Result<Vec<CheckpointInfo>> {
    let dir = self.layout.checkpoint_dir();
    let entries = match fs::read_dir(&dir) {
      Ok(entries) => entries,
      Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(Error::io(&dir)(e)),
    };

    let mut out = Vec::new();
    for entry in entries {
      let name = entry.map_err(Error::io(&dir))?.file_name();
      let Some(checkpoint_id) = name.to_str().and_then(Layout::checkpoint_id_from_file_name)
      else {
        continue;
      };
      let owner = checkpoint_id.rsplit_once('_').map(|(ci, _)| ci);
      if ci_id.is_some_and(|ci| owner != Some(ci)) {
        continue;
      }

      let metadata = match self.metadata(checkpoint_id) {
        Ok(metadata) => metadata,
        Err(e) => {
          tracing::warn!(checkpoint_id = %checkpoint_id, error = %e, "unreadable checkpoint");
          continue;
        }
      };
      let valid = self.validate(checkpoint_id).is_ok();
      out.push(CheckpointInfo { metadata, valid });
    }

    out.sort_by(|a, b| {
      b.metadata
        .created_at
        .cmp(&a.metadata.created_at)
        .then_with(|| b.metadata.checkpoint_id.cmp(&a.metadata.checkpoint_id))
    });
    Ok(out)
  }

  /// Remove a checkpoint file. Irreversible.
  pub fn delete(&self, checkpoint_id: &str) -> Result<()> {
    validate_identifier("checkpoint_id", checkpoint_id)?;
    let path = self.layout.checkpoint_file(checkpoint_id);

    let _guard = self.lock()?;
    match fs::remove_file(&path) {
      Ok(()) => {
        tracing::info!(checkpoint_id = %checkpoint_id, "deleted checkpoint");
        Ok(())
      }
      Err(e) if e.kind() == ErrorKind::NotFound => {
        Err(Error::CheckpointNotFound(checkpoint_id.to_owned()))
      }
      Err(e) => Err(Error::io(&path)(e)),
    }
  }
}

/// Write `contents` to a sibling temp file, sync, and rename into place.
fn write_new(path: &Path, contents: &[u8]) -> Result<()> {
  let tmp = path.with_extension("kcp.tmp");
  {
    let mut file = File::create(&tmp).map_err(Error::io(&tmp))?;
    file.write_all(contents).map_err(Error::io(&tmp))?;
    file.sync_all().map_err(Error::io(&tmp))?;
  }
  fs::rename(&tmp, path).map_err(Error::io(path))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn checksum_excludes_nothing_but_itself() {
    let a = compute_checksum(b"{}", b"x\n");
    assert_eq!(a.len(), 64);
    assert_ne!(a, compute_checksum(b"{ }", b"x\n"));
    assert_ne!(a, compute_checksum(b"{}", b"y\n"));
  }

  #[test]
  fn parse_rejects_bad_magic() {
    let err = RawCheckpoint::parse("a_1", b"NOT_A_CHECKPOINT\n{}\nchecksum:00\n---RECORDS---\n")
      .err()
      .unwrap();
    assert!(matches!(err, Error::MalformedCheckpoint { .. }));
  }

  #[test]
  fn parse_splits_sections() {
    let raw = RawCheckpoint::parse(
      "a_1",
      b"KATRA_CHECKPOINT_V1\n{\"x\":1}\nchecksum:abcd\n---RECORDS---\nline1\nline2\n",
    )
    .unwrap();
    assert_eq!(raw.header_line, b"{\"x\":1}");
    assert_eq!(raw.checksum, "abcd");
    assert_eq!(raw.payload, b"line1\nline2\n");
  }
}
