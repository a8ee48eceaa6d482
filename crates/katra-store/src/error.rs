//! Error type for `katra-store`.

use std::path::PathBuf;

use katra_core::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid input: {0}")]
  Core(#[from] katra_core::Error),

  #[error("i/o error on {}: {source}", path.display())]
  Io {
    path:   PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("database error: {0}")]
  Database(#[from] rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("malformed line at {}:{offset}", path.display())]
  MalformedLine { path: PathBuf, offset: u64 },

  #[error("malformed index row: {0}")]
  MalformedRow(String),

  /// The target file was already at or over its size ceiling.
  #[error("tier full: {} is {size} bytes, ceiling is {max}", path.display())]
  TierFull { path: PathBuf, size: u64, max: u64 },

  #[error("tier 2 index is not available")]
  IndexUnavailable,

  #[error("lock poisoned: {0}")]
  LockPoisoned(&'static str),

  #[error("not implemented: {0}")]
  NotImplemented(&'static str),

  #[error("record not found: {0}")]
  RecordNotFound(String),

  #[error("checkpoint not found: {0}")]
  CheckpointNotFound(String),

  #[error("checkpoint {checkpoint_id} checksum mismatch: expected {expected}, found {actual}")]
  ChecksumMismatch {
    checkpoint_id: String,
    expected:      String,
    actual:        String,
  },

  #[error("checkpoint {checkpoint_id} is malformed: {reason}")]
  MalformedCheckpoint { checkpoint_id: String, reason: String },

  #[error("checkpoint {checkpoint_id} has version {found}, this build reads {supported}")]
  IncompatibleVersion {
    checkpoint_id: String,
    found:         String,
    supported:     &'static str,
  },

  #[error("checkpoint belongs to CI {found}, not {expected}")]
  CiMismatch { expected: String, found: String },
}

impl Error {
  /// Wrap an I/O error with the path it happened on.
  pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
    let path = path.into();
    move |source| Self::Io { path, source }
  }

  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::Core(e) => e.kind(),
      Self::CiMismatch { .. } => ErrorKind::Validation,
      Self::Io { .. } | Self::Database(_) => ErrorKind::Storage,
      Self::TierFull { .. } | Self::IndexUnavailable | Self::LockPoisoned(_) => {
        ErrorKind::State
      }
      Self::RecordNotFound(_) | Self::CheckpointNotFound(_) => ErrorKind::NotFound,
      Self::Json(_)
      | Self::MalformedLine { .. }
      | Self::MalformedRow(_)
      | Self::ChecksumMismatch { .. }
      | Self::MalformedCheckpoint { .. } => ErrorKind::Corruption,
      Self::IncompatibleVersion { .. } => ErrorKind::Version,
      Self::NotImplemented(_) => ErrorKind::NotImplemented,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
