//! Error types for `katra-core`.

use thiserror::Error;

/// Coarse classification shared by every Katra error type.
///
/// Integrators match on this to decide whether to retry, fall back, or
/// surface a failure to the end user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
  /// Bad input: a missing field, an out-of-range value, an oversized payload.
  Validation,
  /// A file or database backend could not be read or written.
  Storage,
  /// The engine is in a state that refuses the operation (tier full, index
  /// not initialised).
  State,
  /// An unknown checkpoint, record or digest id.
  NotFound,
  /// Checksum mismatch or a malformed serialized line.
  Corruption,
  /// A checkpoint written by an incompatible format version.
  Version,
  /// The operation is part of the contract but has no implementation yet.
  NotImplemented,
}

#[derive(Debug, Error)]
pub enum Error {
  #[error("missing required field: {0}")]
  MissingField(&'static str),

  #[error("{field} = {value} is outside [{min}, {max}]")]
  OutOfRange {
    field: &'static str,
    value: f64,
    min:   f64,
    max:   f64,
  },

  #[error("{field} is {size} bytes, limit is {max}")]
  TooLarge {
    field: &'static str,
    size:  usize,
    max:   usize,
  },

  #[error("{field} has {count} entries, limit is {max}")]
  TooMany {
    field: &'static str,
    count: usize,
    max:   usize,
  },

  #[error("invalid {field} {value:?}: {reason}")]
  InvalidIdentifier {
    field:  &'static str,
    value:  String,
    reason: &'static str,
  },

  #[error("unknown {kind}: {value:?}")]
  UnknownVariant { kind: &'static str, value: String },
}

impl Error {
  /// Every core error is a rejection of caller input.
  pub fn kind(&self) -> ErrorKind { ErrorKind::Validation }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Reject identifiers that would escape their directory when used as a
/// path component.
pub fn validate_identifier(field: &'static str, value: &str) -> Result<()> {
  if value.is_empty() {
    return Err(Error::MissingField(field));
  }

  let reason = if value.len() > 255 {
    "longer than 255 bytes"
  } else if value.starts_with('.') {
    "must not start with '.'"
  } else if value.contains(['/', '\\', '\0']) {
    "must not contain path separators or NUL"
  } else {
    return Ok(());
  };

  Err(Error::InvalidIdentifier {
    field,
    value: value.to_owned(),
    reason,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn plain_identifiers_pass() {
    assert!(validate_identifier("ci_id", "alice").is_ok());
    assert!(validate_identifier("ci_id", "ci-42_beta").is_ok());
    assert!(validate_identifier("period_id", "2025-W01").is_ok());
  }

  #[test]
  fn empty_identifier_is_missing() {
    assert!(matches!(
      validate_identifier("ci_id", ""),
      Err(Error::MissingField("ci_id"))
    ));
  }

  #[test]
  fn path_escapes_are_rejected() {
    for bad in ["../etc", "a/b", "a\\b", ".hidden", "nul\0byte"] {
      let err = validate_identifier("ci_id", bad).unwrap_err();
      assert!(matches!(err, Error::InvalidIdentifier { .. }), "{bad:?}");
      assert_eq!(err.kind(), ErrorKind::Validation);
    }
  }
}
