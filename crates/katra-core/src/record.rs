//! Raw memory records — the Tier 1 unit.
//!
//! A record is appended once and is immutable thereafter, except for the
//! owner-managed metadata in [`MetadataUpdate`] (collection label, personal
//! and archive flags).

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  error::validate_identifier,
};

/// Largest accepted `content` payload, in bytes.
pub const MAX_CONTENT_BYTES: usize = 64 * 1024;

/// Inclusive bounds for [`MemoryRecord::importance`].
pub const IMPORTANCE_MIN: f64 = 0.0;
pub const IMPORTANCE_MAX: f64 = 1.0;

// ─── Enumerations ────────────────────────────────────────────────────────────

/// What kind of experience a record captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
  Experience,
  Knowledge,
  Reflection,
  Pattern,
  Decision,
  Goal,
  Interaction,
  Formation,
}

impl MemoryType {
  pub const ALL: [Self; 8] = [
    Self::Experience,
    Self::Knowledge,
    Self::Reflection,
    Self::Pattern,
    Self::Decision,
    Self::Goal,
    Self::Interaction,
    Self::Formation,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Experience => "experience",
      Self::Knowledge => "knowledge",
      Self::Reflection => "reflection",
      Self::Pattern => "pattern",
      Self::Decision => "decision",
      Self::Goal => "goal",
      Self::Interaction => "interaction",
      Self::Formation => "formation",
    }
  }
}

impl fmt::Display for MemoryType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for MemoryType {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    Self::ALL
      .into_iter()
      .find(|t| t.as_str() == s)
      .ok_or_else(|| Error::UnknownVariant {
        kind:  "memory type",
        value: s.to_owned(),
      })
  }
}

/// Storage tier a record or digest currently belongs to.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
  #[default]
  Tier1,
  Tier2,
  Tier3,
}

// ─── Record ──────────────────────────────────────────────────────────────────

/// One raw memory, as appended to a CI's day file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
  pub record_id:       String,
  pub ci_id:           String,
  pub timestamp:       DateTime<Utc>,
  #[serde(rename = "type")]
  pub memory_type:     MemoryType,
  pub content:         String,
  /// Bounded to `[0.0, 1.0]`; out-of-range values are rejected at store
  /// time, never clamped.
  pub importance:      f64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub importance_note: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub session_id:      Option<String>,
  /// Back-reference to another record id.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub related_to:      Option<String>,
  /// The CI's reply, when the record captures an exchange.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub response:        Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub collection:      Option<String>,
  #[serde(default)]
  pub tier:            Tier,
  #[serde(default)]
  pub archived:        bool,
  #[serde(default)]
  pub personal:        bool,
  #[serde(default)]
  pub not_to_archive:  bool,
}

impl MemoryRecord {
  /// Build a record stamped with the current time and a fresh id of the form
  /// `<ci_id>_<unix-seconds>_<8 hex>`.
  pub fn new(
    ci_id: impl Into<String>,
    memory_type: MemoryType,
    content: impl Into<String>,
    importance: f64,
  ) -> Self {
    let ci_id = ci_id.into();
    let timestamp = Utc::now();
    let suffix = Uuid::new_v4().simple().to_string();
    Self {
      record_id: format!("{ci_id}_{}_{}", timestamp.timestamp(), &suffix[..8]),
      ci_id,
      timestamp,
      memory_type,
      content: content.into(),
      importance,
      importance_note: None,
      session_id: None,
      related_to: None,
      response: None,
      collection: None,
      tier: Tier::Tier1,
      archived: false,
      personal: false,
      not_to_archive: false,
    }
  }

  pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
    self.timestamp = timestamp;
    self
  }

  pub fn with_importance_note(mut self, note: impl Into<String>) -> Self {
    self.importance_note = Some(note.into());
    self
  }

  pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
    self.session_id = Some(session_id.into());
    self
  }

  pub fn with_related_to(mut self, record_id: impl Into<String>) -> Self {
    self.related_to = Some(record_id.into());
    self
  }

  pub fn with_response(mut self, response: impl Into<String>) -> Self {
    self.response = Some(response.into());
    self
  }

  pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
    self.collection = Some(collection.into());
    self
  }

  pub fn with_personal(mut self, personal: bool) -> Self {
    self.personal = personal;
    self
  }

  /// Check required fields, the CI id, the importance bound and the content
  /// size. Nothing is written when this fails.
  pub fn validate(&self, max_content_bytes: usize) -> Result<()> {
    if self.record_id.is_empty() {
      return Err(Error::MissingField("record_id"));
    }
    validate_identifier("ci_id", &self.ci_id)?;
    if self.content.is_empty() {
      return Err(Error::MissingField("content"));
    }
    if self.content.len() > max_content_bytes {
      return Err(Error::TooLarge {
        field: "content",
        size:  self.content.len(),
        max:   max_content_bytes,
      });
    }
    // NaN fails `contains`, so it is rejected along with real overflows.
    if !(IMPORTANCE_MIN..=IMPORTANCE_MAX).contains(&self.importance) {
      return Err(Error::OutOfRange {
        field: "importance",
        value: self.importance,
        min:   IMPORTANCE_MIN,
        max:   IMPORTANCE_MAX,
      });
    }
    Ok(())
  }
}

// ─── Metadata updates ────────────────────────────────────────────────────────

/// The owner-mutable subset of a record. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataUpdate {
  pub collection:     Option<String>,
  pub personal:       Option<bool>,
  pub not_to_archive: Option<bool>,
  pub archived:       Option<bool>,
}

impl MetadataUpdate {
  pub fn is_empty(&self) -> bool {
    self.collection.is_none()
      && self.personal.is_none()
      && self.not_to_archive.is_none()
      && self.archived.is_none()
  }

  pub fn apply(&self, record: &mut MemoryRecord) {
    if let Some(collection) = &self.collection {
      record.collection = Some(collection.clone());
    }
    if let Some(personal) = self.personal {
      record.personal = personal;
    }
    if let Some(not_to_archive) = self.not_to_archive {
      record.not_to_archive = not_to_archive;
    }
    if let Some(archived) = self.archived {
      record.archived = archived;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn record(importance: f64) -> MemoryRecord {
    MemoryRecord::new("alice", MemoryType::Experience, "saw a heron", importance)
  }

  #[test]
  fn new_record_id_carries_ci_prefix() {
    let r = record(0.5);
    assert!(r.record_id.starts_with("alice_"));
    assert_eq!(r.tier, Tier::Tier1);
    assert!(!r.archived);
  }

  #[test]
  fn importance_boundaries_are_inclusive() {
    assert!(record(0.0).validate(MAX_CONTENT_BYTES).is_ok());
    assert!(record(1.0).validate(MAX_CONTENT_BYTES).is_ok());
  }

  #[test]
  fn importance_outside_range_is_rejected() {
    for bad in [1.5, -0.1, f64::NAN, f64::INFINITY] {
      let err = record(bad).validate(MAX_CONTENT_BYTES).unwrap_err();
      assert!(matches!(err, Error::OutOfRange { field: "importance", .. }));
    }
  }

  #[test]
  fn oversized_content_is_rejected() {
    let r = MemoryRecord::new("alice", MemoryType::Knowledge, "x".repeat(33), 0.5);
    assert!(matches!(
      r.validate(32),
      Err(Error::TooLarge { field: "content", size: 33, max: 32 })
    ));
  }

  #[test]
  fn missing_fields_are_rejected() {
    let mut r = record(0.5);
    r.content.clear();
    assert!(matches!(
      r.validate(MAX_CONTENT_BYTES),
      Err(Error::MissingField("content"))
    ));

    let r = MemoryRecord::new("", MemoryType::Goal, "ship it", 0.5);
    assert!(matches!(
      r.validate(MAX_CONTENT_BYTES),
      Err(Error::MissingField("ci_id"))
    ));
  }

  #[test]
  fn type_field_uses_snake_case_tag() {
    let json = serde_json::to_value(record(0.5)).unwrap();
    assert_eq!(json["type"], "experience");
    assert!(json.get("session_id").is_none());
  }

  #[test]
  fn missing_flags_default_on_read() {
    let line = r#"{"record_id":"r1","ci_id":"alice","timestamp":"2025-01-15T10:00:00Z","type":"interaction","content":"hi?","importance":0.3}"#;
    let r: MemoryRecord = serde_json::from_str(line).unwrap();
    assert_eq!(r.memory_type, MemoryType::Interaction);
    assert_eq!(r.tier, Tier::Tier1);
    assert!(!r.personal && !r.archived && !r.not_to_archive);
  }

  #[test]
  fn memory_type_parses_its_own_names() {
    for t in MemoryType::ALL {
      assert_eq!(t.as_str().parse::<MemoryType>().unwrap(), t);
    }
    assert!("dream".parse::<MemoryType>().is_err());
  }

  #[test]
  fn metadata_update_touches_only_given_fields() {
    let mut r = record(0.5).with_collection("books");
    let update = MetadataUpdate {
      personal: Some(true),
      ..Default::default()
    };
    update.apply(&mut r);
    assert!(r.personal);
    assert_eq!(r.collection.as_deref(), Some("books"));
    assert!(!r.archived);
  }
}
