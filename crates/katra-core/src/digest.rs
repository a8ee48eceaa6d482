//! Digest records — the Tier 2 unit.
//!
//! A digest summarises one period of a CI's Tier 1 activity. The pair
//! (`period_type`, `period_id`) names the file it is appended to; once
//! appended it is never rewritten.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  error::validate_identifier,
  record::Tier,
};

pub const MAX_THEMES: usize = 20;
pub const MAX_KEYWORDS: usize = 50;
pub const MAX_INSIGHTS: usize = 10;

// ─── Enumerations ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodType {
  Weekly,
  Monthly,
}

impl PeriodType {
  pub const ALL: [Self; 2] = [Self::Weekly, Self::Monthly];

  /// Also the name of the directory holding this period's files.
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Weekly => "weekly",
      Self::Monthly => "monthly",
    }
  }
}

impl fmt::Display for PeriodType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for PeriodType {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    Self::ALL
      .into_iter()
      .find(|t| t.as_str() == s)
      .ok_or_else(|| Error::UnknownVariant {
        kind:  "period type",
        value: s.to_owned(),
      })
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestType {
  Interaction,
  Learning,
  Project,
  Mixed,
}

impl DigestType {
  pub const ALL: [Self; 4] =
    [Self::Interaction, Self::Learning, Self::Project, Self::Mixed];

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Interaction => "interaction",
      Self::Learning => "learning",
      Self::Project => "project",
      Self::Mixed => "mixed",
    }
  }
}

impl fmt::Display for DigestType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for DigestType {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    Self::ALL
      .into_iter()
      .find(|t| t.as_str() == s)
      .ok_or_else(|| Error::UnknownVariant {
        kind:  "digest type",
        value: s.to_owned(),
      })
  }
}

// ─── Digest ──────────────────────────────────────────────────────────────────

/// Files, concepts and people mentioned during the period.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestEntities {
  #[serde(default)]
  pub files:    Vec<String>,
  #[serde(default)]
  pub concepts: Vec<String>,
  #[serde(default)]
  pub people:   Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestRecord {
  pub digest_id:           String,
  pub timestamp:           DateTime<Utc>,
  pub period_type:         PeriodType,
  pub period_id:           String,
  pub source_tier:         Tier,
  pub source_record_count: usize,
  pub ci_id:               String,
  pub digest_type:         DigestType,
  #[serde(default)]
  pub themes:              Vec<String>,
  #[serde(default)]
  pub keywords:            Vec<String>,
  #[serde(default)]
  pub entities:            DigestEntities,
  #[serde(default)]
  pub summary:             String,
  #[serde(default)]
  pub key_insights:        Vec<String>,
  #[serde(default)]
  pub questions_asked:     usize,
  #[serde(default)]
  pub decisions_made:      Vec<String>,
  #[serde(default)]
  pub archived:            bool,
}

impl DigestRecord {
  /// Build an empty digest for a period, stamped with the current time.
  ///
  /// The id embeds a random component so that re-running consolidation for
  /// the same period, or for several CIs, never produces duplicate ids.
  pub fn new(
    ci_id: impl Into<String>,
    period_type: PeriodType,
    period_id: impl Into<String>,
    digest_type: DigestType,
  ) -> Self {
    let period_id = period_id.into();
    Self {
      digest_id: format!(
        "{period_id}-{}-{}",
        period_type.as_str(),
        Uuid::new_v4().simple()
      ),
      timestamp: Utc::now(),
      period_type,
      period_id,
      source_tier: Tier::Tier1,
      source_record_count: 0,
      ci_id: ci_id.into(),
      digest_type,
      themes: Vec::new(),
      keywords: Vec::new(),
      entities: DigestEntities::default(),
      summary: String::new(),
      key_insights: Vec::new(),
      questions_asked: 0,
      decisions_made: Vec::new(),
      archived: false,
    }
  }

  pub fn validate(&self) -> Result<()> {
    if self.digest_id.is_empty() {
      return Err(Error::MissingField("digest_id"));
    }
    validate_identifier("ci_id", &self.ci_id)?;
    // The period id becomes a file name.
    validate_identifier("period_id", &self.period_id)?;

    for (field, count, max) in [
      ("themes", self.themes.len(), MAX_THEMES),
      ("keywords", self.keywords.len(), MAX_KEYWORDS),
      ("key_insights", self.key_insights.len(), MAX_INSIGHTS),
    ] {
      if count > max {
        return Err(Error::TooMany { field, count, max });
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn ids_are_unique_per_call() {
    let a = DigestRecord::new("alice", PeriodType::Weekly, "2025-W03", DigestType::Mixed);
    let b = DigestRecord::new("alice", PeriodType::Weekly, "2025-W03", DigestType::Mixed);
    assert_ne!(a.digest_id, b.digest_id);
    assert!(a.digest_id.starts_with("2025-W03-weekly-"));
  }

  #[test]
  fn period_id_must_be_a_file_name() {
    let d = DigestRecord::new("alice", PeriodType::Monthly, "../2025-01", DigestType::Learning);
    assert!(matches!(
      d.validate(),
      Err(Error::InvalidIdentifier { field: "period_id", .. })
    ));
  }

  #[test]
  fn too_many_themes_are_rejected() {
    let mut d = DigestRecord::new("alice", PeriodType::Weekly, "2025-W03", DigestType::Project);
    d.themes = (0..=MAX_THEMES).map(|i| format!("t{i}")).collect();
    assert!(matches!(
      d.validate(),
      Err(Error::TooMany { field: "themes", .. })
    ));
  }

  #[test]
  fn enum_names_round_trip_through_from_str() {
    for p in PeriodType::ALL {
      assert_eq!(p.as_str().parse::<PeriodType>().unwrap(), p);
    }
    for t in DigestType::ALL {
      assert_eq!(t.to_string().parse::<DigestType>().unwrap(), t);
    }
  }

  #[test]
  fn sparse_line_fills_defaults() {
    let line = r#"{"digest_id":"d1","timestamp":"2025-01-15T23:00:00Z","period_type":"weekly","period_id":"2025-01-15","source_tier":"tier1","source_record_count":3,"ci_id":"alice","digest_type":"interaction"}"#;
    let d: DigestRecord = serde_json::from_str(line).unwrap();
    assert_eq!(d.source_record_count, 3);
    assert!(d.themes.is_empty());
    assert_eq!(d.entities, DigestEntities::default());
  }
}
