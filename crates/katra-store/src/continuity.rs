//! Sundown and sunrise: the daily bridge from Tier 1 to Tier 2.
//!
//! Sundown condenses one UTC day of raw records into a weekly digest whose
//! period id is that day's date. Sunrise reads the previous day's digest
//! back at the start of the next session.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use katra_core::{
  digest::{DigestRecord, DigestType, MAX_INSIGHTS, MAX_KEYWORDS, MAX_THEMES, PeriodType},
  error::validate_identifier,
  period::{day_bounds, day_id},
  query::{DigestQuery, MemoryQuery, SortOrder},
  record::{MemoryRecord, MemoryType},
  store::RecordStore,
};
use serde::Serialize;

use crate::{Result, StorageEngine};

/// Records at or above this importance become key insights.
const INSIGHT_IMPORTANCE: f64 = 0.75;
/// Longest excerpt copied from a record into a digest.
const EXCERPT_CHARS: usize = 280;
const MIN_TERM_CHARS: usize = 4;

const STOPWORDS: &[&str] = &[
  "about", "after", "again", "also", "because", "been", "before", "being", "could", "does",
  "doing", "from", "have", "here", "into", "just", "like", "made", "make", "more", "much",
  "only", "other", "over", "should", "some", "than", "that", "their", "them", "then", "there",
  "these", "they", "this", "those", "through", "very", "want", "were", "what", "when", "where",
  "which", "while", "will", "with", "would", "your",
];

// ─── Daily statistics ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DailyStats {
  /// Every record stored that day, whatever its type.
  pub interaction_count: usize,
  /// Question marks in interaction records.
  pub questions_asked:   usize,
  pub avg_importance:    f64,
}

impl DailyStats {
  pub fn from_records(records: &[MemoryRecord]) -> Self {
    if records.is_empty() {
      return Self::default();
    }
    let questions_asked = records
      .iter()
      .filter(|r| r.memory_type == MemoryType::Interaction)
      .map(|r| r.content.matches('?').count())
      .sum();
    let total: f64 = records.iter().map(|r| r.importance).sum();
    Self {
      interaction_count: records.len(),
      questions_asked,
      avg_importance: total / records.len() as f64,
    }
  }
}

fn auto_summary(period_id: &str, stats: &DailyStats) -> String {
  format!(
    "Daily summary for {period_id}: {} interactions, {} questions asked, average importance {:.2}.",
    stats.interaction_count, stats.questions_asked, stats.avg_importance
  )
}

// ─── Content extraction ──────────────────────────────────────────────────────

fn excerpt(content: &str) -> String { content.chars().take(EXCERPT_CHARS).collect() }

fn terms(content: &str) -> impl Iterator<Item = String> + '_ {
  content
    .split(|c: char| !c.is_alphanumeric())
    .filter(|w| w.chars().count() >= MIN_TERM_CHARS)
    .filter(|w| !w.chars().all(|c| c.is_ascii_digit()))
    .map(str::to_lowercase)
    .filter(|w| !STOPWORDS.contains(&w.as_str()))
}

/// Keywords are the most frequent terms of the day; themes are the terms
/// that recur across at least two records.
fn keywords_and_themes(records: &[MemoryRecord]) -> (Vec<String>, Vec<String>) {
  // term -> (occurrences, records mentioning it)
  let mut counts: BTreeMap<String, (usize, usize)> = BTreeMap::new();
  for record in records {
    let mut seen = BTreeSet::new();
    for term in terms(&record.content) {
      let entry = counts.entry(term.clone()).or_default();
      entry.0 += 1;
      if seen.insert(term) {
        entry.1 += 1;
      }
    }
  }

  let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
  ranked.sort_by(|(a, (na, _)), (b, (nb, _))| nb.cmp(na).then_with(|| a.cmp(b)));

  let themes = ranked
    .iter()
    .filter(|(_, (_, in_records))| *in_records >= 2)
    .take(MAX_THEMES)
    .map(|(term, _)| term.clone())
    .collect();
  let keywords = ranked
    .into_iter()
    .take(MAX_KEYWORDS)
    .map(|(term, _)| term)
    .collect();
  (keywords, themes)
}

fn key_insights(records: &[MemoryRecord]) -> Vec<String> {
  let mut important: Vec<&MemoryRecord> = records
    .iter()
    .filter(|r| r.importance >= INSIGHT_IMPORTANCE)
    .collect();
  important.sort_by(|a, b| b.importance.total_cmp(&a.importance));
  important
    .into_iter()
    .take(MAX_INSIGHTS)
    .map(|r| excerpt(&r.content))
    .collect()
}

// ─── Engine operations ───────────────────────────────────────────────────────

impl StorageEngine {
  fn day_records(&self, ci_id: &str, date: NaiveDate) -> Result<Vec<MemoryRecord>> {
    let (start, end) = day_bounds(date);
    let mut query = MemoryQuery::for_ci(ci_id).between(start, end);
    query.order = SortOrder::OldestFirst;
    Ok(self.tier1.query(&query)?.items)
  }

  /// Statistics over today's Tier 1 records. Read-only.
  pub fn daily_stats(&self, ci_id: &str) -> Result<DailyStats> {
    self.daily_stats_at(ci_id, Utc::now())
  }

  pub fn daily_stats_at(&self, ci_id: &str, now: DateTime<Utc>) -> Result<DailyStats> {
    validate_identifier("ci_id", ci_id)?;
    let records = self.day_records(ci_id, now.date_naive())?;
    Ok(DailyStats::from_records(&records))
  }

  /// Condense today's records into one digest and store it.
  ///
  /// A day with no records still produces a digest, with zero counts.
  pub fn sundown(&self, ci_id: &str, summary: Option<&str>) -> Result<DigestRecord> {
    self.sundown_at(ci_id, summary, Utc::now())
  }

  pub fn sundown_at(
    &self,
    ci_id: &str,
    summary: Option<&str>,
    now: DateTime<Utc>,
  ) -> Result<DigestRecord> {
    validate_identifier("ci_id", ci_id)?;
    let records = self.day_records(ci_id, now.date_naive())?;
    let stats = DailyStats::from_records(&records);
    let period_id = day_id(now.date_naive());

    let mut digest =
      DigestRecord::new(ci_id, PeriodType::Weekly, &period_id, DigestType::Interaction);
    digest.timestamp = now;
    digest.source_record_count = stats.interaction_count;
    digest.questions_asked = stats.questions_asked;
    digest.summary = match summary {
      Some(s) => s.to_owned(),
      None => auto_summary(&period_id, &stats),
    };
    (digest.keywords, digest.themes) = keywords_and_themes(&records);
    digest.key_insights = key_insights(&records);
    digest.decisions_made = records
      .iter()
      .filter(|r| r.memory_type == MemoryType::Decision)
      .map(|r| excerpt(&r.content))
      .collect();

    self.store_digest(&digest)?;
    tracing::info!(
      ci_id = %ci_id,
      period_id = %period_id,
      interactions = stats.interaction_count,
      "sundown complete"
    );
    Ok(digest)
  }

  /// The interaction digest covering yesterday, if one exists. A CI with no
  /// history gets `None`, not an error.
  pub fn sunrise(&self, ci_id: &str) -> Result<Option<DigestRecord>> {
    self.sunrise_at(ci_id, Utc::now())
  }

  pub fn sunrise_at(&self, ci_id: &str, now: DateTime<Utc>) -> Result<Option<DigestRecord>> {
    validate_identifier("ci_id", ci_id)?;
    let Some(yesterday) = now.date_naive().pred_opt() else {
      return Ok(None);
    };

    let (start, end) = day_bounds(yesterday);
    let mut query = DigestQuery::for_ci(ci_id).between(start, end);
    query.digest_type = Some(DigestType::Interaction);
    query.limit = Some(1);

    let digest = self.query_digests(&query)?.items.into_iter().next();
    match &digest {
      Some(d) => tracing::info!(
        ci_id = %ci_id,
        period_id = %d.period_id,
        interactions = d.source_record_count,
        "sunrise loaded previous day"
      ),
      None => tracing::info!(ci_id = %ci_id, "sunrise found no previous day digest"),
    }
    Ok(digest)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn rec(memory_type: MemoryType, content: &str, importance: f64) -> MemoryRecord {
    MemoryRecord::new("alice", memory_type, content, importance)
  }

  #[test]
  fn stats_count_questions_only_in_interactions() {
    let records = vec![
      rec(MemoryType::Interaction, "why? how?", 0.2),
      rec(MemoryType::Reflection, "what if?", 0.6),
    ];
    let stats = DailyStats::from_records(&records);
    assert_eq!(stats.interaction_count, 2);
    assert_eq!(stats.questions_asked, 2);
    assert!((stats.avg_importance - 0.4).abs() < 1e-9);
  }

  #[test]
  fn empty_day_has_zero_stats() {
    assert_eq!(DailyStats::from_records(&[]), DailyStats::default());
  }

  #[test]
  fn recurring_terms_become_themes() {
    let records = vec![
      rec(MemoryType::Knowledge, "Learned about borrow checking in Rust", 0.5),
      rec(MemoryType::Experience, "The borrow checker rejected my code", 0.5),
      rec(MemoryType::Experience, "Lunch with Sam", 0.1),
    ];
    let (keywords, themes) = keywords_and_themes(&records);
    assert_eq!(themes, vec!["borrow".to_string()]);
    assert_eq!(keywords.first().map(String::as_str), Some("borrow"));
    assert!(keywords.iter().all(|k| k != "with" && k != "about"));
  }

  #[test]
  fn insights_keep_the_most_important() {
    let records = vec![
      rec(MemoryType::Knowledge, "minor", 0.5),
      rec(MemoryType::Knowledge, "major", 0.9),
      rec(MemoryType::Knowledge, "critical", 1.0),
    ];
    assert_eq!(key_insights(&records), vec!["critical", "major"]);
  }

  #[test]
  fn auto_summary_formats_two_decimals() {
    let stats = DailyStats {
      interaction_count: 5,
      questions_asked:   1,
      avg_importance:    0.5,
    };
    assert_eq!(
      auto_summary("2025-01-15", &stats),
      "Daily summary for 2025-01-15: 5 interactions, 1 questions asked, average importance 0.50."
    );
  }
}
