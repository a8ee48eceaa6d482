//! [`StorageEngine`] — the context object every operation goes through.
//!
//! Built once per process with [`StorageEngine::open`] and shared by
//! reference (or `Arc`) across threads. It owns one lock per resource class:
//! Tier 1 appends, Tier 2 appends, the index connection and the checkpoint
//! directory. No state lives in statics.

use std::fs;

use katra_core::{
  checkpoint::{CheckpointInfo, CheckpointMetadata, SaveOptions},
  digest::DigestRecord,
  error::validate_identifier,
  query::{DigestQuery, IndexLocation, IndexStats, MemoryQuery, Scanned},
  record::{MemoryRecord, MetadataUpdate},
  store::{DigestIndex, RecordStore},
};

use crate::{
  EngineConfig, Error, Result,
  checkpoint::CheckpointStore,
  index::{RebuildReport, Tier2Index},
  layout::Layout,
  tier1::{Tier1Stats, Tier1Store},
  tier2::{Tier2Stats, Tier2Store},
};

pub struct StorageEngine {
  pub(crate) config:      EngineConfig,
  pub(crate) tier1:       Tier1Store,
  pub(crate) tier2:       Tier2Store,
  pub(crate) index:       Tier2Index,
  pub(crate) checkpoints: CheckpointStore,
}

impl StorageEngine {
  /// Create the directory skeleton under `config.base_dir` and open the
  /// index backend selected by `config.index_enabled`.
  pub fn open(config: EngineConfig) -> Result<Self> {
    let layout = Layout::new(&config.base_dir);
    for dir in [layout.tier1_root(), layout.tier2_root(), layout.checkpoint_dir()] {
      fs::create_dir_all(&dir).map_err(Error::io(&dir))?;
    }

    let index = Tier2Index::open(&layout, config.index_enabled);
    tracing::info!(
      base_dir = %config.base_dir.display(),
      index = index.is_available(),
      "opened storage engine"
    );

    Ok(Self {
      tier1: Tier1Store::new(
        layout.clone(),
        config.tier1_max_file_bytes,
        config.max_content_bytes,
      ),
      tier2: Tier2Store::new(layout.clone(), config.tier2_max_file_bytes),
      checkpoints: CheckpointStore::new(layout),
      index,
      config,
    })
  }

  pub fn config(&self) -> &EngineConfig { &self.config }

  pub fn tier1(&self) -> &Tier1Store { &self.tier1 }

  pub fn tier2(&self) -> &Tier2Store { &self.tier2 }

  pub fn index(&self) -> &Tier2Index { &self.index }

  // ── Tier 1 ────────────────────────────────────────────────────────────────

  pub fn store(&self, record: &MemoryRecord) -> Result<()> { self.tier1.store(record) }

  pub fn query(&self, query: &MemoryQuery) -> Result<Scanned<MemoryRecord>> {
    self.tier1.query(query)
  }

  pub fn update_metadata(
    &self,
    ci_id: &str,
    record_id: &str,
    update: &MetadataUpdate,
  ) -> Result<MemoryRecord> {
    self.tier1.update_metadata(ci_id, record_id, update)
  }

  /// Not implemented for Tier 1; always an [`Error::NotImplemented`].
  pub fn archive(&self, ci_id: &str, max_age_days: u32) -> Result<usize> {
    self.tier1.archive(ci_id, max_age_days)
  }

  pub fn tier1_stats(&self, ci_id: &str) -> Result<Tier1Stats> { self.tier1.stats(ci_id) }

  // ── Tier 2 ────────────────────────────────────────────────────────────────

  /// Append a digest, then index it.
  ///
  /// The file append decides the outcome. An index failure afterwards is
  /// logged and the call still succeeds; a later rebuild repairs the index.
  pub fn store_digest(&self, digest: &DigestRecord) -> Result<IndexLocation> {
    let location = self.tier2.store_digest(digest)?;
    if let Err(e) = self.index.add(digest, &location) {
      tracing::warn!(
        digest_id = %digest.digest_id,
        error = %e,
        "digest stored but not indexed"
      );
    }
    Ok(location)
  }

  /// Query digests through the index, falling back to a directory scan when
  /// the index cannot answer. Both paths return newest first.
  pub fn query_digests(&self, query: &DigestQuery) -> Result<Scanned<DigestRecord>> {
    validate_identifier("ci_id", &query.ci_id)?;

    match self.index.query(query) {
      Ok(hits) => {
        let locations: Vec<IndexLocation> = hits.into_iter().map(|h| h.location).collect();
        let mut loaded = self.tier2.load_by_locations(&locations);
        // A drifted location can land on a different digest.
        loaded.items.retain(|d| query.matches(d));
        Ok(loaded)
      }
      Err(Error::IndexUnavailable) => self.tier2.scan(query),
      Err(e) => {
        tracing::warn!(ci_id = %query.ci_id, error = %e, "index query failed; scanning digest files");
        self.tier2.scan(query)
      }
    }
  }

  pub fn load_by_locations(&self, locations: &[IndexLocation]) -> Scanned<DigestRecord> {
    self.tier2.load_by_locations(locations)
  }

  /// Always zero until a colder tier exists.
  pub fn archive_digests(&self, ci_id: &str, max_age_days: u32) -> Result<usize> {
    self.tier2.archive(ci_id, max_age_days)
  }

  pub fn tier2_stats(&self, ci_id: &str) -> Result<Tier2Stats> { self.tier2.stats(ci_id) }

  // ── Index ─────────────────────────────────────────────────────────────────

  pub fn rebuild_index(&self, ci_id: &str) -> Result<RebuildReport> {
    self.index.rebuild(ci_id, &self.tier2)
  }

  pub fn index_stats(&self, ci_id: &str) -> Result<IndexStats> { self.index.stats(ci_id) }

  // ── Checkpoints ───────────────────────────────────────────────────────────

  pub fn save_checkpoint(&self, options: &SaveOptions) -> Result<String> {
    self.checkpoints.save(options, &self.tier1)
  }

  pub fn validate_checkpoint(&self, checkpoint_id: &str) -> Result<CheckpointMetadata> {
    self.checkpoints.validate(checkpoint_id)
  }

  /// Returns the number of records restored.
  pub fn load_checkpoint(&self, checkpoint_id: &str, ci_id: &str) -> Result<usize> {
    self.checkpoints.load(checkpoint_id, ci_id, &self.tier1)
  }

  pub fn checkpoint_metadata(&self, checkpoint_id: &str) -> Result<CheckpointMetadata> {
    self.checkpoints.metadata(checkpoint_id)
  }

  pub fn list_checkpoints(&self, ci_id: Option<&str>) -> Result<Vec<CheckpointInfo>> {
    self.checkpoints.list(ci_id)
  }

  pub fn delete_checkpoint(&self, checkpoint_id: &str) -> Result<()> {
    self.checkpoints.delete(checkpoint_id)
  }
}
