//! `katra` — command-line access to a Katra memory store.
//!
//! Reads `katra.toml` (or the path given with `--config`), overlays
//! `KATRA_*` environment variables, opens the storage engine and runs one
//! subcommand. Results are printed to stdout as pretty JSON; logs go to
//! stderr.
//!
//! # Usage
//!
//! ```
//! katra store --ci alice --type interaction --importance 0.7 "asked about lifetimes?"
//! katra sundown --ci alice
//! katra sunrise --ci alice
//! katra checkpoint save --ci alice --notes "before upgrade"
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use katra_core::{
  checkpoint::SaveOptions,
  digest::{DigestType, PeriodType},
  query::{DigestQuery, MemoryQuery, SortOrder},
  record::{MemoryRecord, MemoryType, MetadataUpdate},
};
use katra_store::{EngineConfig, StorageEngine};
use serde::Serialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "katra", version, about = "Katra CI memory store")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "katra.toml")]
  config: PathBuf,

  /// Override the data directory from the config file.
  #[arg(long, value_name = "DIR")]
  base_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Store one Tier 1 memory record.
  Store(StoreArgs),
  /// Query Tier 1 records.
  Query(QueryArgs),
  /// Change the mutable flags of a stored record.
  Update(UpdateArgs),
  /// Query Tier 2 digests.
  Digests(DigestArgs),
  /// Condense today's records into a digest.
  Sundown {
    #[arg(long)]
    ci: String,
    /// Use this text instead of the generated summary.
    #[arg(long)]
    summary: Option<String>,
  },
  /// Print yesterday's digest, if any.
  Sunrise {
    #[arg(long)]
    ci: String,
  },
  /// Today's statistics plus per-tier totals.
  Stats {
    #[arg(long)]
    ci: String,
  },
  /// Digest index maintenance.
  #[command(subcommand)]
  Index(IndexCommand),
  /// Checkpoint management.
  #[command(subcommand)]
  Checkpoint(CheckpointCommand),
}

#[derive(Args, Debug)]
struct StoreArgs {
  #[arg(long)]
  ci:         String,
  #[arg(long = "type", default_value = "interaction")]
  kind:       MemoryType,
  #[arg(long, default_value_t = 0.5)]
  importance: f64,
  #[arg(long)]
  note:       Option<String>,
  #[arg(long)]
  session:    Option<String>,
  #[arg(long)]
  collection: Option<String>,
  /// The CI's reply, when the record captures an exchange.
  #[arg(long)]
  response:   Option<String>,
  /// Id of an earlier record this one refers to.
  #[arg(long)]
  related_to: Option<String>,
  #[arg(long)]
  personal:   bool,
  content:    String,
}

#[derive(Args, Debug)]
struct QueryArgs {
  #[arg(long)]
  ci:             String,
  /// RFC 3339 lower bound, inclusive.
  #[arg(long)]
  since:          Option<DateTime<Utc>>,
  /// RFC 3339 upper bound, inclusive.
  #[arg(long)]
  until:          Option<DateTime<Utc>>,
  #[arg(long = "type")]
  kind:           Option<MemoryType>,
  #[arg(long)]
  min_importance: Option<f64>,
  #[arg(long)]
  collection:     Option<String>,
  #[arg(long)]
  personal:       bool,
  #[arg(long)]
  oldest_first:   bool,
  #[arg(long)]
  limit:          Option<usize>,
}

#[derive(Args, Debug)]
struct UpdateArgs {
  #[arg(long)]
  ci:             String,
  #[arg(long)]
  record:         String,
  #[arg(long)]
  collection:     Option<String>,
  #[arg(long)]
  personal:       Option<bool>,
  #[arg(long)]
  not_to_archive: Option<bool>,
  #[arg(long)]
  archived:       Option<bool>,
}

#[derive(Args, Debug)]
struct DigestArgs {
  #[arg(long)]
  ci:          String,
  #[arg(long)]
  since:       Option<DateTime<Utc>>,
  #[arg(long)]
  until:       Option<DateTime<Utc>>,
  #[arg(long)]
  period_type: Option<PeriodType>,
  #[arg(long)]
  digest_type: Option<DigestType>,
  #[arg(long)]
  theme:       Option<String>,
  #[arg(long)]
  keyword:     Option<String>,
  #[arg(long)]
  limit:       Option<usize>,
}

#[derive(Subcommand, Debug)]
enum IndexCommand {
  /// Drop and repopulate one CI's index rows from the digest files.
  Rebuild {
    #[arg(long)]
    ci: String,
  },
  Stats {
    #[arg(long)]
    ci: String,
  },
}

#[derive(Subcommand, Debug)]
enum CheckpointCommand {
  Save {
    #[arg(long)]
    ci:    String,
    #[arg(long)]
    notes: Option<String>,
  },
  List {
    /// Only this CI's checkpoints.
    #[arg(long)]
    ci: Option<String>,
  },
  Validate {
    id: String,
  },
  /// Replace the CI's live Tier 1 memory with the checkpoint contents.
  Load {
    id: String,
    #[arg(long)]
    ci: String,
  },
  Metadata {
    id: String,
  },
  Delete {
    id: String,
  },
}

// ─── Entry point ──────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
  // Logs on stderr; stdout carries the JSON result.
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let settings = config::Config::builder()
    .set_default("base_dir", "~/.katra")
    .context("failed to set default base_dir")?
    .add_source(config::File::from(cli.config.clone()).required(false))
    .add_source(config::Environment::with_prefix("KATRA"))
    .set_override_option(
      "base_dir",
      cli.base_dir.as_ref().map(|p| p.to_string_lossy().into_owned()),
    )
    .context("failed to apply --base-dir")?
    .build()
    .context("failed to read config file")?;

  let mut engine_cfg: EngineConfig = settings
    .try_deserialize()
    .context("failed to deserialise EngineConfig")?;
  engine_cfg.base_dir = expand_tilde(&engine_cfg.base_dir);

  let base_dir = engine_cfg.base_dir.clone();
  let engine = StorageEngine::open(engine_cfg)
    .with_context(|| format!("failed to open store at {base_dir:?}"))?;

  run(&engine, cli.command)
}

fn run(engine: &StorageEngine, command: Command) -> anyhow::Result<()> {
  match command {
    Command::Store(args) => {
      let mut record = MemoryRecord::new(&args.ci, args.kind, args.content, args.importance)
        .with_personal(args.personal);
      if let Some(note) = args.note {
        record = record.with_importance_note(note);
      }
      if let Some(session) = args.session {
        record = record.with_session_id(session);
      }
      if let Some(collection) = args.collection {
        record = record.with_collection(collection);
      }
      if let Some(response) = args.response {
        record = record.with_response(response);
      }
      if let Some(related_to) = args.related_to {
        record = record.with_related_to(related_to);
      }
      engine.store(&record).context("failed to store record")?;
      print_json(&record)
    }

    Command::Query(args) => {
      let query = MemoryQuery {
        start: args.since,
        end: args.until,
        memory_type: args.kind,
        min_importance: args.min_importance,
        personal_only: args.personal,
        collection: args.collection,
        order: if args.oldest_first { SortOrder::OldestFirst } else { SortOrder::NewestFirst },
        limit: args.limit,
        ..MemoryQuery::for_ci(args.ci)
      };
      print_json(&engine.query(&query).context("query failed")?)
    }

    Command::Update(args) => {
      let update = MetadataUpdate {
        collection:     args.collection,
        personal:       args.personal,
        not_to_archive: args.not_to_archive,
        archived:       args.archived,
      };
      if update.is_empty() {
        anyhow::bail!("nothing to update");
      }
      let record = engine
        .update_metadata(&args.ci, &args.record, &update)
        .with_context(|| format!("failed to update {}", args.record))?;
      print_json(&record)
    }

    Command::Digests(args) => {
      let query = DigestQuery {
        start: args.since,
        end: args.until,
        period_type: args.period_type,
        digest_type: args.digest_type,
        theme: args.theme,
        keyword: args.keyword,
        limit: args.limit,
        ..DigestQuery::for_ci(args.ci)
      };
      print_json(&engine.query_digests(&query).context("digest query failed")?)
    }

    Command::Sundown { ci, summary } => {
      let digest = engine.sundown(&ci, summary.as_deref()).context("sundown failed")?;
      print_json(&digest)
    }

    Command::Sunrise { ci } => print_json(&engine.sunrise(&ci).context("sunrise failed")?),

    Command::Stats { ci } => {
      #[derive(Serialize)]
      struct Report {
        today: katra_store::continuity::DailyStats,
        tier1: katra_store::tier1::Tier1Stats,
        tier2: katra_store::tier2::Tier2Stats,
      }
      print_json(&Report {
        today: engine.daily_stats(&ci)?,
        tier1: engine.tier1_stats(&ci)?,
        tier2: engine.tier2_stats(&ci)?,
      })
    }

    Command::Index(IndexCommand::Rebuild { ci }) => {
      print_json(&engine.rebuild_index(&ci).context("index rebuild failed")?)
    }
    Command::Index(IndexCommand::Stats { ci }) => print_json(&engine.index_stats(&ci)?),

    Command::Checkpoint(cmd) => run_checkpoint(engine, cmd),
  }
}

fn run_checkpoint(engine: &StorageEngine, command: CheckpointCommand) -> anyhow::Result<()> {
  match command {
    CheckpointCommand::Save { ci, notes } => {
      let mut options = SaveOptions::new(ci);
      options.notes = notes;
      let id = engine.save_checkpoint(&options).context("checkpoint save failed")?;
      print_json(&engine.checkpoint_metadata(&id)?)
    }
    CheckpointCommand::List { ci } => print_json(&engine.list_checkpoints(ci.as_deref())?),
    CheckpointCommand::Validate { id } => print_json(
      &engine
        .validate_checkpoint(&id)
        .with_context(|| format!("checkpoint {id} did not validate"))?,
    ),
    CheckpointCommand::Load { id, ci } => {
      let restored = engine
        .load_checkpoint(&id, &ci)
        .with_context(|| format!("failed to load checkpoint {id}"))?;
      print_json(&serde_json::json!({ "checkpoint_id": id, "restored": restored }))
    }
    CheckpointCommand::Metadata { id } => print_json(&engine.checkpoint_metadata(&id)?),
    CheckpointCommand::Delete { id } => {
      engine.delete_checkpoint(&id)?;
      print_json(&serde_json::json!({ "deleted": id }))
    }
  }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
