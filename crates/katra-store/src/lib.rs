//! File-backed storage engine for Katra.
//!
//! Tier 1 records and Tier 2 digests live in newline-delimited JSON files
//! under a configurable base directory. A SQLite database indexes digest
//! positions and can always be rebuilt from those files. Everything is
//! reached through a [`StorageEngine`] built once per process.

mod encode;
mod jsonl;
mod schema;

pub mod checkpoint;
pub mod config;
pub mod continuity;
pub mod engine;
pub mod error;
pub mod index;
pub mod layout;
pub mod tier1;
pub mod tier2;

pub use config::EngineConfig;
pub use engine::StorageEngine;
pub use error::{Error, Result};
