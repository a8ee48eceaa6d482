//! Core types and trait definitions for the Katra memory engine.
//!
//! This crate is deliberately free of filesystem and database dependencies.
//! It describes what a CI's memory looks like (raw records, digests,
//! checkpoint metadata), how it is filtered, and the capability traits that
//! storage backends implement.

pub mod checkpoint;
pub mod digest;
pub mod error;
pub mod period;
pub mod query;
pub mod record;
pub mod store;

pub use error::{Error, ErrorKind, Result};
