//! docsync - keeps a chunk-level embedding index in sync with its sources
//!
//! This crate provides:
//! - Change detection over content hashes and normalized metadata
//! - A deterministic token-bounded chunker
//! - Chunk store reconciliation per embedding space (SQLite or Qdrant)
//! - A run ledger with per-document error isolation
//! - CLI commands driving web pages and workspace exports through it all

pub mod chunk;
pub mod commands;
pub mod config;
pub mod datastore;
pub mod decision;
pub mod embed;
pub mod error;
pub mod hashing;
pub mod ingest;
pub mod progress;
pub mod reconcile;
pub mod runs;
pub mod source;
pub mod state;
pub mod store;

pub use config::Config;
pub use error::{Error, Result};
