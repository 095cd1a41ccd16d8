//! CNPJ Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Loads the Brazilian company registry (CNPJ) bulk export into narrow typed
//! tables.
//!
//! # Pipeline
//!
//! - **Discovery**: route extracted source files to tables by filename marker
//! - **Staged bulk load**: copy raw text into a per-load staging table, then
//!   convert into the typed table in one pass
//! - **Fallback**: when the copy rejects a file's structure, classify, repair
//!   and normalize row by row, loading in isolated batches
//! - **Reconciliation**: compare row counts with logical source records and
//!   reload divergent tables, up to a retry ceiling
//!
//! # Example
//!
//! ```no_run
//! use cnpj_ingest::config::IngestConfig;
//! use cnpj_ingest::pipeline::Pipeline;
//! use cnpj_ingest::store::MemoryStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::default().with_source_dir("./data/2024-08");
//!     let summary = Pipeline::new(config, Arc::new(MemoryStore::new())).run().await?;
//!     println!("{}", summary.report.render());
//!     Ok(())
//! }
//! ```

pub mod classify;
pub mod config;
pub mod discovery;
pub mod housekeeping;
pub mod loader;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod reader;
pub mod reconcile;
pub mod schema;
pub mod sql;
pub mod stats;
pub mod store;

pub use config::IngestConfig;
pub use models::{LoadOutcome, ReconciliationReport, RunSummary};
pub use pipeline::{Pipeline, RunError};
pub use schema::{SchemaRegistry, TableKind, TableSpec};
pub use store::{LoadStore, MemoryStore, PgStore};
