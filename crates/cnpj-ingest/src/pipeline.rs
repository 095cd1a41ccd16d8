//! Pipeline orchestrator
//!
//! One run: discover source files, optionally create target tables, empty
//! every table that has files, load all files (smallest first), reconcile,
//! then hand off to housekeeping. Each run is a full replace of the tables
//! it touches.

use chrono::Utc;
use cnpj_common::CnpjError;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::IngestConfig;
use crate::discovery::discover;
use crate::housekeeping::{Housekeeping, NoHousekeeping};
use crate::loader::Loader;
use crate::models::{RunStatus, RunSummary};
use crate::reconcile::Reconciler;
use crate::schema::{SchemaRegistry, TableKind, TableSpec};
use crate::store::{LoadStore, StoreError};

fn table_list(tables: &[TableKind]) -> String {
    tables
        .iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Run-level failures
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Source discovery failed: {0}")]
    Discovery(#[source] CnpjError),

    #[error("Store setup failed: {0}")]
    Store(#[from] StoreError),

    /// The load finished but some tables never matched their sources. The
    /// loaded data is left in place.
    #[error("Tables still divergent after {} retry rounds: {}", .summary.retry_rounds, table_list(.tables))]
    UnresolvedDivergence {
        tables: Vec<TableKind>,
        summary: Box<RunSummary>,
    },
}

pub struct Pipeline {
    config: IngestConfig,
    registry: SchemaRegistry,
    store: Arc<dyn LoadStore>,
    housekeeping: Arc<dyn Housekeeping>,
}

impl Pipeline {
    pub fn new(config: IngestConfig, store: Arc<dyn LoadStore>) -> Self {
        Self {
            config,
            registry: SchemaRegistry::cnpj(),
            store,
            housekeeping: Arc::new(NoHousekeeping),
        }
    }

    pub fn with_registry(mut self, registry: SchemaRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_housekeeping(mut self, housekeeping: Arc<dyn Housekeeping>) -> Self {
        self.housekeeping = housekeeping;
        self
    }

    pub async fn run(&self) -> Result<RunSummary, RunError> {
        let started_at = Utc::now();
        info!(
            source_dir = %self.config.source_dir.display(),
            store = self.store.kind(),
            workers = self.config.workers,
            batch_size = self.config.fallback_batch_size,
            max_retry_rounds = self.config.max_retry_rounds,
            "Starting CNPJ load"
        );

        let discovery =
            discover(&self.config.source_dir, &self.registry).map_err(RunError::Discovery)?;
        if discovery.files.is_empty() {
            warn!(source_dir = %self.config.source_dir.display(), "No loadable source files found");
        }

        let tables: Vec<Arc<TableSpec>> = discovery
            .tables()
            .into_iter()
            .filter_map(|kind| self.registry.get(kind).cloned())
            .collect();

        if self.config.create_tables {
            for spec in &tables {
                self.store.prepare_table(spec).await?;
            }
        }

        for spec in &tables {
            self.store.truncate(spec).await?;
        }

        let loader = Loader::new(
            self.store.clone(),
            self.config.fallback_batch_size,
            self.config.workers,
        );
        let mut outcomes = loader.load_all(&discovery.files).await;

        let reconciled = Reconciler::new(
            &loader,
            &discovery,
            self.config.max_retry_rounds,
            self.config.workers,
        )
        .run()
        .await;

        let status = if reconciled.is_reconciled() {
            let refs: Vec<&TableSpec> = tables.iter().map(|t| t.as_ref()).collect();
            if let Err(e) = self.housekeeping.after_load(&refs).await {
                warn!(error = %e, "Housekeeping failed");
            }
            RunStatus::Reconciled
        } else {
            RunStatus::GaveUp
        };

        outcomes.extend(reconciled.retry_outcomes);

        let summary = RunSummary {
            started_at,
            finished_at: Utc::now(),
            store: self.store.kind(),
            outcomes,
            skipped_files: discovery.skipped,
            retry_rounds: reconciled.retry_rounds,
            report: reconciled.report,
            status,
        };

        let elapsed_ms = (summary.finished_at - summary.started_at).num_milliseconds();

        if reconciled.unresolved.is_empty() {
            info!(
                tables = summary.report.tables.len(),
                rows = summary.rows_loaded(),
                rejected = summary.rows_rejected(),
                failed_files = summary.failed_files(),
                retry_rounds = summary.retry_rounds,
                elapsed_ms,
                "✓ CNPJ load complete"
            );
            Ok(summary)
        } else {
            error!(
                tables = %table_list(&reconciled.unresolved),
                retry_rounds = summary.retry_rounds,
                elapsed_ms,
                "✗ CNPJ load finished with unresolved divergence"
            );
            Err(RunError::UnresolvedDivergence {
                tables: reconciled.unresolved,
                summary: Box::new(summary),
            })
        }
    }
}

/// Create every registered table that does not exist yet
pub async fn prepare_tables(
    store: &dyn LoadStore,
    registry: &SchemaRegistry,
) -> Result<(), StoreError> {
    for spec in registry.tables() {
        store.prepare_table(spec).await?;
        info!(table = %spec.name(), store = store.kind(), "✓ Table prepared");
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_prepare_tables_prepares_all() {
        let store = MemoryStore::new();
        prepare_tables(&store, &SchemaRegistry::cnpj()).await.unwrap();
        assert_eq!(store.prepared_tables(), TableKind::ALL.to_vec());
    }

    #[tokio::test]
    async fn test_missing_source_dir_is_discovery_error() {
        let config = IngestConfig::default().with_source_dir("/nonexistent/cnpj");
        let pipeline = Pipeline::new(config, Arc::new(MemoryStore::new()));

        let err = pipeline.run().await.unwrap_err();
        assert!(matches!(err, RunError::Discovery(_)));
    }

    #[tokio::test]
    async fn test_run_replaces_previous_contents() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("F.PAISCSV"), "1;BRASIL\n2;CHILE\n").unwrap();
        let store = Arc::new(MemoryStore::new());
        let config = IngestConfig::default().with_source_dir(dir.path());
        let pipeline = Pipeline::new(config, store.clone());

        pipeline.run().await.unwrap();
        let summary = pipeline.run().await.unwrap();

        assert_eq!(summary.status, RunStatus::Reconciled);
        assert_eq!(store.rows(TableKind::Paises).len(), 2);
    }

    #[tokio::test]
    async fn test_create_tables_prepares_loaded_tables_only() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("F.PAISCSV"), "1;BRASIL\n").unwrap();
        let store = Arc::new(MemoryStore::new());
        let config = IngestConfig::default()
            .with_source_dir(dir.path())
            .with_create_tables(true);

        Pipeline::new(config, store.clone()).run().await.unwrap();

        assert_eq!(store.prepared_tables(), vec![TableKind::Paises]);
    }
}
