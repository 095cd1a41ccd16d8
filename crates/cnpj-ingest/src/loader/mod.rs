//! Staged bulk loader
//!
//! Each file first goes through the store's bulk stage-copy. A structural
//! rejection sends it down the row-by-row [`fallback`] path; any other
//! failure is recorded on the file's [`LoadOutcome`] and does not stop
//! sibling files.
//!
//! A table is loaded by at most one file at a time. Files of different
//! tables load concurrently, up to the worker count.

pub mod fallback;

use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::discovery::SourceFile;
use crate::models::{LoadOutcome, LoadPath};
use crate::schema::TableKind;
use crate::store::{CopyError, LoadStore};

pub use fallback::{load_fallback, FallbackStats};

pub struct Loader {
    store: Arc<dyn LoadStore>,
    batch_size: usize,
    workers: usize,
    table_locks: HashMap<TableKind, Arc<Mutex<()>>>,
}

impl Loader {
    pub fn new(store: Arc<dyn LoadStore>, batch_size: usize, workers: usize) -> Self {
        let table_locks = TableKind::ALL
            .into_iter()
            .map(|kind| (kind, Arc::new(Mutex::new(()))))
            .collect();

        Self {
            store,
            batch_size: batch_size.max(1),
            workers: workers.max(1),
            table_locks,
        }
    }

    pub fn store(&self) -> &Arc<dyn LoadStore> {
        &self.store
    }

    fn table_lock(&self, table: TableKind) -> Arc<Mutex<()>> {
        self.table_locks
            .get(&table)
            .cloned()
            .unwrap_or_else(|| Arc::new(Mutex::new(())))
    }

    /// Load one file, holding its table's lock for the whole load
    pub async fn load_file(&self, file: &SourceFile) -> LoadOutcome {
        let spec = file.table.clone();
        let lock = self.table_lock(spec.kind);
        let _guard = lock.lock().await;

        let start = Instant::now();
        let mut outcome = LoadOutcome::new(&file.path, spec.kind);

        info!(
            file = %file.path.display(),
            table = %spec.name(),
            bytes = file.size,
            "Loading file"
        );

        match self.store.bulk_load(&spec, &file.path).await {
            Ok(rows) => {
                outcome.path = LoadPath::Bulk;
                outcome.rows_read = rows;
                outcome.rows_bulk = rows;
            },
            Err(CopyError::Structural(reason)) => {
                warn!(
                    file = %file.path.display(),
                    table = %spec.name(),
                    reason = %reason,
                    "Bulk copy rejected file structure, falling back to row-by-row load"
                );

                match load_fallback(self.store.as_ref(), spec.clone(), &file.path, self.batch_size)
                    .await
                {
                    Ok(stats) => {
                        outcome.path = LoadPath::Fallback;
                        outcome.rows_read = stats.rows_read;
                        outcome.rows_fallback = stats.rows_loaded;
                        outcome.rows_rejected = stats.rows_rejected;
                        outcome.rows_repaired = stats.rows_repaired();
                        outcome.batches_rejected = stats.batches_rejected;
                    },
                    Err(e) => outcome.error = Some(format!("fallback load failed: {}", e)),
                }
            },
            Err(CopyError::Fatal(e)) => outcome.error = Some(e.to_string()),
        }

        outcome.elapsed = start.elapsed();
        let elapsed_ms = outcome.elapsed.as_millis() as u64;

        match &outcome.error {
            None => info!(
                file = %file.path.display(),
                table = %spec.name(),
                path = %outcome.path,
                rows = outcome.rows_loaded(),
                repaired = outcome.rows_repaired,
                rejected = outcome.rows_rejected,
                elapsed_ms,
                "✓ File loaded"
            ),
            Some(err) => error!(
                file = %file.path.display(),
                table = %spec.name(),
                error = %err,
                elapsed_ms,
                "✗ File load failed"
            ),
        }

        outcome
    }

    /// Load every file, smallest first
    ///
    /// Outcomes are returned in completion order.
    pub async fn load_all(&self, files: &[SourceFile]) -> Vec<LoadOutcome> {
        let mut ordered: Vec<&SourceFile> = files.iter().collect();
        ordered.sort_by(|a, b| a.size.cmp(&b.size).then_with(|| a.path.cmp(&b.path)));

        info!(
            files = ordered.len(),
            workers = self.workers,
            store = self.store.kind(),
            "Starting file loads"
        );

        stream::iter(ordered)
            .map(|file| self.load_file(file))
            .buffer_unordered(self.workers)
            .collect()
            .await
    }
}
