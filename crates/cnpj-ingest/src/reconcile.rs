//! Reconciliation controller
//!
//! After the initial load, every loaded table's row count is compared with
//! the number of logical records in its source files. Divergent tables are
//! truncated and reloaded, then verified again, until a pass is clean or the
//! retry ceiling is reached:
//!
//! ```text
//! Verify(0) ─┬─ clean ──────────────────────────────► Done
//!            └─ divergent ─► Retry(1) ─► Verify(1) ─┬─ clean ─► Done
//!                                                   └─ ... ─► GaveUp
//! ```
//!
//! Must run on a quiescent store: no loads overlap a verification pass.

use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{error, info, warn};

use crate::discovery::{Discovery, SourceFile};
use crate::loader::Loader;
use crate::models::{LoadOutcome, ReconciliationReport, TableReconciliation, TableStatus};
use crate::reader::count_records;
use crate::schema::TableKind;

/// Controller states
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileState {
    Verify { round: u32 },
    Retry { round: u32, tables: Vec<TableKind> },
    Done,
    GaveUp { tables: Vec<TableKind> },
}

/// Final result of reconciliation
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    /// Last verification pass
    pub report: ReconciliationReport,
    /// Truncate-and-reload rounds performed
    pub retry_rounds: u32,
    /// Load outcomes of the reloads, oldest round first
    pub retry_outcomes: Vec<LoadOutcome>,
    /// Tables still divergent after the ceiling; empty when reconciled
    pub unresolved: Vec<TableKind>,
}

impl ReconcileOutcome {
    pub fn is_reconciled(&self) -> bool {
        self.unresolved.is_empty()
    }
}

pub struct Reconciler<'a> {
    loader: &'a Loader,
    discovery: &'a Discovery,
    max_retry_rounds: u32,
    workers: usize,
    /// Source files are static for the run; each is counted once
    source_counts: HashMap<PathBuf, u64>,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        loader: &'a Loader,
        discovery: &'a Discovery,
        max_retry_rounds: u32,
        workers: usize,
    ) -> Self {
        Self {
            loader,
            discovery,
            max_retry_rounds,
            workers: workers.max(1),
            source_counts: HashMap::new(),
        }
    }

    /// Drive the state machine to `Done` or `GaveUp`
    pub async fn run(mut self) -> ReconcileOutcome {
        let mut state = ReconcileState::Verify { round: 0 };
        let mut report = ReconciliationReport::default();
        let mut retry_outcomes = Vec::new();
        let mut retry_rounds = 0;

        loop {
            state = match state {
                ReconcileState::Verify { round } => {
                    report = self.verify(round).await;
                    let divergent = report.divergent_tables();

                    if divergent.is_empty() {
                        ReconcileState::Done
                    } else if round >= self.max_retry_rounds {
                        ReconcileState::GaveUp { tables: divergent }
                    } else {
                        ReconcileState::Retry {
                            round: round + 1,
                            tables: divergent,
                        }
                    }
                },
                ReconcileState::Retry { round, tables } => {
                    retry_rounds = round;
                    retry_outcomes.extend(self.retry(round, &tables).await);
                    ReconcileState::Verify { round }
                },
                ReconcileState::Done => {
                    info!(round = report.round, "✓ All tables reconciled");
                    return ReconcileOutcome {
                        report,
                        retry_rounds,
                        retry_outcomes,
                        unresolved: Vec::new(),
                    };
                },
                ReconcileState::GaveUp { tables } => {
                    error!(
                        rounds = retry_rounds,
                        tables = ?tables.iter().map(|t| t.as_str()).collect::<Vec<_>>(),
                        "✗ Tables still divergent after retry ceiling"
                    );
                    return ReconcileOutcome {
                        report,
                        retry_rounds,
                        retry_outcomes,
                        unresolved: tables,
                    };
                },
            };
        }
    }

    /// Count every uncached source file, keeping per-file errors
    async fn count_sources(&mut self) -> HashMap<PathBuf, String> {
        let pending: Vec<PathBuf> = self
            .discovery
            .files
            .iter()
            .map(|f| f.path.clone())
            .filter(|p| !self.source_counts.contains_key(p))
            .collect();

        let counted: Vec<(PathBuf, Result<u64, String>)> = stream::iter(pending)
            .map(|path| async move {
                let task_path = path.clone();
                let result = tokio::task::spawn_blocking(move || count_records(&task_path))
                    .await
                    .map_err(|e| format!("count task failed: {}", e))
                    .and_then(|r| r.map_err(|e| e.to_string()));
                (path, result)
            })
            .buffer_unordered(self.workers)
            .collect()
            .await;

        let mut errors = HashMap::new();
        for (path, result) in counted {
            match result {
                Ok(count) => {
                    self.source_counts.insert(path, count);
                },
                Err(e) => {
                    errors.insert(path, e);
                },
            }
        }
        errors
    }

    /// One verification pass over every table that has source files
    pub async fn verify(&mut self, round: u32) -> ReconciliationReport {
        let count_errors = self.count_sources().await;
        let store = self.loader.store();
        let mut tables = Vec::new();

        for kind in self.discovery.tables() {
            let files = self.discovery.files_for(kind);
            let Some(spec) = files.first().map(|f| f.table.clone()) else {
                continue;
            };

            let source: u64 = files
                .iter()
                .filter_map(|f| self.source_counts.get(&f.path))
                .sum();

            let failed_count = files.iter().find_map(|f| count_errors.get(&f.path));

            let line = match failed_count {
                Some(e) => TableReconciliation::failed(
                    kind,
                    files.len(),
                    source,
                    format!("source count failed: {}", e),
                ),
                None => match store.row_count(&spec).await {
                    Ok(stored) => TableReconciliation::compare(kind, files.len(), source, stored),
                    Err(e) => TableReconciliation::failed(kind, files.len(), source, e.to_string()),
                },
            };

            match line.status {
                TableStatus::Ok => info!(
                    round,
                    table = %kind,
                    source = line.source_records,
                    stored = line.stored_rows,
                    "✓ Table reconciled"
                ),
                TableStatus::Divergent => warn!(
                    round,
                    table = %kind,
                    source = line.source_records,
                    stored = line.stored_rows,
                    divergence = line.divergence,
                    "✗ Table divergent"
                ),
                TableStatus::Error => warn!(
                    round,
                    table = %kind,
                    error = line.error.as_deref().unwrap_or_default(),
                    "✗ Table could not be verified"
                ),
            }

            tables.push(line);
        }

        ReconciliationReport { round, tables }
    }

    /// Truncate and reload `tables`
    async fn retry(&self, round: u32, tables: &[TableKind]) -> Vec<LoadOutcome> {
        let store = self.loader.store();
        let mut reload: Vec<SourceFile> = Vec::new();

        for &kind in tables {
            let files = self.discovery.files_for(kind);
            let Some(spec) = files.first().map(|f| f.table.clone()) else {
                continue;
            };

            match store.truncate(&spec).await {
                Ok(()) => {
                    warn!(round, table = %kind, files = files.len(), "Reloading divergent table");
                    reload.extend(files);
                },
                // Reloading on top of existing rows would only grow the divergence
                Err(e) => warn!(round, table = %kind, error = %e, "Truncate failed, table not reloaded"),
            }
        }

        self.loader.load_all(&reload).await
    }
}
