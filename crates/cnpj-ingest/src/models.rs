//! Run results surfaced to the operator

use chrono::{DateTime, Utc};
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use serde::{Serialize, Serializer};
use std::path::PathBuf;
use std::time::Duration;

use crate::classify::ClassCounts;
use crate::schema::TableKind;

fn serialize_millis<S: Serializer>(elapsed: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
}

/// Which path ended up loading a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPath {
    Bulk,
    Fallback,
    Failed,
}

impl std::fmt::Display for LoadPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LoadPath::Bulk => "bulk",
            LoadPath::Fallback => "fallback",
            LoadPath::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Result of loading one source file
#[derive(Debug, Clone, Serialize)]
pub struct LoadOutcome {
    pub file: PathBuf,
    pub table: TableKind,
    pub path: LoadPath,
    /// Records read from the file (fallback) or rows staged by the copy
    pub rows_read: u64,
    pub rows_bulk: u64,
    pub rows_fallback: u64,
    pub rows_rejected: u64,
    /// Records padded or truncated before loading
    pub rows_repaired: u64,
    pub batches_rejected: u64,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    pub error: Option<String>,
}

impl LoadOutcome {
    pub fn new(file: impl Into<PathBuf>, table: TableKind) -> Self {
        Self {
            file: file.into(),
            table,
            path: LoadPath::Failed,
            rows_read: 0,
            rows_bulk: 0,
            rows_fallback: 0,
            rows_rejected: 0,
            rows_repaired: 0,
            batches_rejected: 0,
            elapsed: Duration::ZERO,
            error: None,
        }
    }

    pub fn rows_loaded(&self) -> u64 {
        self.rows_bulk + self.rows_fallback
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Ok,
    Divergent,
    Error,
}

impl std::fmt::Display for TableStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TableStatus::Ok => "OK",
            TableStatus::Divergent => "DIVERGENT",
            TableStatus::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// One table's line in a verification pass
#[derive(Debug, Clone, Serialize)]
pub struct TableReconciliation {
    pub table: TableKind,
    pub files: usize,
    pub source_records: u64,
    /// `None` when the store could not be counted
    pub stored_rows: Option<u64>,
    /// `stored - source`; positive means extra rows in the store
    pub divergence: i64,
    pub status: TableStatus,
    pub error: Option<String>,
}

impl TableReconciliation {
    pub fn compare(table: TableKind, files: usize, source_records: u64, stored_rows: u64) -> Self {
        let divergence = stored_rows as i64 - source_records as i64;
        Self {
            table,
            files,
            source_records,
            stored_rows: Some(stored_rows),
            divergence,
            status: if divergence == 0 {
                TableStatus::Ok
            } else {
                TableStatus::Divergent
            },
            error: None,
        }
    }

    pub fn failed(table: TableKind, files: usize, source_records: u64, error: String) -> Self {
        Self {
            table,
            files,
            source_records,
            stored_rows: None,
            divergence: 0,
            status: TableStatus::Error,
            error: Some(error),
        }
    }

    /// Divergent or uncountable; both are retried
    pub fn needs_retry(&self) -> bool {
        self.status != TableStatus::Ok
    }
}

/// Result of one verification pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconciliationReport {
    /// 0 for the pass after the initial load, then one per retry round
    pub round: u32,
    pub tables: Vec<TableReconciliation>,
}

impl ReconciliationReport {
    pub fn divergent_tables(&self) -> Vec<TableKind> {
        self.tables
            .iter()
            .filter(|t| t.needs_retry())
            .map(|t| t.table)
            .collect()
    }

    pub fn is_clean(&self) -> bool {
        self.tables.iter().all(|t| !t.needs_retry())
    }

    pub fn render(&self) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec!["Table", "Files", "Source", "Stored", "Divergence", "Status"]);

        for t in &self.tables {
            table.add_row(vec![
                t.table.to_string(),
                t.files.to_string(),
                t.source_records.to_string(),
                t.stored_rows
                    .map_or_else(|| "-".to_string(), |n| n.to_string()),
                t.divergence.to_string(),
                t.status.to_string(),
            ]);
        }

        table.to_string()
    }
}

/// Overall outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every table matches its source
    Reconciled,
    /// Divergence remained after the retry ceiling
    GaveUp,
}

/// Everything a run produced, for logs, the console and `--summary`
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub store: &'static str,
    pub outcomes: Vec<LoadOutcome>,
    /// Files under the source directory that match no table
    pub skipped_files: Vec<PathBuf>,
    pub retry_rounds: u32,
    pub report: ReconciliationReport,
    pub status: RunStatus,
}

impl RunSummary {
    pub fn rows_loaded(&self) -> u64 {
        self.outcomes.iter().map(LoadOutcome::rows_loaded).sum()
    }

    pub fn rows_rejected(&self) -> u64 {
        self.outcomes.iter().map(|o| o.rows_rejected).sum()
    }

    pub fn failed_files(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_success()).count()
    }

    /// Per-file load table
    pub fn render_outcomes(&self) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![
                "File", "Table", "Path", "Read", "Loaded", "Repaired", "Rejected", "Elapsed",
            ]);

        for o in &self.outcomes {
            let file = o
                .file
                .file_name()
                .map_or_else(|| o.file.display().to_string(), |n| n.to_string_lossy().into_owned());
            table.add_row(vec![
                file,
                o.table.to_string(),
                o.path.to_string(),
                o.rows_read.to_string(),
                o.rows_loaded().to_string(),
                o.rows_repaired.to_string(),
                o.rows_rejected.to_string(),
                format!("{:.1}s", o.elapsed.as_secs_f64()),
            ]);
        }

        table.to_string()
    }
}

/// Source statistics for one table
#[derive(Debug, Clone, Serialize)]
pub struct TableStats {
    pub table: TableKind,
    pub files: usize,
    pub expected_fields: usize,
    pub counts: ClassCounts,
}

impl TableStats {
    /// Records outside `[N, ceil(1.1 * N)]` fields
    pub fn problematic(&self) -> u64 {
        self.counts.repaired()
    }

    pub fn render(stats: &[TableStats]) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![
                "Table", "Files", "Fields", "Records", "Valid", "Excess", "Short", "Long",
            ]);

        for s in stats {
            table.add_row(vec![
                s.table.to_string(),
                s.files.to_string(),
                s.expected_fields.to_string(),
                s.counts.total().to_string(),
                s.counts.valid.to_string(),
                s.counts.valid_with_excess.to_string(),
                s.counts.short.to_string(),
                s.counts.long.to_string(),
            ]);
        }

        table.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_reconciliation_compare() {
        let ok = TableReconciliation::compare(TableKind::Empresas, 2, 10, 10);
        assert_eq!(ok.status, TableStatus::Ok);
        assert!(!ok.needs_retry());

        let missing = TableReconciliation::compare(TableKind::Socios, 1, 10, 7);
        assert_eq!(missing.divergence, -3);
        assert_eq!(missing.status, TableStatus::Divergent);

        let extra = TableReconciliation::compare(TableKind::Socios, 1, 10, 12);
        assert_eq!(extra.divergence, 2);
        assert!(extra.needs_retry());
    }

    #[test]
    fn test_report_divergent_tables_include_errors() {
        let report = ReconciliationReport {
            round: 1,
            tables: vec![
                TableReconciliation::compare(TableKind::Cnaes, 1, 5, 5),
                TableReconciliation::compare(TableKind::Paises, 1, 5, 4),
                TableReconciliation::failed(TableKind::Motivos, 1, 5, "timeout".into()),
            ],
        };

        assert!(!report.is_clean());
        assert_eq!(
            report.divergent_tables(),
            vec![TableKind::Paises, TableKind::Motivos]
        );

        let rendered = report.render();
        assert!(rendered.contains("DIVERGENT"));
        assert!(rendered.contains("ERROR"));
    }

    #[test]
    fn test_outcome_serializes_elapsed_in_millis() {
        let mut outcome = LoadOutcome::new("/data/F.K03200$Z.D40810.CNAECSV", TableKind::Cnaes);
        outcome.path = LoadPath::Bulk;
        outcome.rows_bulk = 1358;
        outcome.elapsed = Duration::from_millis(1500);

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["elapsed_ms"], 1500);
        assert_eq!(json["path"], "bulk");
        assert_eq!(json["table"], "cnaes");
        assert_eq!(outcome.rows_loaded(), 1358);
    }
}
