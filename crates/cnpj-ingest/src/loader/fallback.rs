//! Row-by-row fallback loader
//!
//! Used when a file's bulk copy fails structurally. A blocking reader task
//! parses, classifies, repairs and normalizes records into fixed-size
//! batches; the async side hands each batch to the store in order. A batch
//! the store refuses is dropped and counted, and loading carries on with the
//! next one.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::classify::{conform, ClassCounts};
use crate::normalize::{normalize_record, NormalizedRecord};
use crate::reader::RecordReader;
use crate::schema::TableSpec;
use crate::store::{LoadStore, StoreError};

/// Rows between progress log lines
pub const PROGRESS_INTERVAL: u64 = 100_000;

/// Rejected batches logged individually per file
const MAX_ERRORS_TO_LOG: u64 = 5;

/// Parsed batches buffered ahead of the store
const CHANNEL_DEPTH: usize = 2;

/// Counters for one fallback load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FallbackStats {
    pub rows_read: u64,
    pub rows_loaded: u64,
    pub rows_rejected: u64,
    pub batches: u64,
    pub batches_rejected: u64,
    pub classes: ClassCounts,
    pub replaced_sequences: u64,
}

impl FallbackStats {
    /// Records padded or truncated to fit the table
    pub fn rows_repaired(&self) -> u64 {
        self.classes.repaired()
    }
}

struct Batch {
    /// 1-based index of the batch's first record in the file
    first_record: u64,
    rows: Vec<NormalizedRecord>,
}

struct ReadSummary {
    classes: ClassCounts,
    replaced: u64,
}

fn read_batches(
    spec: &TableSpec,
    path: &Path,
    batch_size: usize,
    tx: mpsc::Sender<Batch>,
) -> cnpj_common::Result<ReadSummary> {
    let mut reader = RecordReader::open(path)?;
    let mut classes = ClassCounts::default();
    let mut rows = Vec::with_capacity(batch_size);
    let mut read = 0u64;
    let mut first_record = 1;

    while let Some(mut fields) = reader.next_fields()? {
        read += 1;
        classes.record(conform(&mut fields, spec.width()));
        rows.push(normalize_record(&fields, spec));

        if rows.len() == batch_size {
            let batch = Batch {
                first_record,
                rows: std::mem::replace(&mut rows, Vec::with_capacity(batch_size)),
            };
            first_record = read + 1;
            if tx.blocking_send(batch).is_err() {
                // Receiver gone; the load was abandoned
                break;
            }
        }
    }

    if !rows.is_empty() {
        tx.blocking_send(Batch { first_record, rows }).ok();
    }

    Ok(ReadSummary {
        classes,
        replaced: reader.replaced_sequences(),
    })
}

/// Load `path` into `spec`'s table in batches of `batch_size` rows
///
/// Rejected batches do not fail the call; only an unreadable file or a
/// broken reader task does. Rows from batches committed before such a
/// failure stay in the table.
pub async fn load_fallback(
    store: &dyn LoadStore,
    spec: Arc<TableSpec>,
    path: &Path,
    batch_size: usize,
) -> Result<FallbackStats, StoreError> {
    let batch_size = batch_size.max(1);
    let (tx, mut rx) = mpsc::channel::<Batch>(CHANNEL_DEPTH);

    let producer = tokio::task::spawn_blocking({
        let spec = spec.clone();
        let path: PathBuf = path.to_path_buf();
        move || read_batches(&spec, &path, batch_size, tx)
    });

    let mut stats = FallbackStats::default();

    while let Some(batch) = rx.recv().await {
        let size = batch.rows.len() as u64;
        let before = stats.rows_read;
        stats.rows_read += size;
        stats.batches += 1;

        match store.load_batch(&spec, &batch.rows).await {
            Ok(loaded) => stats.rows_loaded += loaded,
            Err(e) => {
                stats.rows_rejected += size;
                stats.batches_rejected += 1;
                if stats.batches_rejected <= MAX_ERRORS_TO_LOG {
                    warn!(
                        table = %spec.name(),
                        file = %path.display(),
                        first_record = batch.first_record,
                        rejected = size,
                        error = %e,
                        "Batch rejected"
                    );
                }
            },
        }

        if stats.rows_read / PROGRESS_INTERVAL > before / PROGRESS_INTERVAL {
            debug!(
                table = %spec.name(),
                file = %path.display(),
                rows = stats.rows_read,
                rejected = stats.rows_rejected,
                "Fallback progress"
            );
        }
    }

    let summary = producer
        .await
        .map_err(|e| StoreError::unavailable(format!("fallback reader task failed: {}", e)))??;

    stats.classes = summary.classes;
    stats.replaced_sequences = summary.replaced;

    if stats.batches_rejected > MAX_ERRORS_TO_LOG {
        warn!(
            table = %spec.name(),
            file = %path.display(),
            additional_batches = stats.batches_rejected - MAX_ERRORS_TO_LOG,
            "Additional rejected batches not shown"
        );
    }

    Ok(stats)
}
