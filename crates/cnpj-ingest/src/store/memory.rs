//! In-process store for dry runs and tests
//!
//! Bulk loads follow COPY's rules: any record whose field count differs from
//! the table width fails the whole file with a structural error, and rows
//! are read back from the same encoded input PostgreSQL receives. Values go
//! through the same normalizer the SQL conversion mirrors, so a dry run
//! reports the row counts a real load would produce.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::copy_input::{decode_copy_input, CopyEncoder};
use super::{CopyError, LoadStore, StoreError};
use crate::config::DEFAULT_COPY_CHUNK_BYTES;
use crate::normalize::{normalize_record, NormalizedRecord, Value};
use crate::schema::{TableKind, TableSpec};

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<TableKind, Vec<NormalizedRecord>>>,
    prepared: Mutex<BTreeSet<TableKind>>,
    rejected_marker: Option<String>,
    silent_loss: Mutex<HashMap<TableKind, usize>>,
    unavailable_counts: HashSet<TableKind>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject any fallback batch containing a text value with `marker`,
    /// standing in for a batch the conversion pass cannot accept
    pub fn with_rejected_marker(mut self, marker: impl Into<String>) -> Self {
        self.rejected_marker = Some(marker.into());
        self
    }

    /// Drop `rows` rows from the next load of `table` without reporting it
    pub fn with_silent_loss(self, table: TableKind, rows: usize) -> Self {
        lock(&self.silent_loss).insert(table, rows);
        self
    }

    /// Make row counts of `table` fail
    pub fn with_unavailable_count(mut self, table: TableKind) -> Self {
        self.unavailable_counts.insert(table);
        self
    }

    /// Stored rows of a table, in load order
    pub fn rows(&self, table: TableKind) -> Vec<NormalizedRecord> {
        lock(&self.tables).get(&table).cloned().unwrap_or_default()
    }

    pub fn prepared_tables(&self) -> Vec<TableKind> {
        lock(&self.prepared).iter().copied().collect()
    }

    fn append(&self, table: TableKind, mut rows: Vec<NormalizedRecord>) -> u64 {
        if let Some(loss) = lock(&self.silent_loss).remove(&table) {
            rows.truncate(rows.len().saturating_sub(loss));
        }
        let added = rows.len() as u64;
        lock(&self.tables).entry(table).or_default().extend(rows);
        added
    }
}

/// Read a whole file the way COPY would: all records or a structural error
///
/// Rows take the same encode and strict re-parse round trip as the input
/// streamed to PostgreSQL.
fn read_strict(spec: &TableSpec, path: &Path) -> Result<Vec<NormalizedRecord>, CopyError> {
    let mut encoder = CopyEncoder::open(spec, path, DEFAULT_COPY_CHUNK_BYTES)?;
    let mut rows = Vec::new();

    while let Some(chunk) = encoder.next_chunk()? {
        let records = decode_copy_input(&chunk)
            .map_err(|e| CopyError::Structural(format!("{}: {}", path.display(), e)))?;
        rows.extend(records.iter().map(|fields| normalize_record(fields, spec)));
    }

    Ok(rows)
}

#[async_trait]
impl LoadStore for MemoryStore {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn prepare_table(&self, spec: &TableSpec) -> Result<(), StoreError> {
        lock(&self.prepared).insert(spec.kind);
        Ok(())
    }

    async fn bulk_load(&self, spec: &TableSpec, path: &Path) -> Result<u64, CopyError> {
        let owned_spec = spec.clone();
        let owned_path: PathBuf = path.to_path_buf();
        let rows = tokio::task::spawn_blocking(move || read_strict(&owned_spec, &owned_path))
            .await
            .map_err(|e| StoreError::unavailable(format!("copy task failed: {}", e)))??;

        Ok(self.append(spec.kind, rows))
    }

    async fn load_batch(
        &self,
        spec: &TableSpec,
        rows: &[NormalizedRecord],
    ) -> Result<u64, StoreError> {
        if let Some(marker) = &self.rejected_marker {
            let poisoned = rows.iter().flat_map(|r| r.values()).any(|v| match v {
                Value::Text(s) => s.contains(marker.as_str()),
                _ => false,
            });
            if poisoned {
                return Err(StoreError::rejected(
                    spec.name(),
                    format!("value containing {:?}", marker),
                ));
            }
        }

        Ok(self.append(spec.kind, rows.to_vec()))
    }

    async fn truncate(&self, spec: &TableSpec) -> Result<(), StoreError> {
        lock(&self.tables).remove(&spec.kind);
        Ok(())
    }

    async fn row_count(&self, spec: &TableSpec) -> Result<u64, StoreError> {
        if self.unavailable_counts.contains(&spec.kind) {
            return Err(StoreError::unavailable(format!(
                "count of {} unavailable",
                spec.name()
            )));
        }
        Ok(lock(&self.tables)
            .get(&spec.kind)
            .map_or(0, |rows| rows.len() as u64))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::schema::SchemaRegistry;
    use std::io::Write;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    fn cnaes() -> Arc<TableSpec> {
        SchemaRegistry::cnpj().get(TableKind::Cnaes).unwrap().clone()
    }

    fn source_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn test_bulk_load_converts_rows() {
        let store = MemoryStore::new();
        let spec = cnaes();
        let file = source_file("\"0111301\";\"Cultivo de arroz\"\n\"111302\";\" Cultivo de milho \"\n");

        let loaded = store.bulk_load(&spec, file.path()).await.unwrap();

        assert_eq!(loaded, 2);
        let rows = store.rows(TableKind::Cnaes);
        assert_eq!(rows[1].get(0), Some(&Value::Text("0111302".into())));
        assert_eq!(rows[1].get(1), Some(&Value::Text("Cultivo de milho".into())));
    }

    #[tokio::test]
    async fn test_bulk_load_is_strict_about_field_count() {
        let store = MemoryStore::new();
        let spec = cnaes();
        let file = source_file("\"0111301\";\"Cultivo de arroz\"\n\"0111302\"\n");

        let err = store.bulk_load(&spec, file.path()).await.unwrap_err();

        assert!(err.is_structural());
        assert_eq!(store.row_count(&spec).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_bulk_load_keeps_stray_quotes_inside_fields() {
        let store = MemoryStore::new();
        let spec = cnaes();
        let file = source_file("0111301;Arroz\n0111302;Milho 5\" grao\n0111303;Soja 3\" grao\n0111304;Trigo\n");

        let loaded = store.bulk_load(&spec, file.path()).await.unwrap();

        assert_eq!(loaded, crate::reader::count_records(file.path()).unwrap());
        let rows = store.rows(TableKind::Cnaes);
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[1].get(1), Some(&Value::Text("Milho 5\" grao".into())));
        assert_eq!(rows[2].get(0), Some(&Value::Text("0111303".into())));
    }

    #[tokio::test]
    async fn test_missing_file_is_fatal() {
        let store = MemoryStore::new();
        let err = store
            .bulk_load(&cnaes(), Path::new("/nonexistent/F.CNAECSV"))
            .await
            .unwrap_err();
        assert!(!err.is_structural());
    }

    #[tokio::test]
    async fn test_rejected_marker_fails_batch() {
        let store = MemoryStore::new().with_rejected_marker("#POISON#");
        let spec = cnaes();
        let good = vec![normalize_record(&["1", "ok"], &spec)];
        let bad = vec![normalize_record(&["2", "x #POISON# y"], &spec)];

        assert_eq!(store.load_batch(&spec, &good).await.unwrap(), 1);
        assert!(matches!(
            store.load_batch(&spec, &bad).await,
            Err(StoreError::Rejected { table: "cnaes", .. })
        ));
        assert_eq!(store.row_count(&spec).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_silent_loss_applies_once() {
        let spec = cnaes();
        let store = MemoryStore::new().with_silent_loss(TableKind::Cnaes, 1);
        let rows = vec![
            normalize_record(&["1", "a"], &spec),
            normalize_record(&["2", "b"], &spec),
        ];

        assert_eq!(store.load_batch(&spec, &rows).await.unwrap(), 1);
        assert_eq!(store.load_batch(&spec, &rows).await.unwrap(), 2);
        assert_eq!(store.row_count(&spec).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_truncate_and_unavailable_count() {
        let spec = cnaes();
        let store = MemoryStore::new().with_unavailable_count(TableKind::Paises);
        store
            .load_batch(&spec, &[normalize_record(&["1", "a"], &spec)])
            .await
            .unwrap();
        store.truncate(&spec).await.unwrap();
        assert_eq!(store.row_count(&spec).await.unwrap(), 0);

        let paises = SchemaRegistry::cnpj().get(TableKind::Paises).unwrap().clone();
        assert!(store.row_count(&paises).await.is_err());
    }
}
