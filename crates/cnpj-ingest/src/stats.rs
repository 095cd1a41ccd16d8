//! Source file statistics
//!
//! Classifies every record of every discovered file without touching a
//! store, so an operator can see how much of a download will need the
//! fallback path before loading it.

use futures::stream::{self, StreamExt};
use tracing::{debug, info};

use crate::classify::ClassCounts;
use crate::discovery::{Discovery, SourceFile};
use crate::models::TableStats;
use crate::reader::scan_classes;

async fn scan_file(file: SourceFile) -> cnpj_common::Result<(SourceFile, ClassCounts)> {
    let path = file.path.clone();
    let expected = file.table.width();
    let counts = tokio::task::spawn_blocking(move || scan_classes(&path, expected))
        .await
        .map_err(|e| cnpj_common::CnpjError::parse(&file.path, format!("scan task failed: {}", e)))??;
    Ok((file, counts))
}

/// Per-table record classes across all discovered files, in registry order
pub async fn collect_stats(
    discovery: &Discovery,
    workers: usize,
) -> cnpj_common::Result<Vec<TableStats>> {
    let scanned: Vec<cnpj_common::Result<(SourceFile, ClassCounts)>> =
        stream::iter(discovery.files.iter().cloned())
            .map(scan_file)
            .buffer_unordered(workers.max(1))
            .collect()
            .await;

    let mut per_file = Vec::with_capacity(scanned.len());
    for result in scanned {
        let (file, counts) = result?;
        debug!(
            file = %file.path.display(),
            table = %file.table.name(),
            records = counts.total(),
            problematic = counts.repaired(),
            "File scanned"
        );
        per_file.push((file, counts));
    }

    let stats: Vec<TableStats> = discovery
        .tables()
        .into_iter()
        .map(|kind| {
            let mut counts = ClassCounts::default();
            let mut files = 0;
            let mut expected_fields = 0;
            for (file, file_counts) in per_file.iter().filter(|(f, _)| f.table.kind == kind) {
                counts.merge(file_counts);
                files += 1;
                expected_fields = file.table.width();
            }
            TableStats {
                table: kind,
                files,
                expected_fields,
                counts,
            }
        })
        .collect();

    for s in &stats {
        info!(
            table = %s.table,
            files = s.files,
            records = s.counts.total(),
            problematic = s.problematic(),
            "Source statistics"
        );
    }

    Ok(stats)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::discovery::discover;
    use crate::schema::{SchemaRegistry, TableKind};
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_collect_stats_merges_files_per_table() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.PAISCSV"), "1;BRASIL\n2\n").unwrap();
        fs::write(dir.path().join("b.PAISCSV"), "3;PERU;x\n4;A;B;C;D\n").unwrap();
        fs::write(dir.path().join("c.CNAECSV"), "0111301;Cultivo de arroz\n").unwrap();
        let discovery = discover(dir.path(), &SchemaRegistry::cnpj()).unwrap();

        let stats = collect_stats(&discovery, 2).await.unwrap();

        assert_eq!(stats.len(), 2);
        let cnaes = &stats[0];
        assert_eq!(cnaes.table, TableKind::Cnaes);
        assert_eq!(cnaes.problematic(), 0);

        let paises = &stats[1];
        assert_eq!(paises.files, 2);
        assert_eq!(paises.expected_fields, 2);
        assert_eq!(paises.counts.total(), 4);
        assert_eq!(paises.counts.valid, 1);
        assert_eq!(paises.counts.short, 1);
        assert_eq!(paises.counts.valid_with_excess, 1);
        assert_eq!(paises.counts.long, 1);
        assert_eq!(paises.problematic(), 2);

        assert!(TableStats::render(&stats).contains("paises"));
    }
}
