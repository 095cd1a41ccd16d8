//! Source file discovery
//!
//! Walks the source directory and routes each file to a table by filename
//! marker. Archives, hidden files and empty files are ignored; files that
//! match no marker are reported, not loaded.

use cnpj_common::{CnpjError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::schema::{SchemaRegistry, TableKind, TableSpec};

/// A source file and the table it loads into
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub size: u64,
    pub table: Arc<TableSpec>,
}

#[derive(Debug, Clone, Default)]
pub struct Discovery {
    /// Matched files, in path order
    pub files: Vec<SourceFile>,
    /// Files that match no table
    pub skipped: Vec<PathBuf>,
}

impl Discovery {
    pub fn files_for(&self, table: TableKind) -> Vec<SourceFile> {
        self.files
            .iter()
            .filter(|f| f.table.kind == table)
            .cloned()
            .collect()
    }

    /// Tables with at least one file, in registry order
    pub fn tables(&self) -> Vec<TableKind> {
        TableKind::ALL
            .into_iter()
            .filter(|kind| self.files.iter().any(|f| f.table.kind == *kind))
            .collect()
    }
}

fn is_ignored(name: &str) -> bool {
    name.starts_with('.') || name.to_ascii_lowercase().ends_with(".zip")
}

/// Discover loadable files under `root`
pub fn discover(root: &Path, registry: &SchemaRegistry) -> Result<Discovery> {
    if !root.exists() {
        return Err(CnpjError::io(
            root,
            std::io::Error::new(std::io::ErrorKind::NotFound, "source directory not found"),
        ));
    }
    if !root.is_dir() {
        return Err(CnpjError::config(format!(
            "Source path {} is not a directory",
            root.display()
        )));
    }

    let mut discovery = Discovery::default();

    let walker = WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().map_or_else(|| root.to_path_buf(), Path::to_path_buf);
            CnpjError::io(path, e.into())
        })?;

        if !entry.file_type().is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy();
        if is_ignored(&name) {
            continue;
        }

        let size = entry
            .metadata()
            .map_err(|e| CnpjError::io(entry.path(), e.into()))?
            .len();
        if size == 0 {
            debug!(file = %entry.path().display(), "Skipping empty file");
            continue;
        }

        match registry.match_file(&name) {
            Some(table) => discovery.files.push(SourceFile {
                path: entry.path().to_path_buf(),
                size,
                table: table.clone(),
            }),
            None => {
                info!(file = %entry.path().display(), "File matches no table, skipping");
                discovery.skipped.push(entry.path().to_path_buf());
            },
        }
    }

    info!(
        root = %root.display(),
        files = discovery.files.len(),
        skipped = discovery.skipped.len(),
        tables = discovery.tables().len(),
        "Source discovery complete"
    );

    Ok(discovery)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_discover_routes_files_by_marker() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("2024-08");
        fs::create_dir(&nested).unwrap();

        write(dir.path(), "K3241.K03200Y0.D40810.EMPRECSV", "1;A\n");
        write(&nested, "K3241.K03200Y0.D40810.ESTABELE", "1;2\n");
        write(&nested, "F.K03200$W.SIMPLES.CSV.D40810", "1\n");
        write(dir.path(), "F.K03200$Z.D40810.CNAECSV", "1;x\n");
        write(dir.path(), "README.txt", "hello\n");

        let discovery = discover(dir.path(), &SchemaRegistry::cnpj()).unwrap();

        assert_eq!(discovery.files.len(), 4);
        assert_eq!(discovery.skipped.len(), 1);
        assert_eq!(discovery.files_for(TableKind::Estabelecimentos).len(), 1);
        assert_eq!(
            discovery.tables(),
            vec![
                TableKind::Empresas,
                TableKind::Estabelecimentos,
                TableKind::Simples,
                TableKind::Cnaes
            ]
        );
        assert!(discovery.files.iter().all(|f| f.size > 0));
    }

    #[test]
    fn test_discover_ignores_archives_hidden_and_empty() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "Empresas0.zip", "PK");
        write(dir.path(), ".K3241.EMPRECSV.swp", "1;A\n");
        write(dir.path(), "K3241.K03200Y1.D40810.EMPRECSV", "");
        let hidden = dir.path().join(".cache");
        fs::create_dir(&hidden).unwrap();
        write(&hidden, "K3241.K03200Y2.D40810.EMPRECSV", "1;A\n");

        let discovery = discover(dir.path(), &SchemaRegistry::cnpj()).unwrap();

        assert!(discovery.files.is_empty());
        assert!(discovery.skipped.is_empty());
    }

    #[test]
    fn test_discover_missing_root() {
        let err = discover(Path::new("/nonexistent/cnpj"), &SchemaRegistry::cnpj()).unwrap_err();
        assert!(matches!(err, CnpjError::FileIo { .. }));
    }

    #[test]
    fn test_discover_root_must_be_a_directory() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("K3241.K03200Y0.D40810.EMPRECSV");
        write(dir.path(), "K3241.K03200Y0.D40810.EMPRECSV", "1;A\n");

        let err = discover(&file, &SchemaRegistry::cnpj()).unwrap_err();
        assert!(matches!(err, CnpjError::Config(_)));
        assert!(err.to_string().contains("not a directory"));
    }
}
