//! Schema registry
//!
//! Static description of every target table: column order, type class, fixed
//! widths and the filename markers that route a source file to its table.
//! Built once at startup and shared read-only behind `Arc`.

mod tables;

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Logical tables of the CNPJ export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
    Empresas,
    Estabelecimentos,
    Socios,
    Simples,
    Cnaes,
    Motivos,
    Municipios,
    Naturezas,
    Paises,
    Qualificacoes,
}

impl TableKind {
    /// All tables in registry priority order
    pub const ALL: [TableKind; 10] = [
        TableKind::Empresas,
        TableKind::Estabelecimentos,
        TableKind::Socios,
        TableKind::Simples,
        TableKind::Cnaes,
        TableKind::Motivos,
        TableKind::Municipios,
        TableKind::Naturezas,
        TableKind::Paises,
        TableKind::Qualificacoes,
    ];

    /// Table name in the store
    pub fn as_str(self) -> &'static str {
        match self {
            TableKind::Empresas => "empresas",
            TableKind::Estabelecimentos => "estabelecimentos",
            TableKind::Socios => "socios",
            TableKind::Simples => "simples",
            TableKind::Cnaes => "cnaes",
            TableKind::Motivos => "motivos",
            TableKind::Municipios => "municipios",
            TableKind::Naturezas => "naturezas",
            TableKind::Paises => "paises",
            TableKind::Qualificacoes => "qualificacoes",
        }
    }

    /// Small code/description domain tables
    pub fn is_lookup(self) -> bool {
        !matches!(
            self,
            TableKind::Empresas
                | TableKind::Estabelecimentos
                | TableKind::Socios
                | TableKind::Simples
        )
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TableKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        TableKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| format!("Unknown table: {}", s))
    }
}

/// Type class of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ColumnType {
    /// Zero-padded identifier with an exact width
    Code { width: usize },
    /// Free text, truncated to `max_len` characters when bounded
    Text { max_len: Option<usize> },
    /// `YYYYMMDD` in the source, a calendar date in the store
    Date,
    /// Decimal amount, carried as integer minor units
    Currency,
}

impl ColumnType {
    pub const fn code(width: usize) -> Self {
        ColumnType::Code { width }
    }

    pub const fn text(max_len: usize) -> Self {
        ColumnType::Text {
            max_len: Some(max_len),
        }
    }

    pub const fn unbounded_text() -> Self {
        ColumnType::Text { max_len: None }
    }
}

/// One column of a target table
///
/// Every column is nullable; the source is optional-heavy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnSpec {
    pub name: &'static str,
    /// Zero-based position in the source record
    pub ordinal: usize,
    pub kind: ColumnType,
}

/// Filename substring rule routing a source file to a table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMatcher {
    markers: &'static [&'static str],
    required: Option<&'static str>,
}

impl FileMatcher {
    pub const fn new(markers: &'static [&'static str]) -> Self {
        Self {
            markers,
            required: None,
        }
    }

    /// Additionally require `token` in the name, e.g. "CSV" so that an
    /// `EMPRE` marker does not pick up unrelated files
    pub fn requiring(mut self, token: &'static str) -> Self {
        self.required = Some(token);
        self
    }

    /// Case-insensitive match against a bare file name
    pub fn matches(&self, file_name: &str) -> bool {
        let upper = file_name.to_uppercase();
        let has_marker = self.markers.iter().any(|m| upper.contains(m));
        has_marker && self.required.map_or(true, |token| upper.contains(token))
    }
}

/// Immutable description of one target table
#[derive(Debug, Clone)]
pub struct TableSpec {
    pub kind: TableKind,
    columns: Vec<ColumnSpec>,
    date_columns: BTreeSet<&'static str>,
    code_widths: BTreeMap<&'static str, usize>,
    matcher: FileMatcher,
    /// Store-computed columns appended after the source columns, as
    /// `(name, SQL type, generation expression)`
    generated: Vec<(&'static str, &'static str, &'static str)>,
}

impl TableSpec {
    /// Build a spec from `(name, type)` pairs in source order
    pub fn new(
        kind: TableKind,
        columns: &[(&'static str, ColumnType)],
        matcher: FileMatcher,
    ) -> Self {
        let columns: Vec<ColumnSpec> = columns
            .iter()
            .enumerate()
            .map(|(ordinal, (name, kind))| ColumnSpec {
                name: *name,
                ordinal,
                kind: *kind,
            })
            .collect();

        let date_columns = columns
            .iter()
            .filter(|c| c.kind == ColumnType::Date)
            .map(|c| c.name)
            .collect();

        let code_widths = columns
            .iter()
            .filter_map(|c| match c.kind {
                ColumnType::Code { width } => Some((c.name, width)),
                _ => None,
            })
            .collect();

        Self {
            kind,
            columns,
            date_columns,
            code_widths,
            matcher,
            generated: Vec::new(),
        }
    }

    pub fn with_generated(
        mut self,
        name: &'static str,
        sql_type: &'static str,
        expression: &'static str,
    ) -> Self {
        self.generated.push((name, sql_type, expression));
        self
    }

    pub fn name(&self) -> &'static str {
        self.kind.as_str()
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    /// Expected field count N of a source record
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|c| c.name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn date_columns(&self) -> &BTreeSet<&'static str> {
        &self.date_columns
    }

    pub fn code_widths(&self) -> &BTreeMap<&'static str, usize> {
        &self.code_widths
    }

    pub fn generated_columns(&self) -> &[(&'static str, &'static str, &'static str)] {
        &self.generated
    }
}

/// The full set of target tables, in file-matching priority order
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    tables: Vec<Arc<TableSpec>>,
}

impl SchemaRegistry {
    pub fn new(tables: Vec<TableSpec>) -> Self {
        Self {
            tables: tables.into_iter().map(Arc::new).collect(),
        }
    }

    /// Registry for the Receita Federal CNPJ open-data export
    pub fn cnpj() -> Self {
        Self::new(tables::cnpj_tables())
    }

    pub fn tables(&self) -> &[Arc<TableSpec>] {
        &self.tables
    }

    pub fn get(&self, kind: TableKind) -> Option<&Arc<TableSpec>> {
        self.tables.iter().find(|t| t.kind == kind)
    }

    /// First table, in registry order, whose markers match `file_name`
    pub fn match_file(&self, file_name: &str) -> Option<&Arc<TableSpec>> {
        self.tables.iter().find(|t| t.matcher.matches(file_name))
    }

    /// Widest table, used to bound bind parameters per batch
    pub fn max_width(&self) -> usize {
        self.tables.iter().map(|t| t.width()).max().unwrap_or(0)
    }
}
