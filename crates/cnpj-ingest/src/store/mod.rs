//! Target store interface
//!
//! The loader, reconciler and orchestrator only talk to a [`LoadStore`].
//! [`PgStore`] is the production implementation; [`MemoryStore`] backs dry
//! runs and tests. Both bulk paths consume the same [`copy_input`] encoding.

pub mod copy_input;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use cnpj_common::CnpjError;
use std::path::Path;
use thiserror::Error;

use crate::normalize::NormalizedRecord;
use crate::schema::TableSpec;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// SQLSTATEs meaning "the input stream is malformed", as opposed to an
/// infrastructure failure
///
/// - `22P04` bad_copy_file_format (missing or extra columns, bad quoting)
/// - `22021` character_not_in_repertoire
/// - `22P05` untranslatable_character
/// - `54000` program_limit_exceeded (oversized line)
pub const STRUCTURAL_SQLSTATES: &[&str] = &["22P04", "22021", "22P05", "54000"];

/// Store operation failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database query failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Source(#[from] CnpjError),

    /// The conversion pass refused a fallback batch
    #[error("Table {table} rejected batch: {reason}")]
    Rejected { table: &'static str, reason: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn rejected(table: &'static str, reason: impl Into<String>) -> Self {
        Self::Rejected {
            table,
            reason: reason.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }
}

/// Outcome of a bulk stage-copy
///
/// `Structural` sends the file to the row-by-row fallback; `Fatal` fails
/// the file.
#[derive(Error, Debug)]
pub enum CopyError {
    #[error("Bulk copy rejected file structure: {0}")]
    Structural(String),

    #[error(transparent)]
    Fatal(#[from] StoreError),
}

impl CopyError {
    pub fn is_structural(&self) -> bool {
        matches!(self, CopyError::Structural(_))
    }
}

impl From<sqlx::Error> for CopyError {
    fn from(err: sqlx::Error) -> Self {
        let structural = match &err {
            sqlx::Error::Database(db) => db
                .code()
                .is_some_and(|code| STRUCTURAL_SQLSTATES.contains(&code.as_ref())),
            _ => false,
        };

        if structural {
            CopyError::Structural(err.to_string())
        } else {
            CopyError::Fatal(StoreError::Sqlx(err))
        }
    }
}

impl From<CnpjError> for CopyError {
    fn from(err: CnpjError) -> Self {
        CopyError::Fatal(StoreError::Source(err))
    }
}

/// A store that can receive full-table loads
///
/// Every load call is atomic: either all of its rows land in the target
/// table or none do. Implementations stage into a structure private to the
/// call, so concurrent loads of different tables never share staging.
#[async_trait]
pub trait LoadStore: Send + Sync {
    /// Short name for logs ("postgres", "memory")
    fn kind(&self) -> &'static str;

    /// Create the typed target table if it does not exist
    async fn prepare_table(&self, spec: &TableSpec) -> Result<(), StoreError>;

    /// Stage the raw file as text, then convert into the target table
    ///
    /// Returns rows added to the target table.
    async fn bulk_load(&self, spec: &TableSpec, path: &Path) -> Result<u64, CopyError>;

    /// Stage and convert one batch of normalized rows
    async fn load_batch(
        &self,
        spec: &TableSpec,
        rows: &[NormalizedRecord],
    ) -> Result<u64, StoreError>;

    async fn truncate(&self, spec: &TableSpec) -> Result<(), StoreError>;

    async fn row_count(&self, spec: &TableSpec) -> Result<u64, StoreError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_non_database_errors_are_fatal() {
        let err = CopyError::from(sqlx::Error::PoolTimedOut);
        assert!(!err.is_structural());
        assert!(matches!(err, CopyError::Fatal(StoreError::Sqlx(_))));
    }

    #[test]
    fn test_source_errors_are_fatal() {
        let err = CopyError::from(CnpjError::parse("x.csv", "boom"));
        assert!(!err.is_structural());
        assert!(err.to_string().contains("x.csv"));
    }

    #[test]
    fn test_structural_sqlstates() {
        assert!(STRUCTURAL_SQLSTATES.contains(&"22P04"));
        assert!(!STRUCTURAL_SQLSTATES.contains(&"08006"));
    }
}
