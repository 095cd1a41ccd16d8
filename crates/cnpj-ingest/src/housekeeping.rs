//! Post-load housekeeping
//!
//! Runs after a reconciled load. Failures are logged and never change the
//! run's outcome.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::schema::TableSpec;
use crate::sql;
use crate::store::StoreError;

#[async_trait]
pub trait Housekeeping: Send + Sync {
    async fn after_load(&self, tables: &[&TableSpec]) -> Result<(), StoreError>;
}

/// Does nothing; used for dry runs
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHousekeeping;

#[async_trait]
impl Housekeeping for NoHousekeeping {
    async fn after_load(&self, _tables: &[&TableSpec]) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Refresh planner statistics on every loaded table
#[derive(Debug, Clone)]
pub struct PgAnalyze {
    pool: PgPool,
}

impl PgAnalyze {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Housekeeping for PgAnalyze {
    async fn after_load(&self, tables: &[&TableSpec]) -> Result<(), StoreError> {
        for spec in tables {
            if let Err(e) = sqlx::query(&sql::analyze(spec)).execute(&self.pool).await {
                warn!(table = %spec.name(), error = %e, "ANALYZE failed");
                continue;
            }
            info!(table = %spec.name(), "✓ Table analyzed");
        }
        Ok(())
    }
}
