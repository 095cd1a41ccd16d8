//! PostgreSQL store
//!
//! Each load runs in its own transaction: create a temp staging table
//! (`ON COMMIT DROP`), fill it, convert into the target, commit. A failure
//! anywhere rolls the whole load back, staging included.
//!
//! COPY is fed re-encoded records from [`super::copy_input`], never the raw
//! file, so the server splits records exactly where the record counter does.

use async_trait::async_trait;
use sqlx::postgres::{PgConnection, PgCopyIn, PgPool, PgPoolOptions};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::copy_input::stream_copy_input;
use super::{CopyError, LoadStore, StoreError};
use crate::config::{DatabaseConfig, DEFAULT_COPY_CHUNK_BYTES};
use crate::normalize::NormalizedRecord;
use crate::schema::TableSpec;
use crate::sql;

/// Encoded chunks buffered ahead of the COPY stream
const COPY_CHANNEL_DEPTH: usize = 4;

async fn abort_copy(copy: PgCopyIn<&mut PgConnection>, reason: &str) {
    if let Err(e) = copy.abort(reason).await {
        warn!(error = %e, "Failed to abort COPY cleanly");
    }
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    copy_chunk_bytes: usize,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            copy_chunk_bytes: DEFAULT_COPY_CHUNK_BYTES,
        }
    }

    /// Bytes read from the source file per COPY message
    pub fn with_copy_chunk_bytes(mut self, bytes: usize) -> Self {
        self.copy_chunk_bytes = bytes.max(1);
        self
    }

    /// Open a connection pool sized by `config`
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let mut options = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs));

        if let Some(idle_timeout) = config.idle_timeout_secs {
            options = options.idle_timeout(Duration::from_secs(idle_timeout));
        }

        let pool = options.connect(&config.url).await?;

        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Database connection pool created"
        );

        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LoadStore for PgStore {
    fn kind(&self) -> &'static str {
        "postgres"
    }

    async fn prepare_table(&self, spec: &TableSpec) -> Result<(), StoreError> {
        sqlx::query(&sql::create_table(spec))
            .execute(&self.pool)
            .await?;
        debug!(table = %spec.name(), "Target table ready");
        Ok(())
    }

    async fn bulk_load(&self, spec: &TableSpec, path: &Path) -> Result<u64, CopyError> {
        let staging = sql::staging_table_name(spec);
        let mut tx = self.pool.begin().await?;

        sqlx::query(&sql::create_staging(spec, &staging))
            .execute(&mut *tx)
            .await?;

        let mut copy = tx
            .copy_in_raw(&sql::copy_into_staging(spec, &staging))
            .await?;

        let (chunk_tx, mut chunks) = mpsc::channel::<Vec<u8>>(COPY_CHANNEL_DEPTH);
        let producer = tokio::task::spawn_blocking({
            let spec = spec.clone();
            let path = path.to_path_buf();
            let chunk_bytes = self.copy_chunk_bytes;
            move || stream_copy_input(&spec, &path, chunk_bytes, chunk_tx)
        });

        while let Some(chunk) = chunks.recv().await {
            copy.send(chunk).await?;
        }

        let encoded = match producer.await {
            Ok(Ok(records)) => records,
            Ok(Err(e)) => {
                abort_copy(copy, "source file rejected").await;
                return Err(e);
            },
            Err(e) => {
                abort_copy(copy, "encoder task failed").await;
                return Err(StoreError::unavailable(format!("copy encoder task failed: {}", e)).into());
            },
        };

        let copied = copy.finish().await?;
        if copied != encoded {
            // The transaction rolls back on drop
            return Err(CopyError::Structural(format!(
                "COPY stored {} rows for {} records of {}",
                copied,
                encoded,
                path.display()
            )));
        }

        let converted = sqlx::query(&sql::convert_from_staging(spec, &staging))
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        debug!(table = %spec.name(), copied, converted, "Staged copy converted");

        Ok(converted)
    }

    async fn load_batch(
        &self,
        spec: &TableSpec,
        rows: &[NormalizedRecord],
    ) -> Result<u64, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let staging = sql::staging_table_name(spec);
        let mut tx = self.pool.begin().await?;

        sqlx::query(&sql::create_staging(spec, &staging))
            .execute(&mut *tx)
            .await?;

        sql::insert_staging_rows(spec, &staging, rows)
            .build()
            .execute(&mut *tx)
            .await?;

        let converted = sqlx::query(&sql::convert_from_staging(spec, &staging))
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::rejected(spec.name(), e.to_string()))?
            .rows_affected();

        tx.commit().await?;
        Ok(converted)
    }

    async fn truncate(&self, spec: &TableSpec) -> Result<(), StoreError> {
        sqlx::query(&sql::truncate(spec)).execute(&self.pool).await?;
        Ok(())
    }

    async fn row_count(&self, spec: &TableSpec) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(&sql::count_rows(spec))
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }
}
