//! Configuration management
//!
//! Built once by the binary (defaults, then `.env`/environment, then CLI
//! flags) and handed to the pipeline. Nothing below `main` reads the
//! environment.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ============================================================================
// Ingestion Configuration Constants
// ============================================================================

/// Default directory holding the extracted source files.
pub const DEFAULT_SOURCE_DIR: &str = "./data";

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/cnpj";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 8;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 1;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default number of files loaded concurrently.
pub const DEFAULT_WORKERS: usize = 4;

/// Default rows per fallback batch.
pub const DEFAULT_FALLBACK_BATCH_SIZE: usize = 1000;

/// Default reconciliation retry ceiling.
pub const DEFAULT_MAX_RETRY_ROUNDS: u32 = 3;

/// Default bytes per COPY message (1 MiB).
pub const DEFAULT_COPY_CHUNK_BYTES: usize = 1024 * 1024;

/// PostgreSQL's limit on bind parameters in one statement.
pub const MAX_BIND_PARAMETERS: usize = 65_535;

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            idle_timeout_secs: None,
        }
    }
}

/// Ingestion run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Root of the extracted source tree
    pub source_dir: PathBuf,

    pub database: DatabaseConfig,

    /// Files loaded concurrently; also bounds parallel record counting
    pub workers: usize,

    /// Rows per batch on the row-by-row fallback path
    pub fallback_batch_size: usize,

    /// Truncate-and-reload rounds before reconciliation gives up
    pub max_retry_rounds: u32,

    pub copy_chunk_bytes: usize,

    /// Create missing target tables before loading
    #[serde(default)]
    pub create_tables: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from(DEFAULT_SOURCE_DIR),
            database: DatabaseConfig::default(),
            workers: DEFAULT_WORKERS,
            fallback_batch_size: DEFAULT_FALLBACK_BATCH_SIZE,
            max_retry_rounds: DEFAULT_MAX_RETRY_ROUNDS,
            copy_chunk_bytes: DEFAULT_COPY_CHUNK_BYTES,
            create_tables: false,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

impl IngestConfig {
    /// Load configuration from environment and defaults
    ///
    /// Unparseable values fall back to the default. Call [`validate`] after
    /// applying any overrides.
    ///
    /// [`validate`]: IngestConfig::validate
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        Self {
            source_dir: std::env::var("CNPJ_SOURCE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.source_dir),
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL").unwrap_or(defaults.database.url),
                max_connections: env_parse("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or(DEFAULT_DATABASE_MAX_CONNECTIONS),
                min_connections: env_parse("DATABASE_MIN_CONNECTIONS")
                    .unwrap_or(DEFAULT_DATABASE_MIN_CONNECTIONS),
                connect_timeout_secs: env_parse("DATABASE_CONNECT_TIMEOUT")
                    .unwrap_or(DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS),
                idle_timeout_secs: env_parse("DATABASE_IDLE_TIMEOUT"),
            },
            workers: env_parse("CNPJ_WORKERS").unwrap_or(DEFAULT_WORKERS),
            fallback_batch_size: env_parse("CNPJ_FALLBACK_BATCH_SIZE")
                .unwrap_or(DEFAULT_FALLBACK_BATCH_SIZE),
            max_retry_rounds: env_parse("CNPJ_MAX_RETRY_ROUNDS")
                .unwrap_or(DEFAULT_MAX_RETRY_ROUNDS),
            copy_chunk_bytes: env_parse("CNPJ_COPY_CHUNK_BYTES")
                .unwrap_or(DEFAULT_COPY_CHUNK_BYTES),
            create_tables: env_parse("CNPJ_CREATE_TABLES").unwrap_or(false),
        }
    }

    pub fn with_source_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.source_dir = dir.into();
        self
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database.url = url.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_fallback_batch_size(mut self, size: usize) -> Self {
        self.fallback_batch_size = size;
        self
    }

    pub fn with_max_retry_rounds(mut self, rounds: u32) -> Self {
        self.max_retry_rounds = rounds;
        self
    }

    pub fn with_create_tables(mut self, create: bool) -> Self {
        self.create_tables = create;
        self
    }

    /// Validate configuration
    ///
    /// `widest_table` is the column count of the widest registered table; a
    /// fallback batch binds one parameter per cell.
    pub fn validate(&self, widest_table: usize) -> anyhow::Result<()> {
        if self.workers == 0 {
            anyhow::bail!("workers must be greater than 0");
        }

        if self.fallback_batch_size == 0 {
            anyhow::bail!("fallback_batch_size must be greater than 0");
        }

        let parameters = self.fallback_batch_size.saturating_mul(widest_table);
        if parameters >= MAX_BIND_PARAMETERS {
            anyhow::bail!(
                "fallback_batch_size ({}) × {} columns needs {} bind parameters; the limit is {}",
                self.fallback_batch_size,
                widest_table,
                parameters,
                MAX_BIND_PARAMETERS
            );
        }

        if self.max_retry_rounds == 0 {
            anyhow::bail!("max_retry_rounds must be greater than 0");
        }

        if self.copy_chunk_bytes == 0 {
            anyhow::bail!("copy_chunk_bytes must be greater than 0");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if let Some(warning) = self.pool_size_warning() {
            tracing::warn!("{}", warning);
        }

        Ok(())
    }

    /// Warning text when the pool cannot serve every worker plus the
    /// reconciliation counter at once
    pub fn pool_size_warning(&self) -> Option<String> {
        let required = u32::try_from(self.workers)
            .unwrap_or(u32::MAX)
            .saturating_add(1);
        if self.database.max_connections < required {
            Some(format!(
                "Database pool size ({}) may be insufficient for {} workers. \
                 Recommended minimum: {} connections. \
                 Loads will queue on the pool instead of running in parallel.",
                self.database.max_connections, self.workers, required
            ))
        } else {
            None
        }
    }
}
