//! Common test utilities for cnpj-ingest integration tests
//!
//! Source-tree fixtures for pipeline tests and a PostgreSQL container wrapper
//! for store tests.

#![allow(dead_code)]

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::fs;
use std::path::Path;
use std::time::Duration;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::{debug, info};

// ============================================================================
// Source fixtures
// ============================================================================

pub const EMPRESAS_FILE: &str = "K3241.K03200Y0.D40810.EMPRECSV";
pub const ESTABELECIMENTOS_FILE: &str = "K3241.K03200Y0.D40810.ESTABELE";
pub const SIMPLES_FILE: &str = "F.K03200$W.SIMPLES.CSV.D40810";
pub const CNAES_FILE: &str = "F.K03200$Z.D40810.CNAECSV";

/// Clean company rows, 7 fields each
pub const EMPRESAS_CLEAN: &str = "\
\"41273594\";\"ACME COMERCIO LTDA\";\"2062\";\"49\";\"1000,00\";\"01\";\"\"
\"41273595\";\"PADARIA BOM PAO\";\"2135\";\"50\";\"1.234,56\";\"05\";\"\"
\"00000191\";\"BANCO DO BRASIL SA\";\"2038\";\"10\";\"120000000000,00\";\"05\";\"\"
";

/// One short row and one row with a stray delimiter in an unquoted name
pub const EMPRESAS_MALFORMED: &str = "\
\"41273594\";\"ACME COMERCIO LTDA\";\"2062\";\"49\";\"1000,00\";\"01\";\"\"
123;ACME
41273596;FOO; BAR LTDA;2062;49;0,00;01;
";

/// Tax-regime rows with placeholder and pre-Gregorian dates
pub const SIMPLES_ROWS: &str = "\
\"41273594\";\"S\";\"20210101\";\"00000000\";\"N\";\"20200230\";\"00000000 BC\"
\"41273595\";\"N\";\"\";\"\";\"S\";\"18991231\";\"20231231\"
";

pub const CNAES_ROWS: &str = "\
\"0111301\";\"Cultivo de arroz\"
\"0111302\";\"Cultivo de milho\"
";

pub fn write_source(dir: &Path, name: &str, content: &str) {
    fs::write(dir.join(name), content).expect("Failed to write source fixture");
}

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

/// PostgreSQL test container wrapper
///
/// The container lives as long as this value.
pub struct TestPostgres {
    container: ContainerAsync<Postgres>,
    pool: PgPool,
    connection_string: String,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let connection_string =
            format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);

        debug!("PostgreSQL connection: {}", connection_string);

        let pool = PgPoolOptions::new()
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        Ok(Self {
            container,
            pool,
            connection_string,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn pool_clone(&self) -> PgPool {
        self.pool.clone()
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }
}

/// Initialize tracing for tests; safe to call from every test
pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,cnpj_ingest=debug,sqlx=warn,testcontainers=info")
        }))
        .with_test_writer()
        .try_init();
}
