//! Statement builder for the PostgreSQL store
//!
//! Table and column names only ever come from the
//! [`SchemaRegistry`](crate::schema::SchemaRegistry) and are always quoted. Row values are
//! bound as parameters, never spliced into statement text.
//!
//! The per-type conversion expressions are the SQL twin of
//! [`crate::normalize`]: both paths must turn the same raw text into the same
//! typed value.

use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::normalize::{NormalizedRecord, MAX_CURRENCY_INTEGER_DIGITS, MAX_YEAR, MIN_YEAR};
use crate::schema::{ColumnSpec, ColumnType, TableSpec};

/// Characters stripped by BTRIM/RTRIM; matches `normalize::WHITESPACE`
const TRIM_CHARS: &str = r"E' \t\n\r\x0b\f'";

/// Alias of the trimmed staging subquery in the conversion pass
const SRC: &str = "src";

/// Quote an identifier, doubling embedded quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn column_list(spec: &TableSpec) -> String {
    spec.column_names()
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Store type for a column
pub fn sql_type(kind: ColumnType) -> String {
    match kind {
        ColumnType::Code { width } => format!("VARCHAR({})", width),
        ColumnType::Text { max_len: Some(max) } => format!("VARCHAR({})", max),
        ColumnType::Text { max_len: None } => "TEXT".to_string(),
        ColumnType::Date => "DATE".to_string(),
        ColumnType::Currency => "NUMERIC(18,2)".to_string(),
    }
}

/// `CREATE TABLE IF NOT EXISTS` for the typed target table
pub fn create_table(spec: &TableSpec) -> String {
    let mut columns: Vec<String> = spec
        .columns()
        .iter()
        .map(|c| format!("{} {}", quote_ident(c.name), sql_type(c.kind)))
        .collect();

    columns.extend(spec.generated_columns().iter().map(|(name, sql_type, expr)| {
        format!(
            "{} {} GENERATED ALWAYS AS ({}) STORED",
            quote_ident(name),
            sql_type,
            expr
        )
    }));

    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(spec.name()),
        columns.join(", ")
    )
}

/// Unique name for one load's staging table
pub fn staging_table_name(spec: &TableSpec) -> String {
    format!("stg_{}_{}", spec.name(), Uuid::new_v4().simple())
}

/// All-text staging table, dropped when the load's transaction commits
pub fn create_staging(spec: &TableSpec, staging: &str) -> String {
    let columns = spec
        .column_names()
        .map(|name| format!("{} TEXT", quote_ident(name)))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "CREATE TEMP TABLE {} ({}) ON COMMIT DROP",
        quote_ident(staging),
        columns
    )
}

/// COPY of the raw source format into the staging table
pub fn copy_into_staging(spec: &TableSpec, staging: &str) -> String {
    format!(
        "COPY {} ({}) FROM STDIN WITH (FORMAT csv, DELIMITER ';', QUOTE '\"', NULL '', ENCODING 'UTF8')",
        quote_ident(staging),
        column_list(spec)
    )
}

/// Batch insert of normalized rows into the staging table
///
/// Values are bound in their staging-text form so the conversion pass
/// treats fallback rows exactly like copied ones.
pub fn insert_staging_rows<'r>(
    spec: &TableSpec,
    staging: &str,
    rows: &'r [NormalizedRecord],
) -> QueryBuilder<'r, Postgres> {
    let mut builder = QueryBuilder::new(format!(
        "INSERT INTO {} ({}) ",
        quote_ident(staging),
        column_list(spec)
    ));

    builder.push_values(rows.iter(), |mut b, row| {
        for field in row.staging_fields() {
            b.push_bind(field);
        }
    });

    builder
}

/// Single set-oriented conversion from staging text into the typed table
pub fn convert_from_staging(spec: &TableSpec, staging: &str) -> String {
    let trimmed = spec
        .column_names()
        .map(|name| {
            let ident = quote_ident(name);
            format!("BTRIM({}, {}) AS {}", ident, TRIM_CHARS, ident)
        })
        .collect::<Vec<_>>()
        .join(", ");

    let converted = spec
        .columns()
        .iter()
        .map(conversion_expr)
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "INSERT INTO {} ({}) SELECT {} FROM (SELECT {} FROM {}) AS {}",
        quote_ident(spec.name()),
        column_list(spec),
        converted,
        trimmed,
        quote_ident(staging),
        SRC
    )
}

/// Conversion of one already-trimmed staging column
///
/// Inputs come from the `BTRIM` subquery of [`convert_from_staging`], so
/// unbounded text only needs the empty check to match `normalize_text`.
/// Cut columns trim again because the cut can expose trailing whitespace.
pub fn conversion_expr(column: &ColumnSpec) -> String {
    let t = format!("{}.{}", SRC, quote_ident(column.name));

    match column.kind {
        ColumnType::Code { width } => format!(
            "LPAD(NULLIF(RTRIM(LEFT({t}, {w}), {ws}), ''), {w}, '0')",
            t = t,
            w = width,
            ws = TRIM_CHARS
        ),
        ColumnType::Text { max_len: Some(max) } => format!(
            "NULLIF(RTRIM(LEFT({t}, {max}), {ws}), '')",
            t = t,
            max = max,
            ws = TRIM_CHARS
        ),
        ColumnType::Text { max_len: None } => format!("NULLIF({}, '')", t),
        ColumnType::Date => date_expr(&t),
        ColumnType::Currency => currency_expr(&t),
    }
}

fn date_expr(t: &str) -> String {
    let year = format!("SUBSTRING({}, 1, 4)::int", t);
    let month = format!("SUBSTRING({}, 5, 2)::int", t);
    let day = format!("SUBSTRING({}, 7, 2)::int", t);
    let last_day = format!(
        "EXTRACT(DAY FROM (make_date({y}, {m}, 1) + INTERVAL '1 month' - INTERVAL '1 day'))::int",
        y = year,
        m = month
    );

    format!(
        "CASE \
         WHEN {t} IS NULL OR {t} !~ '^[0-9]{{8}}$' THEN NULL \
         WHEN {y} NOT BETWEEN {min_year} AND {max_year} THEN NULL \
         WHEN {m} NOT BETWEEN 1 AND 12 THEN NULL \
         WHEN {d} NOT BETWEEN 1 AND {last_day} THEN NULL \
         ELSE make_date({y}, {m}, {d}) END",
        t = t,
        y = year,
        m = month,
        d = day,
        last_day = last_day,
        min_year = MIN_YEAR,
        max_year = MAX_YEAR
    )
}

fn currency_expr(t: &str) -> String {
    // Everything before the last separator, separators removed
    let integer = format!(
        "LTRIM(REGEXP_REPLACE(COALESCE(SUBSTRING({t} FROM '^(.*)[.,][0-9]*$'), {t}), '[.,]', '', 'g'), '0')",
        t = t
    );
    let fraction = format!("COALESCE(SUBSTRING({} FROM '[.,]([0-9]*)$'), '')", t);

    format!(
        "CASE \
         WHEN {t} IS NULL OR {t} !~ '^[0-9.,]*[0-9][0-9.,]*$' THEN NULL \
         WHEN LENGTH({int}) > {max_digits} THEN NULL \
         ELSE (COALESCE(NULLIF({int}, ''), '0') || '.' || RPAD(LEFT({frac}, 2), 2, '0'))::numeric(18,2) END",
        t = t,
        int = integer,
        frac = fraction,
        max_digits = MAX_CURRENCY_INTEGER_DIGITS
    )
}

pub fn truncate(spec: &TableSpec) -> String {
    format!("TRUNCATE TABLE {}", quote_ident(spec.name()))
}

pub fn count_rows(spec: &TableSpec) -> String {
    format!("SELECT COUNT(*) FROM {}", quote_ident(spec.name()))
}

pub fn analyze(spec: &TableSpec) -> String {
    format!("ANALYZE {}", quote_ident(spec.name()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::normalize::normalize_record;
    use crate::schema::{SchemaRegistry, TableKind};
    use sqlx::Execute;

    fn spec(kind: TableKind) -> std::sync::Arc<TableSpec> {
        SchemaRegistry::cnpj().get(kind).unwrap().clone()
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("cnaes"), "\"cnaes\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_create_table_types() {
        let ddl = create_table(&spec(TableKind::Empresas));
        assert!(ddl.starts_with("CREATE TABLE IF NOT EXISTS \"empresas\" ("));
        assert!(ddl.contains("\"cnpj_basico\" VARCHAR(8)"));
        assert!(ddl.contains("\"capital_social\" NUMERIC(18,2)"));
        assert!(!ddl.contains("PRIMARY KEY"));
    }

    #[test]
    fn test_create_table_generated_cnpj() {
        let ddl = create_table(&spec(TableKind::Estabelecimentos));
        assert!(ddl.contains("\"data_inicio_atividade\" DATE"));
        assert!(ddl.contains("\"cnae_fiscal_secundaria\" TEXT"));
        assert!(ddl.ends_with(
            "\"cnpj\" VARCHAR(14) GENERATED ALWAYS AS (cnpj_basico || cnpj_ordem || cnpj_dv) STORED)"
        ));
    }

    #[test]
    fn test_staging_is_all_text_and_transaction_scoped() {
        let cnaes = spec(TableKind::Cnaes);
        let name = staging_table_name(&cnaes);
        assert!(name.starts_with("stg_cnaes_"));
        assert_ne!(name, staging_table_name(&cnaes));

        let ddl = create_staging(&cnaes, &name);
        assert_eq!(
            ddl,
            format!(
                "CREATE TEMP TABLE \"{}\" (\"codigo\" TEXT, \"descricao\" TEXT) ON COMMIT DROP",
                name
            )
        );
    }

    #[test]
    fn test_copy_statement() {
        let stmt = copy_into_staging(&spec(TableKind::Paises), "stg");
        assert_eq!(
            stmt,
            "COPY \"stg\" (\"codigo\", \"descricao\") FROM STDIN WITH (FORMAT csv, DELIMITER ';', QUOTE '\"', NULL '', ENCODING 'UTF8')"
        );
    }

    #[test]
    fn test_convert_reads_trimmed_staging() {
        let stmt = convert_from_staging(&spec(TableKind::Motivos), "stg");
        assert!(stmt.starts_with("INSERT INTO \"motivos\" (\"codigo\", \"descricao\") SELECT "));
        assert!(stmt.contains("LPAD(NULLIF(RTRIM(LEFT(src.\"codigo\", 2)"));
        assert!(stmt.contains("NULLIF(RTRIM(LEFT(src.\"descricao\", 200)"));
        assert!(stmt.ends_with("FROM \"stg\") AS src"));
    }

    #[test]
    fn test_unbounded_text_relies_on_trimmed_subquery() {
        let estabelecimentos = spec(TableKind::Estabelecimentos);
        let column = estabelecimentos.column("cnae_fiscal_secundaria").unwrap();
        assert_eq!(
            conversion_expr(column),
            "NULLIF(src.\"cnae_fiscal_secundaria\", '')"
        );

        let stmt = convert_from_staging(&estabelecimentos, "stg");
        assert!(stmt.contains(&format!(
            "BTRIM(\"cnae_fiscal_secundaria\", {}) AS \"cnae_fiscal_secundaria\"",
            TRIM_CHARS
        )));
    }

    #[test]
    fn test_date_expression_bounds() {
        let simples = spec(TableKind::Simples);
        let expr = conversion_expr(simples.column("data_opcao_simples").unwrap());
        assert!(expr.contains("!~ '^[0-9]{8}$'"));
        assert!(expr.contains("NOT BETWEEN 1900 AND 2100"));
        assert!(expr.contains("NOT BETWEEN 1 AND 12"));
        assert!(expr.contains("INTERVAL '1 month' - INTERVAL '1 day'"));
        assert!(expr.ends_with("ELSE make_date(SUBSTRING(src.\"data_opcao_simples\", 1, 4)::int, SUBSTRING(src.\"data_opcao_simples\", 5, 2)::int, SUBSTRING(src.\"data_opcao_simples\", 7, 2)::int) END"));
    }

    #[test]
    fn test_currency_expression() {
        let empresas = spec(TableKind::Empresas);
        let expr = conversion_expr(empresas.column("capital_social").unwrap());
        assert!(expr.contains("'^[0-9.,]*[0-9][0-9.,]*$'"));
        assert!(expr.contains("> 16 THEN NULL"));
        assert!(expr.contains("::numeric(18,2)"));
    }

    #[test]
    fn test_insert_staging_rows_binds_values() {
        let cnaes = spec(TableKind::Cnaes);
        let rows = vec![
            normalize_record(&["111301", "Cultivo de arroz"], &cnaes),
            normalize_record(&["111302", ""], &cnaes),
        ];
        let mut builder = insert_staging_rows(&cnaes, "stg", &rows);
        let sql = builder.build().sql().to_string();
        assert_eq!(
            sql,
            "INSERT INTO \"stg\" (\"codigo\", \"descricao\") VALUES ($1, $2), ($3, $4)"
        );
    }

    #[test]
    fn test_maintenance_statements() {
        let socios = spec(TableKind::Socios);
        assert_eq!(truncate(&socios), "TRUNCATE TABLE \"socios\"");
        assert_eq!(count_rows(&socios), "SELECT COUNT(*) FROM \"socios\"");
        assert_eq!(analyze(&socios), "ANALYZE \"socios\"");
    }
}
