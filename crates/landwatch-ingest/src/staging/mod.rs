//! Staged load protocol
//!
//! Every source file passes through the same two UNLOGGED staging tables:
//! `landwatch.stg_raw` holds the source verbatim (one TEXT column per CSV
//! header, or the loader's raw feature rows), `landwatch.stg_payload`
//! normalizes it into `(row_id, payload jsonb, geom_wkt, feature_key_override)`.
//! The parameterized ingest script then merges the payload into the typed
//! target tables. Both staging tables are scratch space, dropped and rebuilt
//! per file.

pub mod csv;
pub mod payload;
pub mod pipeline;
pub mod rules;
pub mod script;

pub use payload::{create_payload_from_csv, create_payload_from_geometry, resolve_stg_column};
pub use pipeline::{process_csv, process_shapefile};
pub use rules::{infer_csv_rules, persist_rules, CsvRules};

use anyhow::{Context, Result};
use sqlx::PgConnection;

pub const STG_RAW: &str = "landwatch.stg_raw";
pub const STG_PAYLOAD: &str = "landwatch.stg_payload";

/// Drop a staging table if it exists.
///
/// `full_table` must be one of the fixed staging table names; it is
/// interpolated, never bound.
pub async fn drop_table(conn: &mut PgConnection, full_table: &str) -> Result<()> {
    sqlx::query(&format!("DROP TABLE IF EXISTS {full_table}"))
        .execute(conn)
        .await
        .with_context(|| format!("Failed to drop {full_table}"))?;
    Ok(())
}

/// Escape a value as a single-quoted SQL literal.
pub(crate) fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Quote an identifier for interpolation into DDL.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_literal_escapes_quotes() {
        assert_eq!(sql_literal("plain"), "'plain'");
        assert_eq!(sql_literal("it's"), "'it''s'");
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("CNPJ/CPF"), "\"CNPJ/CPF\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
