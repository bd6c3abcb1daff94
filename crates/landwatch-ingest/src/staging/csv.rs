//! CSV raw staging
//!
//! The raw staging table carries one TEXT column per header field, so source
//! files never fail on typing at this stage. Rows stream into PostgreSQL via
//! `COPY … FROM STDIN` under the dataset's client encoding.

use anyhow::{Context, Result};
use sqlx::PgConnection;
use std::path::Path;
use tracing::debug;

use super::{drop_table, quote_ident, sql_literal, STG_RAW};

/// Read the header row of a CSV file.
///
/// Sources are frequently LATIN1; bytes are decoded per the configured
/// encoding instead of assuming UTF-8.
pub fn read_csv_header(csv_path: &Path, delimiter: char, encoding: &str) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter as u8)
        .has_headers(false)
        .flexible(true)
        .from_path(csv_path)
        .with_context(|| format!("Failed to open {}", csv_path.display()))?;

    let mut record = csv::ByteRecord::new();
    if !reader
        .read_byte_record(&mut record)
        .with_context(|| format!("Failed to read header of {}", csv_path.display()))?
    {
        anyhow::bail!("CSV file {} is empty", csv_path.display());
    }

    Ok(record.iter().map(|field| decode(field, encoding)).collect())
}

fn decode(bytes: &[u8], encoding: &str) -> String {
    if encoding.eq_ignore_ascii_case("latin1")
        || encoding.eq_ignore_ascii_case("latin-1")
        || encoding.eq_ignore_ascii_case("iso-8859-1")
    {
        // LATIN1 bytes map one-to-one onto the first 256 codepoints.
        bytes.iter().map(|&b| b as char).collect()
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    }
}

/// Normalize header names into unique column names.
///
/// Blank headers become positional `col_{n}` placeholders; repeated names
/// get `_2`, `_3`… suffixes in order of appearance.
pub fn dedupe_columns(header: &[String]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::with_capacity(header.len());
    let mut seen = std::collections::HashSet::new();
    for raw in header {
        let mut name = raw.trim().to_string();
        if name.is_empty() {
            name = format!("col_{}", columns.len() + 1);
        }
        let base = name.clone();
        let mut i = 2;
        while seen.contains(&name) {
            name = format!("{base}_{i}");
            i += 1;
        }
        seen.insert(name.clone());
        columns.push(name);
    }
    columns
}

/// Rebuild `landwatch.stg_raw` from a CSV file.
///
/// Creates the table with one TEXT column per deduplicated header name,
/// then streams the file through COPY with `HEADER true` so the header row
/// is consumed server-side. Returns the column names.
pub async fn create_raw_from_csv(
    conn: &mut PgConnection,
    csv_path: &Path,
    delimiter: char,
    encoding: &str,
) -> Result<Vec<String>> {
    if !encoding
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        anyhow::bail!("Invalid client encoding name: {encoding}");
    }

    drop_table(conn, STG_RAW).await?;

    let header = read_csv_header(csv_path, delimiter, encoding)?;
    let columns = dedupe_columns(&header);
    debug!(columns = columns.len(), "Creating raw staging table from CSV header");

    sqlx::query("CREATE UNLOGGED TABLE landwatch.stg_raw ()")
        .execute(&mut *conn)
        .await
        .context("Failed to create raw staging table")?;
    for column in &columns {
        sqlx::query(&format!(
            "ALTER TABLE landwatch.stg_raw ADD COLUMN {} TEXT",
            quote_ident(column)
        ))
        .execute(&mut *conn)
        .await
        .with_context(|| format!("Failed to add staging column {column}"))?;
    }

    sqlx::query(&format!("SET client_encoding TO {}", sql_literal(encoding)))
        .execute(&mut *conn)
        .await
        .context("Failed to set client encoding")?;

    let copy_result = copy_csv(conn, csv_path, delimiter).await;

    // Restore the encoding even when COPY fails, the connection outlives us.
    let reset = sqlx::query("SET client_encoding TO 'UTF8'")
        .execute(&mut *conn)
        .await;
    copy_result?;
    reset.context("Failed to reset client encoding")?;

    Ok(columns)
}

async fn copy_csv(conn: &mut PgConnection, csv_path: &Path, delimiter: char) -> Result<()> {
    let file = tokio::fs::File::open(csv_path)
        .await
        .with_context(|| format!("Failed to open {}", csv_path.display()))?;

    let statement = format!(
        "COPY landwatch.stg_raw FROM STDIN WITH (FORMAT csv, DELIMITER {}, HEADER true)",
        sql_literal(&delimiter.to_string())
    );
    let mut copy = conn
        .copy_in_raw(&statement)
        .await
        .context("Failed to start COPY into raw staging")?;
    if let Err(e) = copy.read_from(file).await {
        let _ = copy.abort("copy failed").await;
        return Err(e).context("COPY into raw staging failed");
    }
    copy.finish()
        .await
        .context("Failed to finish COPY into raw staging")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn header_of(s: &[&str]) -> Vec<String> {
        s.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_dedupe_keeps_unique_names() {
        let cols = dedupe_columns(&header_of(&["a", "b", "c"]));
        assert_eq!(cols, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_dedupe_blank_headers_become_positional() {
        let cols = dedupe_columns(&header_of(&["a", "", " ", "b"]));
        assert_eq!(cols, vec!["a", "col_2", "col_3", "b"]);
    }

    #[test]
    fn test_dedupe_repeats_get_suffixes() {
        let cols = dedupe_columns(&header_of(&["x", "x", "x", "x_2"]));
        assert_eq!(cols, vec!["x", "x_2", "x_3", "x_2_2"]);
    }

    #[test]
    fn test_dedupe_trims_whitespace() {
        let cols = dedupe_columns(&header_of(&[" name ", "value"]));
        assert_eq!(cols, vec!["name", "value"]);
    }

    #[test]
    fn test_read_header_with_semicolon_delimiter() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "DOC;NAME;UF").unwrap();
        writeln!(file, "1;foo;SP").unwrap();

        let header = read_csv_header(file.path(), ';', "utf-8").unwrap();
        assert_eq!(header, vec!["DOC", "NAME", "UF"]);
    }

    #[test]
    fn test_read_header_decodes_latin1() {
        let mut file = NamedTempFile::new().unwrap();
        // "REGIÃO" in LATIN1: Ã = 0xC3
        file.write_all(b"REGI\xC3O;UF\n1;SP\n").unwrap();

        let header = read_csv_header(file.path(), ';', "latin1").unwrap();
        assert_eq!(header, vec!["REGIÃO", "UF"]);
    }

    #[test]
    fn test_read_header_rejects_empty_file() {
        let file = NamedTempFile::new().unwrap();
        assert!(read_csv_header(file.path(), ';', "utf-8").is_err());
    }
}
