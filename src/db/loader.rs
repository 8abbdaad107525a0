use crate::db::db_pool::DuckDbConnectionManager;
use crate::db::DbError;
use r2d2::Pool;
use std::path::Path;
use tracing::info;

/// Loads the transactions CSV into the analytical database, replacing any
/// previous copy of the table. The dataset is immutable afterwards; every
/// other component only reads it.
///
/// Schema inference is delegated to DuckDB's `read_csv_auto`, so the `day`
/// column arrives typed as DATE without a separate parsing pass.
pub fn load_csv(
    pool: &Pool<DuckDbConnectionManager>,
    csv_path: &Path,
    table_name: &str,
) -> Result<usize, DbError> {
    if !csv_path.exists() {
        return Err(DbError::ConnectionError(format!(
            "CSV file not found: {}",
            csv_path.display()
        )));
    }
    validate_identifier(table_name)?;

    let conn = pool.get()?;

    let load_sql = format!(
        "CREATE OR REPLACE TABLE \"{}\" AS SELECT * FROM read_csv_auto('{}')",
        table_name,
        csv_path.to_string_lossy().replace('\'', "''")
    );
    conn.execute(&load_sql, [])?;

    let count_sql = format!("SELECT COUNT(*) FROM \"{}\"", table_name);
    let rows: usize = conn.query_row(&count_sql, [], |row| row.get::<_, i64>(0))? as usize;

    info!(
        "Loaded {} rows from {} into table '{}'",
        rows,
        csv_path.display(),
        table_name
    );

    Ok(rows)
}

/// Returns true when the dataset table already exists in the database.
pub fn table_exists(
    pool: &Pool<DuckDbConnectionManager>,
    table_name: &str,
) -> Result<bool, DbError> {
    let conn = pool.get()?;
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = ?",
        [table_name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Table and column names are interpolated into SQL text, so they are held
/// to alphanumeric-with-underscores.
pub fn validate_identifier(name: &str) -> Result<(), DbError> {
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(DbError::QueryError(format!(
            "invalid identifier: '{}'",
            name
        )));
    }
    Ok(())
}
