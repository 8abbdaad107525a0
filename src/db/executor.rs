use crate::db::db_pool::DuckDbConnectionManager;
use crate::db::loader::validate_identifier;
use crate::db::DbError;
use crate::stats::{MetricPoint, MetricSeries};
use chrono::NaiveDate;
use duckdb::types::ValueRef;
use r2d2::Pool;
use serde::Serialize;
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, info};

/// Categorical columns exposed in the prompt's value dictionary.
const CATEGORICAL_COLUMNS: &[&str] = &[
    "entity",
    "product",
    "price_tier",
    "anticipation_method",
    "payment_method",
];

/// Tabular result of one executed statement. Column order and names are
/// preserved exactly as the database returned them.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
    pub execution_time_ms: u64,
}

impl QueryResult {
    /// Renders the result as a markdown table for the analysis prompt.
    pub fn to_markdown(&self) -> String {
        if self.columns.is_empty() {
            return "(empty result)".to_string();
        }

        let mut out = String::new();
        out.push_str("| ");
        for col in &self.columns {
            out.push_str(col);
            out.push_str(" | ");
        }
        out.push('\n');
        out.push_str("| ");
        for _ in &self.columns {
            out.push_str("--- | ");
        }
        out.push('\n');
        for row in &self.rows {
            out.push_str("| ");
            for cell in row {
                match cell {
                    Value::String(s) => out.push_str(s),
                    Value::Null => out.push_str("NULL"),
                    other => out.push_str(&other.to_string()),
                }
                out.push_str(" | ");
            }
            out.push('\n');
        }
        out
    }
}

/// Headline figures for the dashboard, computed from the loaded dataset.
#[derive(Debug, Clone, Serialize)]
pub struct QuickStats {
    pub total_volume: f64,
    pub total_transactions: i64,
    pub avg_ticket: f64,
    pub first_day: String,
    pub last_day: String,
    pub latest_day_volume: f64,
}

/// Read-only handle over the loaded transactions dataset. All database work
/// happens on blocking threads; the handle itself is cheap to clone and safe
/// to share across concurrent turns because nothing ever writes through it.
#[derive(Clone)]
pub struct QueryExecutor {
    pool: Pool<DuckDbConnectionManager>,
    table_name: String,
}

impl QueryExecutor {
    pub fn new(pool: Pool<DuckDbConnectionManager>, table_name: String) -> Self {
        Self { pool, table_name }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Executes an already-validated SQL statement and collects the rows.
    pub async fn execute(&self, sql: &str) -> Result<QueryResult, DbError> {
        let pool = self.pool.clone();
        let sql = sql.to_string();
        debug!("Executing SQL: {}", sql);

        run_blocking(move || {
            let start = Instant::now();
            let conn = pool.get()?;
            let mut stmt = conn.prepare(&sql)?;

            let column_count = stmt.column_count();
            let mut columns = Vec::with_capacity(column_count);
            for i in 0..column_count {
                match stmt.column_name(i) {
                    Ok(name) => columns.push(name.to_string()),
                    Err(_) => columns.push(format!("column_{}", i)),
                }
            }

            let mut rows_out: Vec<Vec<Value>> = Vec::new();
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let mut cells = Vec::with_capacity(column_count);
                for i in 0..column_count {
                    cells.push(cell_to_json(row.get_ref(i)?));
                }
                rows_out.push(cells);
            }

            let row_count = rows_out.len();
            Ok(QueryResult {
                columns,
                rows: rows_out,
                row_count,
                execution_time_ms: start.elapsed().as_millis() as u64,
            })
        })
        .await
    }

    /// Builds one daily metric series from the dataset: `value_expr`
    /// aggregated per day, optionally filtered, up to and including `as_of`.
    pub async fn daily_series(
        &self,
        name: &str,
        value_expr: &str,
        filter: Option<&str>,
        as_of: Option<NaiveDate>,
    ) -> Result<MetricSeries, DbError> {
        let pool = self.pool.clone();
        let name = name.to_string();

        let mut predicates = Vec::new();
        if let Some(f) = filter {
            predicates.push(f.to_string());
        }
        if let Some(day) = as_of {
            predicates.push(format!("day <= '{}'", day));
        }
        let where_clause = if predicates.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", predicates.join(" AND "))
        };

        let sql = format!(
            "SELECT CAST(day AS VARCHAR) AS day, CAST({} AS DOUBLE) AS value \
             FROM \"{}\" {} GROUP BY day ORDER BY day",
            value_expr, self.table_name, where_clause
        );

        run_blocking(move || {
            let conn = pool.get()?;
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([])?;

            let mut points = Vec::new();
            while let Some(row) = rows.next()? {
                let day_text: String = row.get(0)?;
                let value: f64 = row.get(1)?;
                let day = NaiveDate::parse_from_str(&day_text, "%Y-%m-%d").map_err(|e| {
                    DbError::QueryError(format!("unparseable day '{}': {}", day_text, e))
                })?;
                points.push(MetricPoint { day, value });
            }

            Ok(MetricSeries::new(name, points))
        })
        .await
    }

    /// Distinct values of one categorical column, sorted for determinism.
    pub async fn distinct_values(&self, column: &str) -> Result<Vec<String>, DbError> {
        validate_identifier(column)?;
        let pool = self.pool.clone();
        let sql = format!(
            "SELECT DISTINCT CAST(\"{}\" AS VARCHAR) FROM \"{}\" ORDER BY 1",
            column, self.table_name
        );

        run_blocking(move || {
            let conn = pool.get()?;
            let mut stmt = conn.prepare(&sql)?;
            let values = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(values)
        })
        .await
    }

    /// First and last day present in the dataset.
    pub async fn date_range(&self) -> Result<(NaiveDate, NaiveDate), DbError> {
        let pool = self.pool.clone();
        let sql = format!(
            "SELECT CAST(MIN(day) AS VARCHAR), CAST(MAX(day) AS VARCHAR) FROM \"{}\"",
            self.table_name
        );

        run_blocking(move || {
            let conn = pool.get()?;
            let (min_text, max_text): (String, String) =
                conn.query_row(&sql, [], |row| Ok((row.get(0)?, row.get(1)?)))?;
            let parse = |s: &str| {
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .map_err(|e| DbError::QueryError(format!("unparseable day '{}': {}", s, e)))
            };
            Ok((parse(&min_text)?, parse(&max_text)?))
        })
        .await
    }

    pub async fn row_count(&self) -> Result<usize, DbError> {
        let pool = self.pool.clone();
        let sql = format!("SELECT COUNT(*) FROM \"{}\"", self.table_name);
        run_blocking(move || {
            let conn = pool.get()?;
            let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
            Ok(count as usize)
        })
        .await
    }

    /// Headline dashboard figures.
    pub async fn quick_stats(&self) -> Result<QuickStats, DbError> {
        let pool = self.pool.clone();
        let table = self.table_name.clone();

        run_blocking(move || {
            let conn = pool.get()?;

            let (total_volume, total_transactions): (f64, i64) = conn.query_row(
                &format!(
                    "SELECT CAST(SUM(amount_transacted) AS DOUBLE), \
                     CAST(SUM(quantity_transactions) AS BIGINT) FROM \"{}\"",
                    table
                ),
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;

            let (first_day, last_day): (String, String) = conn.query_row(
                &format!(
                    "SELECT CAST(MIN(day) AS VARCHAR), CAST(MAX(day) AS VARCHAR) FROM \"{}\"",
                    table
                ),
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;

            let latest_day_volume: f64 = conn.query_row(
                &format!(
                    "SELECT CAST(SUM(amount_transacted) AS DOUBLE) FROM \"{}\" \
                     WHERE day = (SELECT MAX(day) FROM \"{}\")",
                    table, table
                ),
                [],
                |row| row.get(0),
            )?;

            let avg_ticket = if total_transactions > 0 {
                total_volume / total_transactions as f64
            } else {
                0.0
            };

            Ok(QuickStats {
                total_volume,
                total_transactions,
                avg_ticket,
                first_day,
                last_day,
                latest_day_volume,
            })
        })
        .await
    }

    /// Schema description plus a value dictionary for the LLM prompt:
    /// column names and types, permitted values of the categorical columns,
    /// and the covered date range.
    pub async fn schema_context(&self) -> Result<String, DbError> {
        let pool = self.pool.clone();
        let table = self.table_name.clone();

        run_blocking(move || {
            let conn = pool.get()?;

            let mut context = format!("## Table: {}\n\n", table);
            context.push_str("| Column | Type |\n|--------|------|\n");

            let mut stmt = conn.prepare(
                "SELECT column_name, data_type FROM information_schema.columns \
                 WHERE table_name = ? ORDER BY ordinal_position",
            )?;
            let columns = stmt
                .query_map([&table], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<Result<Vec<(String, String)>, _>>()?;

            let mut column_names = Vec::new();
            for (name, data_type) in &columns {
                context.push_str(&format!("| {} | {} |\n", name, data_type));
                column_names.push(name.clone());
            }

            context.push_str("\n## Permitted column values\n\n");
            for column in CATEGORICAL_COLUMNS {
                if !column_names.iter().any(|c| c == column) {
                    continue;
                }
                let sql = format!(
                    "SELECT DISTINCT CAST(\"{}\" AS VARCHAR) FROM \"{}\" ORDER BY 1",
                    column, table
                );
                let mut values_stmt = conn.prepare(&sql)?;
                let values = values_stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                context.push_str(&format!("- {}: {}\n", column, values.join(", ")));
            }

            let (min_day, max_day): (String, String) = conn.query_row(
                &format!(
                    "SELECT CAST(MIN(day) AS VARCHAR), CAST(MAX(day) AS VARCHAR) FROM \"{}\"",
                    table
                ),
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            context.push_str(&format!(
                "\n## Date range\n\nThe data is aggregated daily, from {} to {}. \
                 There is no intraday granularity.\n",
                min_day, max_day
            ));

            info!("Built schema context for table '{}'", table);
            Ok(context)
        })
        .await
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, DbError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, DbError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| DbError::QueryError(format!("database task failed: {}", e)))?
}

fn cell_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Boolean(b) => Value::Bool(b),
        ValueRef::TinyInt(v) => Value::from(v),
        ValueRef::SmallInt(v) => Value::from(v),
        ValueRef::Int(v) => Value::from(v),
        ValueRef::BigInt(v) => Value::from(v),
        ValueRef::HugeInt(v) => match i64::try_from(v) {
            Ok(n) => Value::from(n),
            Err(_) => Value::String(v.to_string()),
        },
        ValueRef::UTinyInt(v) => Value::from(v),
        ValueRef::USmallInt(v) => Value::from(v),
        ValueRef::UInt(v) => Value::from(v),
        ValueRef::UBigInt(v) => Value::from(v),
        ValueRef::Float(v) => serde_json::Number::from_f64(v as f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Double(v) => serde_json::Number::from_f64(v)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Date32(days) => {
            let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).expect("valid epoch");
            match epoch.checked_add_signed(chrono::Duration::days(days as i64)) {
                Some(day) => Value::String(day.to_string()),
                None => Value::Null,
            }
        }
        other => Value::String(format!("{:?}", other)),
    }
}
