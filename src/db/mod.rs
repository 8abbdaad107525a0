pub mod db_pool;
pub mod executor;
pub mod loader;

use std::error::Error;
use std::fmt;

#[derive(Debug)]
pub enum DbError {
    PoolError(String),
    ConnectionError(String),
    /// Query failure; the raw database diagnostic is preserved verbatim.
    QueryError(String),
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbError::PoolError(msg) => write!(f, "connection pool error: {}", msg),
            DbError::ConnectionError(msg) => write!(f, "database connection error: {}", msg),
            DbError::QueryError(msg) => write!(f, "query error: {}", msg),
        }
    }
}

impl Error for DbError {}

impl From<r2d2::Error> for DbError {
    fn from(err: r2d2::Error) -> Self {
        DbError::PoolError(err.to_string())
    }
}

impl From<duckdb::Error> for DbError {
    fn from(err: duckdb::Error) -> Self {
        DbError::QueryError(err.to_string())
    }
}
