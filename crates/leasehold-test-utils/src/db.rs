//! Database test utilities
//!
//! In-memory SQLite pools. Schema setup is done by the consuming crate,
//! which owns the table definitions.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

/// Database connection pool type alias
pub type TestDbPool = SqlitePool;

/// Create a fresh in-memory SQLite pool with no schema.
///
/// ```ignore
/// let pool = leasehold_test_utils::open_test_db().await.unwrap();
/// ```
pub async fn open_test_db() -> Result<TestDbPool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1) // Single connection for in-memory to maintain state
        .connect_with(options)
        .await?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_test_db() {
        let pool = open_test_db().await.unwrap();

        let result: (i64,) = sqlx::query_as("SELECT 1 + 1")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(result.0, 2);
    }
}
