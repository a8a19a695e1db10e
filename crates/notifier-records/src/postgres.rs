//! Postgres record source.
//!
//! Reads `first_name`, `last_name` and `birth_date` from one table and
//! matches on the month and day of `birth_date`, ignoring the year.

use std::time::Duration;

use async_trait::async_trait;
use notifier_core::{QueryError, Record, RecordSource, validate_month_day};
use sqlx::{
    Row,
    postgres::{PgPool, PgPoolOptions},
};

/// Connections needed: one query per run.
const MAX_CONNECTIONS: u32 = 2;

/// Time to wait for a pooled connection.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Record source backed by a Postgres table.
pub struct PgRecordSource {
    pool: PgPool,
    table: String,
}

impl PgRecordSource {
    /// Connect to `database_url` and read records from `table`.
    ///
    /// # Errors
    /// Returns error if the table name is not a plain identifier or the
    /// database is unreachable.
    pub async fn connect(database_url: &str, table: impl Into<String>) -> Result<Self, QueryError> {
        let table = checked_table(table.into())?;
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(database_url)
            .await
            .map_err(|e| QueryError::Database(e.to_string()))?;
        tracing::debug!(table = %table, "Connected to record datastore");
        Ok(Self { pool, table })
    }

    /// Use an existing pool.
    ///
    /// # Errors
    /// Returns error if the table name is not a plain identifier.
    pub fn from_pool(pool: PgPool, table: impl Into<String>) -> Result<Self, QueryError> {
        Ok(Self {
            pool,
            table: checked_table(table.into())?,
        })
    }

    fn select_sql(&self) -> String {
        format!(
            "SELECT first_name, last_name FROM {} \
             WHERE EXTRACT(MONTH FROM birth_date)::int = $1 \
             AND EXTRACT(DAY FROM birth_date)::int = $2 \
             ORDER BY id",
            self.table
        )
    }
}

/// Table names are interpolated into SQL, so only `[A-Za-z0-9_]` segments
/// joined by at most one `.` (schema) are accepted.
fn checked_table(table: String) -> Result<String, QueryError> {
    let segments: Vec<&str> = table.split('.').collect();
    let valid = segments.len() <= 2
        && segments.iter().all(|s| {
            !s.is_empty()
                && !s.starts_with(|c: char| c.is_ascii_digit())
                && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        });
    if valid {
        Ok(table)
    } else {
        Err(QueryError::Database(format!("invalid table name: {table:?}")))
    }
}

#[async_trait]
impl RecordSource for PgRecordSource {
    async fn records_for_date(&self, month: u32, day: u32) -> Result<Vec<Record>, QueryError> {
        validate_month_day(month, day)?;
        let invalid = || QueryError::InvalidDate { month, day };
        let (m, d) = (
            i32::try_from(month).map_err(|_| invalid())?,
            i32::try_from(day).map_err(|_| invalid())?,
        );

        let sql = self.select_sql();
        let rows = sqlx::query(&sql)
            .bind(m)
            .bind(d)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| QueryError::Database(e.to_string()))?;

        rows.iter()
            .map(|row| {
                let first_name: String = row
                    .try_get("first_name")
                    .map_err(|e| QueryError::Decode(e.to_string()))?;
                let last_name: Option<String> = row
                    .try_get("last_name")
                    .map_err(|e| QueryError::Decode(e.to_string()))?;
                Ok(Record::new(first_name, last_name.unwrap_or_default()))
            })
            .collect()
    }

    async fn close(&self) -> Result<(), QueryError> {
        self.pool.close().await;
        tracing::debug!("Record datastore pool closed");
        Ok(())
    }
}
