//! Isolated SQL execution for sql exercises.
//!
//! Every grading call gets its own in-memory SQLite database over a single
//! connection: schema and fixtures are applied, the learner query runs
//! under a statement timeout, and the database dies with the call. Nothing
//! a submission executes can reach shared state.

use std::time::Duration;

use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Executor, Row, SqlitePool};
use tokio::time::timeout;
use tracing::debug;

use crate::error::EngineError;

pub struct SqlSandbox {
    pool: SqlitePool,
}

/// Columns and stringified rows of one query, ready for structural
/// comparison.
#[derive(Debug, Clone, Default)]
pub struct SqlResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl SqlSandbox {
    pub async fn create() -> Result<Self, EngineError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(sanitize_sql_error)?;
        debug!("sql sandbox created");
        Ok(Self { pool })
    }

    /// Run a batch of setup statements (schema, fixtures).
    pub async fn batch(&self, sql: &str) -> Result<(), EngineError> {
        sqlx::raw_sql(sql)
            .execute(&self.pool)
            .await
            .map_err(sanitize_sql_error)?;
        Ok(())
    }

    /// Run one learner query under a statement timeout and collect its
    /// result set.
    pub async fn query(&self, sql: &str, limit: Duration) -> Result<SqlResultSet, EngineError> {
        let rows = timeout(limit, sqlx::query(sql).fetch_all(&self.pool))
            .await
            .map_err(|_| EngineError::ExecutionTimeout(limit))?
            .map_err(sanitize_sql_error)?;

        let columns = match rows.first() {
            Some(row) => row
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
            // No rows came back; the prepared statement still knows its
            // column list.
            None => self.describe_columns(sql).await?,
        };

        let rows = rows
            .iter()
            .map(|row| {
                (0..row.columns().len())
                    .map(|idx| cell_text(row, idx))
                    .collect()
            })
            .collect();

        Ok(SqlResultSet { columns, rows })
    }

    async fn describe_columns(&self, sql: &str) -> Result<Vec<String>, EngineError> {
        let description = (&self.pool)
            .describe(sql)
            .await
            .map_err(sanitize_sql_error)?;
        Ok(description
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect())
    }
}

/// SQLite stores values dynamically, so decode by probing the common
/// types; anything else is reported opaquely.
fn cell_text(row: &SqliteRow, idx: usize) -> String {
    if let Ok(value) = row.try_get::<Option<i64>, _>(idx) {
        return value.map_or_else(|| "NULL".to_string(), |v| v.to_string());
    }
    if let Ok(value) = row.try_get::<Option<f64>, _>(idx) {
        return value.map_or_else(|| "NULL".to_string(), |v| v.to_string());
    }
    if let Ok(value) = row.try_get::<Option<String>, _>(idx) {
        return value.unwrap_or_else(|| "NULL".to_string());
    }
    if let Ok(value) = row.try_get::<Option<Vec<u8>>, _>(idx) {
        return value.map_or_else(|| "NULL".to_string(), |_| "<blob>".to_string());
    }
    "NULL".to_string()
}

/// Render a result set as the pipe table shown in ungraded query echoes.
pub fn render_table(result: &SqlResultSet) -> String {
    if result.columns.is_empty() {
        return "No results".to_string();
    }
    let header = format!("| {} |", result.columns.join(" | "));
    let separator = format!("+{}+", "-".repeat(header.len().saturating_sub(2)));
    let mut lines = vec![separator.clone(), header, separator.clone()];
    for row in &result.rows {
        lines.push(format!("| {} |", row.join(" | ")));
    }
    lines.push(separator);
    lines.push(format!("\n({} rows)", result.rows.len()));
    lines.join("\n")
}

/// Keep the database engine's message, drop driver class names and
/// internals; the text may travel into a case report.
fn sanitize_sql_error(err: sqlx::Error) -> EngineError {
    let message = match &err {
        sqlx::Error::Database(db) => db.message().to_string(),
        sqlx::Error::RowNotFound => "query returned no rows".to_string(),
        _ => "query failed".to_string(),
    };
    EngineError::Comparison(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded_sandbox() -> SqlSandbox {
        let sandbox = SqlSandbox::create().await.unwrap();
        sandbox
            .batch(
                "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);\n\
                 INSERT INTO users (id, name) VALUES (1, 'a'), (2, 'b');",
            )
            .await
            .unwrap();
        sandbox
    }

    #[tokio::test]
    async fn query_returns_columns_and_rows() {
        let sandbox = seeded_sandbox().await;
        let result = sandbox
            .query("SELECT id, name FROM users ORDER BY id", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result.columns, vec!["id", "name"]);
        assert_eq!(
            result.rows,
            vec![
                vec!["1".to_string(), "a".to_string()],
                vec!["2".to_string(), "b".to_string()],
            ]
        );
    }

    #[tokio::test]
    async fn empty_result_still_reports_columns() {
        let sandbox = seeded_sandbox().await;
        let result = sandbox
            .query("SELECT id, name FROM users WHERE id > 99", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result.columns, vec!["id", "name"]);
        assert!(result.rows.is_empty());
    }

    #[tokio::test]
    async fn null_cells_decode_as_null_marker() {
        let sandbox = SqlSandbox::create().await.unwrap();
        sandbox
            .batch("CREATE TABLE t (v TEXT); INSERT INTO t (v) VALUES (NULL);")
            .await
            .unwrap();
        let result = sandbox
            .query("SELECT v FROM t", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result.rows, vec![vec!["NULL".to_string()]]);
    }

    #[tokio::test]
    async fn malformed_queries_surface_sanitized_errors() {
        let sandbox = seeded_sandbox().await;
        let err = sandbox
            .query("SELEC id FROM users", Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            EngineError::Comparison(message) => {
                assert!(!message.contains("sqlx"), "driver internals leaked: {message}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn state_persists_within_one_sandbox() {
        let sandbox = seeded_sandbox().await;
        sandbox
            .batch("INSERT INTO users (id, name) VALUES (3, 'c');")
            .await
            .unwrap();
        let result = sandbox
            .query("SELECT COUNT(*) AS n FROM users", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result.rows, vec![vec!["3".to_string()]]);
    }

    #[test]
    fn render_table_shows_columns_rows_and_count() {
        let result = SqlResultSet {
            columns: vec!["id".to_string(), "name".to_string()],
            rows: vec![vec!["1".to_string(), "a".to_string()]],
        };
        let table = render_table(&result);
        assert!(table.contains("| id | name |"));
        assert!(table.contains("| 1 | a |"));
        assert!(table.contains("(1 rows)"));
        assert_eq!(
            render_table(&SqlResultSet::default()),
            "No results"
        );
    }

    #[tokio::test]
    async fn sandboxes_are_isolated_from_each_other() {
        let first = seeded_sandbox().await;
        let second = SqlSandbox::create().await.unwrap();
        let err = second
            .query("SELECT * FROM users", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Comparison(_)));
        drop(first);
    }
}
