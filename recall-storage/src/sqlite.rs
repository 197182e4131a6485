//! SQLite-backed relational store.
//!
//! A single connection behind a mutex. Statements are short, so the lock is
//! held per statement; a batch holds it for one transaction.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use recall_core::{RecallError, RecallResult, StoreError};
use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};
use rusqlite::{params_from_iter, Connection};

use crate::functions::register_mysql_functions;
use crate::{BatchOutcome, RelationalStore, ResultSet, SqlValue};

/// Error type for opening a SQLite store.
#[derive(Debug, thiserror::Error)]
pub enum SqliteStoreError {
    /// Failed to open the database.
    #[error("Failed to open SQLite database: {0}")]
    Open(String),

    /// Failed to register scalar functions on the connection.
    #[error("Failed to register SQL functions: {0}")]
    Functions(String),
}

/// Convert SqliteStoreError to RecallError.
impl From<SqliteStoreError> for RecallError {
    fn from(e: SqliteStoreError) -> Self {
        RecallError::Store(StoreError::ExecutionFailed {
            reason: e.to_string(),
        })
    }
}

/// Map a driver error into the store taxonomy.
pub(crate) fn classify(err: rusqlite::Error) -> StoreError {
    let msg = err.to_string();
    match msg.find("no such table: ") {
        Some(idx) => StoreError::TableMissing {
            table: msg[idx + "no such table: ".len()..].trim().to_string(),
        },
        None => StoreError::ExecutionFailed { reason: msg },
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Int(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            SqlValue::Real(f) => ToSqlOutput::Owned(Value::Real(*f)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            SqlValue::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

impl From<Value> for SqlValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => SqlValue::Null,
            Value::Integer(i) => SqlValue::Int(i),
            Value::Real(f) => SqlValue::Real(f),
            Value::Text(s) => SqlValue::Text(s),
            Value::Blob(b) => SqlValue::Blob(b),
        }
    }
}

/// SQLite relational store.
///
/// # Example
///
/// ```ignore
/// use recall_storage::{RelationalStore, SqliteStore};
///
/// let store = SqliteStore::open_in_memory()?;
/// store.execute("CREATE TABLE t (a TEXT)")?;
/// let count = store.query_scalar("SELECT count(*) FROM t", &[])?;
/// ```
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, SqliteStoreError> {
        let conn =
            Connection::open_in_memory().map_err(|e| SqliteStoreError::Open(e.to_string()))?;
        Self::from_connection(conn)
    }

    /// Open (or create) a database file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SqliteStoreError> {
        let conn = Connection::open(path).map_err(|e| SqliteStoreError::Open(e.to_string()))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, SqliteStoreError> {
        register_mysql_functions(&conn).map_err(|e| SqliteStoreError::Functions(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

impl RelationalStore for SqliteStore {
    fn execute(&self, sql: &str) -> RecallResult<()> {
        tracing::trace!(sql, "executing statement");
        let conn = self.lock()?;
        conn.execute_batch(sql).map_err(classify)?;
        Ok(())
    }

    fn execute_params(&self, sql: &str, params: &[SqlValue]) -> RecallResult<usize> {
        tracing::trace!(sql, params = params.len(), "executing statement");
        let conn = self.lock()?;
        let affected = conn
            .execute(sql, params_from_iter(params.iter()))
            .map_err(classify)?;
        Ok(affected)
    }

    fn execute_batch(&self, sql: &str, rows: &[Vec<SqlValue>]) -> RecallResult<BatchOutcome> {
        tracing::trace!(sql, rows = rows.len(), "executing batch");
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(classify)?;
        let mut outcome = BatchOutcome::default();
        {
            let mut stmt = tx.prepare(sql).map_err(classify)?;
            for row in rows {
                let result = stmt
                    .execute(params_from_iter(row.iter()))
                    .map(|_| ())
                    .map_err(classify);
                outcome.results.push(result);
            }
        }
        tx.commit().map_err(classify)?;
        Ok(outcome)
    }

    fn query(&self, sql: &str, params: &[SqlValue]) -> RecallResult<ResultSet> {
        tracing::trace!(sql, params = params.len(), "running query");
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql).map_err(classify)?;
        let columns: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(String::from)
            .collect();
        let width = columns.len();

        let mut result = ResultSet {
            columns,
            rows: Vec::new(),
        };
        let mut rows = stmt
            .query(params_from_iter(params.iter()))
            .map_err(classify)?;
        while let Some(row) = rows.next().map_err(classify)? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                let value: Value = row.get(i).map_err(classify)?;
                values.push(SqlValue::from(value));
            }
            result.rows.push(values);
        }
        Ok(result)
    }

    fn columns(&self, relation: &str) -> RecallResult<Vec<String>> {
        let result = self.query(
            "SELECT name FROM pragma_table_info(?1) ORDER BY cid",
            &[SqlValue::from(relation)],
        )?;
        if result.is_empty() {
            return Err(StoreError::TableMissing {
                table: relation.to_string(),
            }
            .into());
        }
        Ok(result
            .rows
            .into_iter()
            .filter_map(|row| row.into_iter().next().and_then(|v| v.as_text()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> SqliteStore {
        SqliteStore::open_in_memory().expect("in-memory store should open")
    }

    #[test]
    fn test_execute_and_query_round_trip() {
        let store = create_test_store();
        store
            .execute("CREATE TABLE t (`a.b` TEXT, n INTEGER)")
            .expect("create should succeed");
        store
            .execute_params(
                "INSERT INTO t VALUES (?1, ?2)",
                &[SqlValue::from("x"), SqlValue::Int(3)],
            )
            .expect("insert should succeed");

        let result = store
            .query("SELECT `a.b`, n FROM t", &[])
            .expect("query should succeed");
        assert_eq!(result.columns, vec!["a.b", "n"]);
        assert_eq!(result.rows, vec![vec![SqlValue::from("x"), SqlValue::Int(3)]]);
    }

    #[test]
    fn test_missing_table_is_classified() {
        let store = create_test_store();
        let err = store
            .query("SELECT * FROM tnothing", &[])
            .unwrap_err();
        assert!(err.is_table_missing());

        let err = store
            .execute_batch("INSERT INTO tnothing VALUES (?1)", &[vec![SqlValue::Null]])
            .unwrap_err();
        assert_eq!(
            err,
            RecallError::Store(StoreError::TableMissing {
                table: "tnothing".to_string()
            })
        );
    }

    #[test]
    fn test_batch_reports_each_row() {
        let store = create_test_store();
        store
            .execute("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT NOT NULL)")
            .expect("create should succeed");
        let rows = vec![
            vec![SqlValue::Int(1), SqlValue::from("a")],
            vec![SqlValue::Int(2), SqlValue::Null],
            vec![SqlValue::Int(3), SqlValue::from("c")],
        ];
        let outcome = store
            .execute_batch("INSERT INTO t VALUES (?1, ?2)", &rows)
            .expect("batch should run");
        assert_eq!(outcome.failed_indexes(), vec![1]);
        assert_eq!(
            store
                .query_scalar("SELECT count(*) FROM t", &[])
                .expect("count should succeed"),
            2
        );
    }

    #[test]
    fn test_columns_of_view() {
        let store = create_test_store();
        store
            .execute("CREATE TABLE t (field0 TEXT, field1 TEXT)")
            .expect("create should succeed");
        store
            .execute("CREATE VIEW v(`x.y`, z) AS SELECT field0, field1 FROM t")
            .expect("view should succeed");
        assert_eq!(
            store.columns("v").expect("columns should succeed"),
            vec!["x.y", "z"]
        );
        assert!(store.columns("vmissing").unwrap_err().is_table_missing());
    }

    #[test]
    fn test_file_backed_store_persists() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let path = temp_dir.path().join("cache.db");
        {
            let store = SqliteStore::open(&path).expect("store should open");
            store
                .execute("CREATE TABLE t (a TEXT); INSERT INTO t VALUES ('kept');")
                .expect("setup should succeed");
        }
        let store = SqliteStore::open(&path).expect("store should reopen");
        let result = store
            .query("SELECT a FROM t", &[])
            .expect("query should succeed");
        assert_eq!(result.rows[0][0], SqlValue::from("kept"));
    }
}
