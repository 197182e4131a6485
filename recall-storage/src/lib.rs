//! RECALL Storage - Relational Store Trait and Backends
//!
//! Defines the relational abstraction the engine loads into and queries,
//! plus the durable record store, the fast keyed store, and archive recovery.
//! The bundled backend is SQLite via rusqlite.

pub mod archive;
pub mod functions;
pub mod keyed;
pub mod record;
pub mod sqlite;

pub use archive::{ArchiveStore, FsArchiveStore};
pub use keyed::KeyedStore;
pub use record::QueryRecordStore;
pub use sqlite::{SqliteStore, SqliteStoreError};

use recall_core::{RecallResult, StoreError};
use std::fmt;

// ============================================================================
// VALUES AND RESULT SETS
// ============================================================================

/// A single SQL value, independent of the backend driver.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Render the value as text. NULL and blobs yield `None`.
    pub fn as_text(&self) -> Option<String> {
        match self {
            SqlValue::Null | SqlValue::Blob(_) => None,
            SqlValue::Int(i) => Some(i.to_string()),
            SqlValue::Real(f) => Some(f.to_string()),
            SqlValue::Text(s) => Some(s.clone()),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Int(i) => Some(*i),
            SqlValue::Real(f) => Some(*f as i64),
            SqlValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Text(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        SqlValue::Text(s)
    }
}

impl From<i64> for SqlValue {
    fn from(i: i64) -> Self {
        SqlValue::Int(i)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(SqlValue::Null, Into::into)
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Blob(b) => write!(f, "<{} bytes>", b.len()),
            other => write!(f, "{}", other.as_text().unwrap_or_default()),
        }
    }
}

/// Rows returned by a query, with their column labels.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl ResultSet {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Index of a column label.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// Per-statement results of a batch execution, in submission order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchOutcome {
    pub results: Vec<Result<(), StoreError>>,
}

impl BatchOutcome {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_ok()).count()
    }

    /// Indexes of the statements that failed.
    pub fn failed_indexes(&self) -> Vec<usize> {
        self.results
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.as_ref().err().map(|_| i))
            .collect()
    }

    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(Result::is_ok)
    }
}

// ============================================================================
// RELATIONAL STORE TRAIT
// ============================================================================

/// Relational store the cache tables, views, and records live in.
///
/// # Implementation Requirements
///
/// - Backtick-quoted identifiers must be accepted
/// - `CREATE VIEW name(col, ...) AS SELECT ...` must be supported
/// - A statement against a relation that does not exist must fail with
///   `StoreError::TableMissing`
/// - `execute_batch` must report each row's outcome separately and must not
///   abandon the remaining rows when one fails
pub trait RelationalStore: Send + Sync {
    // === Statement Operations ===

    /// Execute a statement that takes no parameters, such as DDL.
    fn execute(&self, sql: &str) -> RecallResult<()>;

    /// Execute a parameterized statement, returning the affected row count.
    fn execute_params(&self, sql: &str, params: &[SqlValue]) -> RecallResult<usize>;

    /// Execute one parameterized statement once per parameter row.
    ///
    /// Fails outright only if the statement cannot be prepared.
    fn execute_batch(&self, sql: &str, rows: &[Vec<SqlValue>]) -> RecallResult<BatchOutcome>;

    // === Query Operations ===

    /// Run a parameterized query and materialize every row.
    fn query(&self, sql: &str, params: &[SqlValue]) -> RecallResult<ResultSet>;

    /// Run a query whose first column of the first row is an integer.
    fn query_scalar(&self, sql: &str, params: &[SqlValue]) -> RecallResult<i64> {
        let result = self.query(sql, params)?;
        result
            .rows
            .first()
            .and_then(|row| row.first())
            .and_then(SqlValue::as_i64)
            .ok_or_else(|| {
                StoreError::ExecutionFailed {
                    reason: format!("query returned no scalar: {}", sql),
                }
                .into()
            })
    }

    // === Schema Operations ===

    /// Column names of a table or view, in declaration order.
    fn columns(&self, relation: &str) -> RecallResult<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_value_text_rendering() {
        assert_eq!(SqlValue::Int(42).as_text().as_deref(), Some("42"));
        assert_eq!(SqlValue::Null.as_text(), None);
        assert_eq!(SqlValue::from(None::<String>), SqlValue::Null);
        assert_eq!(SqlValue::from(Some("x")), SqlValue::Text("x".to_string()));
        assert_eq!(SqlValue::Text(" 7 ".to_string()).as_i64(), Some(7));
    }

    #[test]
    fn test_batch_outcome_failed_indexes() {
        let outcome = BatchOutcome {
            results: vec![
                Ok(()),
                Err(StoreError::ExecutionFailed {
                    reason: "x".to_string(),
                }),
                Ok(()),
                Err(StoreError::LockPoisoned),
            ],
        };
        assert_eq!(outcome.failed_indexes(), vec![1, 3]);
        assert_eq!(outcome.succeeded(), 2);
        assert!(!outcome.all_succeeded());
    }
}
