//! Collaborator traits the engine is wired with.
//!
//! The upstream query engine, its row mapping, and the read-back conversion
//! are supplied by the host. The engine only sees these seams.

use crate::{CacheRow, RecallResult};
use serde_json::Value;

// ============================================================================
// UPSTREAM RESULT SOURCE
// ============================================================================

/// Opens result streams for previously executed queries.
///
/// # Implementation Requirements
///
/// - `open` must fail with `UpstreamError::OpenFailed` (or `NotFound`) when the
///   source query is unknown to the caller
/// - `release` may be called from a different thread than the one draining the
///   stream, and must be safe to call for ids that are not open
pub trait ResultSource: Send + Sync {
    /// Open a paged stream over the results of `source_id`, run as `owner`.
    fn open(&self, source_id: &str, owner: &str) -> RecallResult<Box<dyn ResultStream>>;

    /// Release upstream resources held for `source_id` ahead of normal close.
    fn release(&self, _source_id: &str) {}
}

/// A paged stream of opaque result objects.
pub trait ResultStream: Send {
    /// Logic name of the query that produced this stream.
    fn logic_name(&self) -> &str;

    /// Fetch the next page. An empty page means the stream is exhausted.
    fn next_page(&mut self) -> RecallResult<Vec<Value>>;

    /// Close the stream. Must be idempotent.
    fn close(&mut self);
}

// ============================================================================
// ROW CONVERSION
// ============================================================================

/// Converts upstream result objects into cache rows.
pub trait RowMapper: Send + Sync {
    /// Map one result object into zero or more cache rows.
    fn write_to_cache(&self, result: &Value) -> RecallResult<Vec<CacheRow>>;
}

/// Converts rows read back from a cached view into caller-facing results.
///
/// Rows carry the fixed columns plus every non-null projected column as a
/// field, so aggregate aliases such as `COUNT(*) AS total` arrive as fields.
pub trait RowReader: Send + Sync {
    fn read_from_cache(&self, rows: Vec<CacheRow>) -> RecallResult<Vec<Value>>;
}
