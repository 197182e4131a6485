//! RECALL Test Utilities
//!
//! Centralized test infrastructure for the RECALL workspace:
//! - Scripted result sources, row mappers and readers
//! - A recording metrics sink
//! - A relational store that rejects oversized values
//! - Proptest generators and fixtures for common scenarios

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

pub use recall_core::{
    CacheField, CacheRow, CacheStatus, CreateRequest, Lifecycle, MetricsSink, Projection,
    RecallConfig, RecallError, RecallResult, ResultSource, ResultStream, RowMapper, RowReader,
    StoreError, UpstreamError, UsageEvent,
};
pub use recall_storage::{BatchOutcome, RelationalStore, ResultSet, SqlValue, SqliteStore};

use serde_json::{Map, Value};

fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ============================================================================
// GATE
// ============================================================================

#[derive(Debug, Default)]
struct GateState {
    open: bool,
    arrived: usize,
}

/// Blocks a stream mid-load until the test opens it.
#[derive(Debug, Default)]
pub struct Gate {
    state: Mutex<GateState>,
    cond: Condvar,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Called by the stream; blocks until [`open`](Self::open).
    pub fn wait(&self) {
        let mut state = relock(&self.state);
        state.arrived += 1;
        self.cond.notify_all();
        while !state.open {
            state = self.cond.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Block until a stream has reached the gate.
    pub fn wait_for_arrival(&self) {
        let mut state = relock(&self.state);
        while state.arrived == 0 {
            state = self.cond.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }

    pub fn open(&self) {
        relock(&self.state).open = true;
        self.cond.notify_all();
    }
}

// ============================================================================
// SCRIPTED RESULT SOURCE
// ============================================================================

/// Pages one source id will produce, plus injected behavior.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSource {
    pub logic_name: String,
    pub pages: Vec<Vec<Value>>,
    /// Zero-based page index whose fetch fails.
    pub fail_at_page: Option<usize>,
    /// Block before fetching this page index.
    pub gate: Option<(usize, Arc<Gate>)>,
    /// Only this owner may open the source.
    pub owner: Option<String>,
}

impl ScriptedSource {
    pub fn new(pages: Vec<Vec<Value>>) -> Self {
        Self {
            logic_name: "EventQuery".to_string(),
            pages,
            ..Self::default()
        }
    }

    pub fn with_logic_name(mut self, name: impl Into<String>) -> Self {
        self.logic_name = name.into();
        self
    }

    pub fn failing_at(mut self, page: usize) -> Self {
        self.fail_at_page = Some(page);
        self
    }

    pub fn gated_before(mut self, page: usize, gate: Arc<Gate>) -> Self {
        self.gate = Some((page, gate));
        self
    }

    pub fn owned_by(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }
}

/// In-memory result source serving scripted pages by source id.
#[derive(Debug, Default)]
pub struct MockResultSource {
    sources: Mutex<HashMap<String, ScriptedSource>>,
    released: Mutex<Vec<String>>,
    opened: AtomicUsize,
}

impl MockResultSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(self, source_id: impl Into<String>, source: ScriptedSource) -> Self {
        relock(&self.sources).insert(source_id.into(), source);
        self
    }

    /// Source ids released through `cancel`, in call order.
    pub fn released(&self) -> Vec<String> {
        relock(&self.released).clone()
    }

    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl ResultSource for MockResultSource {
    fn open(&self, source_id: &str, owner: &str) -> RecallResult<Box<dyn ResultStream>> {
        let source = relock(&self.sources).get(source_id).cloned().ok_or_else(|| {
            UpstreamError::OpenFailed {
                source_id: source_id.to_string(),
                reason: "unknown query".to_string(),
            }
        })?;
        if let Some(expected) = &source.owner {
            if expected != owner {
                return Err(UpstreamError::OpenFailed {
                    source_id: source_id.to_string(),
                    reason: format!("{} may not read this query", owner),
                }
                .into());
            }
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockResultStream {
            source_id: source_id.to_string(),
            logic_name: source.logic_name,
            pages: source.pages.into_iter().collect(),
            index: 0,
            fail_at_page: source.fail_at_page,
            gate: source.gate,
            closed: false,
        }))
    }

    fn release(&self, source_id: &str) {
        relock(&self.released).push(source_id.to_string());
    }
}

struct MockResultStream {
    source_id: String,
    logic_name: String,
    pages: VecDeque<Vec<Value>>,
    index: usize,
    fail_at_page: Option<usize>,
    gate: Option<(usize, Arc<Gate>)>,
    closed: bool,
}

impl ResultStream for MockResultStream {
    fn logic_name(&self) -> &str {
        &self.logic_name
    }

    fn next_page(&mut self) -> RecallResult<Vec<Value>> {
        if let Some((page, gate)) = &self.gate {
            if *page == self.index {
                gate.wait();
            }
        }
        if self.fail_at_page == Some(self.index) {
            return Err(UpstreamError::FetchFailed {
                source_id: self.source_id.clone(),
                reason: format!("page {} unavailable", self.index),
            }
            .into());
        }
        self.index += 1;
        if self.closed {
            return Ok(Vec::new());
        }
        Ok(self.pages.pop_front().unwrap_or_default())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

// ============================================================================
// ROW CONVERSION
// ============================================================================

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Maps JSON objects to single cache rows.
///
/// `id` becomes the event id and `dataType` the data type. Fields come from a
/// `fields` array of `[name, value]` pairs, in order, when present, and from
/// the remaining object keys otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRowMapper;

impl RowMapper for JsonRowMapper {
    fn write_to_cache(&self, result: &Value) -> RecallResult<Vec<CacheRow>> {
        let object = result.as_object().ok_or_else(|| UpstreamError::MappingFailed {
            reason: format!("expected object, got {}", result),
        })?;
        let event_id = object.get("id").map(render).unwrap_or_default();
        let data_type = object
            .get("dataType")
            .map(render)
            .unwrap_or_else(|| "event".to_string());
        let mut row = CacheRow::new(data_type, event_id);

        match object.get("fields").and_then(Value::as_array) {
            Some(pairs) => {
                for pair in pairs {
                    if let [name, value] = pair.as_array().map(Vec::as_slice).unwrap_or_default() {
                        row = row.with_field(render(name), render(value));
                    }
                }
            }
            None => {
                for (name, value) in object {
                    if name != "id" && name != "dataType" {
                        row = row.with_field(name.clone(), render(value));
                    }
                }
            }
        }
        Ok(vec![row])
    }
}

/// Reads cache rows back as flat JSON objects.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRowReader;

impl RowReader for JsonRowReader {
    fn read_from_cache(&self, rows: Vec<CacheRow>) -> RecallResult<Vec<Value>> {
        Ok(rows
            .into_iter()
            .map(|row| {
                let mut object = Map::new();
                object.insert("id".to_string(), Value::String(row.event_id));
                object.insert("dataType".to_string(), Value::String(row.data_type));
                for field in row.fields {
                    object.insert(field.name, Value::String(field.value));
                }
                Value::Object(object)
            })
            .collect())
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Metrics sink that keeps every event for inspection.
#[derive(Debug, Default)]
pub struct RecordingMetricsSink {
    events: Mutex<Vec<UsageEvent>>,
}

impl RecordingMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<UsageEvent> {
        relock(&self.events).clone()
    }

    pub fn count(&self, lifecycle: Lifecycle) -> usize {
        relock(&self.events)
            .iter()
            .filter(|e| e.lifecycle == lifecycle)
            .count()
    }
}

impl MetricsSink for RecordingMetricsSink {
    fn record(&self, event: UsageEvent) {
        relock(&self.events).push(event);
    }
}

// ============================================================================
// FLAKY STORE
// ============================================================================

/// SQLite store whose batch inserts reject rows carrying long text values.
///
/// It can also fail a number of writes to the durable record table.
pub struct FlakyStore {
    inner: SqliteStore,
    max_value_chars: usize,
    rejected: AtomicUsize,
    record_write_failures: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: SqliteStore, max_value_chars: usize) -> Self {
        Self {
            inner,
            max_value_chars,
            rejected: AtomicUsize::new(0),
            record_write_failures: AtomicUsize::new(0),
        }
    }

    /// Fail the next `count` inserts into `cachedResultsQuery`.
    pub fn failing_record_writes(self, count: usize) -> Self {
        self.record_write_failures.store(count, Ordering::SeqCst);
        self
    }

    fn take_record_failure(&self, sql: &str) -> bool {
        sql.starts_with("INSERT INTO cachedResultsQuery")
            && self
                .record_write_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
    }

    /// Rows rejected so far.
    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }

    fn too_long(&self, row: &[SqlValue]) -> bool {
        row.iter().any(|v| match v {
            SqlValue::Text(s) => s.chars().count() > self.max_value_chars,
            _ => false,
        })
    }
}

impl RelationalStore for FlakyStore {
    fn execute(&self, sql: &str) -> RecallResult<()> {
        self.inner.execute(sql)
    }

    fn execute_params(&self, sql: &str, params: &[SqlValue]) -> RecallResult<usize> {
        if self.take_record_failure(sql) {
            return Err(StoreError::ExecutionFailed {
                reason: "record table unavailable".to_string(),
            }
            .into());
        }
        self.inner.execute_params(sql, params)
    }

    fn execute_batch(&self, sql: &str, rows: &[Vec<SqlValue>]) -> RecallResult<BatchOutcome> {
        let accepted: Vec<Vec<SqlValue>> = rows
            .iter()
            .filter(|row| !self.too_long(row))
            .cloned()
            .collect();
        let mut inner_results = self.inner.execute_batch(sql, &accepted)?.results.into_iter();

        let mut outcome = BatchOutcome::default();
        for row in rows {
            if self.too_long(row) {
                self.rejected.fetch_add(1, Ordering::SeqCst);
                outcome.results.push(Err(StoreError::ExecutionFailed {
                    reason: format!("value exceeds {} characters", self.max_value_chars),
                }));
            } else {
                outcome
                    .results
                    .push(inner_results.next().unwrap_or(Ok(())));
            }
        }
        Ok(outcome)
    }

    fn query(&self, sql: &str, params: &[SqlValue]) -> RecallResult<ResultSet> {
        self.inner.query(sql, params)
    }

    fn columns(&self, relation: &str) -> RecallResult<Vec<String>> {
        self.inner.columns(relation)
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for RECALL inputs.

    use super::*;
    use proptest::prelude::*;

    /// Plain field name, never shadowing a fixed column.
    pub fn arb_field_name() -> impl Strategy<Value = String> {
        "[A-Z][A-Z0-9_]{0,11}"
    }

    /// Printable field value, possibly containing quotes.
    pub fn arb_field_value() -> impl Strategy<Value = String> {
        "[ -~]{0,40}"
    }

    /// One result object in the `fields` pair form.
    pub fn arb_result(id: usize) -> impl Strategy<Value = Value> {
        prop::collection::vec((arb_field_name(), arb_field_value()), 0..6).prop_map(
            move |pairs| {
                let fields: Vec<Value> = pairs
                    .into_iter()
                    .map(|(n, v)| Value::Array(vec![Value::String(n), Value::String(v)]))
                    .collect();
                serde_json::json!({ "id": format!("e{}", id), "fields": fields })
            },
        )
    }

    /// Page size within the default configuration's bounds.
    pub fn arb_page_size() -> impl Strategy<Value = i64> {
        1i64..=25
    }

    pub fn arb_cache_status() -> impl Strategy<Value = CacheStatus> {
        prop_oneof![
            Just(CacheStatus::Loading),
            Just(CacheStatus::Loaded),
            Just(CacheStatus::Creating),
            Just(CacheStatus::Available),
            Just(CacheStatus::Canceled),
            Just(CacheStatus::Error),
        ]
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common scenarios.

    use super::*;
    use serde_json::json;

    /// Configuration with small pages and batches so paging paths get exercised.
    pub fn small_config() -> RecallConfig {
        RecallConfig::default()
            .with_default_page_size(10)
            .with_rows_per_batch(4)
            .with_collect_metrics(true)
    }

    /// `count` results, each with fields `A` and `B` and ids `e0..`.
    pub fn simple_results(count: usize) -> Vec<Value> {
        (0..count)
            .map(|i| json!({ "id": format!("e{}", i), "A": format!("a{}", i), "B": format!("{}", i % 3) }))
            .collect()
    }

    /// Split results into pages of `page_len`.
    pub fn paged(results: Vec<Value>, page_len: usize) -> Vec<Vec<Value>> {
        results
            .chunks(page_len.max(1))
            .map(|chunk| chunk.to_vec())
            .collect()
    }

    /// Result object with fields in the given order.
    pub fn ordered_result(id: &str, fields: &[(&str, &str)]) -> Value {
        let pairs: Vec<Value> = fields.iter().map(|(n, v)| json!([n, v])).collect();
        json!({ "id": id, "fields": pairs })
    }

    pub fn in_memory_store() -> RecallResult<SqliteStore> {
        Ok(SqliteStore::open_in_memory()?)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_mapper_preserves_pair_order() {
        let result = fixtures::ordered_result("e1", &[("Z", "1"), ("A", "2")]);
        let rows = JsonRowMapper.write_to_cache(&result).expect("mapping should succeed");
        let names: Vec<&str> = rows[0].fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["Z", "A"]);
        assert_eq!(rows[0].event_id, "e1");
    }

    #[test]
    fn test_mapper_rejects_non_objects() {
        assert!(JsonRowMapper.write_to_cache(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_scripted_source_fails_at_page() {
        let source = MockResultSource::new().with_source(
            "q",
            ScriptedSource::new(fixtures::paged(fixtures::simple_results(4), 2)).failing_at(1),
        );
        let mut stream = source.open("q", "alice").expect("open should succeed");
        assert_eq!(stream.next_page().expect("first page").len(), 2);
        assert!(matches!(stream.next_page(), Err(RecallError::Upstream(_))));
    }

    #[test]
    fn test_scripted_source_checks_owner() {
        let source = MockResultSource::new()
            .with_source("q", ScriptedSource::new(vec![]).owned_by("alice"));
        assert!(source.open("q", "bob").is_err());
        assert!(source.open("missing", "alice").is_err());
        assert_eq!(source.open_count(), 0);
    }

    #[test]
    fn test_flaky_store_rejects_long_rows() {
        let store = FlakyStore::new(
            fixtures::in_memory_store().expect("store should open"),
            5,
        );
        store
            .execute("CREATE TABLE t (v TEXT)")
            .expect("create should succeed");
        let outcome = store
            .execute_batch(
                "INSERT INTO t (v) VALUES (?1)",
                &[
                    vec![SqlValue::from("short")],
                    vec![SqlValue::from("much too long")],
                ],
            )
            .expect("batch should run");
        assert_eq!(outcome.failed_indexes(), vec![1]);
        assert_eq!(store.rejected(), 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_generated_results_map_to_one_row(result in generators::arb_result(7)) {
            let rows = JsonRowMapper.write_to_cache(&result).expect("mapping should succeed");
            prop_assert_eq!(rows.len(), 1);
            prop_assert_eq!(rows[0].event_id.as_str(), "e7");
        }
    }
}
