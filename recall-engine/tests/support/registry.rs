//! Shared registry wiring for engine integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use recall_engine::LifecycleRegistry;
use recall_test_utils::{
    fixtures, JsonRowMapper, JsonRowReader, MockResultSource, RecallConfig, RecordingMetricsSink,
    RelationalStore,
};

pub struct TestHarness {
    pub registry: Arc<LifecycleRegistry>,
    pub source: Arc<MockResultSource>,
    pub metrics: Arc<RecordingMetricsSink>,
    pub store: Arc<dyn RelationalStore>,
}

/// Registry over an in-memory SQLite store.
pub fn harness(source: MockResultSource, config: RecallConfig) -> TestHarness {
    let store = fixtures::in_memory_store().expect("in-memory store should open");
    harness_with_store(source, config, Arc::new(store))
}

/// Registry over a caller-supplied store.
pub fn harness_with_store(
    source: MockResultSource,
    config: RecallConfig,
    store: Arc<dyn RelationalStore>,
) -> TestHarness {
    let source = Arc::new(source);
    let metrics = Arc::new(RecordingMetricsSink::new());
    let registry = LifecycleRegistry::builder()
        .with_config(config)
        .with_store(store.clone())
        .with_source(source.clone())
        .with_row_mapper(Arc::new(JsonRowMapper))
        .with_row_reader(Arc::new(JsonRowReader))
        .with_metrics(metrics.clone())
        .build()
        .expect("registry should build");
    TestHarness {
        registry: Arc::new(registry),
        source,
        metrics,
        store,
    }
}
