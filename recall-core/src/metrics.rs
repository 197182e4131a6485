//! Usage metric events.

use crate::Timestamp;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Lifecycle stage reported with a usage event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lifecycle {
    Loaded,
    Initialized,
    Results,
    Canceled,
    Closed,
}

/// One usage event for a cached query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub query_id: String,
    pub owner: String,
    pub lifecycle: Lifecycle,
    /// Rows returned or written by the operation, where meaningful.
    pub rows: u64,
    pub at: Timestamp,
}

impl UsageEvent {
    pub fn new(query_id: impl Into<String>, owner: impl Into<String>, lifecycle: Lifecycle) -> Self {
        Self {
            query_id: query_id.into(),
            owner: owner.into(),
            lifecycle,
            rows: 0,
            at: Utc::now(),
        }
    }

    pub fn with_rows(mut self, rows: u64) -> Self {
        self.rows = rows;
        self
    }
}

/// Receives usage events. Implementations must not block for long.
pub trait MetricsSink: Send + Sync {
    fn record(&self, event: UsageEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn record(&self, _event: UsageEvent) {}
}
