//! Usage metrics emitted as structured log events.

use recall_core::{MetricsSink, UsageEvent};

/// Writes every usage event to the `recall::metrics` tracing target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn record(&self, event: UsageEvent) {
        tracing::info!(
            target: "recall::metrics",
            query_id = %event.query_id,
            owner = %event.owner,
            lifecycle = ?event.lifecycle,
            rows = event.rows,
            at = %event.at.to_rfc3339(),
            "usage"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recall_core::Lifecycle;

    #[test]
    fn test_record_without_subscriber() {
        // No subscriber installed; recording must still be a no-op, not a panic.
        TracingMetricsSink.record(UsageEvent::new("q1", "alice", Lifecycle::Closed).with_rows(3));
    }
}
