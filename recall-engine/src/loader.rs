//! Batched insertion of cache rows into a slot table.

use std::collections::BTreeMap;

use recall_core::{
    is_fixed_column, CacheRow, RecallConfig, RecallError, RecallResult, StoreError,
    FIXED_COLUMNS,
};
use recall_storage::{RelationalStore, SqlValue};
use serde::{Deserialize, Serialize};

use crate::allocator::{slot_column, ColumnAllocator};

/// Marker appended to values cut at the effective maximum length.
pub const TRUNCATION_MARKER: &str = "<truncated>";

/// Totals reported at the end of a load.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LoadSummary {
    pub rows_written: u64,
    /// Rows abandoned after every insert attempt failed.
    pub rows_dropped: u64,
    /// Field names in slot order.
    pub slots: Vec<String>,
}

/// Cut `value` to `max_length` characters, appending the truncation marker.
pub fn truncate_value(value: &str, max_length: usize) -> String {
    match value.char_indices().nth(max_length) {
        Some((idx, _)) => format!("{}{}", &value[..idx], TRUNCATION_MARKER),
        None => value.to_string(),
    }
}

struct PendingRow {
    row: CacheRow,
    max_length: usize,
}

/// Streams cache rows into one table.
///
/// Rows are stamped with the load's owner, source id and logic name, queued,
/// and flushed every `rows_per_batch` rows. A row whose insert fails is
/// retried alone with its maximum value length halved each time, and dropped
/// once `max_insert_attempts` is spent. A missing table aborts the load.
pub struct BatchLoader<'a> {
    store: &'a dyn RelationalStore,
    table: String,
    owner: String,
    query_id: String,
    logic_name: String,
    allocator: ColumnAllocator,
    rows_per_batch: usize,
    max_value_length: usize,
    max_insert_attempts: u32,
    /// Effective length carried across rows; 0 until the first row.
    max_length: usize,
    pending: Vec<PendingRow>,
    summary: LoadSummary,
}

impl<'a> BatchLoader<'a> {
    pub fn new(
        store: &'a dyn RelationalStore,
        table: impl Into<String>,
        config: &RecallConfig,
    ) -> Self {
        Self {
            store,
            table: table.into(),
            owner: String::new(),
            query_id: String::new(),
            logic_name: String::new(),
            allocator: ColumnAllocator::new(config.slot_capacity),
            rows_per_batch: config.rows_per_batch.max(1),
            max_value_length: config.max_value_length,
            max_insert_attempts: config.max_insert_attempts.max(1),
            max_length: 0,
            pending: Vec::new(),
            summary: LoadSummary::default(),
        }
    }

    /// Values stamped into the fixed columns of every row.
    pub fn with_stamp(
        mut self,
        owner: impl Into<String>,
        query_id: impl Into<String>,
        logic_name: impl Into<String>,
    ) -> Self {
        self.owner = owner.into();
        self.query_id = query_id.into();
        self.logic_name = logic_name.into();
        self
    }

    pub fn allocator(&self) -> &ColumnAllocator {
        &self.allocator
    }

    /// Queue one row, flushing when a full batch is pending.
    pub fn load_row(&mut self, mut row: CacheRow) -> RecallResult<()> {
        row.user = self.owner.clone();
        row.query_id = self.query_id.clone();
        row.logic_name = self.logic_name.clone();

        for field in &row.fields {
            if is_fixed_column(&field.name) {
                tracing::debug!(field = %field.name, "skipping field shadowing a fixed column");
                continue;
            }
            self.allocator.allocate(&field.name)?;
        }

        let longest = row.longest_value();
        if self.max_length == 0 {
            self.max_length = longest + 1;
        } else if longest > self.max_length {
            self.max_length = longest;
        }
        self.max_length = self.max_length.min(self.max_value_length);

        self.pending.push(PendingRow {
            row,
            max_length: self.max_length,
        });
        if self.pending.len() >= self.rows_per_batch {
            self.flush()?;
        }
        Ok(())
    }

    /// Flush any remaining rows and report totals.
    pub fn finish(mut self) -> RecallResult<LoadSummary> {
        self.flush()?;
        let mut summary = self.summary;
        summary.slots = self.allocator.into_slots();
        Ok(summary)
    }

    fn insert_sql(&self) -> String {
        let mut columns: Vec<String> = FIXED_COLUMNS.iter().map(|c| c.to_string()).collect();
        columns.extend((0..self.allocator.len()).map(slot_column));
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table,
            columns.join(","),
            placeholders.join(",")
        )
    }

    fn params(&self, row: &CacheRow, max_length: usize) -> RecallResult<Vec<SqlValue>> {
        let json = |value: &BTreeMap<String, String>| {
            serde_json::to_string(value).map_err(|e| StoreError::Serialization {
                reason: e.to_string(),
            })
        };

        let mut column_markings = BTreeMap::new();
        let mut column_timestamps = BTreeMap::new();
        let mut slots = vec![SqlValue::Null; self.allocator.len()];
        for field in &row.fields {
            let slot = match self.allocator.slot(&field.name) {
                Some(slot) if !is_fixed_column(&field.name) => slot,
                _ => continue,
            };
            slots[slot] = SqlValue::Text(truncate_value(&field.value, max_length));
            if let Some(marking) = &field.marking {
                column_markings.insert(field.name.clone(), marking.clone());
            }
            if let Some(ts) = &field.timestamp {
                column_timestamps.insert(field.name.clone(), ts.to_rfc3339());
            }
        }

        let mut params = Vec::with_capacity(FIXED_COLUMNS.len() + slots.len());
        params.push(SqlValue::from(row.user.as_str()));
        params.push(SqlValue::from(row.query_id.as_str()));
        params.push(SqlValue::from(row.logic_name.as_str()));
        params.push(SqlValue::from(row.data_type.as_str()));
        params.push(SqlValue::from(row.event_id.as_str()));
        params.push(SqlValue::from(row.row.as_str()));
        params.push(SqlValue::from(row.column_family.as_str()));
        params.push(SqlValue::Text(json(&row.markings)?));
        params.push(SqlValue::Text(json(&column_markings)?));
        params.push(SqlValue::Text(json(&column_timestamps)?));
        params.extend(slots);
        Ok(params)
    }

    fn flush(&mut self) -> RecallResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let pending = std::mem::take(&mut self.pending);
        let sql = self.insert_sql();
        let batch = pending
            .iter()
            .map(|p| self.params(&p.row, p.max_length))
            .collect::<RecallResult<Vec<_>>>()?;

        let outcome = self.store.execute_batch(&sql, &batch)?;
        if let Some(missing) = outcome.results.iter().find_map(|r| match r {
            Err(e @ StoreError::TableMissing { .. }) => Some(e.clone()),
            _ => None,
        }) {
            return Err(missing.into());
        }

        let failed = outcome.failed_indexes();
        self.summary.rows_written += outcome.succeeded() as u64;
        if failed.is_empty() {
            tracing::debug!(table = %self.table, rows = batch.len(), "persisted batch");
            return Ok(());
        }

        tracing::warn!(
            table = %self.table,
            failed = failed.len(),
            total = batch.len(),
            indexes = ?failed,
            "batch failed to insert some rows"
        );
        for idx in failed {
            if let Some(p) = pending.get(idx) {
                self.retry_row(&sql, &p.row, p.max_length)?;
            }
        }
        Ok(())
    }

    /// Retry one row alone with a shrinking maximum length.
    fn retry_row(&mut self, sql: &str, row: &CacheRow, first_length: usize) -> RecallResult<()> {
        let mut max_length = first_length;
        let mut last_error: Option<StoreError> = None;

        // The batch insert counts as the first attempt.
        for attempt in 1..self.max_insert_attempts {
            max_length /= 2;
            let params = self.params(row, max_length)?;
            let outcome = self.store.execute_batch(sql, &[params])?;
            match outcome.results.into_iter().next() {
                Some(Ok(())) => {
                    tracing::debug!(event_id = %row.event_id, attempt, max_length, "row written after retry");
                    self.max_length = self.max_length.min(max_length.max(1));
                    self.summary.rows_written += 1;
                    return Ok(());
                }
                Some(Err(e @ StoreError::TableMissing { .. })) => {
                    return Err(RecallError::Store(e));
                }
                Some(Err(e)) => {
                    tracing::info!(event_id = %row.event_id, max_length, error = %e, "row insert failed, shrinking values");
                    last_error = Some(e);
                }
                None => {}
            }
        }

        tracing::error!(
            table = %self.table,
            event_id = %row.event_id,
            error = %last_error.map(|e| e.to_string()).unwrap_or_else(|| "unknown".to_string()),
            "dropping row after exhausting insert attempts"
        );
        self.summary.rows_dropped += 1;
        Ok(())
    }
}
