//! Bidirectional paging and absolute row access over a translated query.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use recall_core::{
    is_fixed_column, CacheField, CacheRow, PagePosition, PageStatus, RecallResult, RowReader,
    Timestamp, ValidationError,
};
use recall_storage::{RelationalStore, ResultSet, SqlValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::translator::with_default_order;

// ============================================================================
// PAGE RESULTS
// ============================================================================

/// One page of caller-facing results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub results: Vec<Value>,
    /// `Partial` when the byte cap cut the page short.
    pub status: PageStatus,
    /// 1-based page number; 0 for absolute row fetches.
    pub page_number: i64,
}

/// Result of a paging call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PageOutcome {
    Rows(Page),
    /// The cursor is at a boundary or the range is past the end.
    Empty,
}

impl PageOutcome {
    /// Number of results carried; 0 for `Empty`.
    pub fn len(&self) -> usize {
        match self {
            PageOutcome::Rows(page) => page.results.len(),
            PageOutcome::Empty => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_page(self) -> Option<Page> {
        match self {
            PageOutcome::Rows(page) => Some(page),
            PageOutcome::Empty => None,
        }
    }
}

// ============================================================================
// ROW CONVERSION
// ============================================================================

fn parse_map(value: Option<&SqlValue>) -> BTreeMap<String, String> {
    value
        .and_then(SqlValue::as_text)
        .and_then(|text| serde_json::from_str(&text).ok())
        .unwrap_or_default()
}

/// Rebuild a cache row from one result-set row.
///
/// Fixed columns fill the row header; every other non-null column becomes a
/// field. Fixed columns listed in `fixed_fields_in_event` also surface as fields.
pub fn cache_row_from(
    columns: &[String],
    values: Vec<SqlValue>,
    fixed_fields_in_event: &[String],
) -> CacheRow {
    let by_name: BTreeMap<&str, &SqlValue> = columns
        .iter()
        .map(String::as_str)
        .zip(values.iter())
        .collect();
    let text = |name: &str| {
        by_name
            .get(name)
            .and_then(|v| v.as_text())
            .unwrap_or_default()
    };

    let column_markings = parse_map(by_name.get("_column_markings_").copied());
    let column_timestamps = parse_map(by_name.get("_column_timestamps_").copied());

    let mut row = CacheRow {
        user: text("_user_"),
        query_id: text("_queryId_"),
        logic_name: text("_logicName_"),
        data_type: text("_datatype_"),
        event_id: text("_eventId_"),
        row: text("_row_"),
        column_family: text("_colf_"),
        markings: parse_map(by_name.get("_markings_").copied()),
        fields: Vec::new(),
    };

    for (name, value) in columns.iter().zip(values.iter()) {
        let surfaced = !is_fixed_column(name) || fixed_fields_in_event.contains(name);
        if !surfaced {
            continue;
        }
        let value = match value.as_text() {
            Some(v) => v,
            None => continue,
        };
        let timestamp: Option<Timestamp> = column_timestamps
            .get(name)
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc));
        row.set_field(CacheField {
            name: name.clone(),
            value,
            marking: column_markings.get(name).cloned(),
            timestamp,
        });
    }
    row
}

// ============================================================================
// CURSOR
// ============================================================================

/// Paging state over one translated query.
///
/// Forward and backward pages are `LIMIT`/`OFFSET` windows over the query with
/// a stable order; absolute fetches do not move the cursor.
pub struct PagedCursor {
    store: Arc<dyn RelationalStore>,
    reader: Arc<dyn RowReader>,
    sql: String,
    ordered_sql: String,
    configured_page_size: i64,
    page_size: i64,
    total_rows: i64,
    position: PagePosition,
    last_page_number: i64,
    fixed_fields_in_event: Vec<String>,
}

impl std::fmt::Debug for PagedCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagedCursor")
            .field("sql", &self.sql)
            .field("page_size", &self.page_size)
            .field("total_rows", &self.total_rows)
            .field("position", &self.position)
            .field("last_page_number", &self.last_page_number)
            .finish()
    }
}

impl PagedCursor {
    /// Count the query's rows and position the cursor before the first page.
    pub fn initialize(
        store: Arc<dyn RelationalStore>,
        reader: Arc<dyn RowReader>,
        sql: impl Into<String>,
        page_size: i64,
    ) -> RecallResult<Self> {
        let sql = sql.into();
        if page_size <= 0 {
            return Err(ValidationError::InvalidValue {
                field: "page_size".to_string(),
                reason: format!("must be positive, got {}", page_size),
            }
            .into());
        }
        let total_rows =
            store.query_scalar(&format!("SELECT count(*) FROM ({}) AS CNT", sql), &[])?;
        tracing::debug!(total_rows, page_size, "initialized cursor");

        Ok(Self {
            ordered_sql: with_default_order(&sql),
            sql,
            store,
            reader,
            configured_page_size: page_size,
            page_size: page_size.min(total_rows),
            total_rows,
            position: PagePosition::BeforeFirst,
            last_page_number: 0,
            fixed_fields_in_event: Vec::new(),
        })
    }

    pub fn with_fixed_fields(mut self, fields: Vec<String>) -> Self {
        self.fixed_fields_in_event = fields;
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn total_rows(&self) -> i64 {
        self.total_rows
    }

    /// Working page size, `min(configured, total_rows)`.
    pub fn page_size(&self) -> i64 {
        self.page_size
    }

    pub fn position(&self) -> PagePosition {
        self.position
    }

    pub fn last_page_number(&self) -> i64 {
        self.last_page_number
    }

    fn after_last_page_number(&self) -> i64 {
        let p = self.configured_page_size;
        (self.total_rows + p - 1) / p + 1
    }

    /// Advance one page. `byte_cap` of 0 means unlimited.
    pub fn next(&mut self, byte_cap: u64) -> RecallResult<PageOutcome> {
        match self.position {
            PagePosition::AfterLast => return Ok(PageOutcome::Empty),
            PagePosition::BeforeFirst => self.last_page_number = 0,
            PagePosition::Middle => {}
        }

        let offset = self.last_page_number * self.page_size;
        let rows = self.fetch(self.page_size, offset, byte_cap)?;
        match rows {
            Some((results, status)) => {
                self.position = PagePosition::Middle;
                self.last_page_number += 1;
                Ok(PageOutcome::Rows(Page {
                    results,
                    status,
                    page_number: self.last_page_number,
                }))
            }
            None => {
                self.position = PagePosition::AfterLast;
                self.last_page_number = self.after_last_page_number();
                Ok(PageOutcome::Empty)
            }
        }
    }

    /// Step back one page. `byte_cap` of 0 means unlimited.
    pub fn previous(&mut self, byte_cap: u64) -> RecallResult<PageOutcome> {
        match self.position {
            PagePosition::BeforeFirst => return Ok(PageOutcome::Empty),
            PagePosition::AfterLast => self.last_page_number = self.after_last_page_number(),
            PagePosition::Middle => {}
        }

        let target = self.last_page_number - 1;
        let rows = if target >= 1 {
            self.fetch(self.page_size, (target - 1) * self.page_size, byte_cap)?
        } else {
            None
        };
        match rows {
            Some((results, status)) => {
                self.position = PagePosition::Middle;
                self.last_page_number = target;
                Ok(PageOutcome::Rows(Page {
                    results,
                    status,
                    page_number: target,
                }))
            }
            None => {
                self.position = PagePosition::BeforeFirst;
                self.last_page_number = 0;
                Ok(PageOutcome::Empty)
            }
        }
    }

    /// Fetch rows `begin..=end` (1-based) without moving the cursor.
    ///
    /// A missing `end` spans `max_page_size` rows.
    pub fn get_rows(
        &self,
        begin: i64,
        end: Option<i64>,
        max_page_size: i64,
        byte_cap: u64,
    ) -> RecallResult<PageOutcome> {
        let end = end.unwrap_or_else(|| begin.saturating_add(max_page_size - 1));
        if begin < 1 {
            return Err(ValidationError::InvalidRowRange {
                begin,
                end,
                reason: "row numbers start at 1".to_string(),
            }
            .into());
        }
        if end < begin {
            return Err(ValidationError::InvalidRowRange {
                begin,
                end,
                reason: "end precedes begin".to_string(),
            }
            .into());
        }
        let requested = end - begin + 1;
        if requested > max_page_size {
            return Err(ValidationError::PageSizeExceeded {
                requested,
                max: max_page_size,
            }
            .into());
        }

        Ok(match self.fetch(requested, begin - 1, byte_cap)? {
            Some((results, status)) => PageOutcome::Rows(Page {
                results,
                status,
                page_number: 0,
            }),
            None => PageOutcome::Empty,
        })
    }

    /// Run one window, returning `None` when it is empty.
    fn fetch(
        &self,
        limit: i64,
        offset: i64,
        byte_cap: u64,
    ) -> RecallResult<Option<(Vec<Value>, PageStatus)>> {
        let sql = format!("{} LIMIT {} OFFSET {}", self.ordered_sql, limit, offset);
        tracing::trace!(sql = %sql, "fetching page");
        let ResultSet { columns, rows } = self.store.query(&sql, &[])?;
        if rows.is_empty() {
            return Ok(None);
        }

        let available = rows.len();
        let mut status = PageStatus::Complete;
        let mut bytes = 0u64;
        let mut cache_rows = Vec::with_capacity(available);
        for values in rows {
            let row = cache_row_from(&columns, values, &self.fixed_fields_in_event);
            bytes += row.estimated_size();
            cache_rows.push(row);
            if byte_cap > 0 && bytes >= byte_cap {
                if cache_rows.len() < available {
                    status = PageStatus::Partial;
                }
                break;
            }
        }
        if status == PageStatus::Partial {
            tracing::debug!(
                kept = cache_rows.len(),
                available,
                byte_cap,
                "page cut short by byte cap"
            );
        }

        let results = self.reader.read_from_cache(cache_rows)?;
        Ok(Some((results, status)))
    }
}
