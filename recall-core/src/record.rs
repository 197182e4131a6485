//! Durable cached-query records and the reports derived from them.

use crate::{CacheStatus, Projection, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Durable state of a cached query, one row of `cachedResultsQuery`.
///
/// Loaded views are keyed by their view name; created entries by their entry id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedQueryRecord {
    pub query_id: String,
    pub alias: Option<String>,
    pub last_update: Timestamp,
    pub page_size: i64,
    pub owner: String,
    pub view: Option<String>,
    pub table_name: Option<String>,
    pub status: CacheStatus,
    pub status_message: Option<String>,
    pub projection: Projection,
    /// Queryable field names of the loaded view, in slot order.
    pub variable_fields: Vec<String>,
    /// Source query the cache was loaded from.
    pub original_query_id: Option<String>,
    pub fixed_fields_in_event: Vec<String>,
}

impl CachedQueryRecord {
    pub fn new(query_id: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            query_id: query_id.into(),
            alias: None,
            last_update: Utc::now(),
            page_size: 0,
            owner: owner.into(),
            view: None,
            table_name: None,
            status: CacheStatus::None,
            status_message: None,
            projection: Projection::default(),
            variable_fields: Vec::new(),
            original_query_id: None,
            fixed_fields_in_event: Vec::new(),
        }
    }

    /// Every non-empty key this record can be looked up by.
    pub fn lookup_keys(&self) -> Vec<&str> {
        let mut keys = vec![self.query_id.as_str()];
        if let Some(alias) = self.alias.as_deref().filter(|a| !a.is_empty()) {
            keys.push(alias);
        }
        if let Some(view) = self.view.as_deref().filter(|v| !v.is_empty()) {
            keys.push(view);
        }
        keys
    }
}

/// Outcome of a `status` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: CacheStatus,
    pub message: Option<String>,
}

/// Outcome of a `describe` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Description {
    pub view: String,
    /// Queryable (non-fixed) columns of the view.
    pub columns: Vec<String>,
    pub row_count: i64,
}
