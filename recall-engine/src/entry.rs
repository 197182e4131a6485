//! Addressable cached query state.

use chrono::Utc;
use recall_core::{CacheStatus, CachedQueryRecord, RecallError, RecallResult, Timestamp};

use crate::cursor::PagedCursor;

/// Whether an entry holds a live cursor.
#[derive(Debug)]
pub enum EntryState {
    /// No live cursor; one is built on the next activating call.
    Deactivated,
    Activated(PagedCursor),
}

/// One cached query, looked up by id, alias or view.
///
/// Wrapped in a mutex by the registry, so every operation on an entry is
/// serialized.
#[derive(Debug)]
pub struct QueryCacheEntry {
    record: CachedQueryRecord,
    state: EntryState,
    /// Whether a deactivated entry may silently rebuild its cursor on paging.
    auto_activate: bool,
    /// Rows counted by the most recent activation.
    total_rows: Option<i64>,
    collect_metrics: bool,
    last_access: Timestamp,
}

impl QueryCacheEntry {
    /// Entry created in this process; paging may activate it.
    pub fn new(record: CachedQueryRecord, collect_metrics: bool) -> Self {
        Self {
            record,
            state: EntryState::Deactivated,
            auto_activate: true,
            total_rows: None,
            collect_metrics,
            last_access: Utc::now(),
        }
    }

    /// Entry rebuilt from durable storage or the archive.
    pub fn recovered(record: CachedQueryRecord, collect_metrics: bool) -> Self {
        Self {
            auto_activate: false,
            ..Self::new(record, collect_metrics)
        }
    }

    pub fn record(&self) -> &CachedQueryRecord {
        &self.record
    }

    pub fn record_mut(&mut self) -> &mut CachedQueryRecord {
        &mut self.record
    }

    pub fn id(&self) -> &str {
        &self.record.query_id
    }

    pub fn owner(&self) -> &str {
        &self.record.owner
    }

    pub fn status(&self) -> CacheStatus {
        self.record.status
    }

    /// Move to `status`, refusing transitions the lifecycle does not allow.
    pub fn transition(&mut self, status: CacheStatus, message: Option<String>) -> RecallResult<()> {
        if !self.record.status.can_transition_to(status) {
            return Err(recall_core::ValidationError::InvalidStateTransition {
                from: self.record.status,
                to: status,
            }
            .into());
        }
        self.record.status = status;
        self.record.status_message = message;
        self.record.last_update = Utc::now();
        Ok(())
    }

    /// Record a terminal failure regardless of the current status.
    pub fn fail(&mut self, status: CacheStatus, message: impl Into<String>) {
        self.record.status = status;
        self.record.status_message = Some(message.into());
        self.record.last_update = Utc::now();
        self.state = EntryState::Deactivated;
    }

    pub fn collect_metrics(&self) -> bool {
        self.collect_metrics
    }

    pub fn auto_activate(&self) -> bool {
        self.auto_activate
    }

    pub fn set_auto_activate(&mut self, auto_activate: bool) {
        self.auto_activate = auto_activate;
    }

    pub fn total_rows(&self) -> Option<i64> {
        self.total_rows
    }

    pub fn is_activated(&self) -> bool {
        matches!(self.state, EntryState::Activated(_))
    }

    pub fn last_access(&self) -> Timestamp {
        self.last_access
    }

    pub fn touch(&mut self) {
        self.last_access = Utc::now();
    }

    /// Drop any live cursor.
    pub fn deactivate(&mut self, auto_activate: bool) {
        self.state = EntryState::Deactivated;
        self.auto_activate = auto_activate;
    }

    /// Install a freshly built cursor.
    pub fn activate(&mut self, cursor: PagedCursor) {
        self.total_rows = Some(cursor.total_rows());
        self.state = EntryState::Activated(cursor);
    }

    /// Live cursor, building one with `open` if the entry is deactivated.
    ///
    /// With `allow` false a deactivated entry fails with `ResourceExpired`.
    pub fn ensure_activated<F>(&mut self, allow: bool, open: F) -> RecallResult<&mut PagedCursor>
    where
        F: FnOnce(&CachedQueryRecord) -> RecallResult<PagedCursor>,
    {
        self.touch();
        if !self.is_activated() {
            if !allow {
                return Err(RecallError::ResourceExpired {
                    id: self.record.query_id.clone(),
                });
            }
            let cursor = open(&self.record)?;
            tracing::debug!(id = %self.record.query_id, total_rows = cursor.total_rows(), "activated entry");
            self.activate(cursor);
        }
        match &mut self.state {
            EntryState::Activated(cursor) => Ok(cursor),
            EntryState::Deactivated => Err(RecallError::ResourceExpired {
                id: self.record.query_id.clone(),
            }),
        }
    }
}
