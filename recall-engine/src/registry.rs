//! Lifecycle of cached queries: load, bind, page, and tear down.
//!
//! Entries live in a keyed in-process store under `(owner, id)`,
//! `(owner, alias)` and `(owner, view)`, and every mutating transition is mirrored to the durable
//! `cachedResultsQuery` table. Lookups fall back to the durable table and then
//! to the archive.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use recall_core::{
    new_entry_id, CacheStatus, CachedQueryRecord, ConfigError, CreateRequest, Description,
    Lifecycle, MetricsSink, NoopMetricsSink, Projection, RecallConfig, RecallError, RecallResult,
    ResultSource, ResultStream, RowMapper, RowReader, SecurityError, StatusReport, StoreError,
    UsageEvent, ValidationError,
};
use recall_storage::{
    ArchiveStore, FsArchiveStore, KeyedStore, QueryRecordStore, RelationalStore,
};
use serde::{Deserialize, Serialize};

use crate::cursor::{PageOutcome, PagedCursor};
use crate::entry::QueryCacheEntry;
use crate::inflight::{InFlightGuard, InFlightLoads};
use crate::loader::{BatchLoader, LoadSummary};
use crate::metrics::TracingMetricsSink;
use crate::translator::SqlTranslator;
use crate::view::{CacheTableDescriptor, ViewBuilder};

/// An entry shared between the keyed store and callers.
pub type SharedEntry = Arc<Mutex<QueryCacheEntry>>;

const CANCELED_MESSAGE: &str = "query canceled";

/// Result of a load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadOutcome {
    Loaded { view: String, summary: LoadSummary },
    /// The source produced no fields; the view exposes only fixed columns.
    Empty { view: String },
}

impl LoadOutcome {
    pub fn view(&self) -> &str {
        match self {
            LoadOutcome::Loaded { view, .. } | LoadOutcome::Empty { view } => view,
        }
    }
}

fn lock(entry: &SharedEntry) -> RecallResult<MutexGuard<'_, QueryCacheEntry>> {
    entry.lock().map_err(|_| StoreError::LockPoisoned.into())
}

fn check_owner(entry: &QueryCacheEntry, caller: &str) -> RecallResult<()> {
    if entry.owner() == caller {
        Ok(())
    } else {
        Err(SecurityError::OwnerMismatch {
            id: entry.id().to_string(),
            caller: caller.to_string(),
        }
        .into())
    }
}

fn check_available(entry: &QueryCacheEntry) -> RecallResult<()> {
    if entry.status() == CacheStatus::Available {
        Ok(())
    } else {
        Err(ValidationError::InvalidStateTransition {
            from: entry.status(),
            to: CacheStatus::Available,
        }
        .into())
    }
}

fn failure_status(err: &RecallError) -> (CacheStatus, String) {
    match err {
        RecallError::Canceled { .. } => (CacheStatus::Canceled, CANCELED_MESSAGE.to_string()),
        other => (CacheStatus::Error, other.to_string()),
    }
}

// ============================================================================
// BUILDER
// ============================================================================

/// Wires a [`LifecycleRegistry`] from its collaborators.
#[derive(Default)]
pub struct RegistryBuilder {
    config: RecallConfig,
    store: Option<Arc<dyn RelationalStore>>,
    source: Option<Arc<dyn ResultSource>>,
    mapper: Option<Arc<dyn RowMapper>>,
    reader: Option<Arc<dyn RowReader>>,
    metrics: Option<Arc<dyn MetricsSink>>,
    archive: Option<Arc<dyn ArchiveStore>>,
}

impl RegistryBuilder {
    pub fn with_config(mut self, config: RecallConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn RelationalStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_source(mut self, source: Arc<dyn ResultSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_row_mapper(mut self, mapper: Arc<dyn RowMapper>) -> Self {
        self.mapper = Some(mapper);
        self
    }

    pub fn with_row_reader(mut self, reader: Arc<dyn RowReader>) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_archive(mut self, archive: Arc<dyn ArchiveStore>) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Validate the configuration and build the registry.
    ///
    /// Every collaborator except metrics and the archive is required.
    pub fn build(self) -> RecallResult<LifecycleRegistry> {
        self.config.validate()?;

        let missing = |field: &str| -> RecallError {
            ConfigError::MissingRequired {
                field: field.to_string(),
            }
            .into()
        };
        let store = self.store.ok_or_else(|| missing("store"))?;
        let source = self.source.ok_or_else(|| missing("result_source"))?;
        let mapper = self.mapper.ok_or_else(|| missing("row_mapper"))?;
        let reader = self.reader.ok_or_else(|| missing("row_reader"))?;

        let metrics: Arc<dyn MetricsSink> = match self.metrics {
            Some(metrics) => metrics,
            None if self.config.collect_metrics => Arc::new(TracingMetricsSink),
            None => Arc::new(NoopMetricsSink),
        };
        let archive = self.archive.or_else(|| {
            match (&self.config.archive_dir, &self.config.archive_import_command) {
                (Some(dir), Some(command)) => Some(
                    Arc::new(FsArchiveStore::new(dir.clone(), command.clone()))
                        as Arc<dyn ArchiveStore>,
                ),
                _ => None,
            }
        });

        let records = QueryRecordStore::new(store.clone(), self.config.status_message_limit)?;
        Ok(LifecycleRegistry {
            views: ViewBuilder::new(store.clone()),
            config: self.config,
            store,
            records,
            entries: KeyedStore::new(),
            in_flight: InFlightLoads::new(),
            source,
            mapper,
            reader,
            metrics,
            archive,
        })
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Owns every cached query of one service instance.
pub struct LifecycleRegistry {
    config: RecallConfig,
    store: Arc<dyn RelationalStore>,
    views: ViewBuilder,
    records: QueryRecordStore,
    entries: KeyedStore<SharedEntry>,
    in_flight: InFlightLoads,
    source: Arc<dyn ResultSource>,
    mapper: Arc<dyn RowMapper>,
    reader: Arc<dyn RowReader>,
    metrics: Arc<dyn MetricsSink>,
    archive: Option<Arc<dyn ArchiveStore>>,
}

impl LifecycleRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn config(&self) -> &RecallConfig {
        &self.config
    }

    // === Persistence ===

    /// Register the entry under all its keys, then write its durable record.
    fn persist(&self, shared: &SharedEntry, entry: &QueryCacheEntry) -> RecallResult<()> {
        let record = entry.record();
        self.entries
            .put_all(&record.owner, &record.lookup_keys(), shared.clone());
        self.records.save(record)?;
        tracing::debug!(id = %record.query_id, status = %record.status, "persisted entry");
        Ok(())
    }

    fn persist_logged(&self, shared: &SharedEntry, entry: &QueryCacheEntry) {
        if let Err(e) = self.persist(shared, entry) {
            tracing::warn!(id = %entry.id(), error = %e, "failed to persist entry");
        }
    }

    /// Record a failure under the entry's id and alias only.
    fn record_failure(&self, shared: &SharedEntry, err: &RecallError) {
        let (status, message) = failure_status(err);
        let mut entry = match lock(shared) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "failed to record failure");
                return;
            }
        };
        entry.fail(status, message.clone());
        let record = entry.record();
        let mut keys = vec![record.query_id.as_str()];
        keys.extend(record.alias.as_deref().filter(|a| !a.is_empty()));
        self.entries.put_all(&record.owner, &keys, shared.clone());
        if let Err(e) = self.records.upsert_status(
            &record.query_id,
            record.alias.as_deref(),
            &record.owner,
            status,
            Some(&message),
        ) {
            tracing::warn!(id = %record.query_id, error = %e, "failed to persist failure status");
        }
    }

    fn emit(&self, entry: &QueryCacheEntry, lifecycle: Lifecycle, rows: u64) {
        if self.config.collect_metrics && entry.collect_metrics() {
            self.metrics
                .record(UsageEvent::new(entry.id(), entry.owner(), lifecycle).with_rows(rows));
        }
    }

    /// Find an entry by id, alias or view for `owner`.
    ///
    /// Falls back to the durable table, then to the archive. Recovered entries
    /// must be reset before they can be paged.
    pub fn retrieve(&self, key: &str, owner: &str) -> RecallResult<SharedEntry> {
        if let Some(shared) = self.entries.get(owner, key) {
            return Ok(shared);
        }
        if let Some(shared) = self.recover(key, owner)? {
            return Ok(shared);
        }
        if let Some(archive) = &self.archive {
            for snapshot in archive.find_snapshots(owner, key)? {
                if let Err(e) = archive.import(&snapshot) {
                    tracing::warn!(snapshot = %snapshot.display(), error = %e, "archive import failed");
                    continue;
                }
                if let Some(shared) = self.recover(key, owner)? {
                    tracing::info!(key, owner, snapshot = %snapshot.display(), "recovered entry from archive");
                    return Ok(shared);
                }
            }
        }
        Err(RecallError::NotFound {
            id: key.to_string(),
        })
    }

    fn recover(&self, key: &str, owner: &str) -> RecallResult<Option<SharedEntry>> {
        let record = match self.records.find(key)? {
            Some(record) => record,
            None => return Ok(None),
        };
        if record.owner != owner {
            return Err(SecurityError::OwnerMismatch {
                id: key.to_string(),
                caller: owner.to_string(),
            }
            .into());
        }
        tracing::debug!(key, id = %record.query_id, "recovered entry from durable record");
        let keys: Vec<String> = record.lookup_keys().into_iter().map(str::to_string).collect();
        let shared = Arc::new(Mutex::new(QueryCacheEntry::recovered(
            record,
            self.config.collect_metrics,
        )));
        let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
        self.entries.put_all(owner, &keys, shared.clone());
        Ok(Some(shared))
    }

    fn translate(&self, record: &CachedQueryRecord) -> RecallResult<String> {
        let view = record
            .view
            .as_deref()
            .ok_or_else(|| RecallError::NotFound {
                id: record.query_id.clone(),
            })?;
        let columns = self.views.view_columns(view)?;
        SqlTranslator::new(columns, record.variable_fields.iter().cloned()).generate_sql(
            view,
            &record.projection,
            &record.owner,
        )
    }

    fn open_cursor(&self, record: &CachedQueryRecord) -> RecallResult<PagedCursor> {
        let sql = self.translate(record)?;
        let page_size = if record.page_size > 0 {
            record.page_size
        } else {
            self.config.default_page_size
        };
        Ok(
            PagedCursor::initialize(self.store.clone(), self.reader.clone(), sql, page_size)?
                .with_fixed_fields(record.fixed_fields_in_event.clone()),
        )
    }

    fn resolve_page_size(&self, requested: i64) -> RecallResult<i64> {
        let page_size = if requested <= 0 {
            self.config.default_page_size
        } else {
            requested
        };
        let max = self.config.effective_max_page_size();
        if page_size > max {
            return Err(ValidationError::PageSizeExceeded {
                requested: page_size,
                max,
            }
            .into());
        }
        Ok(page_size)
    }

    // === Load Operations ===

    /// Drain a source's results into a new cache table and view.
    ///
    /// A second load of the same source while one is running fails with
    /// `Conflict` and leaves the running load alone.
    pub fn load(
        &self,
        source_id: &str,
        alias: Option<&str>,
        owner: &str,
    ) -> RecallResult<LoadOutcome> {
        let guard = self.in_flight.begin(source_id, owner)?;
        let descriptor = CacheTableDescriptor::generate();
        tracing::info!(source_id, owner, view = %descriptor.view, "loading cached results");

        let mut record = CachedQueryRecord::new(&descriptor.view, owner);
        record.alias = alias.filter(|a| !a.is_empty()).map(str::to_string);
        record.view = Some(descriptor.view.clone());
        record.table_name = Some(descriptor.table.clone());
        record.original_query_id = Some(source_id.to_string());
        record.page_size = self.config.default_page_size;

        let mut entry = QueryCacheEntry::new(record, self.config.collect_metrics);
        entry.transition(CacheStatus::Loading, None)?;
        let shared: SharedEntry = Arc::new(Mutex::new(entry));
        {
            let mut entry = lock(&shared)?;
            if let Err(e) = self.persist(&shared, &entry) {
                entry.fail(CacheStatus::Error, e.to_string());
                self.persist_logged(&shared, &entry);
                tracing::warn!(source_id, view = %descriptor.view, error = %e, "failed to record load start");
                return Err(e);
            }
        }

        let result = self
            .drain(&guard, &descriptor, source_id, owner)
            .and_then(|summary| self.finish_load(&shared, summary));
        match result {
            Ok(summary) => {
                tracing::info!(
                    source_id,
                    view = %descriptor.view,
                    rows_written = summary.rows_written,
                    rows_dropped = summary.rows_dropped,
                    fields = summary.slots.len(),
                    "load complete"
                );
                if summary.slots.is_empty() {
                    Ok(LoadOutcome::Empty {
                        view: descriptor.view,
                    })
                } else {
                    Ok(LoadOutcome::Loaded {
                        view: descriptor.view,
                        summary,
                    })
                }
            }
            Err(e) => {
                self.views.drop_schema(&descriptor.table, &descriptor.view);
                let (status, message) = failure_status(&e);
                if let Ok(mut entry) = lock(&shared) {
                    entry.fail(status, message);
                    self.persist_logged(&shared, &entry);
                    if status == CacheStatus::Canceled {
                        self.emit(&entry, Lifecycle::Canceled, 0);
                    }
                }
                tracing::warn!(source_id, view = %descriptor.view, error = %e, "load failed");
                Err(e)
            }
        }
    }

    fn drain(
        &self,
        guard: &InFlightGuard<'_>,
        descriptor: &CacheTableDescriptor,
        source_id: &str,
        owner: &str,
    ) -> RecallResult<LoadSummary> {
        let mut stream = self.source.open(source_id, owner)?;
        let result = self.drain_stream(guard, stream.as_mut(), descriptor, owner);
        stream.close();
        result
    }

    fn drain_stream(
        &self,
        guard: &InFlightGuard<'_>,
        stream: &mut dyn ResultStream,
        descriptor: &CacheTableDescriptor,
        owner: &str,
    ) -> RecallResult<LoadSummary> {
        self.views
            .create_table(&descriptor.table, self.config.slot_capacity)?;
        let mut loader = BatchLoader::new(&*self.store, descriptor.table.as_str(), &self.config)
            .with_stamp(owner, guard.source_id(), stream.logic_name());

        loop {
            if guard.is_canceled() {
                return Err(RecallError::Canceled {
                    source_id: guard.source_id().to_string(),
                });
            }
            let page = stream.next_page()?;
            if page.is_empty() {
                break;
            }
            for result in &page {
                for row in self.mapper.write_to_cache(result)? {
                    loader.load_row(row)?;
                }
            }
        }

        let summary = loader.finish()?;
        self.views
            .create_view(&descriptor.table, &descriptor.view, &summary.slots)?;
        Ok(summary)
    }

    fn finish_load(&self, shared: &SharedEntry, summary: LoadSummary) -> RecallResult<LoadSummary> {
        let mut entry = lock(shared)?;
        entry.record_mut().variable_fields = summary.slots.clone();
        entry.transition(CacheStatus::Loaded, None)?;
        self.persist(shared, &entry)?;
        self.emit(&entry, Lifecycle::Loaded, summary.rows_written);
        Ok(summary)
    }

    /// Run [`load`](Self::load) on a blocking worker.
    pub async fn load_async(
        self: Arc<Self>,
        source_id: String,
        alias: Option<String>,
        owner: String,
    ) -> RecallResult<LoadOutcome> {
        tokio::task::spawn_blocking(move || self.load(&source_id, alias.as_deref(), &owner))
            .await
            .map_err(|e| StoreError::ExecutionFailed {
                reason: format!("load task failed: {}", e),
            })?
    }

    /// Load a source and bind `request` to the resulting view.
    ///
    /// Load failures are also recorded under the new entry's id.
    pub fn load_and_create(
        &self,
        source_id: &str,
        request: CreateRequest,
        owner: &str,
    ) -> RecallResult<String> {
        let entry_id = request.entry_id.clone().unwrap_or_else(new_entry_id);
        let alias = request.alias.clone();
        self.records
            .upsert_status(&entry_id, alias.as_deref(), owner, CacheStatus::Loading, None)?;

        let view = match self.load(source_id, None, owner) {
            Ok(outcome) => outcome.view().to_string(),
            Err(e @ RecallError::Conflict { .. }) => {
                if let Err(cleanup) = self.records.remove(&entry_id) {
                    tracing::warn!(id = %entry_id, error = %cleanup, "failed to remove loading record");
                }
                return Err(e);
            }
            Err(e) => {
                let (status, message) = failure_status(&e);
                if let Err(persist) = self.records.upsert_status(
                    &entry_id,
                    alias.as_deref(),
                    owner,
                    status,
                    Some(&message),
                ) {
                    tracing::warn!(id = %entry_id, error = %persist, "failed to persist load failure");
                }
                return Err(e);
            }
        };
        // Drop any stale copy recovered while the load was running.
        self.entries.remove_all(owner, &[entry_id.as_str()]);
        self.create(&view, request.with_entry_id(entry_id), owner)
    }

    // === Create / Update Operations ===

    /// Bind a projection to a loaded view, returning the new entry's id.
    pub fn create(
        &self,
        loaded_id: &str,
        request: CreateRequest,
        owner: &str,
    ) -> RecallResult<String> {
        let loaded = {
            let shared = self.retrieve(loaded_id, owner)?;
            let entry = lock(&shared)?;
            check_owner(&entry, owner)?;
            entry.record().clone()
        };
        if loaded.status != CacheStatus::Loaded {
            return Err(ValidationError::InvalidStateTransition {
                from: loaded.status,
                to: CacheStatus::Creating,
            }
            .into());
        }
        let page_size = self.resolve_page_size(request.page_size)?;
        let entry_id = request.entry_id.clone().unwrap_or_else(new_entry_id);

        let mut record = CachedQueryRecord::new(&entry_id, owner);
        record.alias = request.alias.clone().filter(|a| !a.is_empty());
        record.view = loaded.view.clone();
        record.table_name = loaded.table_name.clone();
        record.variable_fields = loaded.variable_fields.clone();
        record.original_query_id = loaded.original_query_id.clone();
        record.projection = request.projection.normalized();
        record.page_size = page_size;
        record.fixed_fields_in_event = request.fixed_fields_in_event.clone();
        record.status = CacheStatus::Loaded;

        let mut entry = QueryCacheEntry::new(record, self.config.collect_metrics);
        entry.transition(CacheStatus::Creating, None)?;
        self.records.upsert_status(
            &entry_id,
            entry.record().alias.as_deref(),
            owner,
            CacheStatus::Creating,
            None,
        )?;
        let shared: SharedEntry = Arc::new(Mutex::new(entry));

        match self.bind(&shared, &loaded) {
            Ok(()) => {
                tracing::info!(id = %entry_id, view = ?loaded.view, "created entry");
                Ok(entry_id)
            }
            Err(e) => {
                tracing::warn!(id = %entry_id, error = %e, "create failed");
                self.record_failure(&shared, &e);
                Err(e)
            }
        }
    }

    fn bind(&self, shared: &SharedEntry, loaded: &CachedQueryRecord) -> RecallResult<()> {
        let mut entry = lock(shared)?;
        let cursor = self.open_cursor(entry.record())?;
        entry.activate(cursor);
        entry.transition(CacheStatus::Available, None)?;

        // The loaded view's keys overlap the new entry's view key.
        self.entries.remove_all(&loaded.owner, &loaded.lookup_keys());
        self.persist(shared, &entry)?;
        self.records.remove(&loaded.query_id)?;
        self.emit(&entry, Lifecycle::Initialized, 0);
        Ok(())
    }

    /// Replace an entry's projection, returning whether it must reinitialize.
    ///
    /// An empty projection is a no-op. A reinitializing update drops the live
    /// cursor; the next paging call starts over from before the first page.
    pub fn update(
        &self,
        entry_id: &str,
        owner: &str,
        projection: Projection,
        page_size: Option<i64>,
    ) -> RecallResult<bool> {
        let shared = self.retrieve(entry_id, owner)?;
        let mut entry = lock(&shared)?;
        check_owner(&entry, owner)?;
        check_available(&entry)?;
        if projection.is_unset() {
            return Ok(false);
        }

        let old_sql = entry
            .ensure_activated(true, |record| self.open_cursor(record))?
            .sql()
            .to_string();

        let mut candidate = entry.record().clone();
        candidate.projection = projection.normalized();
        let new_sql = self.translate(&candidate)?;
        let mut reinitialize = new_sql != old_sql;

        if let Some(size) = page_size {
            if size <= 0 {
                return Err(ValidationError::InvalidValue {
                    field: "page_size".to_string(),
                    reason: format!("must be positive, got {}", size),
                }
                .into());
            }
            let size = self.resolve_page_size(size)?;
            if size != candidate.page_size {
                candidate.page_size = size;
                reinitialize = true;
            }
        }

        {
            let record = entry.record_mut();
            record.projection = candidate.projection;
            record.page_size = candidate.page_size;
            record.last_update = Utc::now();
        }
        if reinitialize {
            entry.deactivate(true);
        }
        self.persist(&shared, &entry)?;
        tracing::debug!(id = %entry_id, reinitialize, "updated entry");
        Ok(reinitialize)
    }

    // === Paging Operations ===

    fn page(&self, entry_id: &str, owner: &str, forward: bool) -> RecallResult<PageOutcome> {
        let shared = self.retrieve(entry_id, owner)?;
        let mut entry = lock(&shared)?;
        check_owner(&entry, owner)?;
        check_available(&entry)?;

        let allow = entry.auto_activate();
        let byte_cap = self.config.page_byte_trigger;
        let outcome = {
            let cursor = entry.ensure_activated(allow, |record| self.open_cursor(record))?;
            if forward {
                cursor.next(byte_cap)?
            } else {
                cursor.previous(byte_cap)?
            }
        };
        entry.set_auto_activate(false);
        self.emit(&entry, Lifecycle::Results, outcome.len() as u64);
        Ok(outcome)
    }

    /// Next page, or `Empty` once past the last page.
    pub fn next(&self, entry_id: &str, owner: &str) -> RecallResult<PageOutcome> {
        self.page(entry_id, owner, true)
    }

    /// Previous page, or `Empty` once before the first page.
    pub fn previous(&self, entry_id: &str, owner: &str) -> RecallResult<PageOutcome> {
        self.page(entry_id, owner, false)
    }

    /// Rows `begin..=end` (1-based), activating the entry if needed.
    pub fn get_rows(
        &self,
        entry_id: &str,
        owner: &str,
        begin: i64,
        end: Option<i64>,
    ) -> RecallResult<PageOutcome> {
        let shared = self.retrieve(entry_id, owner)?;
        let mut entry = lock(&shared)?;
        check_owner(&entry, owner)?;
        check_available(&entry)?;

        let max = self.config.effective_max_page_size();
        let byte_cap = self.config.page_byte_trigger;
        let outcome = entry
            .ensure_activated(true, |record| self.open_cursor(record))?
            .get_rows(begin, end, max, byte_cap)?;
        self.emit(&entry, Lifecycle::Results, outcome.len() as u64);
        Ok(outcome)
    }

    /// Rows counted by the entry's most recent activation.
    pub fn total_rows(&self, entry_id: &str, owner: &str) -> RecallResult<Option<i64>> {
        let shared = self.retrieve(entry_id, owner)?;
        let entry = lock(&shared)?;
        check_owner(&entry, owner)?;
        Ok(entry.total_rows())
    }

    // === Cancel / Close Operations ===

    /// Cancel a running load owned by `owner`.
    ///
    /// The load notices at its next page checkpoint.
    pub fn cancel(&self, source_id: &str, owner: &str) -> RecallResult<()> {
        self.in_flight.cancel(source_id, Some(owner))?;
        self.source.release(source_id);
        tracing::info!(source_id, owner, "load cancel requested");
        Ok(())
    }

    /// Cancel a running load regardless of owner.
    pub fn cancel_as_admin(&self, source_id: &str) -> RecallResult<()> {
        self.in_flight.cancel(source_id, None)?;
        self.source.release(source_id);
        tracing::info!(source_id, "load cancel requested by administrator");
        Ok(())
    }

    pub fn is_loading(&self, source_id: &str) -> bool {
        self.in_flight.contains(source_id)
    }

    /// Release the entry's cursor and forget all its keys.
    ///
    /// The durable record is kept so status stays queryable. The closing usage
    /// event is emitted only for an activated entry.
    pub fn close(&self, entry_id: &str, owner: &str) -> RecallResult<()> {
        let shared = self.retrieve(entry_id, owner)?;
        let mut entry = lock(&shared)?;
        check_owner(&entry, owner)?;
        let was_activated = entry.is_activated();
        entry.deactivate(false);
        let removed = self
            .entries
            .remove_all(owner, &entry.record().lookup_keys());
        // Only a live query has usage to finalize.
        if was_activated {
            self.emit(&entry, Lifecycle::Closed, 0);
        }
        tracing::info!(id = %entry.id(), removed, "closed entry");
        Ok(())
    }

    // === Inspection Operations ===

    pub fn status(&self, id: &str, owner: &str) -> RecallResult<StatusReport> {
        let shared = self.retrieve(id, owner)?;
        let entry = lock(&shared)?;
        check_owner(&entry, owner)?;
        Ok(StatusReport {
            status: entry.status(),
            message: entry.record().status_message.clone(),
        })
    }

    pub fn describe(&self, id: &str, owner: &str) -> RecallResult<Description> {
        let shared = self.retrieve(id, owner)?;
        let view = {
            let entry = lock(&shared)?;
            check_owner(&entry, owner)?;
            entry
                .record()
                .view
                .clone()
                .ok_or_else(|| RecallError::NotFound { id: id.to_string() })?
        };
        self.views.describe(&view, owner)
    }

    // === Maintenance Operations ===

    /// Rebuild the entry's cursor from scratch.
    pub fn reset(&self, entry_id: &str, owner: &str) -> RecallResult<()> {
        let shared = self.retrieve(entry_id, owner)?;
        let mut entry = lock(&shared)?;
        check_owner(&entry, owner)?;
        check_available(&entry)?;
        entry.deactivate(true);
        entry.ensure_activated(true, |record| self.open_cursor(record))?;
        tracing::debug!(id = %entry_id, "reset entry");
        Ok(())
    }

    /// Point a new alias at the entry, dropping the old one.
    pub fn set_alias(&self, entry_id: &str, owner: &str, alias: &str) -> RecallResult<()> {
        let shared = self.retrieve(entry_id, owner)?;
        let mut entry = lock(&shared)?;
        check_owner(&entry, owner)?;
        if let Some(old) = entry.record().alias.clone().filter(|a| !a.is_empty()) {
            self.entries.remove_all(owner, &[old.as_str()]);
        }
        {
            let record = entry.record_mut();
            record.alias = Some(alias.to_string()).filter(|a| !a.is_empty());
            record.last_update = Utc::now();
        }
        self.persist(&shared, &entry)
    }

    /// Deactivate entries idle for longer than `max_idle`.
    ///
    /// Entries stay addressable; busy entries are skipped.
    pub fn expire_idle(&self, max_idle: chrono::Duration) -> usize {
        let cutoff = Utc::now() - max_idle;
        let mut seen: Vec<SharedEntry> = Vec::new();
        let mut expired = 0;
        for shared in self.entries.values() {
            if seen.iter().any(|s| Arc::ptr_eq(s, &shared)) {
                continue;
            }
            seen.push(shared.clone());
            if let Ok(mut entry) = shared.try_lock() {
                if entry.is_activated() && entry.last_access() < cutoff {
                    let auto_activate = entry.auto_activate();
                    entry.deactivate(auto_activate);
                    expired += 1;
                }
            }
        }
        if expired > 0 {
            tracing::info!(expired, "deactivated idle entries");
        }
        expired
    }
}
