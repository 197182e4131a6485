//! Durable cached-query records in the `cachedResultsQuery` table.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use recall_core::{
    truncate_chars, CacheStatus, CachedQueryRecord, Projection, RecallResult, StoreError,
};

use crate::{RelationalStore, ResultSet, SqlValue};

const CREATE_RECORD_TABLE: &str = "CREATE TABLE IF NOT EXISTS cachedResultsQuery (\
    `queryId` VARCHAR(100) NOT NULL UNIQUE, \
    `alias` VARCHAR(100), \
    `lastUpdate` TEXT, \
    `pagesize` INTEGER, \
    `user` VARCHAR(50) NOT NULL, \
    `view` VARCHAR(200), \
    `tableName` VARCHAR(200), \
    `status` VARCHAR(20) NOT NULL, \
    `statusMessage` VARCHAR(1000) NOT NULL, \
    `fields` TEXT, \
    `conditions` TEXT, \
    `grouping` TEXT, \
    `orderBy` TEXT, \
    `variableFields` TEXT, \
    `originalQueryId` VARCHAR(200), \
    `fixedFieldsInEvent` VARCHAR(2000))";

const RECORD_COLUMNS: &str = "`queryId`, `alias`, `lastUpdate`, `pagesize`, `user`, `view`, \
    `tableName`, `status`, `statusMessage`, `fields`, `conditions`, `grouping`, `orderBy`, \
    `variableFields`, `originalQueryId`, `fixedFieldsInEvent`";

/// Reads and writes cached-query records.
///
/// Status messages are cut to `status_message_limit` characters on write.
pub struct QueryRecordStore {
    store: Arc<dyn RelationalStore>,
    status_message_limit: usize,
}

impl QueryRecordStore {
    /// Create the record store, creating its table if needed.
    pub fn new(store: Arc<dyn RelationalStore>, status_message_limit: usize) -> RecallResult<Self> {
        store.execute(CREATE_RECORD_TABLE)?;
        Ok(Self {
            store,
            status_message_limit,
        })
    }

    fn message(&self, message: Option<&str>) -> SqlValue {
        SqlValue::from(truncate_chars(message.unwrap_or(""), self.status_message_limit))
    }

    /// Insert or fully replace a record keyed by its query id.
    pub fn save(&self, record: &CachedQueryRecord) -> RecallResult<()> {
        let sql = format!(
            "INSERT INTO cachedResultsQuery ({}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16) \
             ON CONFLICT(`queryId`) DO UPDATE SET \
             `alias` = excluded.`alias`, `lastUpdate` = excluded.`lastUpdate`, \
             `pagesize` = excluded.`pagesize`, `user` = excluded.`user`, \
             `view` = excluded.`view`, `tableName` = excluded.`tableName`, \
             `status` = excluded.`status`, `statusMessage` = excluded.`statusMessage`, \
             `fields` = excluded.`fields`, `conditions` = excluded.`conditions`, \
             `grouping` = excluded.`grouping`, `orderBy` = excluded.`orderBy`, \
             `variableFields` = excluded.`variableFields`, \
             `originalQueryId` = excluded.`originalQueryId`, \
             `fixedFieldsInEvent` = excluded.`fixedFieldsInEvent`",
            RECORD_COLUMNS
        );
        let fixed = if record.fixed_fields_in_event.is_empty() {
            SqlValue::Null
        } else {
            SqlValue::from(record.fixed_fields_in_event.join(","))
        };
        let params = vec![
            SqlValue::from(record.query_id.as_str()),
            SqlValue::from(record.alias.clone()),
            SqlValue::from(record.last_update.to_rfc3339()),
            SqlValue::Int(record.page_size),
            SqlValue::from(record.owner.as_str()),
            SqlValue::from(record.view.clone()),
            SqlValue::from(record.table_name.clone()),
            SqlValue::from(record.status.as_db_str()),
            self.message(record.status_message.as_deref()),
            SqlValue::from(record.projection.fields.clone()),
            SqlValue::from(record.projection.conditions.clone()),
            SqlValue::from(record.projection.grouping.clone()),
            SqlValue::from(record.projection.order.clone()),
            SqlValue::from(record.variable_fields.join(" ")),
            SqlValue::from(record.original_query_id.clone()),
            fixed,
        ];
        self.store.execute_params(&sql, &params)?;
        tracing::debug!(query_id = %record.query_id, status = %record.status, "saved record");
        Ok(())
    }

    /// Insert a status-only record, or update status and message of an existing one.
    pub fn upsert_status(
        &self,
        query_id: &str,
        alias: Option<&str>,
        owner: &str,
        status: CacheStatus,
        message: Option<&str>,
    ) -> RecallResult<()> {
        let sql = "INSERT INTO cachedResultsQuery \
                   (`queryId`, `alias`, `lastUpdate`, `user`, `status`, `statusMessage`) \
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                   ON CONFLICT(`queryId`) DO UPDATE SET \
                   `alias` = COALESCE(excluded.`alias`, `alias`), \
                   `lastUpdate` = excluded.`lastUpdate`, \
                   `status` = excluded.`status`, \
                   `statusMessage` = excluded.`statusMessage`";
        let params = vec![
            SqlValue::from(query_id),
            SqlValue::from(alias),
            SqlValue::from(Utc::now().to_rfc3339()),
            SqlValue::from(owner),
            SqlValue::from(status.as_db_str()),
            self.message(message),
        ];
        self.store.execute_params(sql, &params)?;
        tracing::debug!(query_id, status = %status, "saved status");
        Ok(())
    }

    /// Find the most recent record whose alias, query id, or view equals `key`.
    pub fn find(&self, key: &str) -> RecallResult<Option<CachedQueryRecord>> {
        let sql = format!(
            "SELECT {} FROM cachedResultsQuery \
             WHERE `alias` = ?1 OR `queryId` = ?1 OR `view` = ?1 \
             ORDER BY `lastUpdate` DESC LIMIT 1",
            RECORD_COLUMNS
        );
        let result = self.store.query(&sql, &[SqlValue::from(key)])?;
        record_from_result(result)
    }

    /// Delete the record with this query id.
    pub fn remove(&self, query_id: &str) -> RecallResult<()> {
        self.store.execute_params(
            "DELETE FROM cachedResultsQuery WHERE `queryId` = ?1",
            &[SqlValue::from(query_id)],
        )?;
        Ok(())
    }
}

fn text(row: &[SqlValue], idx: usize) -> Option<String> {
    row.get(idx).and_then(SqlValue::as_text)
}

fn record_from_result(result: ResultSet) -> RecallResult<Option<CachedQueryRecord>> {
    let row = match result.rows.into_iter().next() {
        Some(row) => row,
        None => return Ok(None),
    };

    let status_text = text(&row, 7).unwrap_or_default();
    let status = CacheStatus::from_db_str(&status_text).map_err(|e| StoreError::Serialization {
        reason: e.to_string(),
    })?;
    let last_update = text(&row, 2)
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    let split = |value: Option<String>, sep: char| -> Vec<String> {
        value
            .map(|v| {
                v.split(sep)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    };

    Ok(Some(CachedQueryRecord {
        query_id: text(&row, 0).unwrap_or_default(),
        alias: text(&row, 1),
        last_update,
        page_size: row.get(3).and_then(SqlValue::as_i64).unwrap_or(0),
        owner: text(&row, 4).unwrap_or_default(),
        view: text(&row, 5),
        table_name: text(&row, 6),
        status,
        status_message: text(&row, 8).filter(|m| !m.is_empty()),
        projection: Projection {
            fields: text(&row, 9),
            conditions: text(&row, 10),
            grouping: text(&row, 11),
            order: text(&row, 12),
        },
        variable_fields: split(text(&row, 13), ' '),
        original_query_id: text(&row, 14),
        fixed_fields_in_event: split(text(&row, 15), ','),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SqliteStore;

    fn create_test_records() -> QueryRecordStore {
        let store = SqliteStore::open_in_memory().expect("in-memory store should open");
        QueryRecordStore::new(Arc::new(store), 200).expect("record table should be created")
    }

    fn sample_record() -> CachedQueryRecord {
        let mut record = CachedQueryRecord::new("q1", "alice");
        record.alias = Some("mine".to_string());
        record.view = Some("vabc".to_string());
        record.table_name = Some("tabc".to_string());
        record.status = CacheStatus::Available;
        record.page_size = 25;
        record.projection = Projection::new().with_fields("a.b").with_order("a.b DESC");
        record.variable_fields = vec!["a.b".to_string(), "c".to_string()];
        record.fixed_fields_in_event = vec!["_eventId_".to_string()];
        record.original_query_id = Some("src".to_string());
        record
    }

    #[test]
    fn test_save_then_find_by_each_key() {
        let records = create_test_records();
        let record = sample_record();
        records.save(&record).expect("save should succeed");

        for key in ["q1", "mine", "vabc"] {
            let found = records
                .find(key)
                .expect("find should succeed")
                .expect("record should exist");
            assert_eq!(found.query_id, "q1");
            assert_eq!(found.owner, "alice");
            assert_eq!(found.status, CacheStatus::Available);
            assert_eq!(found.variable_fields, record.variable_fields);
            assert_eq!(found.fixed_fields_in_event, record.fixed_fields_in_event);
            assert_eq!(found.projection, record.projection);
            assert_eq!(found.page_size, 25);
        }
        assert!(records.find("other").expect("find should succeed").is_none());
    }

    #[test]
    fn test_save_replaces_existing() {
        let records = create_test_records();
        let mut record = sample_record();
        records.save(&record).expect("save should succeed");
        record.status = CacheStatus::Error;
        record.status_message = Some("boom".to_string());
        records.save(&record).expect("second save should succeed");

        let found = records.find("q1").expect("find").expect("exists");
        assert_eq!(found.status, CacheStatus::Error);
        assert_eq!(found.status_message.as_deref(), Some("boom"));
    }

    #[test]
    fn test_upsert_status_inserts_and_updates() {
        let records = create_test_records();
        records
            .upsert_status("q2", None, "bob", CacheStatus::Loading, None)
            .expect("insert should succeed");
        let found = records.find("q2").expect("find").expect("exists");
        assert_eq!(found.status, CacheStatus::Loading);
        assert_eq!(found.owner, "bob");

        records
            .upsert_status("q2", Some("named"), "bob", CacheStatus::Error, Some("bad"))
            .expect("update should succeed");
        let found = records.find("named").expect("find").expect("exists");
        assert_eq!(found.status, CacheStatus::Error);
        assert_eq!(found.status_message.as_deref(), Some("bad"));
    }

    #[test]
    fn test_status_message_truncated() {
        let records = create_test_records();
        let long = "x".repeat(500);
        records
            .upsert_status("q3", None, "carol", CacheStatus::Error, Some(&long))
            .expect("upsert should succeed");
        let found = records.find("q3").expect("find").expect("exists");
        assert_eq!(found.status_message.map(|m| m.len()), Some(200));
    }

    #[test]
    fn test_remove() {
        let records = create_test_records();
        records.save(&sample_record()).expect("save should succeed");
        records.remove("q1").expect("remove should succeed");
        assert!(records.find("q1").expect("find should succeed").is_none());
    }
}
