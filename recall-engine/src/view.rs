//! Physical cache tables and the field-named views over them.

use std::sync::Arc;

use recall_core::{
    fixed_column_list, is_fixed_column, is_plain_identifier, new_name_base, table_name_for,
    view_name_for, Description, RecallResult, ValidationError, FIXED_COLUMNS,
};
use recall_storage::{RelationalStore, SqlValue};

use crate::allocator::slot_column;

/// Names of the table and view backing one load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheTableDescriptor {
    pub table: String,
    pub view: String,
}

impl CacheTableDescriptor {
    /// Fresh table/view pair sharing one generated name base.
    pub fn generate() -> Self {
        let base = new_name_base();
        Self {
            table: table_name_for(&base),
            view: view_name_for(&base),
        }
    }
}

fn check_identifier(kind: &str, name: &str) -> RecallResult<()> {
    if is_plain_identifier(name) {
        Ok(())
    } else {
        Err(ValidationError::InvalidIdentifier {
            kind: kind.to_string(),
            value: name.to_string(),
        }
        .into())
    }
}

/// Backtick-quote a field name for use as a view column.
fn quote_column(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Builds and tears down cache schema objects.
#[derive(Clone)]
pub struct ViewBuilder {
    store: Arc<dyn RelationalStore>,
}

impl ViewBuilder {
    pub fn new(store: Arc<dyn RelationalStore>) -> Self {
        Self { store }
    }

    /// Create the physical table with `capacity` numbered slot columns.
    pub fn create_table(&self, table: &str, capacity: usize) -> RecallResult<()> {
        check_identifier("table", table)?;
        let mut columns: Vec<String> = FIXED_COLUMNS
            .iter()
            .map(|c| match *c {
                "_user_" | "_queryId_" | "_datatype_" | "_eventId_" => {
                    format!("{} VARCHAR(200) NOT NULL", c)
                }
                _ => format!("{} TEXT", c),
            })
            .collect();
        columns.extend((0..capacity).map(|slot| format!("{} TEXT", slot_column(slot))));

        let ddl = format!("CREATE TABLE {} ({})", table, columns.join(", "));
        self.store.execute(&ddl)?;
        tracing::debug!(table, capacity, "created cache table");
        Ok(())
    }

    /// Create `view` over `table`, naming slot columns after their fields.
    ///
    /// Fails if `view` already exists.
    pub fn create_view(&self, table: &str, view: &str, slots: &[String]) -> RecallResult<()> {
        check_identifier("table", table)?;
        check_identifier("view", view)?;

        let mut view_columns = vec![fixed_column_list()];
        let mut select_columns = vec![fixed_column_list()];
        for (slot, field) in slots.iter().enumerate() {
            view_columns.push(quote_column(field));
            select_columns.push(slot_column(slot));
        }

        let ddl = format!(
            "CREATE VIEW {}({}) AS SELECT {} FROM {}",
            view,
            view_columns.join(","),
            select_columns.join(","),
            table
        );
        tracing::trace!(sql = %ddl, "creating view");
        self.store.execute(&ddl)?;
        tracing::debug!(view, table, fields = slots.len(), "created view");
        Ok(())
    }

    /// Drop the view and table. Failures are logged and swallowed.
    pub fn drop_schema(&self, table: &str, view: &str) {
        if is_plain_identifier(view) {
            if let Err(e) = self.store.execute(&format!("DROP VIEW IF EXISTS {}", view)) {
                tracing::warn!(view, error = %e, "failed to drop view");
            }
        }
        if is_plain_identifier(table) {
            if let Err(e) = self.store.execute(&format!("DROP TABLE IF EXISTS {}", table)) {
                tracing::warn!(table, error = %e, "failed to drop table");
            }
        }
    }

    /// Non-fixed columns of `view`, in view order.
    pub fn view_columns(&self, view: &str) -> RecallResult<Vec<String>> {
        check_identifier("view", view)?;
        Ok(self
            .store
            .columns(view)?
            .into_iter()
            .filter(|c| !is_fixed_column(c))
            .collect())
    }

    /// Queryable columns of `view` and how many rows `owner` has in it.
    pub fn describe(&self, view: &str, owner: &str) -> RecallResult<Description> {
        let columns = self.view_columns(view)?;
        let row_count = self.store.query_scalar(
            &format!("SELECT count(*) FROM {} WHERE _user_ = ?1", view),
            &[SqlValue::from(owner)],
        )?;
        Ok(Description {
            view: view.to_string(),
            columns,
            row_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recall_core::{RecallError, StoreError};
    use recall_storage::SqliteStore;

    fn create_test_builder() -> (ViewBuilder, Arc<dyn RelationalStore>) {
        let store: Arc<dyn RelationalStore> =
            Arc::new(SqliteStore::open_in_memory().expect("in-memory store should open"));
        (ViewBuilder::new(store.clone()), store)
    }

    #[test]
    fn test_generated_names_share_base() {
        let d = CacheTableDescriptor::generate();
        assert!(d.table.starts_with('t'));
        assert!(d.view.starts_with('v'));
        assert_eq!(d.table[1..], d.view[1..]);
        assert!(is_plain_identifier(&d.table));
    }

    #[test]
    fn test_view_aliases_slots_in_order() {
        let (builder, store) = create_test_builder();
        builder.create_table("tx", 4).expect("table should be created");
        let slots = vec!["b.1".to_string(), "a".to_string(), "odd`name".to_string()];
        builder
            .create_view("tx", "vx", &slots)
            .expect("view should be created");

        let columns = store.columns("vx").expect("columns should resolve");
        assert_eq!(columns.len(), FIXED_COLUMNS.len() + 3);
        assert_eq!(&columns[..FIXED_COLUMNS.len()], &FIXED_COLUMNS[..]);
        assert_eq!(
            builder.view_columns("vx").expect("columns should resolve"),
            slots
        );
    }

    #[test]
    fn test_create_view_twice_fails() {
        let (builder, _store) = create_test_builder();
        builder.create_table("tx", 1).expect("table should be created");
        builder.create_view("tx", "vx", &[]).expect("view should be created");
        assert!(builder.create_view("tx", "vx", &[]).is_err());
    }

    #[test]
    fn test_invalid_identifiers_rejected() {
        let (builder, _store) = create_test_builder();
        let err = builder.create_table("t; DROP TABLE x", 1).unwrap_err();
        assert!(matches!(
            err,
            RecallError::Validation(ValidationError::InvalidIdentifier { .. })
        ));
        assert!(builder.create_view("tx", "v x", &[]).is_err());
    }

    #[test]
    fn test_drop_schema_is_best_effort() {
        let (builder, store) = create_test_builder();
        builder.create_table("tx", 1).expect("table should be created");
        builder.create_view("tx", "vx", &[]).expect("view should be created");
        builder.drop_schema("tx", "vx");
        // Dropping again must not panic or error.
        builder.drop_schema("tx", "vx");
        let err = store.columns("tx").unwrap_err();
        assert!(matches!(
            err,
            RecallError::Store(StoreError::TableMissing { .. })
        ));
    }

    #[test]
    fn test_describe_counts_owner_rows() {
        let (builder, store) = create_test_builder();
        builder.create_table("tx", 2).expect("table should be created");
        builder
            .create_view("tx", "vx", &["a".to_string()])
            .expect("view should be created");
        for owner in ["alice", "alice", "bob"] {
            store
                .execute_params(
                    "INSERT INTO tx (_user_, _queryId_, _datatype_, _eventId_, field0) \
                     VALUES (?1, 'q', 'dt', 'e', 'x')",
                    &[SqlValue::from(owner)],
                )
                .expect("insert should succeed");
        }
        let description = builder.describe("vx", "alice").expect("describe should succeed");
        assert_eq!(description.columns, vec!["a".to_string()]);
        assert_eq!(description.row_count, 2);
    }
}
