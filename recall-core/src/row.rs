//! Cache rows and the fixed column layout.

use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Columns present in every cache table and view, in storage order.
pub const FIXED_COLUMNS: [&str; 10] = [
    "_user_",
    "_queryId_",
    "_logicName_",
    "_datatype_",
    "_eventId_",
    "_row_",
    "_colf_",
    "_markings_",
    "_column_markings_",
    "_column_timestamps_",
];

/// Fixed columns joined with commas, as emitted in SELECT lists.
pub fn fixed_column_list() -> String {
    FIXED_COLUMNS.join(",")
}

/// Check whether a column is one of the fixed columns.
pub fn is_fixed_column(name: &str) -> bool {
    FIXED_COLUMNS.contains(&name)
}

/// One dynamic field of a cache row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheField {
    pub name: String,
    pub value: String,
    /// Visibility marking for this field only.
    pub marking: Option<String>,
    pub timestamp: Option<Timestamp>,
}

/// One emitted result unit, either headed into the cache or read back out of it.
///
/// `user`, `query_id` and `logic_name` are stamped by the loader; row mappers
/// can leave them empty.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CacheRow {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub query_id: String,
    #[serde(default)]
    pub logic_name: String,
    pub data_type: String,
    pub event_id: String,
    pub row: String,
    pub column_family: String,
    pub markings: BTreeMap<String, String>,
    /// Fields in emission order. Names are unique within a row.
    pub fields: Vec<CacheField>,
}

impl CacheRow {
    pub fn new(data_type: impl Into<String>, event_id: impl Into<String>) -> Self {
        Self {
            data_type: data_type.into(),
            event_id: event_id.into(),
            ..Self::default()
        }
    }

    pub fn with_row(mut self, row: impl Into<String>, column_family: impl Into<String>) -> Self {
        self.row = row.into();
        self.column_family = column_family.into();
        self
    }

    pub fn with_marking(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.markings.insert(key.into(), value.into());
        self
    }

    /// Add a field, replacing any earlier value under the same name.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_field(CacheField {
            name: name.into(),
            value: value.into(),
            marking: None,
            timestamp: None,
        });
        self
    }

    pub fn set_field(&mut self, field: CacheField) {
        match self.fields.iter_mut().find(|f| f.name == field.name) {
            Some(existing) => *existing = field,
            None => self.fields.push(field),
        }
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }

    /// Longest field value in characters.
    pub fn longest_value(&self) -> usize {
        self.fields
            .iter()
            .map(|f| f.value.chars().count())
            .max()
            .unwrap_or(0)
    }

    /// Rough in-memory size in bytes, used for page byte caps.
    pub fn estimated_size(&self) -> u64 {
        let header = self.user.len()
            + self.query_id.len()
            + self.logic_name.len()
            + self.data_type.len()
            + self.event_id.len()
            + self.row.len()
            + self.column_family.len();
        let markings: usize = self.markings.iter().map(|(k, v)| k.len() + v.len()).sum();
        let fields: usize = self
            .fields
            .iter()
            .map(|f| f.name.len() + f.value.len() + f.marking.as_ref().map_or(0, |m| m.len()) + 8)
            .sum();
        (header + markings + fields) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_column_order() {
        assert_eq!(FIXED_COLUMNS[0], "_user_");
        assert_eq!(FIXED_COLUMNS[4], "_eventId_");
        assert!(fixed_column_list().starts_with("_user_,_queryId_,_logicName_"));
        assert!(is_fixed_column("_colf_"));
        assert!(!is_fixed_column("foo.bar"));
    }

    #[test]
    fn test_with_field_replaces_duplicates() {
        let row = CacheRow::new("dt", "e1")
            .with_field("a", "1")
            .with_field("b", "2")
            .with_field("a", "3");
        assert_eq!(row.fields.len(), 2);
        assert_eq!(row.field("a"), Some("3"));
        assert_eq!(row.fields[0].name, "a");
    }

    #[test]
    fn test_longest_value_counts_chars() {
        let row = CacheRow::new("dt", "e1")
            .with_field("a", "héllo")
            .with_field("b", "xy");
        assert_eq!(row.longest_value(), 5);
        assert_eq!(CacheRow::default().longest_value(), 0);
    }

    #[test]
    fn test_estimated_size_grows_with_fields() {
        let small = CacheRow::new("dt", "e1").with_field("a", "1");
        let large = small.clone().with_field("b", "x".repeat(100));
        assert!(large.estimated_size() > small.estimated_size() + 100);
    }
}
