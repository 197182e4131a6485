//! User projections over a cached view.

use serde::{Deserialize, Serialize};

/// The four SQL fragments a caller can supply against a cached view.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Projection {
    pub fields: Option<String>,
    pub conditions: Option<String>,
    pub grouping: Option<String>,
    pub order: Option<String>,
}

impl Projection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fields(mut self, fields: impl Into<String>) -> Self {
        self.fields = Some(fields.into());
        self
    }

    pub fn with_conditions(mut self, conditions: impl Into<String>) -> Self {
        self.conditions = Some(conditions.into());
        self
    }

    pub fn with_grouping(mut self, grouping: impl Into<String>) -> Self {
        self.grouping = Some(grouping.into());
        self
    }

    pub fn with_order(mut self, order: impl Into<String>) -> Self {
        self.order = Some(order.into());
        self
    }

    /// No fragment was supplied at all.
    pub fn is_unset(&self) -> bool {
        self.fields.is_none()
            && self.conditions.is_none()
            && self.grouping.is_none()
            && self.order.is_none()
    }

    /// Drop blank fragments. A missing `fields` means every column.
    pub fn normalized(&self) -> Self {
        Self {
            fields: non_blank(&self.fields),
            conditions: non_blank(&self.conditions),
            grouping: non_blank(&self.grouping),
            order: non_blank(&self.order),
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .map(str::to_string)
}

/// Parameters for binding a projection to a loaded view.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CreateRequest {
    /// Id for the new entry; generated when absent.
    pub entry_id: Option<String>,
    pub alias: Option<String>,
    pub projection: Projection,
    /// Values `<= 0` select the configured default.
    pub page_size: i64,
    /// Fixed columns that should also surface as fields when rows are read back.
    pub fixed_fields_in_event: Vec<String>,
}

impl CreateRequest {
    pub fn new(projection: Projection) -> Self {
        Self {
            projection,
            ..Self::default()
        }
    }

    pub fn with_entry_id(mut self, id: impl Into<String>) -> Self {
        self.entry_id = Some(id.into());
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_page_size(mut self, page_size: i64) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_fixed_fields(mut self, fields: Vec<String>) -> Self {
        self.fixed_fields_in_event = fields;
        self
    }
}
