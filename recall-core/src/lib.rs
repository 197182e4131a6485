//! RECALL Core - Data Types
//!
//! Pure data structures shared by the storage and engine crates: cache rows,
//! projections, durable records, status enums, configuration, the error
//! taxonomy, and the collaborator traits the engine is wired with.

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub mod config;
pub mod enums;
pub mod error;
pub mod metrics;
pub mod projection;
pub mod record;
pub mod row;
pub mod source;

pub use config::*;
pub use enums::*;
pub use error::*;
pub use metrics::*;
pub use projection::*;
pub use record::*;
pub use row::*;
pub use source::*;

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Generate a fresh name base for a cache table/view pair.
///
/// UUIDv7 rendered without dashes, so `t{base}` and `v{base}` are plain
/// identifiers that sort by creation time.
pub fn new_name_base() -> String {
    Uuid::now_v7().simple().to_string()
}

/// Generate a new entry id.
pub fn new_entry_id() -> String {
    Uuid::now_v7().to_string()
}

/// Physical table name for a name base.
pub fn table_name_for(base: &str) -> String {
    format!("t{}", base)
}

/// Logical view name for a name base.
pub fn view_name_for(base: &str) -> String {
    format!("v{}", base)
}

/// Check that a name is a plain SQL identifier (`[A-Za-z_][A-Za-z0-9_]*`).
pub fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Truncate a string to at most `limit` characters, respecting char boundaries.
pub fn truncate_chars(value: &str, limit: usize) -> &str {
    match value.char_indices().nth(limit) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}
