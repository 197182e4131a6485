//! Configuration types

use crate::{ConfigError, RecallError, RecallResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecallConfig {
    // Paging
    /// Page size used when a caller does not request one.
    pub default_page_size: i64,
    /// Upper bound on page size and on `get_rows` ranges. 0 disables the bound.
    pub max_page_size: i64,
    /// Approximate byte cap per page. 0 disables the cap.
    pub page_byte_trigger: u64,

    // Loading
    /// Rows accumulated before a batch insert is flushed.
    pub rows_per_batch: usize,
    /// Longest value stored before truncation.
    pub max_value_length: usize,
    /// Number of dynamic `fieldN` columns per cache table.
    pub slot_capacity: usize,
    /// Insert attempts per row, halving the truncation length each time.
    pub max_insert_attempts: u32,

    // Lifecycle
    /// Durable status messages are cut to this many characters.
    pub status_message_limit: usize,
    /// Emit usage events to the metrics sink.
    pub collect_metrics: bool,

    // Archive recovery
    pub archive_dir: Option<PathBuf>,
    pub archive_import_command: Option<String>,
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            default_page_size: 10,
            max_page_size: 1000,
            page_byte_trigger: 0,
            rows_per_batch: 100,
            max_value_length: 65535,
            slot_capacity: 900,
            max_insert_attempts: 10,
            status_message_limit: 200,
            collect_metrics: true,
            archive_dir: None,
            archive_import_command: None,
        }
    }
}

impl RecallConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from `RECALL_*` environment variables.
    ///
    /// Unset or unparseable variables fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            default_page_size: std::env::var("RECALL_DEFAULT_PAGE_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.default_page_size),
            max_page_size: std::env::var("RECALL_MAX_PAGE_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_page_size),
            page_byte_trigger: std::env::var("RECALL_PAGE_BYTE_TRIGGER")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.page_byte_trigger),
            rows_per_batch: std::env::var("RECALL_ROWS_PER_BATCH")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.rows_per_batch),
            max_value_length: std::env::var("RECALL_MAX_VALUE_LENGTH")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_value_length),
            slot_capacity: std::env::var("RECALL_SLOT_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.slot_capacity),
            max_insert_attempts: std::env::var("RECALL_MAX_INSERT_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_insert_attempts),
            status_message_limit: std::env::var("RECALL_STATUS_MESSAGE_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.status_message_limit),
            collect_metrics: std::env::var("RECALL_COLLECT_METRICS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.collect_metrics),
            archive_dir: std::env::var("RECALL_ARCHIVE_DIR").ok().map(PathBuf::from),
            archive_import_command: std::env::var("RECALL_ARCHIVE_IMPORT_COMMAND").ok(),
        }
    }

    pub fn with_default_page_size(mut self, size: i64) -> Self {
        self.default_page_size = size;
        self
    }

    pub fn with_max_page_size(mut self, size: i64) -> Self {
        self.max_page_size = size;
        self
    }

    pub fn with_page_byte_trigger(mut self, bytes: u64) -> Self {
        self.page_byte_trigger = bytes;
        self
    }

    pub fn with_rows_per_batch(mut self, rows: usize) -> Self {
        self.rows_per_batch = rows;
        self
    }

    pub fn with_max_value_length(mut self, length: usize) -> Self {
        self.max_value_length = length;
        self
    }

    pub fn with_slot_capacity(mut self, capacity: usize) -> Self {
        self.slot_capacity = capacity;
        self
    }

    pub fn with_max_insert_attempts(mut self, attempts: u32) -> Self {
        self.max_insert_attempts = attempts;
        self
    }

    pub fn with_collect_metrics(mut self, enabled: bool) -> Self {
        self.collect_metrics = enabled;
        self
    }

    pub fn with_archive(mut self, dir: impl Into<PathBuf>, import_command: impl Into<String>) -> Self {
        self.archive_dir = Some(dir.into());
        self.archive_import_command = Some(import_command.into());
        self
    }

    /// Page size bound as used for range checks; `i64::MAX` when unbounded.
    pub fn effective_max_page_size(&self) -> i64 {
        if self.max_page_size > 0 {
            self.max_page_size
        } else {
            i64::MAX
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> RecallResult<()> {
        // Validate default_page_size
        if self.default_page_size <= 0 {
            return Err(invalid(
                "default_page_size",
                self.default_page_size.to_string(),
                "default_page_size must be greater than 0",
            ));
        }

        // Validate max_page_size
        if self.max_page_size < 0 {
            return Err(invalid(
                "max_page_size",
                self.max_page_size.to_string(),
                "max_page_size must be non-negative",
            ));
        }

        // Validate default fits within max
        if self.max_page_size > 0 && self.default_page_size > self.max_page_size {
            return Err(invalid(
                "default_page_size",
                self.default_page_size.to_string(),
                "default_page_size must not exceed max_page_size",
            ));
        }

        // Validate rows_per_batch
        if self.rows_per_batch == 0 {
            return Err(invalid(
                "rows_per_batch",
                self.rows_per_batch.to_string(),
                "rows_per_batch must be greater than 0",
            ));
        }

        // Validate max_value_length
        if self.max_value_length == 0 {
            return Err(invalid(
                "max_value_length",
                self.max_value_length.to_string(),
                "max_value_length must be greater than 0",
            ));
        }

        // Validate slot_capacity
        if self.slot_capacity == 0 {
            return Err(invalid(
                "slot_capacity",
                self.slot_capacity.to_string(),
                "slot_capacity must be greater than 0",
            ));
        }

        // Validate max_insert_attempts
        if self.max_insert_attempts == 0 {
            return Err(invalid(
                "max_insert_attempts",
                self.max_insert_attempts.to_string(),
                "max_insert_attempts must be greater than 0",
            ));
        }

        // Validate status_message_limit
        if self.status_message_limit == 0 {
            return Err(invalid(
                "status_message_limit",
                self.status_message_limit.to_string(),
                "status_message_limit must be greater than 0",
            ));
        }

        // Archive settings travel together
        match (&self.archive_dir, &self.archive_import_command) {
            (Some(_), None) => Err(RecallError::Config(ConfigError::MissingRequired {
                field: "archive_import_command".to_string(),
            })),
            (None, Some(_)) => Err(RecallError::Config(ConfigError::MissingRequired {
                field: "archive_dir".to_string(),
            })),
            _ => Ok(()),
        }
    }
}

fn invalid(field: &str, value: String, reason: &str) -> RecallError {
    RecallError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value,
        reason: reason.to_string(),
    })
}
