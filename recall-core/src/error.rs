//! Error types for RECALL operations

use crate::CacheStatus;
use thiserror::Error;

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid {kind} identifier: {value}")]
    InvalidIdentifier { kind: String, value: String },

    #[error("Invalid row range {begin}..={end}: {reason}")]
    InvalidRowRange { begin: i64, end: i64, reason: String },

    #[error("Page size {requested} exceeds maximum of {max}")]
    PageSizeExceeded { requested: i64, max: i64 },

    #[error("Slot capacity of {capacity} exhausted while allocating field {field}")]
    CapacityExceeded { capacity: usize, field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Invalid status transition from {from} to {to}")]
    InvalidStateTransition { from: CacheStatus, to: CacheStatus },
}

/// Row-level security and SQL safety errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SecurityError {
    #[error("Permission denied: {caller} does not own {id}")]
    OwnerMismatch { id: String, caller: String },

    #[error("Function not allowed in query: {token}")]
    DisallowedFunction { token: String },

    #[error("Query rejected, matched reserved pattern {pattern}")]
    UnsafeSql { pattern: String },
}

/// Relational and archive storage errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Table {table} does not exist")]
    TableMissing { table: String },

    #[error("Statement failed: {reason}")]
    ExecutionFailed { reason: String },

    #[error("Batch insert failed for {failed} of {total} rows")]
    BatchFailed { failed: usize, total: usize },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Archive import of {path} failed: {reason}")]
    ArchiveImportFailed { path: String, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Errors raised by the upstream result source.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("Failed to open result stream for {source_id}: {reason}")]
    OpenFailed { source_id: String, reason: String },

    #[error("Failed to fetch page for {source_id}: {reason}")]
    FetchFailed { source_id: String, reason: String },

    #[error("Failed to map result object: {reason}")]
    MappingFailed { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Incompatible options: {option_a} and {option_b}")]
    IncompatibleOptions { option_a: String, option_b: String },
}

/// Master error type for all RECALL errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecallError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Security error: {0}")]
    Security(#[from] SecurityError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("No cached query found for {id}")]
    NotFound { id: String },

    #[error("Load already in progress for {source_id}")]
    Conflict { source_id: String },

    #[error("Load canceled for {source_id}")]
    Canceled { source_id: String },

    #[error("Query resources for {id} have expired, reset to re-activate")]
    ResourceExpired { id: String },
}

/// Flat error classification for transport mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Conflict,
    Security,
    NotFound,
    Resource,
    Canceled,
    Upstream,
    Config,
}

impl RecallError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RecallError::Validation(_) => ErrorKind::Validation,
            RecallError::Security(_) => ErrorKind::Security,
            RecallError::Store(_) | RecallError::ResourceExpired { .. } => ErrorKind::Resource,
            RecallError::Upstream(_) => ErrorKind::Upstream,
            RecallError::Config(_) => ErrorKind::Config,
            RecallError::NotFound { .. } => ErrorKind::NotFound,
            RecallError::Conflict { .. } => ErrorKind::Conflict,
            RecallError::Canceled { .. } => ErrorKind::Canceled,
        }
    }

    /// True when the failure means the cache table is gone.
    pub fn is_table_missing(&self) -> bool {
        matches!(self, RecallError::Store(StoreError::TableMissing { .. }))
    }
}

/// Result type alias for RECALL operations.
pub type RecallResult<T> = Result<T, RecallError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display_row_range() {
        let err = ValidationError::InvalidRowRange {
            begin: 3,
            end: 2,
            reason: "end precedes begin".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("3..=2"));
        assert!(msg.contains("end precedes begin"));
    }

    #[test]
    fn test_security_error_display_owner_mismatch() {
        let err = SecurityError::OwnerMismatch {
            id: "q1".to_string(),
            caller: "mallory".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Permission denied"));
        assert!(msg.contains("mallory"));
        assert!(msg.contains("q1"));
    }

    #[test]
    fn test_store_error_display_table_missing() {
        let err = StoreError::TableMissing {
            table: "tabc".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("tabc"));
        assert!(msg.contains("does not exist"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "default_page_size".to_string(),
            value: "0".to_string(),
            reason: "must be positive".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("default_page_size"));
        assert!(msg.contains("0"));
        assert!(msg.contains("must be positive"));
    }

    #[test]
    fn test_recall_error_from_variants() {
        let validation = RecallError::from(ValidationError::CapacityExceeded {
            capacity: 2,
            field: "c".to_string(),
        });
        assert!(matches!(validation, RecallError::Validation(_)));
        assert_eq!(validation.kind(), ErrorKind::Validation);

        let security = RecallError::from(SecurityError::DisallowedFunction {
            token: "SIN(x)".to_string(),
        });
        assert!(matches!(security, RecallError::Security(_)));
        assert_eq!(security.kind(), ErrorKind::Security);

        let store = RecallError::from(StoreError::LockPoisoned);
        assert!(matches!(store, RecallError::Store(_)));
        assert_eq!(store.kind(), ErrorKind::Resource);

        let upstream = RecallError::from(UpstreamError::MappingFailed {
            reason: "bad".to_string(),
        });
        assert_eq!(upstream.kind(), ErrorKind::Upstream);

        let config = RecallError::from(ConfigError::MissingRequired {
            field: "archive_dir".to_string(),
        });
        assert_eq!(config.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_struct_variant_kinds() {
        let conflict = RecallError::Conflict {
            source_id: "s".to_string(),
        };
        assert_eq!(conflict.kind(), ErrorKind::Conflict);
        assert!(format!("{}", conflict).contains("already in progress"));

        let expired = RecallError::ResourceExpired {
            id: "e".to_string(),
        };
        assert_eq!(expired.kind(), ErrorKind::Resource);
        assert!(!expired.is_table_missing());

        let missing = RecallError::from(StoreError::TableMissing {
            table: "t".to_string(),
        });
        assert!(missing.is_table_missing());
    }
}
