//! Enum types for RECALL cache entries

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// CACHE STATUS
// ============================================================================

/// Lifecycle status of a cached query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CacheStatus {
    #[default]
    None,
    Loading,
    Loaded,
    Creating,
    Canceled,
    Error,
    Available,
}

impl CacheStatus {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            CacheStatus::None => "NONE",
            CacheStatus::Loading => "LOADING",
            CacheStatus::Loaded => "LOADED",
            CacheStatus::Creating => "CREATING",
            CacheStatus::Canceled => "CANCELED",
            CacheStatus::Error => "ERROR",
            CacheStatus::Available => "AVAILABLE",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, CacheStatusParseError> {
        match s.to_uppercase().as_str() {
            "NONE" => Ok(CacheStatus::None),
            "LOADING" => Ok(CacheStatus::Loading),
            "LOADED" => Ok(CacheStatus::Loaded),
            "CREATING" => Ok(CacheStatus::Creating),
            "CANCELED" => Ok(CacheStatus::Canceled),
            "ERROR" => Ok(CacheStatus::Error),
            "AVAILABLE" => Ok(CacheStatus::Available),
            _ => Err(CacheStatusParseError(s.to_string())),
        }
    }

    /// Work is underway and may still be canceled.
    pub fn is_in_progress(&self) -> bool {
        matches!(self, CacheStatus::Loading | CacheStatus::Creating)
    }

    /// No further transitions leave this status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CacheStatus::Canceled | CacheStatus::Error)
    }

    /// Check whether moving to `next` follows the lifecycle.
    ///
    /// Re-persisting the same status is always allowed. CANCELED and ERROR
    /// are reachable from every non-terminal status.
    pub fn can_transition_to(&self, next: CacheStatus) -> bool {
        if *self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        match next {
            CacheStatus::Canceled | CacheStatus::Error => true,
            CacheStatus::Loading => *self == CacheStatus::None,
            CacheStatus::Loaded => *self == CacheStatus::Loading,
            CacheStatus::Creating => *self == CacheStatus::Loaded,
            CacheStatus::Available => *self == CacheStatus::Creating,
            CacheStatus::None => false,
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for CacheStatus {
    type Err = CacheStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid cache status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStatusParseError(pub String);

impl fmt::Display for CacheStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid cache status: {}", self.0)
    }
}

impl std::error::Error for CacheStatusParseError {}

// ============================================================================
// PAGING
// ============================================================================

/// Position of a paging cursor relative to its result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PagePosition {
    #[default]
    BeforeFirst,
    Middle,
    AfterLast,
}

/// Whether a page holds every row of its window or was cut short by the byte cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageStatus {
    Complete,
    Partial,
}

impl fmt::Display for PagePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PagePosition::BeforeFirst => "BEFORE_FIRST",
            PagePosition::Middle => "MIDDLE",
            PagePosition::AfterLast => "AFTER_LAST",
        };
        write!(f, "{}", s)
    }
}
