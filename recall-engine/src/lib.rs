//! RECALL Engine - Result Caching and Re-Query
//!
//! Drains an upstream query's results into a relational cache table, exposes
//! them through a field-named view, and lets the owner re-query that view with
//! their own projection, filters, grouping and ordering, then page through the
//! answer.
//!
//! The [`LifecycleRegistry`] is the entry point. Everything else is a building
//! block it wires together:
//!
//! - [`ColumnAllocator`] maps field names onto numbered slot columns
//! - [`BatchLoader`] writes mapped rows in batches, truncating on failure
//! - [`ViewBuilder`] creates and drops cache tables and views
//! - [`SqlTranslator`] turns a projection into safe SQL over a view
//! - [`PagedCursor`] pages forward, backward, or by row range

pub mod allocator;
pub mod cursor;
pub mod entry;
pub mod inflight;
pub mod loader;
pub mod metrics;
pub mod registry;
pub mod telemetry;
pub mod translator;
pub mod view;

pub use allocator::{slot_column, ColumnAllocator};
pub use cursor::{cache_row_from, Page, PageOutcome, PagedCursor};
pub use entry::{EntryState, QueryCacheEntry};
pub use inflight::{InFlightGuard, InFlightLoads};
pub use loader::{truncate_value, BatchLoader, LoadSummary, TRUNCATION_MARKER};
pub use metrics::TracingMetricsSink;
pub use registry::{LifecycleRegistry, LoadOutcome, RegistryBuilder, SharedEntry};
pub use telemetry::{init_tracing, TelemetryConfig};
pub use translator::{check_sql_safe, with_default_order, SqlTranslator};
pub use view::{CacheTableDescriptor, ViewBuilder};
