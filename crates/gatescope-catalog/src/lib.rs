//! Gatescope Catalog - discovery, catalog assembly and monthly metrics.
//!
//! [`build_catalog`] resolves the active proxy revisions of an environment
//! (bulk deployment info, then per-proxy probing, then log-search traffic)
//! and turns each one into a classified [`CatalogRow`](gatescope_core::CatalogRow).
//! [`build_monthly_metrics`] runs the usage queries against the log-search
//! backend and merges them into one row per calendar month.

pub mod assembler;
pub mod discovery;
pub mod edge;
pub mod metrics;
pub mod queries;
pub mod traffic;

pub use assembler::{build_catalog, CatalogAssembler};
pub use discovery::{
    latest_revision, resolve_active_pairs, BulkInfoStrategy, DiscoveryResolver,
    DiscoveryStrategy, Outcome, ProbeStrategy, TrafficStrategy,
};
pub use edge::{EdgeAuth, EdgeClient, EdgeConfig, DEFAULT_MANAGEMENT_URL};
pub use metrics::{
    build_monthly_metrics, default_offset, index_by_month, merge_monthly, normalize_month,
    MetricsAggregator, MonthMap,
};
pub use traffic::{SearchTrafficSource, TrafficSource};
