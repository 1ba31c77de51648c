//! Database repositories for each table.

pub mod catalog;
pub mod metrics;

pub use catalog::CatalogRepo;
pub use metrics::MetricsRepo;
