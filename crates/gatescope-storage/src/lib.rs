//! Gatescope Storage - SQLite persistence sink.
//!
//! Stores the output of a run: one catalog row per active proxy and one
//! metrics row per calendar month. Writes are upserts keyed by `apiproxy`
//! and `month`, so re-applying the same rows leaves the database unchanged.
//!
//! # Example
//!
//! ```no_run
//! use gatescope_core::RowSink;
//! use gatescope_storage::Database;
//!
//! let db = Database::in_memory().unwrap();
//! db.upsert_metrics(&[]).unwrap();
//! assert!(db.get_metrics().unwrap().is_empty());
//! ```

mod database;
pub mod error;
mod pool;
pub mod repository;
mod schema;

pub use database::Database;
pub use error::{Result, StorageError};
pub use pool::ConnectionPool;
pub use repository::{CatalogRepo, MetricsRepo};
