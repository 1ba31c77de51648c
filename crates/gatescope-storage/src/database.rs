//! High-level database interface.

use std::path::PathBuf;

use chrono::NaiveDate;
use directories::ProjectDirs;
use gatescope_core::models::{CatalogRow, MonthlyMetricRow, RowSink};
use tracing::{debug, info};

use crate::error::{Result, StorageError};
use crate::pool::ConnectionPool;
use crate::repository::{CatalogRepo, MetricsRepo};

/// High-level database interface for Gatescope.
#[derive(Clone)]
pub struct Database {
    pool: ConnectionPool,
}

impl Database {
    /// Create a new database in the default app data directory.
    pub fn new() -> Result<Self> {
        Self::with_path(Self::default_db_path()?)
    }

    /// Create a new database at a specific path.
    pub fn with_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!("Opening database at: {:?}", path);
        let pool = ConnectionPool::new(&path)?;

        Ok(Self { pool })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let pool = ConnectionPool::in_memory()?;
        Ok(Self { pool })
    }

    /// Get the default database path.
    pub fn default_db_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "gatescope", "gatescope")
            .ok_or_else(|| StorageError::Config("Could not determine app data directory".into()))?;

        Ok(proj_dirs.data_dir().join("gatescope.db"))
    }

    // === Catalog ===

    /// Upsert catalog rows in one transaction.
    pub fn save_catalog(&self, rows: &[CatalogRow]) -> Result<usize> {
        let conn = self.pool.get()?;
        let tx = conn.unchecked_transaction()?;
        for row in rows {
            CatalogRepo::upsert(&tx, row)?;
        }
        tx.commit()?;

        debug!(rows = rows.len(), "Saved catalog rows");
        Ok(rows.len())
    }

    /// Get the stored row of one proxy.
    pub fn get_catalog_row(&self, apiproxy: &str) -> Result<Option<CatalogRow>> {
        let conn = self.pool.get()?;
        CatalogRepo::get(&conn, apiproxy)
    }

    /// Get every stored catalog row.
    pub fn get_catalog(&self) -> Result<Vec<CatalogRow>> {
        let conn = self.pool.get()?;
        CatalogRepo::get_all(&conn)
    }

    // === Metrics ===

    /// Upsert monthly rows in one transaction.
    pub fn save_metrics(&self, rows: &[MonthlyMetricRow]) -> Result<usize> {
        let conn = self.pool.get()?;
        let tx = conn.unchecked_transaction()?;
        for row in rows {
            MetricsRepo::upsert(&tx, row)?;
        }
        tx.commit()?;

        debug!(rows = rows.len(), "Saved monthly metrics");
        Ok(rows.len())
    }

    /// Get the stored row of one month.
    pub fn get_month(&self, month: NaiveDate) -> Result<Option<MonthlyMetricRow>> {
        let conn = self.pool.get()?;
        MetricsRepo::get(&conn, month)
    }

    /// Get every stored monthly row.
    pub fn get_metrics(&self) -> Result<Vec<MonthlyMetricRow>> {
        let conn = self.pool.get()?;
        MetricsRepo::get_all(&conn)
    }
}

impl RowSink for Database {
    type Error = StorageError;

    fn upsert_catalog(&self, rows: &[CatalogRow]) -> Result<usize> {
        self.save_catalog(rows)
    }

    fn upsert_metrics(&self, rows: &[MonthlyMetricRow]) -> Result<usize> {
        self.save_metrics(rows)
    }
}
