//! Database schema and migrations.

use rusqlite::Connection;
use tracing::info;

use crate::error::Result;

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 2;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version < SCHEMA_VERSION {
        info!(
            "Running migrations from version {} to {}",
            current_version, SCHEMA_VERSION
        );

        if current_version < 1 {
            migrate_v1(conn)?;
        }

        if current_version < 2 {
            migrate_v2(conn)?;
        }

        set_schema_version(conn, SCHEMA_VERSION)?;
        info!("Migrations complete");
    }

    Ok(())
}

/// Get the current schema version.
fn get_schema_version(conn: &Connection) -> Result<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        [],
    )?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .ok();

    Ok(version.unwrap_or(0))
}

/// Set the schema version.
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

/// Migration to version 1: catalog and monthly metrics.
fn migrate_v1(conn: &Connection) -> Result<()> {
    info!("Applying migration v1: catalog and metrics tables");

    // One row per active proxy; the latest run wins.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS catalog_rows (
            apiproxy TEXT PRIMARY KEY,
            revision TEXT NOT NULL,
            base_path TEXT,
            target_host TEXT NOT NULL,
            target_two_way_ssl INTEGER NOT NULL DEFAULT 0,
            security_mechanism TEXT NOT NULL,
            security_flags TEXT NOT NULL DEFAULT '{}',
            rate_limit TEXT,
            json_threat_protection INTEGER NOT NULL DEFAULT 0,
            xml_threat_protection INTEGER NOT NULL DEFAULT 0,
            regex_threat_protection INTEGER NOT NULL DEFAULT 0,
            virtual_hosts TEXT NOT NULL DEFAULT '[]',
            one_way_intranet INTEGER NOT NULL DEFAULT 0,
            two_way_intranet INTEGER NOT NULL DEFAULT 0,
            one_way_internet INTEGER NOT NULL DEFAULT 0,
            two_way_internet INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    // Metric columns are untyped: values that could not be coerced keep their text.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS monthly_metrics (
            month TEXT PRIMARY KEY,
            onboarded_apis,
            peak_tps,
            avg_tps,
            new_consumers,
            active_consumers,
            requests,
            bytes_in,
            bytes_out
        )",
        [],
    )?;

    Ok(())
}

/// Migration to version 2: lookup index for mechanism reports.
fn migrate_v2(conn: &Connection) -> Result<()> {
    info!("Applying migration v2: catalog mechanism index");

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_catalog_mechanism ON catalog_rows (security_mechanism)",
        [],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_create_tables() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        conn.execute("SELECT * FROM catalog_rows LIMIT 1", []).ok();
        conn.execute("SELECT * FROM monthly_metrics LIMIT 1", []).ok();

        let version: i32 = conn
            .query_row("SELECT version FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn mechanism_index_exists() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = 'idx_catalog_mechanism'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}
