//! Catalog rows repository.

use chrono::{DateTime, Utc};
use gatescope_core::classifier::{SecurityMechanism, SslClassification, ThreatProtection};
use gatescope_core::models::CatalogRow;
use rusqlite::{params, Connection, Row};
use serde_json::Value;

use crate::error::{Result, StorageError};

const COLUMNS: &str = "apiproxy, revision, base_path, target_host, target_two_way_ssl,
    security_mechanism, security_flags, rate_limit,
    json_threat_protection, xml_threat_protection, regex_threat_protection,
    virtual_hosts, one_way_intranet, two_way_intranet, one_way_internet, two_way_internet,
    updated_at";

/// Repository for catalog rows.
pub struct CatalogRepo;

impl CatalogRepo {
    /// Insert a row or replace the stored row for the same proxy.
    pub fn upsert(conn: &Connection, row: &CatalogRow) -> Result<()> {
        let flags_json = serde_json::to_string(&row.security_flags)?;
        let hosts_json = serde_json::to_string(&row.virtual_hosts)?;
        let ssl = &row.ssl_profile_flags;
        let threat = &row.threat_protection;

        conn.execute(
            &format!(
                "INSERT INTO catalog_rows ({COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
                 ON CONFLICT(apiproxy) DO UPDATE SET
                    revision = excluded.revision,
                    base_path = excluded.base_path,
                    target_host = excluded.target_host,
                    target_two_way_ssl = excluded.target_two_way_ssl,
                    security_mechanism = excluded.security_mechanism,
                    security_flags = excluded.security_flags,
                    rate_limit = excluded.rate_limit,
                    json_threat_protection = excluded.json_threat_protection,
                    xml_threat_protection = excluded.xml_threat_protection,
                    regex_threat_protection = excluded.regex_threat_protection,
                    virtual_hosts = excluded.virtual_hosts,
                    one_way_intranet = excluded.one_way_intranet,
                    two_way_intranet = excluded.two_way_intranet,
                    one_way_internet = excluded.one_way_internet,
                    two_way_internet = excluded.two_way_internet,
                    updated_at = excluded.updated_at"
            ),
            params![
                row.apiproxy,
                row.revision,
                row.base_path,
                row.target_host,
                row.target_two_way_ssl,
                row.security_mechanism.as_str(),
                flags_json,
                row.rate_limit,
                threat.json,
                threat.xml,
                threat.regex,
                hosts_json,
                ssl.one_way_intranet,
                ssl.two_way_intranet,
                ssl.one_way_internet,
                ssl.two_way_internet,
                row.updated_at.to_rfc3339(),
            ],
        )?;

        Ok(())
    }

    /// Get the stored row of one proxy.
    pub fn get(conn: &Connection, apiproxy: &str) -> Result<Option<CatalogRow>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM catalog_rows WHERE apiproxy = ?1"
        ))?;

        let mut rows = stmt.query([apiproxy])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::decode(row)?)),
            None => Ok(None),
        }
    }

    /// Get all rows ordered by proxy name.
    pub fn get_all(conn: &Connection) -> Result<Vec<CatalogRow>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM catalog_rows ORDER BY apiproxy"
        ))?;

        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(Self::decode(row)?);
        }
        Ok(out)
    }

    /// Count stored rows.
    pub fn count(conn: &Connection) -> Result<i64> {
        Ok(conn.query_row("SELECT COUNT(*) FROM catalog_rows", [], |row| row.get(0))?)
    }

    fn decode(row: &Row<'_>) -> Result<CatalogRow> {
        let apiproxy: String = row.get(0)?;
        let corrupt = |reason: String| StorageError::Corrupt {
            key: apiproxy.clone(),
            reason,
        };

        let mechanism: String = row.get(5)?;
        let security_mechanism: SecurityMechanism =
            serde_json::from_value(Value::String(mechanism.clone()))
                .map_err(|_| corrupt(format!("unknown security mechanism {mechanism:?}")))?;

        let flags_json: String = row.get(6)?;
        let hosts_json: String = row.get(11)?;
        let updated_at: String = row.get(16)?;
        let updated_at = DateTime::parse_from_rfc3339(&updated_at)
            .map_err(|e| corrupt(format!("bad updated_at: {e}")))?
            .with_timezone(&Utc);

        Ok(CatalogRow {
            revision: row.get(1)?,
            base_path: row.get(2)?,
            target_host: row.get(3)?,
            target_two_way_ssl: row.get(4)?,
            security_mechanism,
            security_flags: serde_json::from_str(&flags_json)?,
            rate_limit: row.get(7)?,
            threat_protection: ThreatProtection {
                json: row.get(8)?,
                xml: row.get(9)?,
                regex: row.get(10)?,
            },
            virtual_hosts: serde_json::from_str(&hosts_json)?,
            ssl_profile_flags: SslClassification {
                one_way_intranet: row.get(12)?,
                two_way_intranet: row.get(13)?,
                one_way_internet: row.get(14)?,
                two_way_internet: row.get(15)?,
            },
            updated_at,
            apiproxy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::run_migrations;
    use gatescope_core::classifier::{SecurityCategory, SecurityFlags};

    fn setup_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn sample(name: &str, revision: &str) -> CatalogRow {
        let mut flags = SecurityFlags::default();
        flags.set(SecurityCategory::ApiKey);
        CatalogRow {
            apiproxy: name.to_string(),
            revision: revision.to_string(),
            base_path: Some(format!("/v1/{name}")),
            target_host: "backend.example.com".to_string(),
            target_two_way_ssl: false,
            security_mechanism: SecurityMechanism::ApiKey,
            security_flags: flags,
            rate_limit: Some("30ps".to_string()),
            threat_protection: ThreatProtection {
                json: true,
                xml: false,
                regex: false,
            },
            virtual_hosts: vec!["gwInternet".to_string()],
            ssl_profile_flags: SslClassification {
                one_way_internet: true,
                ..Default::default()
            },
            updated_at: DateTime::parse_from_rfc3339("2024-03-01T10:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        }
    }

    #[test]
    fn test_upsert_and_get() {
        let conn = setup_db();
        let row = sample("orders", "3");

        CatalogRepo::upsert(&conn, &row).unwrap();
        let stored = CatalogRepo::get(&conn, "orders").unwrap().unwrap();

        assert_eq!(stored, row);
    }

    #[test]
    fn test_upsert_replaces_by_proxy() {
        let conn = setup_db();
        CatalogRepo::upsert(&conn, &sample("orders", "3")).unwrap();

        let mut newer = sample("orders", "4");
        newer.security_mechanism = SecurityMechanism::OAuth2;
        newer.rate_limit = None;
        CatalogRepo::upsert(&conn, &newer).unwrap();

        assert_eq!(CatalogRepo::count(&conn).unwrap(), 1);
        let stored = CatalogRepo::get(&conn, "orders").unwrap().unwrap();
        assert_eq!(stored.revision, "4");
        assert_eq!(stored.security_mechanism, SecurityMechanism::OAuth2);
        assert!(stored.rate_limit.is_none());
    }

    #[test]
    fn test_get_nonexistent() {
        let conn = setup_db();
        assert!(CatalogRepo::get(&conn, "missing").unwrap().is_none());
    }

    #[test]
    fn test_get_all_sorted() {
        let conn = setup_db();
        CatalogRepo::upsert(&conn, &sample("users", "1")).unwrap();
        CatalogRepo::upsert(&conn, &sample("accounts", "2")).unwrap();

        let names: Vec<String> = CatalogRepo::get_all(&conn)
            .unwrap()
            .into_iter()
            .map(|r| r.apiproxy)
            .collect();
        assert_eq!(names, vec!["accounts", "users"]);
    }

    #[test]
    fn test_corrupt_mechanism_is_reported() {
        let conn = setup_db();
        CatalogRepo::upsert(&conn, &sample("orders", "1")).unwrap();
        conn.execute(
            "UPDATE catalog_rows SET security_mechanism = 'kerberos'",
            [],
        )
        .unwrap();

        assert!(matches!(
            CatalogRepo::get(&conn, "orders"),
            Err(StorageError::Corrupt { .. })
        ));
    }
}
