//! Monthly metrics repository.

use chrono::NaiveDate;
use gatescope_core::models::{MetricField, MetricValue, MonthlyMetricRow};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, Row};

use crate::error::{Result, StorageError};

const MONTH_FORMAT: &str = "%Y-%m-%d";

fn to_sql(value: Option<&MetricValue>) -> SqlValue {
    match value {
        None => SqlValue::Null,
        Some(MetricValue::Int(i)) => SqlValue::Integer(*i),
        Some(MetricValue::Float(f)) => SqlValue::Real(*f),
        Some(MetricValue::Text(s)) => SqlValue::Text(s.clone()),
    }
}

fn from_sql(value: ValueRef<'_>) -> Option<MetricValue> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(MetricValue::Int(i)),
        ValueRef::Real(f) => Some(MetricValue::Float(f)),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Some(MetricValue::Text(String::from_utf8_lossy(bytes).into_owned()))
        }
    }
}

fn columns() -> String {
    MetricField::all()
        .iter()
        .map(|f| f.key())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Repository for monthly metric rows.
pub struct MetricsRepo;

impl MetricsRepo {
    /// Insert a row or replace every field of the stored row for the same month.
    pub fn upsert(conn: &Connection, row: &MonthlyMetricRow) -> Result<()> {
        let fields = MetricField::all();
        let placeholders: Vec<String> = (2..=fields.len() + 1).map(|i| format!("?{i}")).collect();
        let updates: Vec<String> = fields
            .iter()
            .map(|f| format!("{0} = excluded.{0}", f.key()))
            .collect();

        let sql = format!(
            "INSERT INTO monthly_metrics (month, {}) VALUES (?1, {})
             ON CONFLICT(month) DO UPDATE SET {}",
            columns(),
            placeholders.join(", "),
            updates.join(", ")
        );

        let values = std::iter::once(SqlValue::Text(row.month.format(MONTH_FORMAT).to_string()))
            .chain(fields.iter().map(|f| to_sql(row.get(*f))));

        conn.execute(&sql, params_from_iter(values))?;
        Ok(())
    }

    /// Get the row of one month.
    pub fn get(conn: &Connection, month: NaiveDate) -> Result<Option<MonthlyMetricRow>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT month, {} FROM monthly_metrics WHERE month = ?1",
            columns()
        ))?;

        let mut rows = stmt.query([month.format(MONTH_FORMAT).to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::decode(row)?)),
            None => Ok(None),
        }
    }

    /// Get all rows in month order.
    pub fn get_all(conn: &Connection) -> Result<Vec<MonthlyMetricRow>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT month, {} FROM monthly_metrics ORDER BY month ASC",
            columns()
        ))?;

        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(Self::decode(row)?);
        }
        Ok(out)
    }

    fn decode(row: &Row<'_>) -> Result<MonthlyMetricRow> {
        let month_str: String = row.get(0)?;
        let month = NaiveDate::parse_from_str(&month_str, MONTH_FORMAT).map_err(|e| {
            StorageError::Corrupt {
                key: month_str.clone(),
                reason: e.to_string(),
            }
        })?;

        let mut out = MonthlyMetricRow::empty(month);
        for (i, field) in MetricField::all().iter().enumerate() {
            *out.slot_mut(*field) = from_sql(row.get_ref(i + 1)?);
        }
        Ok(out)
    }
}
