//! Data model shared by discovery, extraction, classification and persistence.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::{SecurityFlags, SecurityMechanism, SslClassification, ThreatProtection};

/// One deployable unit: a proxy at a specific revision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProxyRevision {
    pub proxy_name: String,
    pub revision: String,
}

impl ProxyRevision {
    /// Creates a new proxy/revision pair.
    pub fn new(proxy_name: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            proxy_name: proxy_name.into(),
            revision: revision.into(),
        }
    }
}

impl fmt::Display for ProxyRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} rev {}", self.proxy_name, self.revision)
    }
}

/// Where a policy is referenced from within the proxy's flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApplicationLevel {
    /// Referenced from a pre-flow request step.
    pub global: bool,
    /// Referenced from a conditional flow request step.
    pub flow: bool,
}

impl ApplicationLevel {
    /// Returns true if the policy executes anywhere.
    pub fn is_applied(&self) -> bool {
        self.global || self.flow
    }
}

/// Summary of one policy declared by a proxy revision.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PolicyRecord {
    /// Policy file name, as referenced by flow steps.
    pub policy_file_name: String,
    /// Vendor policy type (`VerifyAPIKey`, `ServiceCallout`, ...).
    pub policy_type: String,
    /// Display name.
    pub policy_name: String,
    pub enabled: bool,
    /// Target URL of a service callout.
    pub callout_url: Option<String>,
    /// API key reference of a key verification policy.
    pub api_key: Option<String>,
    /// Allowed origins of a CORS policy.
    pub cors_policy: Option<String>,
    /// Shared flow invoked by a flow callout.
    pub shared_flow_bundle: Option<String>,
    /// Spike-arrest rate (e.g. `30ps`).
    pub rate_limit: Option<String>,
    /// Source addresses allowed by an access-control policy.
    pub ip_allow_list: Vec<String>,
    pub application_level: ApplicationLevel,
}

/// TLS settings of a target connection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SslInfo {
    pub enabled: bool,
    pub client_auth_enabled: bool,
    pub key_store: Option<String>,
    pub trust_store: Option<String>,
}

/// A backend target with a resolvable URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetEndpoint {
    pub name: String,
    pub url: String,
    pub ssl_info: Option<SslInfo>,
}

/// One catalog entry per active proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogRow {
    pub apiproxy: String,
    pub revision: String,
    pub base_path: Option<String>,
    /// Hostname of the first target with a URL, or `N/A`.
    pub target_host: String,
    /// Whether that target presents a client certificate.
    pub target_two_way_ssl: bool,
    pub security_mechanism: SecurityMechanism,
    pub security_flags: SecurityFlags,
    pub rate_limit: Option<String>,
    pub threat_protection: ThreatProtection,
    pub virtual_hosts: Vec<String>,
    pub ssl_profile_flags: SslClassification,
    pub updated_at: DateTime<Utc>,
}

/// A metric value as returned by the search backend, after coercion.
///
/// Values that cannot be coerced keep their original text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl MetricValue {
    /// Converts a raw JSON value. `null` is treated as absent.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => None,
            serde_json::Value::Number(n) => Some(match n.as_i64() {
                Some(i) => MetricValue::Int(i),
                None => MetricValue::Float(n.as_f64().unwrap_or_default()),
            }),
            serde_json::Value::String(s) => Some(MetricValue::Text(s.clone())),
            other => Some(MetricValue::Text(other.to_string())),
        }
    }

    /// Float-then-truncate coercion. Unparsable values are returned unchanged.
    pub fn coerce_int(self) -> Self {
        match self {
            MetricValue::Float(f) if f.is_finite() => MetricValue::Int(f.trunc() as i64),
            MetricValue::Text(s) => match s.trim().parse::<f64>() {
                Ok(f) if f.is_finite() => MetricValue::Int(f.trunc() as i64),
                _ => MetricValue::Text(s),
            },
            other => other,
        }
    }

    /// Float coercion. Unparsable values are returned unchanged.
    pub fn coerce_float(self) -> Self {
        match self {
            MetricValue::Int(i) => MetricValue::Float(i as f64),
            MetricValue::Text(s) => match s.trim().parse::<f64>() {
                Ok(f) => MetricValue::Float(f),
                Err(_) => MetricValue::Text(s),
            },
            other => other,
        }
    }
}

/// Fields of a monthly metric row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricField {
    OnboardedApis,
    PeakTps,
    AvgTps,
    NewConsumers,
    ActiveConsumers,
    Requests,
    BytesIn,
    BytesOut,
}

impl MetricField {
    /// Returns all metric fields.
    pub fn all() -> &'static [MetricField] {
        &[
            MetricField::OnboardedApis,
            MetricField::PeakTps,
            MetricField::AvgTps,
            MetricField::NewConsumers,
            MetricField::ActiveConsumers,
            MetricField::Requests,
            MetricField::BytesIn,
            MetricField::BytesOut,
        ]
    }

    /// Record key used by the search queries and the storage columns.
    pub fn key(&self) -> &'static str {
        match self {
            MetricField::OnboardedApis => "onboarded_apis",
            MetricField::PeakTps => "peak_tps",
            MetricField::AvgTps => "avg_tps",
            MetricField::NewConsumers => "new_consumers",
            MetricField::ActiveConsumers => "active_consumers",
            MetricField::Requests => "requests",
            MetricField::BytesIn => "bytes_in",
            MetricField::BytesOut => "bytes_out",
        }
    }

    /// Returns true for fields stored as integers.
    pub fn is_integer(&self) -> bool {
        !matches!(self, MetricField::AvgTps)
    }
}

/// Aggregated usage metrics for one calendar month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyMetricRow {
    /// First day of the month in the target time zone.
    pub month: NaiveDate,
    pub onboarded_apis: Option<MetricValue>,
    pub peak_tps: Option<MetricValue>,
    pub avg_tps: Option<MetricValue>,
    pub new_consumers: Option<MetricValue>,
    pub active_consumers: Option<MetricValue>,
    pub requests: Option<MetricValue>,
    pub bytes_in: Option<MetricValue>,
    pub bytes_out: Option<MetricValue>,
}

impl MonthlyMetricRow {
    /// Creates a row with every field absent.
    pub fn empty(month: NaiveDate) -> Self {
        Self {
            month,
            onboarded_apis: None,
            peak_tps: None,
            avg_tps: None,
            new_consumers: None,
            active_consumers: None,
            requests: None,
            bytes_in: None,
            bytes_out: None,
        }
    }

    /// Returns a field slot.
    pub fn get(&self, field: MetricField) -> Option<&MetricValue> {
        match field {
            MetricField::OnboardedApis => self.onboarded_apis.as_ref(),
            MetricField::PeakTps => self.peak_tps.as_ref(),
            MetricField::AvgTps => self.avg_tps.as_ref(),
            MetricField::NewConsumers => self.new_consumers.as_ref(),
            MetricField::ActiveConsumers => self.active_consumers.as_ref(),
            MetricField::Requests => self.requests.as_ref(),
            MetricField::BytesIn => self.bytes_in.as_ref(),
            MetricField::BytesOut => self.bytes_out.as_ref(),
        }
    }

    /// Returns a mutable field slot.
    pub fn slot_mut(&mut self, field: MetricField) -> &mut Option<MetricValue> {
        match field {
            MetricField::OnboardedApis => &mut self.onboarded_apis,
            MetricField::PeakTps => &mut self.peak_tps,
            MetricField::AvgTps => &mut self.avg_tps,
            MetricField::NewConsumers => &mut self.new_consumers,
            MetricField::ActiveConsumers => &mut self.active_consumers,
            MetricField::Requests => &mut self.requests,
            MetricField::BytesIn => &mut self.bytes_in,
            MetricField::BytesOut => &mut self.bytes_out,
        }
    }
}

/// Destination for the rows produced by a run.
///
/// Implementations upsert keyed by `apiproxy` (catalog) and `month`
/// (metrics); re-applying identical rows must leave identical state.
pub trait RowSink {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Persists catalog rows, returning how many were written.
    fn upsert_catalog(&self, rows: &[CatalogRow]) -> std::result::Result<usize, Self::Error>;

    /// Persists monthly metric rows, returning how many were written.
    fn upsert_metrics(&self, rows: &[MonthlyMetricRow])
        -> std::result::Result<usize, Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn application_level_applied() {
        assert!(!ApplicationLevel::default().is_applied());
        assert!(ApplicationLevel { global: true, flow: false }.is_applied());
        assert!(ApplicationLevel { global: false, flow: true }.is_applied());
    }

    #[test]
    fn metric_value_from_json() {
        assert_eq!(MetricValue::from_json(&json!(null)), None);
        assert_eq!(MetricValue::from_json(&json!(3)), Some(MetricValue::Int(3)));
        assert_eq!(MetricValue::from_json(&json!(2.5)), Some(MetricValue::Float(2.5)));
        assert_eq!(
            MetricValue::from_json(&json!("12")),
            Some(MetricValue::Text("12".into()))
        );
    }

    #[test]
    fn coerce_int_truncates_float_strings() {
        assert_eq!(MetricValue::Text("41.9".into()).coerce_int(), MetricValue::Int(41));
        assert_eq!(MetricValue::Float(7.2).coerce_int(), MetricValue::Int(7));
        assert_eq!(MetricValue::Int(5).coerce_int(), MetricValue::Int(5));
    }

    #[test]
    fn coerce_leaves_garbage_alone() {
        assert_eq!(
            MetricValue::Text("n/a".into()).coerce_int(),
            MetricValue::Text("n/a".into())
        );
        assert_eq!(
            MetricValue::Text("".into()).coerce_float(),
            MetricValue::Text("".into())
        );
    }

    #[test]
    fn coerce_float() {
        assert_eq!(MetricValue::Text("1.25".into()).coerce_float(), MetricValue::Float(1.25));
        assert_eq!(MetricValue::Int(2).coerce_float(), MetricValue::Float(2.0));
    }

    #[test]
    fn metric_row_slots() {
        let month = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let mut row = MonthlyMetricRow::empty(month);
        *row.slot_mut(MetricField::Requests) = Some(MetricValue::Int(100));
        assert_eq!(row.get(MetricField::Requests), Some(&MetricValue::Int(100)));
        assert_eq!(row.requests, Some(MetricValue::Int(100)));
        assert!(row.get(MetricField::BytesIn).is_none());
    }

    #[test]
    fn metric_field_keys_are_unique() {
        let keys: std::collections::HashSet<_> =
            MetricField::all().iter().map(|f| f.key()).collect();
        assert_eq!(keys.len(), MetricField::all().len());
        assert!(!MetricField::AvgTps.is_integer());
        assert!(MetricField::PeakTps.is_integer());
    }

    #[test]
    fn proxy_revision_display() {
        assert_eq!(ProxyRevision::new("orders", "7").to_string(), "orders rev 7");
    }
}
