//! Run settings resolved from environment variables.
//!
//! Everything is read once, up front, so that a missing or invalid value
//! fails the run before any network activity.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::FixedOffset;
use gatescope_catalog::{default_offset, queries, EdgeAuth, EdgeConfig, DEFAULT_MANAGEMENT_URL};
use gatescope_search::{CorporateProxy, Credentials, SearchConfig};
use thiserror::Error;

/// Configuration errors. These are fatal and never retried.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("Missing environment variable: {0}")]
    Missing(String),

    #[error("Unknown environment key {0:?} (expected e1, e2 or e3)")]
    UnknownEnvironment(String),

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: String, reason: String },
}

/// Result type for settings resolution.
pub type Result<T> = std::result::Result<T, SettingsError>;

/// Deployment tier selecting hosts and the default search index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeploymentTier {
    E1,
    E2,
    #[default]
    E3,
}

impl DeploymentTier {
    /// Lowercase tier key (`e1`, `e2`, `e3`).
    pub fn key(&self) -> &'static str {
        match self {
            DeploymentTier::E1 => "e1",
            DeploymentTier::E2 => "e2",
            DeploymentTier::E3 => "e3",
        }
    }
}

impl fmt::Display for DeploymentTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for DeploymentTier {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "e1" => Ok(DeploymentTier::E1),
            "e2" => Ok(DeploymentTier::E2),
            "e3" => Ok(DeploymentTier::E3),
            _ => Err(SettingsError::UnknownEnvironment(s.to_string())),
        }
    }
}

/// Management API connection, validated only when a catalog run needs it.
#[derive(Debug, Clone)]
pub struct ManagementSettings {
    pub url: String,
    pub organization: Option<String>,
    pub auth: Option<EdgeAuth>,
}

impl ManagementSettings {
    /// Builds the client configuration, failing on missing org or credentials.
    pub fn edge_config(&self) -> Result<EdgeConfig> {
        let organization = self
            .organization
            .clone()
            .ok_or_else(|| SettingsError::Missing("APIGEE_ORG".into()))?;
        let auth = self
            .auth
            .clone()
            .ok_or_else(|| SettingsError::Missing("APIGEE_TOKEN or APIGEE_USERNAME/APIGEE_PASSWORD".into()))?;
        Ok(EdgeConfig::new(self.url.clone(), organization, auth))
    }
}

/// Everything a run needs.
#[derive(Debug, Clone)]
pub struct Settings {
    pub tier: DeploymentTier,
    /// Management API environment to discover.
    pub deploy_env: String,
    pub management: ManagementSettings,
    pub force_log_search: bool,
    pub search_index: String,
    pub search: SearchConfig,
    /// Target offset for month bucketing.
    pub offset: FixedOffset,
    pub db_path: Option<PathBuf>,
    pub taxonomy_path: Option<PathBuf>,
}

impl Settings {
    /// Reads settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads settings through `lookup`. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let first = |names: &[&str]| names.iter().find_map(|name| get(*name));
        let require = |name: &str| get(name).ok_or_else(|| SettingsError::Missing(name.to_string()));

        let tier = match get("APIGEE_ENV") {
            Some(key) => key.parse()?,
            None => DeploymentTier::default(),
        };

        let host_var = format!("SPLUNK_HOST_{}", tier.key().to_ascii_uppercase());
        let host = get("SPLUNK_HOST")
            .or_else(|| get(&host_var))
            .ok_or_else(|| SettingsError::Missing(format!("SPLUNK_HOST or {host_var}")))?;
        let credentials = Credentials::new(require("SPLUNK_USERNAME")?, require("SPLUNK_PASSWORD")?);

        let mut search = SearchConfig::new(host, credentials)
            .with_verify_tls(parse_bool(get("SPLUNK_VERIFY_TLS"), true));
        if let Some(path) = get("SPLUNK_CA_BUNDLE") {
            search = search.with_ca_bundle(path);
        }
        if let Some(url) = get("CORP_PROXY_URL") {
            let user = first(&["CORP_PROXY_USER", "PROXY_ADS", "HTTP_PROXY_USER"]);
            let secret = first(&["CORP_PROXY_SECRET", "PROXY_SECRET", "HTTP_PROXY_PASS"]);
            let credentials = match (user, secret) {
                (Some(user), Some(secret)) => Some(Credentials::new(user, secret)),
                _ => None,
            };
            search = search.with_corporate_proxy(CorporateProxy { url, credentials });
        }

        let auth = match (get("APIGEE_TOKEN"), get("APIGEE_USERNAME"), get("APIGEE_PASSWORD")) {
            (Some(token), _, _) => Some(EdgeAuth::Bearer(token)),
            (None, Some(username), Some(password)) => Some(EdgeAuth::Basic { username, password }),
            _ => None,
        };
        let management = ManagementSettings {
            url: get("APIGEE_MGMT_URL").unwrap_or_else(|| DEFAULT_MANAGEMENT_URL.to_string()),
            organization: get("APIGEE_ORG"),
            auth,
        };

        let offset = match get("AGG_TZ_OFFSET") {
            Some(value) => parse_offset(&value).ok_or_else(|| SettingsError::Invalid {
                name: "AGG_TZ_OFFSET".into(),
                reason: format!("expected +HH:MM or -HH:MM, got {value:?}"),
            })?,
            None => default_offset(),
        };

        Ok(Self {
            tier,
            deploy_env: get("APIGEE_DEPLOY_ENV").unwrap_or_else(|| tier.key().to_string()),
            management,
            force_log_search: parse_bool(get("APIGEE_FORCE_SPLUNK_DISCOVERY"), false),
            search_index: get("APIGEE_SPLUNK_INDEX")
                .unwrap_or_else(|| queries::default_index(tier.key())),
            search,
            offset,
            db_path: get("GATESCOPE_DB").map(PathBuf::from),
            taxonomy_path: get("GATESCOPE_TAXONOMY").map(PathBuf::from),
        })
    }
}

/// Accepts `1`, `true`, `t`, `yes`, `y` (any case); anything else is false.
pub fn parse_bool(value: Option<String>, default: bool) -> bool {
    match value {
        None => default,
        Some(v) => matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "t" | "yes" | "y"
        ),
    }
}

/// Parses `Z`, `+HH:MM`, `-HH:MM` or `+HHMM`.
pub fn parse_offset(value: &str) -> Option<FixedOffset> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("z") || value.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0);
    }

    let (sign, rest) = match value.as_bytes().first()? {
        b'+' => (1, &value[1..]),
        b'-' => (-1, &value[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}
