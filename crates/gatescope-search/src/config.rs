//! Search client configuration.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default interval between job status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default number of status polls before giving up on completion.
pub const DEFAULT_MAX_POLLS: u32 = 300;

/// Default cap on rows fetched from a finished job.
pub const DEFAULT_MAX_RESULTS: u32 = 50_000;

/// Default timeout for job creation and status polls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for export and results downloads.
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Basic-auth credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Creates a new credential pair.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Corporate outbound proxy. Takes precedence over `HTTP(S)_PROXY`.
#[derive(Clone, PartialEq, Eq)]
pub struct CorporateProxy {
    pub url: String,
    pub credentials: Option<Credentials>,
}

impl fmt::Debug for CorporateProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CorporateProxy")
            .field("url", &self.url)
            .field("credentials", &self.credentials)
            .finish()
    }
}

/// Connection settings for the search backend.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Backend root, e.g. `https://search.example.com:8089`.
    pub host: String,
    pub credentials: Credentials,
    pub verify_tls: bool,
    /// Additional PEM root certificate.
    pub ca_bundle: Option<PathBuf>,
    pub corporate_proxy: Option<CorporateProxy>,
    pub poll_interval: Duration,
    pub max_polls: u32,
    pub max_results: u32,
    pub request_timeout: Duration,
    pub download_timeout: Duration,
}

impl SearchConfig {
    /// Creates a configuration with default limits.
    pub fn new(host: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            host: host.into().trim().trim_end_matches('/').to_string(),
            credentials,
            verify_tls: true,
            ca_bundle: None,
            corporate_proxy: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_polls: DEFAULT_MAX_POLLS,
            max_results: DEFAULT_MAX_RESULTS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            download_timeout: DEFAULT_DOWNLOAD_TIMEOUT,
        }
    }

    /// Sets TLS verification.
    pub fn with_verify_tls(mut self, verify_tls: bool) -> Self {
        self.verify_tls = verify_tls;
        self
    }

    /// Sets an additional PEM root certificate.
    pub fn with_ca_bundle(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_bundle = Some(path.into());
        self
    }

    /// Routes every request through a corporate proxy.
    pub fn with_corporate_proxy(mut self, proxy: CorporateProxy) -> Self {
        self.corporate_proxy = Some(proxy);
        self
    }

    /// Sets the poll interval and ceiling.
    pub fn with_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls;
        self
    }

    /// Candidate base URLs in priority order.
    ///
    /// The native REST path comes first, followed by the raw-service paths
    /// exposed through a web-tier reverse proxy.
    pub fn candidate_bases(&self) -> Vec<String> {
        candidate_bases(&self.host)
    }
}

/// Candidate base URLs for `host` in priority order.
pub fn candidate_bases(host: &str) -> Vec<String> {
    let host = host.trim().trim_end_matches('/');
    vec![
        format!("{host}/services"),
        format!("{host}/splunkd/__raw/services"),
        format!("{host}/en-US/splunkd/__raw/services"),
    ]
}
