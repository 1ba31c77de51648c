//! Blocking search client with base-path fallback.
//!
//! For each candidate base the client first tries the one-shot export
//! endpoint. When that is unavailable it creates a job, polls it until it
//! reports done (bounded by the poll ceiling) and fetches the results. A base
//! answering with HTML or a non-200 status is abandoned in favour of the next
//! one; results from different bases are never merged.

use std::sync::Arc;

use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Certificate, Proxy};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};
use url::{form_urlencoded, Url};

use crate::config::SearchConfig;
use crate::error::{BaseFailure, Result, SearchError};
use crate::job::{JobState, SearchJob};
use crate::sleeper::{Sleeper, ThreadSleeper};

/// A schemaless result row.
pub type Record = Map<String, Value>;

/// Anything that can run a search query and return its rows.
pub trait LogSearch {
    fn search(&self, spl: &str) -> Result<Vec<Record>>;
}

const JSON_CONTENT_TYPE: &str = "application/json";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const BODY_PREFIX_CHARS: usize = 200;

/// Keys of export stream lines that carry no row.
const STREAM_META_KEYS: &[&str] = &["preview", "offset", "init_offset", "lastrow", "messages"];

/// Prefixes a query with the `search` command unless it already starts with
/// a command.
pub fn search_command(spl: &str) -> String {
    let trimmed = spl.trim();
    if trimmed.starts_with("search ") || trimmed.starts_with('|') {
        trimmed.to_string()
    } else {
        format!("search {trimmed}")
    }
}

/// One HTTP exchange, captured for diagnosis.
struct Reply {
    status: u16,
    content_type: String,
    body: String,
}

impl Reply {
    fn is_json(&self) -> bool {
        self.content_type
            .to_ascii_lowercase()
            .starts_with(JSON_CONTENT_TYPE)
    }

    fn is_json_ok(&self) -> bool {
        self.status == 200 && self.is_json()
    }

    fn body_prefix(&self) -> String {
        self.body.chars().take(BODY_PREFIX_CHARS).collect()
    }

    fn describe(&self) -> String {
        format!(
            "HTTP {} content-type '{}' body '{}'",
            self.status,
            self.content_type,
            self.body_prefix()
        )
    }
}

/// Search backend client.
pub struct SearchClient {
    http: Client,
    config: SearchConfig,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for SearchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchClient")
            .field("host", &self.config.host)
            .field("verify_tls", &self.config.verify_tls)
            .field("max_polls", &self.config.max_polls)
            .finish()
    }
}

impl SearchClient {
    /// Creates a client that sleeps on the calling thread between polls.
    pub fn new(config: SearchConfig) -> Result<Self> {
        Self::with_sleeper(config, Arc::new(ThreadSleeper))
    }

    /// Creates a client with a custom sleeper.
    pub fn with_sleeper(config: SearchConfig, sleeper: Arc<dyn Sleeper>) -> Result<Self> {
        if config.host.is_empty() {
            return Err(SearchError::Config("search host is empty".into()));
        }

        let mut builder = Client::builder()
            .user_agent(format!("Gatescope/{}", env!("CARGO_PKG_VERSION")))
            .connect_timeout(config.request_timeout);

        if !config.verify_tls {
            warn!("TLS verification disabled for {}", config.host);
            builder = builder.danger_accept_invalid_certs(true);
        }

        if let Some(path) = &config.ca_bundle {
            let pem = std::fs::read(path)?;
            builder = builder.add_root_certificate(Certificate::from_pem(&pem)?);
            debug!("Loaded CA bundle from {}", path.display());
        }

        if let Some(corporate) = &config.corporate_proxy {
            let mut proxy = Proxy::all(corporate.url.as_str())?;
            if let Some(creds) = &corporate.credentials {
                proxy = proxy.basic_auth(&creds.username, &creds.password);
            }
            builder = builder.proxy(proxy);
            info!("Using corporate proxy {}", corporate.url);
        }

        Ok(Self {
            http: builder.build()?,
            config,
            sleeper,
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Runs a query, never failing. Exhausted fallbacks yield no rows.
    pub fn run_search(&self, spl: &str) -> Vec<Record> {
        self.try_search(spl).unwrap_or_default()
    }

    /// Runs a query against each candidate base until one succeeds.
    pub fn try_search(&self, spl: &str) -> Result<Vec<Record>> {
        let query = search_command(spl);
        let mut failures = Vec::new();

        for base in self.config.candidate_bases() {
            match self.search_base(&base, &query) {
                Ok(records) => {
                    info!(base = %base, records = records.len(), "Search completed");
                    return Ok(records);
                }
                Err(reason) => {
                    warn!(base = %base, "Search base failed, trying next: {}", reason);
                    failures.push(BaseFailure { base, reason });
                }
            }
        }

        error!(
            host = %self.config.host,
            "All search bases failed; check VPN, proxy, host and credentials"
        );
        Err(SearchError::AllBasesFailed(failures))
    }

    fn search_base(&self, base: &str, query: &str) -> std::result::Result<Vec<Record>, String> {
        if let Some(records) = self.export(base, query) {
            return Ok(records);
        }

        let mut job = self.create_job(base, query)?;
        self.poll(base, &mut job)?;
        self.fetch_results(base, &job)
    }

    fn send(&self, request: RequestBuilder, step: &str) -> std::result::Result<Reply, String> {
        let creds = &self.config.credentials;
        let response = request
            .basic_auth(&creds.username, Some(&creds.password))
            .send()
            .map_err(|e| format!("{step} request failed: {e}"))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response
            .text()
            .map_err(|e| format!("{step} body could not be read: {e}"))?;

        debug!(step, status, content_type = %content_type, "Search backend replied");
        Ok(Reply {
            status,
            content_type,
            body,
        })
    }

    fn post_form(&self, url: Url, query: &str, timeout: std::time::Duration) -> RequestBuilder {
        let form = form_urlencoded::Serializer::new(String::new())
            .append_pair("search", query)
            .append_pair("output_mode", "json")
            .finish();
        self.http
            .post(url)
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .body(form)
            .timeout(timeout)
    }

    fn export(&self, base: &str, query: &str) -> Option<Vec<Record>> {
        let url = endpoint(base, &["search", "jobs", "export"], &[]).ok()?;
        let request = self.post_form(url, query, self.config.download_timeout);
        let reply = match self.send(request, "export") {
            Ok(reply) => reply,
            Err(reason) => {
                debug!(base, "Export shortcut unavailable: {}", reason);
                return None;
            }
        };

        if !reply.is_json_ok() {
            debug!(base, "Export shortcut unavailable: {}", reply.describe());
            return None;
        }

        let records = parse_export(&reply.body);
        if records.is_none() {
            debug!(base, "Export body held no records: {}", reply.body_prefix());
        }
        records
    }

    fn create_job(&self, base: &str, query: &str) -> std::result::Result<SearchJob, String> {
        let url = endpoint(base, &["search", "jobs"], &[])?;
        let request = self.post_form(url, query, self.config.request_timeout);
        let reply = self.send(request, "create")?;

        if reply.status != 200 {
            return Err(format!("job creation rejected: {}", reply.describe()));
        }
        if !reply.is_json() {
            return Err(format!(
                "job creation returned non-JSON (likely WAF interception): {}",
                reply.describe()
            ));
        }

        let body: Value = serde_json::from_str(&reply.body)
            .map_err(|e| format!("job creation body is not JSON: {e}"))?;
        let sid = body
            .get("sid")
            .and_then(Value::as_str)
            .filter(|sid| !sid.is_empty())
            .ok_or_else(|| "job creation response has no sid".to_string())?;

        debug!(base, sid, "Search job created");
        Ok(SearchJob::submitted(sid, query))
    }

    /// Polls until done or the ceiling is reached.
    ///
    /// Non-200 and non-JSON status replies end polling early; the results
    /// fetch is still attempted. A failed job abandons the base.
    fn poll(&self, base: &str, job: &mut SearchJob) -> std::result::Result<(), String> {
        let url = endpoint(
            base,
            &["search", "jobs", job.sid.as_str()],
            &[("output_mode", "json")],
        )?;
        job.state = JobState::Polling;

        for attempt in 1..=self.config.max_polls {
            let request = self
                .http
                .get(url.clone())
                .timeout(self.config.request_timeout);
            let reply = self.send(request, "poll")?;

            if !reply.is_json_ok() {
                warn!(sid = %job.sid, attempt, "Polling stopped: {}", reply.describe());
                return Ok(());
            }

            let status: Value = match serde_json::from_str(&reply.body) {
                Ok(status) => status,
                Err(e) => {
                    warn!(sid = %job.sid, attempt, "Polling stopped, unreadable status: {}", e);
                    return Ok(());
                }
            };

            match job.observe(&status) {
                JobState::Done => {
                    debug!(sid = %job.sid, attempt, "Search job done");
                    return Ok(());
                }
                JobState::Failed => {
                    return Err(format!("search job {} failed", job.sid));
                }
                JobState::Submitted | JobState::Polling => {
                    self.sleeper.sleep(self.config.poll_interval);
                }
            }
        }

        warn!(
            sid = %job.sid,
            polls = self.config.max_polls,
            "Search job not done within poll ceiling; fetching results anyway"
        );
        Ok(())
    }

    fn fetch_results(&self, base: &str, job: &SearchJob) -> std::result::Result<Vec<Record>, String> {
        let count = self.config.max_results.to_string();
        let url = endpoint(
            base,
            &["search", "jobs", job.sid.as_str(), "results"],
            &[("output_mode", "json"), ("count", count.as_str())],
        )?;
        let request = self
            .http
            .get(url)
            .timeout(self.config.download_timeout);
        let reply = self.send(request, "results")?;

        if reply.status != 200 {
            return Err(format!("results fetch rejected: {}", reply.describe()));
        }
        if !reply.is_json() {
            return Err(format!("results fetch returned non-JSON: {}", reply.describe()));
        }

        let body: Value = serde_json::from_str(&reply.body)
            .map_err(|e| format!("results body is not JSON: {e}"))?;
        Ok(match body.get("results") {
            Some(Value::Array(rows)) => objects(rows),
            _ => Vec::new(),
        })
    }
}

impl LogSearch for SearchClient {
    fn search(&self, spl: &str) -> Result<Vec<Record>> {
        self.try_search(spl)
    }
}

/// Builds `{base}/{segments...}?{query}`.
fn endpoint(base: &str, segments: &[&str], query: &[(&str, &str)]) -> std::result::Result<Url, String> {
    let mut url = Url::parse(base).map_err(|e| format!("invalid base URL {base}: {e}"))?;
    url.path_segments_mut()
        .map_err(|_| format!("base URL {base} cannot carry a path"))?
        .pop_if_empty()
        .extend(segments);
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query);
    }
    Ok(url)
}

fn objects(rows: &[Value]) -> Vec<Record> {
    rows.iter()
        .filter_map(Value::as_object)
        .cloned()
        .collect()
}

/// Parses an export body: a `{"results": [...]}` envelope, or one JSON
/// object per line with rows wrapped as `{"result": {...}}`.
fn parse_export(body: &str) -> Option<Vec<Record>> {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Some(Value::Array(rows)) = value.get("results") {
            return Some(objects(rows));
        }
    }

    let mut records = Vec::new();
    for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let Ok(Value::Object(mut object)) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        match object.remove("result") {
            Some(Value::Object(row)) => records.push(row),
            Some(other) => {
                object.insert("result".to_string(), other);
                records.push(object);
            }
            None => {
                let meta_only = object
                    .keys()
                    .all(|key| STREAM_META_KEYS.contains(&key.as_str()));
                if !meta_only {
                    records.push(object);
                }
            }
        }
    }

    (!records.is_empty()).then_some(records)
}
