//! Management API client over HTTP.
//!
//! Talks to the gateway's organization-scoped REST API and implements every
//! management capability. Endpoint definitions are requested as JSON; a
//! backend that answers with XML is handed to the XML walker instead.

use std::fmt;
use std::time::Duration;

use gatescope_core::error::{CoreError, Result};
use gatescope_core::management::{
    BundleReader, DeploymentCheck, DeploymentStatus, EndpointDocument, EnvironmentInfo,
    ManagementClient, OrgDeployments, ProxyListing, RevisionListing,
};
use gatescope_core::models::PolicyRecord;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use url::Url;

/// Default management API root.
pub const DEFAULT_MANAGEMENT_URL: &str = "https://api.enterprise.apigee.com";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Management API credentials.
#[derive(Clone, PartialEq, Eq)]
pub enum EdgeAuth {
    Basic { username: String, password: String },
    Bearer(String),
}

impl fmt::Debug for EdgeAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeAuth::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            EdgeAuth::Bearer(_) => f.write_str("Bearer(<redacted>)"),
        }
    }
}

/// Connection settings for the management API.
#[derive(Debug, Clone)]
pub struct EdgeConfig {
    pub management_url: String,
    pub organization: String,
    pub auth: EdgeAuth,
    pub timeout: Duration,
}

impl EdgeConfig {
    /// Creates a configuration with the default timeout.
    pub fn new(
        management_url: impl Into<String>,
        organization: impl Into<String>,
        auth: EdgeAuth,
    ) -> Self {
        Self {
            management_url: management_url.into(),
            organization: organization.into(),
            auth,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// HTTP management client.
#[derive(Debug)]
pub struct EdgeClient {
    http: Client,
    org_url: Url,
    auth: EdgeAuth,
}

fn transport(e: reqwest::Error) -> CoreError {
    CoreError::Transport(e.to_string())
}

impl EdgeClient {
    /// Creates a client for one organization.
    pub fn new(config: EdgeConfig) -> Result<Self> {
        let mut org_url = Url::parse(config.management_url.trim())
            .map_err(|e| CoreError::Decode(format!("invalid management URL: {e}")))?;
        org_url
            .path_segments_mut()
            .map_err(|_| CoreError::Decode("management URL cannot carry a path".into()))?
            .pop_if_empty()
            .extend(["v1", "organizations", config.organization.as_str()]);

        let http = Client::builder()
            .user_agent(format!("Gatescope/{}", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()
            .map_err(transport)?;

        Ok(Self {
            http,
            org_url,
            auth: config.auth,
        })
    }

    /// Organization root, e.g. `https://host/v1/organizations/acme`.
    pub fn org_url(&self) -> &Url {
        &self.org_url
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.org_url.clone();
        url.path_segments_mut()
            .map_err(|_| CoreError::Decode("management URL cannot carry a path".into()))?
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            EdgeAuth::Basic { username, password } => request.basic_auth(username, Some(password)),
            EdgeAuth::Bearer(token) => request.bearer_auth(token),
        }
    }

    fn get(&self, segments: &[&str]) -> Result<Response> {
        let url = self.url(segments)?;
        debug!("GET {}", url);
        let request = self
            .http
            .get(url.clone())
            .header(ACCEPT, "application/json");
        let response = self.authorize(request).send().map_err(transport)?;
        if !response.status().is_success() {
            return Err(CoreError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }

    fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T> {
        let body = self.get(segments)?.text().map_err(transport)?;
        Ok(serde_json::from_str(&body)?)
    }

    fn get_document(&self, segments: &[&str]) -> Result<EndpointDocument> {
        let response = self.get(segments)?;
        let is_xml = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("xml"));
        let body = response.text().map_err(transport)?;
        if is_xml {
            Ok(EndpointDocument::Xml(body))
        } else {
            Ok(EndpointDocument::Tree(serde_json::from_str(&body)?))
        }
    }
}

impl EnvironmentInfo for EdgeClient {
    fn org_deployments(&self) -> Result<OrgDeployments> {
        self.get_json(&["deployments"])
    }
}

impl ProxyListing for EdgeClient {
    fn list_proxies(&self) -> Result<Vec<String>> {
        self.get_json(&["apis"])
    }
}

impl RevisionListing for EdgeClient {
    fn list_revisions(&self, proxy: &str) -> Result<Vec<String>> {
        self.get_json(&["apis", proxy, "revisions"])
    }
}

impl DeploymentCheck for EdgeClient {
    fn deployment_status(&self, proxy: &str, revision: &str, _env: &str) -> Result<DeploymentStatus> {
        match self.get(&["apis", proxy, "revisions", revision, "deployments"]) {
            Ok(response) => Ok(DeploymentStatus::Report(response.text().map_err(transport)?)),
            Err(CoreError::Status { status: 400 | 404, .. }) => Ok(DeploymentStatus::Flag(false)),
            Err(e) => Err(e),
        }
    }
}

impl BundleReader for EdgeClient {
    fn policies(&self, proxy: &str, revision: &str) -> Result<Vec<PolicyRecord>> {
        let names: Vec<String> = self.get_json(&["apis", proxy, "revisions", revision, "policies"])?;
        names
            .iter()
            .map(|name| {
                let tree: Value =
                    self.get_json(&["apis", proxy, "revisions", revision, "policies", name])?;
                Ok(PolicyRecord::from_tree(name, &tree))
            })
            .collect()
    }

    fn proxy_endpoints(&self, proxy: &str, revision: &str) -> Result<Vec<String>> {
        self.get_json(&["apis", proxy, "revisions", revision, "proxies"])
    }

    fn proxy_endpoint(&self, proxy: &str, revision: &str, name: &str) -> Result<EndpointDocument> {
        self.get_document(&["apis", proxy, "revisions", revision, "proxies", name])
    }

    fn targets(&self, proxy: &str, revision: &str) -> Result<Vec<String>> {
        self.get_json(&["apis", proxy, "revisions", revision, "targets"])
    }

    fn target(&self, proxy: &str, revision: &str, name: &str) -> Result<EndpointDocument> {
        self.get_document(&["apis", proxy, "revisions", revision, "targets", name])
    }
}

impl ManagementClient for EdgeClient {
    fn environment_info(&self) -> Option<&dyn EnvironmentInfo> {
        Some(self)
    }

    fn proxy_listing(&self) -> Option<&dyn ProxyListing> {
        Some(self)
    }

    fn revision_listing(&self) -> Option<&dyn RevisionListing> {
        Some(self)
    }

    fn deployment_check(&self) -> Option<&dyn DeploymentCheck> {
        Some(self)
    }

    fn bundle_reader(&self) -> Option<&dyn BundleReader> {
        Some(self)
    }
}
