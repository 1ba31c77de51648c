//! Management API capabilities.
//!
//! The gateway's management surface differs between versions and
//! installations, so each operation group is modelled as an optional
//! capability. A backing client advertises what it supports through
//! [`ManagementClient`]; [`Capabilities::probe`] reads that once and the
//! rest of the pipeline branches on which slots are filled.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{PolicyRecord, ProxyRevision};

/// Revision state reported for live deployments.
pub const DEPLOYED_STATE: &str = "deployed";

/// Org-wide deployment snapshot returned by the bulk info call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrgDeployments {
    #[serde(default)]
    pub environment: Vec<EnvironmentDeployments>,
}

/// Deployments of one environment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentDeployments {
    pub name: String,
    #[serde(rename = "aPIProxy", default)]
    pub api_proxy: Vec<ProxyDeployment>,
}

/// Revisions of one proxy within an environment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProxyDeployment {
    pub name: String,
    #[serde(default)]
    pub revision: Vec<RevisionDeployment>,
}

/// State of one revision within an environment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RevisionDeployment {
    pub name: String,
    #[serde(default)]
    pub state: String,
}

impl OrgDeployments {
    /// All (proxy, revision) pairs in `env` whose state is `deployed`.
    pub fn deployed_in(&self, env: &str) -> Vec<ProxyRevision> {
        let Some(env_info) = self.environment.iter().find(|e| e.name == env) else {
            return Vec::new();
        };

        env_info
            .api_proxy
            .iter()
            .flat_map(|proxy| {
                proxy
                    .revision
                    .iter()
                    .filter(|rev| rev.state == DEPLOYED_STATE)
                    .map(move |rev| ProxyRevision::new(&proxy.name, &rev.name))
            })
            .collect()
    }
}

/// Answer of a deployment check, in whichever shape the backend provides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentStatus {
    /// Direct yes/no.
    Flag(bool),
    /// Free-form deployment report to be inspected heuristically.
    Report(String),
}

impl DeploymentStatus {
    /// Evaluates the status for `env`.
    ///
    /// A report counts as deployed when it mentions the environment name
    /// together with a deployment or state keyword.
    pub fn is_deployed_in(&self, env: &str) -> bool {
        match self {
            DeploymentStatus::Flag(flag) => *flag,
            DeploymentStatus::Report(text) => {
                let text = text.to_lowercase();
                let env = env.to_lowercase();
                !env.is_empty()
                    && text.contains(&env)
                    && (text.contains("deployed") || text.contains("state"))
            }
        }
    }
}

/// A proxy or target endpoint definition as served by the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum EndpointDocument {
    /// JSON rendering of the XML tree (camel-cased element names).
    Tree(serde_json::Value),
    /// Raw XML.
    Xml(String),
}

/// Bulk "all environment info" call.
pub trait EnvironmentInfo {
    fn org_deployments(&self) -> Result<OrgDeployments>;
}

/// Lists every proxy in the organization.
pub trait ProxyListing {
    fn list_proxies(&self) -> Result<Vec<String>>;
}

/// Lists the revisions of a proxy.
pub trait RevisionListing {
    fn list_revisions(&self, proxy: &str) -> Result<Vec<String>>;

    /// Direct latest-revision lookup, for backends that offer one.
    fn latest_revision(&self, _proxy: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Checks whether a revision is deployed.
pub trait DeploymentCheck {
    fn deployment_status(&self, proxy: &str, revision: &str, env: &str)
        -> Result<DeploymentStatus>;
}

/// Reads the configuration bundle of a proxy revision.
pub trait BundleReader {
    /// Policy summaries declared by the revision.
    fn policies(&self, proxy: &str, revision: &str) -> Result<Vec<PolicyRecord>>;

    /// Names of the proxy endpoints.
    fn proxy_endpoints(&self, proxy: &str, revision: &str) -> Result<Vec<String>>;

    /// Definition of one proxy endpoint.
    fn proxy_endpoint(&self, proxy: &str, revision: &str, name: &str)
        -> Result<EndpointDocument>;

    /// Names of the target endpoints.
    fn targets(&self, proxy: &str, revision: &str) -> Result<Vec<String>>;

    /// Definition of one target endpoint.
    fn target(&self, proxy: &str, revision: &str, name: &str) -> Result<EndpointDocument>;
}

/// A concrete management client, advertising the capabilities it supports.
///
/// Every method defaults to `None`; implementations return `Some(self)` for
/// the groups they implement.
pub trait ManagementClient {
    fn environment_info(&self) -> Option<&dyn EnvironmentInfo> {
        None
    }

    fn proxy_listing(&self) -> Option<&dyn ProxyListing> {
        None
    }

    fn revision_listing(&self) -> Option<&dyn RevisionListing> {
        None
    }

    fn deployment_check(&self) -> Option<&dyn DeploymentCheck> {
        None
    }

    fn bundle_reader(&self) -> Option<&dyn BundleReader> {
        None
    }
}

/// Capabilities of one management client, resolved once.
#[derive(Clone, Copy, Default)]
pub struct Capabilities<'a> {
    pub environment_info: Option<&'a dyn EnvironmentInfo>,
    pub proxy_listing: Option<&'a dyn ProxyListing>,
    pub revision_listing: Option<&'a dyn RevisionListing>,
    pub deployment_check: Option<&'a dyn DeploymentCheck>,
    pub bundle_reader: Option<&'a dyn BundleReader>,
}

impl<'a> Capabilities<'a> {
    /// Inspects `client` and records which capabilities it offers.
    pub fn probe<C: ManagementClient + ?Sized>(client: &'a C) -> Self {
        let caps = Self {
            environment_info: client.environment_info(),
            proxy_listing: client.proxy_listing(),
            revision_listing: client.revision_listing(),
            deployment_check: client.deployment_check(),
            bundle_reader: client.bundle_reader(),
        };
        tracing::debug!("Management capabilities: {}", caps.summary());
        caps
    }

    /// Comma-separated list of available capabilities, for logging.
    pub fn summary(&self) -> String {
        let named = [
            ("environment_info", self.environment_info.is_some()),
            ("proxy_listing", self.proxy_listing.is_some()),
            ("revision_listing", self.revision_listing.is_some()),
            ("deployment_check", self.deployment_check.is_some()),
            ("bundle_reader", self.bundle_reader.is_some()),
        ];
        let present: Vec<&str> = named
            .iter()
            .filter(|(_, present)| *present)
            .map(|(name, _)| *name)
            .collect();
        if present.is_empty() {
            "none".to_string()
        } else {
            present.join(",")
        }
    }
}

impl std::fmt::Debug for Capabilities<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities")
            .field("available", &self.summary())
            .finish()
    }
}
