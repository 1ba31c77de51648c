//! Per-revision extraction of executed policies, virtual hosts and targets.

use std::collections::{BTreeSet, HashSet};

use tracing::{debug, error};
use url::Url;

use super::endpoint::{ProxyEndpointDefinition, TargetDefinition};
use crate::error::Result;
use crate::management::BundleReader;
use crate::models::{PolicyRecord, ProxyRevision, TargetEndpoint};

/// Sentinel reported when no target host can be determined.
pub const NOT_AVAILABLE: &str = "N/A";

/// Everything extracted from one proxy revision.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    /// Policies reachable from a pre-flow or conditional flow.
    pub policies: Vec<PolicyRecord>,
    /// Union of virtual hosts across proxy endpoints.
    pub virtual_hosts: BTreeSet<String>,
    /// Targets with a resolvable URL, in declaration order.
    pub targets: Vec<TargetEndpoint>,
    /// Base path of the first proxy endpoint that declares one.
    pub base_path: Option<String>,
}

impl Extraction {
    /// The target that determines the reported target host.
    pub fn primary_target(&self) -> Option<&TargetEndpoint> {
        self.targets.first()
    }

    /// Hostname of the primary target, or [`NOT_AVAILABLE`].
    pub fn target_host(&self) -> String {
        self.primary_target()
            .map(|t| target_host(&t.url))
            .unwrap_or_else(|| NOT_AVAILABLE.to_string())
    }

    /// Whether the primary target presents a client certificate.
    pub fn target_two_way_ssl(&self) -> bool {
        self.primary_target()
            .and_then(|t| t.ssl_info.as_ref())
            .is_some_and(|ssl| ssl.enabled && ssl.client_auth_enabled)
    }
}

/// Hostname of a URL, or [`NOT_AVAILABLE`] when it cannot be parsed.
pub fn target_host(url: &str) -> String {
    Url::parse(url.trim())
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

/// Marks each policy with where it is referenced and drops unreferenced ones.
pub fn apply_flow_references(
    policies: Vec<PolicyRecord>,
    global: &HashSet<String>,
    flow: &HashSet<String>,
) -> Vec<PolicyRecord> {
    policies
        .into_iter()
        .filter_map(|mut policy| {
            policy.application_level.global = global.contains(&policy.policy_file_name);
            policy.application_level.flow = flow.contains(&policy.policy_file_name);
            policy.application_level.is_applied().then_some(policy)
        })
        .collect()
}

/// Walks the endpoint definitions of a proxy revision.
pub struct FlowWalker<'a> {
    bundle: &'a dyn BundleReader,
}

impl<'a> FlowWalker<'a> {
    /// Creates a walker reading from `bundle`.
    pub fn new(bundle: &'a dyn BundleReader) -> Self {
        Self { bundle }
    }

    /// Extracts a revision, degrading to an empty result on any failure.
    pub fn extract(&self, unit: &ProxyRevision) -> Extraction {
        match self.try_extract(unit) {
            Ok(extraction) => extraction,
            Err(e) => {
                error!(
                    proxy = %unit.proxy_name,
                    revision = %unit.revision,
                    "Extraction failed: {}",
                    e
                );
                Extraction::default()
            }
        }
    }

    /// Extracts a revision, propagating the first failure.
    pub fn try_extract(&self, unit: &ProxyRevision) -> Result<Extraction> {
        let proxy = unit.proxy_name.as_str();
        let revision = unit.revision.as_str();

        let declared = self.bundle.policies(proxy, revision)?;

        let mut global = HashSet::new();
        let mut flow = HashSet::new();
        let mut virtual_hosts = BTreeSet::new();
        let mut base_path = None;

        for name in self.bundle.proxy_endpoints(proxy, revision)? {
            let document = self.bundle.proxy_endpoint(proxy, revision, &name)?;
            let endpoint = ProxyEndpointDefinition::decode(&name, &document)?;

            global.extend(endpoint.pre_flow_steps);
            flow.extend(endpoint.flow_steps);
            virtual_hosts.extend(endpoint.virtual_hosts);
            if base_path.is_none() {
                base_path = endpoint.base_path;
            }
        }

        let policies = apply_flow_references(declared, &global, &flow);
        let targets = self.targets(proxy, revision)?;

        debug!(
            proxy,
            revision,
            policies = policies.len(),
            virtual_hosts = virtual_hosts.len(),
            targets = targets.len(),
            "Extracted proxy revision"
        );

        Ok(Extraction {
            policies,
            virtual_hosts,
            targets,
            base_path,
        })
    }

    fn targets(&self, proxy: &str, revision: &str) -> Result<Vec<TargetEndpoint>> {
        let mut targets = Vec::new();
        for name in self.bundle.targets(proxy, revision)? {
            let document = self.bundle.target(proxy, revision, &name)?;
            let target = TargetDefinition::decode(&name, &document)?;
            match target.url {
                Some(url) => targets.push(TargetEndpoint {
                    name: target.name,
                    url,
                    ssl_info: target.ssl_info,
                }),
                None => debug!(proxy, revision, target = %name, "Target has no URL"),
            }
        }
        Ok(targets)
    }
}
