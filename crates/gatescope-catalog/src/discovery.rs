//! Resolution of the (proxy, revision) pairs deployed in an environment.
//!
//! Discovery is an ordered list of strategies; the first one that yields a
//! non-empty result wins. Every strategy reports either the pairs it found
//! or why it found nothing, so a failing management call or search backend
//! only ever moves resolution on to the next strategy.

use std::collections::BTreeSet;

use gatescope_core::management::{Capabilities, ManagementClient, RevisionListing};
use gatescope_core::models::ProxyRevision;
use tracing::{debug, error, info, warn};

use crate::traffic::TrafficSource;

/// Result of one discovery strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Found(Vec<ProxyRevision>),
    Empty(String),
}

impl Outcome {
    fn from_pairs(pairs: Vec<ProxyRevision>, reason: impl FnOnce() -> String) -> Self {
        if pairs.is_empty() {
            Outcome::Empty(reason())
        } else {
            Outcome::Found(pairs)
        }
    }

    /// Returns the discovered pairs, empty for [`Outcome::Empty`].
    pub fn into_pairs(self) -> Vec<ProxyRevision> {
        match self {
            Outcome::Found(pairs) => pairs,
            Outcome::Empty(_) => Vec::new(),
        }
    }
}

/// One way of discovering deployed revisions.
pub trait DiscoveryStrategy {
    fn name(&self) -> &'static str;

    fn discover(&self, caps: &Capabilities<'_>, env: &str) -> Outcome;
}

/// Reads the org-wide deployment snapshot in a single call.
#[derive(Debug, Default, Clone, Copy)]
pub struct BulkInfoStrategy;

impl DiscoveryStrategy for BulkInfoStrategy {
    fn name(&self) -> &'static str {
        "bulk-info"
    }

    fn discover(&self, caps: &Capabilities<'_>, env: &str) -> Outcome {
        let Some(info) = caps.environment_info else {
            return Outcome::Empty("bulk environment info not supported".into());
        };

        match info.org_deployments() {
            Ok(snapshot) => Outcome::from_pairs(snapshot.deployed_in(env), || {
                format!("no deployed revisions for environment '{env}'")
            }),
            Err(e) => {
                warn!(env, "Bulk environment info failed: {}", e);
                Outcome::Empty(format!("bulk environment info failed: {e}"))
            }
        }
    }
}

/// Lists every proxy and revision and checks each for deployment.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProbeStrategy;

impl DiscoveryStrategy for ProbeStrategy {
    fn name(&self) -> &'static str {
        "probe"
    }

    fn discover(&self, caps: &Capabilities<'_>, env: &str) -> Outcome {
        let (Some(listing), Some(revisions), Some(check)) =
            (caps.proxy_listing, caps.revision_listing, caps.deployment_check)
        else {
            return Outcome::Empty(format!(
                "proxy probing needs proxy listing, revision listing and deployment check; have {}",
                caps.summary()
            ));
        };

        let proxies = match listing.list_proxies() {
            Ok(proxies) => proxies,
            Err(e) => {
                warn!("Proxy listing failed: {}", e);
                return Outcome::Empty(format!("proxy listing failed: {e}"));
            }
        };

        let mut pairs = Vec::new();
        for proxy in &proxies {
            let revs = match revisions.list_revisions(proxy) {
                Ok(revs) => revs,
                Err(e) => {
                    error!(proxy = %proxy, "Revision listing failed: {}", e);
                    continue;
                }
            };

            for revision in revs {
                match check.deployment_status(proxy, &revision, env) {
                    Ok(status) if status.is_deployed_in(env) => {
                        pairs.push(ProxyRevision::new(proxy.as_str(), revision));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!(proxy = %proxy, revision = %revision, "Deployment check failed: {}", e);
                    }
                }
            }
        }

        Outcome::from_pairs(pairs, || {
            format!(
                "none of {} proxies has a revision deployed in '{env}'",
                proxies.len()
            )
        })
    }
}

/// Takes proxy names from recent traffic and pairs each with its latest
/// revision.
pub struct TrafficStrategy<'s> {
    source: &'s dyn TrafficSource,
}

impl<'s> TrafficStrategy<'s> {
    /// Creates a strategy reading from `source`.
    pub fn new(source: &'s dyn TrafficSource) -> Self {
        Self { source }
    }
}

impl DiscoveryStrategy for TrafficStrategy<'_> {
    fn name(&self) -> &'static str {
        "log-search"
    }

    fn discover(&self, caps: &Capabilities<'_>, _env: &str) -> Outcome {
        let names = match self.source.active_proxies() {
            Ok(names) => names,
            Err(e) => {
                warn!("Traffic-based discovery failed: {}", e);
                return Outcome::Empty(format!("traffic search failed: {e}"));
            }
        };

        let Some(revisions) = caps.revision_listing else {
            return Outcome::Empty(format!(
                "{} proxies with traffic but no revision listing to resolve them",
                names.len()
            ));
        };

        let mut pairs = Vec::new();
        for name in &names {
            match latest_revision(revisions, name) {
                Some(revision) => pairs.push(ProxyRevision::new(name.as_str(), revision)),
                None => debug!(proxy = %name, "No revision resolved for proxy with traffic"),
            }
        }

        Outcome::from_pairs(pairs, || {
            format!("no revisions resolved for {} proxies with traffic", names.len())
        })
    }
}

/// Highest numeric revision of `proxy`, falling back to the backend's own
/// latest-revision lookup when the listing has no numeric entries.
pub fn latest_revision(listing: &dyn RevisionListing, proxy: &str) -> Option<String> {
    match listing.list_revisions(proxy) {
        Ok(revisions) => {
            let latest = revisions
                .iter()
                .filter_map(|r| r.trim().parse::<u64>().ok())
                .max();
            if let Some(latest) = latest {
                return Some(latest.to_string());
            }
        }
        Err(e) => debug!(proxy, "Revision listing failed: {}", e),
    }

    match listing.latest_revision(proxy) {
        Ok(latest) => latest,
        Err(e) => {
            debug!(proxy, "Latest revision lookup failed: {}", e);
            None
        }
    }
}

/// Ordered chain of discovery strategies.
pub struct DiscoveryResolver<'s> {
    strategies: Vec<Box<dyn DiscoveryStrategy + 's>>,
}

impl<'s> DiscoveryResolver<'s> {
    /// Bulk info, then probing, then traffic. With `force_log_search` only
    /// traffic-based discovery runs.
    pub fn new(traffic: &'s dyn TrafficSource, force_log_search: bool) -> Self {
        let mut strategies: Vec<Box<dyn DiscoveryStrategy + 's>> = Vec::new();
        if !force_log_search {
            strategies.push(Box::new(BulkInfoStrategy));
            strategies.push(Box::new(ProbeStrategy));
        }
        strategies.push(Box::new(TrafficStrategy::new(traffic)));
        Self { strategies }
    }

    /// Uses an explicit strategy list.
    pub fn with_strategies(strategies: Vec<Box<dyn DiscoveryStrategy + 's>>) -> Self {
        Self { strategies }
    }

    /// Names of the strategies in the order they run.
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Runs strategies in order until one finds something.
    pub fn resolve(&self, caps: &Capabilities<'_>, env: &str) -> Vec<ProxyRevision> {
        for strategy in &self.strategies {
            match strategy.discover(caps, env) {
                Outcome::Found(pairs) => {
                    let pairs = dedup(pairs);
                    info!(
                        strategy = strategy.name(),
                        env,
                        pairs = pairs.len(),
                        "Discovered active proxies"
                    );
                    return pairs;
                }
                Outcome::Empty(reason) => {
                    info!(strategy = strategy.name(), env, "Discovery found nothing: {}", reason);
                }
            }
        }

        warn!(env, "No active proxies resolved");
        Vec::new()
    }
}

fn dedup(pairs: Vec<ProxyRevision>) -> Vec<ProxyRevision> {
    let mut seen = BTreeSet::new();
    pairs
        .into_iter()
        .filter(|pair| seen.insert(pair.clone()))
        .collect()
}

/// Resolves deployed pairs for `env` using whatever `client` supports.
pub fn resolve_active_pairs<C: ManagementClient + ?Sized>(
    client: &C,
    env: &str,
    traffic: &dyn TrafficSource,
    force_log_search: bool,
) -> Vec<ProxyRevision> {
    let caps = Capabilities::probe(client);
    DiscoveryResolver::new(traffic, force_log_search).resolve(&caps, env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatescope_core::error::{CoreError, Result as CoreResult};
    use gatescope_core::management::{
        DeploymentCheck, DeploymentStatus, EnvironmentInfo, OrgDeployments, ProxyListing,
    };
    use gatescope_search::{Result as SearchResult, SearchError};
    use serde_json::json;
    use std::cell::Cell;

    // === Stubs ===

    struct CountingTraffic {
        names: Vec<String>,
        calls: Cell<u32>,
        fail: bool,
    }

    impl CountingTraffic {
        fn with(names: &[&str]) -> Self {
            Self {
                names: names.iter().map(|s| s.to_string()).collect(),
                calls: Cell::new(0),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::with(&[])
            }
        }
    }

    impl TrafficSource for CountingTraffic {
        fn active_proxies(&self) -> SearchResult<Vec<String>> {
            self.calls.set(self.calls.get() + 1);
            if self.fail {
                return Err(SearchError::AllBasesFailed(Vec::new()));
            }
            Ok(self.names.clone())
        }
    }

    #[derive(Default)]
    struct Gateway {
        snapshot: Option<serde_json::Value>,
        bulk_fails: bool,
        proxies: Vec<(&'static str, Vec<&'static str>)>,
        deployed: Vec<(&'static str, &'static str)>,
        unlisted: Vec<&'static str>,
        check_fails: Vec<(&'static str, &'static str)>,
        report_style: bool,
        latest: Option<&'static str>,
        probe_enabled: bool,
    }

    impl EnvironmentInfo for Gateway {
        fn org_deployments(&self) -> CoreResult<OrgDeployments> {
            if self.bulk_fails {
                return Err(CoreError::Transport("timeout".into()));
            }
            let snapshot = self.snapshot.clone().unwrap_or_else(|| json!({}));
            Ok(serde_json::from_value(snapshot)?)
        }
    }

    impl ProxyListing for Gateway {
        fn list_proxies(&self) -> CoreResult<Vec<String>> {
            Ok(self
                .proxies
                .iter()
                .map(|(p, _)| *p)
                .chain(self.unlisted.iter().copied())
                .map(str::to_string)
                .collect())
        }
    }

    impl RevisionListing for Gateway {
        fn list_revisions(&self, proxy: &str) -> CoreResult<Vec<String>> {
            self.proxies
                .iter()
                .find(|(p, _)| *p == proxy)
                .map(|(_, revs)| revs.iter().map(|r| r.to_string()).collect())
                .ok_or_else(|| CoreError::Status {
                    status: 404,
                    url: format!("/apis/{proxy}/revisions"),
                })
        }

        fn latest_revision(&self, _proxy: &str) -> CoreResult<Option<String>> {
            Ok(self.latest.map(str::to_string))
        }
    }

    impl DeploymentCheck for Gateway {
        fn deployment_status(
            &self,
            proxy: &str,
            revision: &str,
            env: &str,
        ) -> CoreResult<DeploymentStatus> {
            if self.check_fails.contains(&(proxy, revision)) {
                return Err(CoreError::Transport("connection reset".into()));
            }
            let deployed = self.deployed.contains(&(proxy, revision));
            if self.report_style {
                let text = if deployed {
                    format!(r#"{{"environment":[{{"name":"{env}","state":"deployed"}}]}}"#)
                } else {
                    r#"{"environment":[]}"#.to_string()
                };
                Ok(DeploymentStatus::Report(text))
            } else {
                Ok(DeploymentStatus::Flag(deployed))
            }
        }
    }

    impl ManagementClient for Gateway {
        fn environment_info(&self) -> Option<&dyn EnvironmentInfo> {
            (self.snapshot.is_some() || self.bulk_fails).then_some(self as &dyn EnvironmentInfo)
        }

        fn proxy_listing(&self) -> Option<&dyn ProxyListing> {
            self.probe_enabled.then_some(self as &dyn ProxyListing)
        }

        fn revision_listing(&self) -> Option<&dyn RevisionListing> {
            Some(self)
        }

        fn deployment_check(&self) -> Option<&dyn DeploymentCheck> {
            self.probe_enabled.then_some(self as &dyn DeploymentCheck)
        }
    }

    fn snapshot() -> serde_json::Value {
        json!({"environment": [{"name": "prod", "aPIProxy": [
            {"name": "orders", "revision": [{"name": "4", "state": "deployed"}]}
        ]}]})
    }

    // === Fallback ordering ===

    #[test]
    fn bulk_result_skips_log_search() {
        let gateway = Gateway {
            snapshot: Some(snapshot()),
            probe_enabled: true,
            proxies: vec![("users", vec!["1"])],
            deployed: vec![("users", "1")],
            ..Default::default()
        };
        let traffic = CountingTraffic::with(&["orders"]);

        let pairs = resolve_active_pairs(&gateway, "prod", &traffic, false);
        assert_eq!(pairs, vec![ProxyRevision::new("orders", "4")]);
        assert_eq!(traffic.calls.get(), 0);
    }

    #[test]
    fn empty_bulk_falls_back_to_probe() {
        let gateway = Gateway {
            snapshot: Some(json!({"environment": []})),
            probe_enabled: true,
            proxies: vec![("orders", vec!["1", "2"]), ("users", vec!["7"])],
            deployed: vec![("orders", "2"), ("users", "7")],
            ..Default::default()
        };
        let traffic = CountingTraffic::with(&["ignored"]);

        let pairs = resolve_active_pairs(&gateway, "prod", &traffic, false);
        assert_eq!(
            pairs,
            vec![ProxyRevision::new("orders", "2"), ProxyRevision::new("users", "7")]
        );
        assert_eq!(traffic.calls.get(), 0);
    }

    #[test]
    fn probe_accepts_report_shaped_status() {
        let gateway = Gateway {
            probe_enabled: true,
            report_style: true,
            proxies: vec![("orders", vec!["1", "2"])],
            deployed: vec![("orders", "1")],
            ..Default::default()
        };
        let caps = Capabilities::probe(&gateway);
        let outcome = ProbeStrategy.discover(&caps, "prod");
        assert_eq!(outcome, Outcome::Found(vec![ProxyRevision::new("orders", "1")]));
    }

    #[test]
    fn probe_skips_proxies_whose_calls_fail() {
        let gateway = Gateway {
            probe_enabled: true,
            proxies: vec![("orders", vec!["1", "2"]), ("users", vec!["3"])],
            unlisted: vec!["broken"],
            deployed: vec![("orders", "2"), ("users", "3")],
            check_fails: vec![("orders", "1")],
            ..Default::default()
        };
        let traffic = CountingTraffic::with(&["ignored"]);

        let pairs = resolve_active_pairs(&gateway, "prod", &traffic, false);
        assert_eq!(
            pairs,
            vec![ProxyRevision::new("orders", "2"), ProxyRevision::new("users", "3")]
        );
        assert_eq!(traffic.calls.get(), 0);
    }

    #[test]
    fn failing_bulk_and_no_probe_fall_back_to_traffic() {
        let gateway = Gateway {
            bulk_fails: true,
            proxies: vec![("orders", vec!["2", "10", "9"]), ("users", vec!["1"])],
            ..Default::default()
        };
        let traffic = CountingTraffic::with(&["orders", "users", "ghost"]);

        let pairs = resolve_active_pairs(&gateway, "prod", &traffic, false);
        assert_eq!(
            pairs,
            vec![ProxyRevision::new("orders", "10"), ProxyRevision::new("users", "1")]
        );
        assert_eq!(traffic.calls.get(), 1);
    }

    #[test]
    fn forced_log_search_ignores_bulk() {
        let gateway = Gateway {
            snapshot: Some(snapshot()),
            proxies: vec![("payments", vec!["3"])],
            ..Default::default()
        };
        let traffic = CountingTraffic::with(&["payments"]);

        let resolver = DiscoveryResolver::new(&traffic, true);
        assert_eq!(resolver.strategy_names(), vec!["log-search"]);

        let pairs = resolve_active_pairs(&gateway, "prod", &traffic, true);
        assert_eq!(pairs, vec![ProxyRevision::new("payments", "3")]);
    }

    #[test]
    fn everything_failing_is_empty_not_fatal() {
        let gateway = Gateway {
            bulk_fails: true,
            ..Default::default()
        };
        let traffic = CountingTraffic::failing();
        assert!(resolve_active_pairs(&gateway, "prod", &traffic, false).is_empty());
        assert_eq!(traffic.calls.get(), 1);
    }

    // === Latest revision ===

    #[test]
    fn latest_revision_is_numeric_max() {
        let gateway = Gateway {
            proxies: vec![("orders", vec!["9", "10", "draft"])],
            ..Default::default()
        };
        assert_eq!(latest_revision(&gateway, "orders").as_deref(), Some("10"));
    }

    #[test]
    fn latest_revision_falls_back_to_lookup() {
        let gateway = Gateway {
            proxies: vec![("orders", vec!["draft"])],
            latest: Some("5"),
            ..Default::default()
        };
        assert_eq!(latest_revision(&gateway, "orders").as_deref(), Some("5"));
        assert_eq!(latest_revision(&gateway, "missing").as_deref(), Some("5"));

        let bare = Gateway::default();
        assert_eq!(latest_revision(&bare, "orders"), None);
    }

    #[test]
    fn duplicate_pairs_are_collapsed() {
        struct Twice;
        impl DiscoveryStrategy for Twice {
            fn name(&self) -> &'static str {
                "twice"
            }
            fn discover(&self, _: &Capabilities<'_>, _: &str) -> Outcome {
                Outcome::Found(vec![
                    ProxyRevision::new("a", "1"),
                    ProxyRevision::new("a", "1"),
                ])
            }
        }
        let resolver = DiscoveryResolver::with_strategies(vec![Box::new(Twice)]);
        assert_eq!(
            resolver.resolve(&Capabilities::default(), "prod"),
            vec![ProxyRevision::new("a", "1")]
        );
    }
}
