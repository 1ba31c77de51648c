//! Catalog rows from discovery, flow walking and classification.

use chrono::{DateTime, Utc};
use gatescope_core::classifier::Classifier;
use gatescope_core::flow::{Extraction, FlowWalker};
use gatescope_core::management::{Capabilities, ManagementClient};
use gatescope_core::models::{CatalogRow, ProxyRevision};
use tracing::{debug, info, warn};

use crate::discovery::DiscoveryResolver;
use crate::traffic::TrafficSource;

/// Builds one catalog row per discovered proxy revision.
pub struct CatalogAssembler<'a> {
    caps: Capabilities<'a>,
    classifier: Classifier<'a>,
}

impl<'a> CatalogAssembler<'a> {
    /// Creates an assembler reading bundles through `caps`.
    pub fn new(caps: Capabilities<'a>, classifier: Classifier<'a>) -> Self {
        Self { caps, classifier }
    }

    /// Assembles rows stamped with the current time.
    pub fn assemble(&self, pairs: &[ProxyRevision]) -> Vec<CatalogRow> {
        self.assemble_at(pairs, Utc::now())
    }

    /// Assembles rows stamped with `updated_at`.
    ///
    /// A revision whose bundle cannot be read still yields a row, with no
    /// policies, hosts or targets.
    pub fn assemble_at(&self, pairs: &[ProxyRevision], updated_at: DateTime<Utc>) -> Vec<CatalogRow> {
        if self.caps.bundle_reader.is_none() && !pairs.is_empty() {
            warn!("Management client cannot read bundles; catalog rows will be partial");
        }

        let rows: Vec<CatalogRow> = pairs.iter().map(|unit| self.row(unit, updated_at)).collect();
        info!(rows = rows.len(), "Assembled catalog");
        rows
    }

    fn row(&self, unit: &ProxyRevision, updated_at: DateTime<Utc>) -> CatalogRow {
        let extraction = match self.caps.bundle_reader {
            Some(bundle) => FlowWalker::new(bundle).extract(unit),
            None => Extraction::default(),
        };

        let security = self.classifier.classify_security(&extraction.policies);
        let ssl = self.classifier.classify_ssl(&extraction.virtual_hosts);
        let mechanism = self.classifier.security_mechanism(&security, &ssl);

        debug!(
            proxy = %unit.proxy_name,
            revision = %unit.revision,
            mechanism = %mechanism,
            "Classified proxy"
        );

        CatalogRow {
            apiproxy: unit.proxy_name.clone(),
            revision: unit.revision.clone(),
            base_path: extraction.base_path.clone(),
            target_host: extraction.target_host(),
            target_two_way_ssl: extraction.target_two_way_ssl(),
            security_mechanism: mechanism,
            security_flags: security.flags,
            rate_limit: security.rate_limit,
            threat_protection: security.threat_protection,
            virtual_hosts: extraction.virtual_hosts.into_iter().collect(),
            ssl_profile_flags: ssl,
            updated_at,
        }
    }
}

/// Discovers the active proxies of `env` and builds their catalog rows.
pub fn build_catalog<C: ManagementClient + ?Sized>(
    client: &C,
    env: &str,
    traffic: &dyn TrafficSource,
    force_log_search: bool,
    classifier: Classifier<'_>,
) -> Vec<CatalogRow> {
    let caps = Capabilities::probe(client);
    let pairs = DiscoveryResolver::new(traffic, force_log_search).resolve(&caps, env);
    CatalogAssembler::new(caps, classifier).assemble(&pairs)
}
