//! Security and SSL classification of proxy revisions.
//!
//! A [`Classifier`] holds a reference to an immutable [`Taxonomy`] and maps
//! extracted policies and virtual hosts to fixed-width flag vectors plus a
//! single security mechanism label.

mod security;
mod ssl;
mod taxonomy;

pub use security::{
    normalize_callout_url, SecurityClassification, SecurityFlags, SecurityMechanism,
    ThreatProtection,
};
pub use ssl::SslClassification;
pub use taxonomy::{SecurityBucket, SecurityCategory, SslBucket, Taxonomy};

use crate::models::PolicyRecord;

/// Classifier over an injected taxonomy registry.
#[derive(Debug, Clone, Copy)]
pub struct Classifier<'t> {
    taxonomy: &'t Taxonomy,
}

impl Classifier<'static> {
    /// Creates a classifier over the built-in registry.
    pub fn builtin() -> Self {
        Self::new(Taxonomy::builtin())
    }
}

impl<'t> Classifier<'t> {
    /// Creates a classifier over `taxonomy`.
    pub fn new(taxonomy: &'t Taxonomy) -> Self {
        Self { taxonomy }
    }

    /// Returns the registry in use.
    pub fn taxonomy(&self) -> &'t Taxonomy {
        self.taxonomy
    }

    /// Classifies the executed policies of a proxy revision.
    ///
    /// Disabled policies are ignored. The result does not depend on
    /// policy order.
    pub fn classify_security(&self, policies: &[PolicyRecord]) -> SecurityClassification {
        security::classify(self.taxonomy, policies)
    }

    /// Classifies virtual hosts into SSL exposure buckets.
    pub fn classify_ssl<'h>(
        &self,
        virtual_hosts: impl IntoIterator<Item = &'h String>,
    ) -> SslClassification {
        ssl::classify(self.taxonomy, virtual_hosts)
    }

    /// Resolves the single mechanism label from both classifications.
    pub fn security_mechanism(
        &self,
        security: &SecurityClassification,
        ssl: &SslClassification,
    ) -> SecurityMechanism {
        security.mechanism(ssl.has_two_way())
    }
}
