//! Gatescope Core - gateway proxy model, flow walking and classification.
//!
//! This crate holds everything that does not talk to the network directly:
//! the data model, the management API capability traits, the flow walker
//! that decodes proxy and target endpoint definitions, and the
//! security/SSL classifier with its taxonomy registry.

pub mod classifier;
pub mod error;
pub mod flow;
pub mod management;
pub mod models;

pub use classifier::{
    Classifier, SecurityCategory, SecurityClassification, SecurityFlags, SecurityMechanism,
    SslBucket, SslClassification, Taxonomy, ThreatProtection,
};
pub use error::{CoreError, Result};
pub use flow::{Extraction, FlowWalker, NOT_AVAILABLE};
pub use management::{
    BundleReader, Capabilities, DeploymentCheck, DeploymentStatus, EndpointDocument,
    EnvironmentInfo, ManagementClient, OrgDeployments, ProxyListing, RevisionListing,
};
pub use models::{
    ApplicationLevel, CatalogRow, MetricField, MetricValue, MonthlyMetricRow, PolicyRecord,
    ProxyRevision, RowSink, SslInfo, TargetEndpoint,
};
