//! Flow walking over proxy bundles.
//!
//! Determines which declared policies actually execute for a proxy revision
//! (referenced from a pre-flow or a conditional flow request step), the
//! virtual hosts its proxy endpoints bind to, and the targets it forwards to.

mod endpoint;
mod policy;
mod walker;
mod xml;

pub use endpoint::{ProxyEndpointDefinition, TargetDefinition};
pub use walker::{apply_flow_references, target_host, Extraction, FlowWalker, NOT_AVAILABLE};
