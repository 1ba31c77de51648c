//! Decoding of proxy and target endpoint definitions.
//!
//! The management API serves endpoint definitions either as raw XML or as a
//! JSON rendering of the same tree, where element names are camel-cased
//! (`preFlow`, `virtualHost`, `uRL`, `sSLInfo`) and a single child may appear
//! as an object instead of a one-element list.

use serde_json::Value;

use super::xml::{self, XmlElement};
use crate::error::{CoreError, Result};
use crate::management::EndpointDocument;
use crate::models::SslInfo;

/// The parts of a proxy endpoint the walker needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyEndpointDefinition {
    pub name: String,
    pub base_path: Option<String>,
    /// Policy names referenced by pre-flow request steps.
    pub pre_flow_steps: Vec<String>,
    /// Policy names referenced by conditional flow request steps.
    pub flow_steps: Vec<String>,
    pub virtual_hosts: Vec<String>,
}

/// The parts of a target endpoint the walker needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetDefinition {
    pub name: String,
    pub url: Option<String>,
    pub ssl_info: Option<SslInfo>,
}

impl ProxyEndpointDefinition {
    /// Decodes a proxy endpoint from either document form.
    pub fn decode(name: &str, document: &EndpointDocument) -> Result<Self> {
        match document {
            EndpointDocument::Tree(tree) => Self::from_tree(name, tree),
            EndpointDocument::Xml(text) => Self::from_xml(name, text),
        }
    }

    fn from_tree(name: &str, tree: &Value) -> Result<Self> {
        if !tree.is_object() {
            return Err(CoreError::Decode(format!(
                "proxy endpoint {name} is not an object"
            )));
        }

        let pre_flow_steps = tree
            .get("preFlow")
            .map(|pre| request_steps(pre.get("request")))
            .unwrap_or_default();

        let flow_steps = as_list(tree.get("flows"))
            .into_iter()
            .flat_map(|flow| request_steps(flow.get("request")))
            .collect();

        let connection = tree.get("connection");
        let base_path = connection
            .and_then(|c| c.get("basePath"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let virtual_hosts = match connection.and_then(|c| c.get("virtualHost")) {
            Some(Value::String(host)) => vec![host.clone()],
            Some(Value::Array(hosts)) => hosts
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };

        Ok(Self {
            name: name.to_string(),
            base_path,
            pre_flow_steps,
            flow_steps,
            virtual_hosts,
        })
    }

    fn from_xml(name: &str, text: &str) -> Result<Self> {
        let root = xml::parse(text)?;
        if root.name != "ProxyEndpoint" {
            return Err(CoreError::Decode(format!(
                "expected ProxyEndpoint, found {}",
                root.name
            )));
        }

        let pre_flow_steps = root
            .path(&["PreFlow", "Request"])
            .map(xml_steps)
            .unwrap_or_default();

        let flow_steps = root
            .child("Flows")
            .map(|flows| {
                flows
                    .children_named("Flow")
                    .filter_map(|flow| flow.child("Request"))
                    .flat_map(xml_steps)
                    .collect()
            })
            .unwrap_or_default();

        let connection = root.child("HTTPProxyConnection");
        let base_path = connection
            .and_then(|c| c.child("BasePath"))
            .and_then(XmlElement::text);
        let virtual_hosts = connection
            .map(|c| {
                c.children_named("VirtualHost")
                    .filter_map(XmlElement::text)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            name: root.attr("name").unwrap_or(name).to_string(),
            base_path,
            pre_flow_steps,
            flow_steps,
            virtual_hosts,
        })
    }
}

impl TargetDefinition {
    /// Decodes a target endpoint from either document form.
    pub fn decode(name: &str, document: &EndpointDocument) -> Result<Self> {
        match document {
            EndpointDocument::Tree(tree) => Self::from_tree(name, tree),
            EndpointDocument::Xml(text) => Self::from_xml(name, text),
        }
    }

    fn from_tree(name: &str, tree: &Value) -> Result<Self> {
        let connection = tree
            .get("connection")
            .ok_or_else(|| CoreError::Decode(format!("target {name} has no connection")))?;

        let url = connection
            .get("uRL")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_string);

        let ssl_info = connection.get("sSLInfo").map(|ssl| SslInfo {
            enabled: truthy(ssl.get("enabled")),
            client_auth_enabled: truthy(ssl.get("clientAuthEnabled")),
            key_store: ssl.get("keyStore").and_then(Value::as_str).map(str::to_string),
            trust_store: ssl
                .get("trustStore")
                .and_then(Value::as_str)
                .map(str::to_string),
        });

        Ok(Self {
            name: name.to_string(),
            url,
            ssl_info,
        })
    }

    fn from_xml(name: &str, text: &str) -> Result<Self> {
        let root = xml::parse(text)?;
        if root.name != "TargetEndpoint" {
            return Err(CoreError::Decode(format!(
                "expected TargetEndpoint, found {}",
                root.name
            )));
        }

        let connection = root
            .child("HTTPTargetConnection")
            .ok_or_else(|| CoreError::Decode(format!("target {name} has no connection")))?;

        let url = connection.child("URL").and_then(XmlElement::text);
        let ssl_info = connection.child("SSLInfo").map(|ssl| SslInfo {
            enabled: xml_flag(ssl.child("Enabled")),
            client_auth_enabled: xml_flag(ssl.child("ClientAuthEnabled")),
            key_store: ssl.child("KeyStore").and_then(XmlElement::text),
            trust_store: ssl.child("TrustStore").and_then(XmlElement::text),
        });

        Ok(Self {
            name: root.attr("name").unwrap_or(name).to_string(),
            url,
            ssl_info,
        })
    }
}

/// Treats a lone object as a one-element list.
fn as_list(value: Option<&Value>) -> Vec<&Value> {
    match value {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(obj @ Value::Object(_)) => vec![obj],
        _ => Vec::new(),
    }
}

/// Policy names of `request.children[].Step.name`.
fn request_steps(request: Option<&Value>) -> Vec<String> {
    as_list(request.and_then(|r| r.get("children")))
        .into_iter()
        .filter_map(|child| child.get("Step"))
        .filter_map(|step| step.get("name"))
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect()
}

fn xml_steps(request: &XmlElement) -> Vec<String> {
    request
        .children_named("Step")
        .filter_map(|step| step.child("Name"))
        .filter_map(XmlElement::text)
        .collect()
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

fn xml_flag(element: Option<&XmlElement>) -> bool {
    element
        .and_then(XmlElement::text)
        .is_some_and(|t| t.eq_ignore_ascii_case("true"))
}
