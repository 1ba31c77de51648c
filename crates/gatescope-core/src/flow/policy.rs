//! Policy summaries from policy definition trees.

use serde_json::Value;

use crate::models::{ApplicationLevel, PolicyRecord};

const CORS_HEADER: &str = "Access-Control-Allow-Origin";

impl PolicyRecord {
    /// Builds a policy summary from the JSON rendering of a policy definition.
    ///
    /// `file_name` is the name flow steps use to reference the policy.
    pub fn from_tree(file_name: &str, tree: &Value) -> Self {
        let policy_type = str_at(tree, &["policyType"]).unwrap_or_default();

        let policy_name = str_at(tree, &["displayName"])
            .or_else(|| str_at(tree, &["name"]))
            .unwrap_or_else(|| file_name.to_string());

        let enabled = match tree.get("enabled") {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => !s.eq_ignore_ascii_case("false"),
            _ => true,
        };

        let callout_url = str_at(tree, &["httpTargetConnection", "uRL"])
            .or_else(|| str_at(tree, &["httpTargetConnection", "url"]));

        let api_key = match tree.get("aPIKey") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(obj @ Value::Object(_)) => str_at(obj, &["ref"]).or_else(|| str_at(obj, &["value"])),
            _ => None,
        };

        let cors_policy = if policy_type.eq_ignore_ascii_case("CORS") {
            Some(join_values(tree.get("allowOrigins")).unwrap_or_else(|| "*".to_string()))
        } else {
            find_header(tree, CORS_HEADER)
        };

        let shared_flow_bundle = str_at(tree, &["sharedFlowBundle"]);

        let rate_limit = match tree.get("rate") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(obj @ Value::Object(_)) => str_at(obj, &["value"]).or_else(|| str_at(obj, &["ref"])),
            _ => None,
        };

        Self {
            policy_file_name: file_name.to_string(),
            policy_type,
            policy_name,
            enabled,
            callout_url,
            api_key,
            cors_policy,
            shared_flow_bundle,
            rate_limit,
            ip_allow_list: allowed_addresses(tree),
            application_level: ApplicationLevel::default(),
        }
    }
}

fn str_at(value: &Value, path: &[&str]) -> Option<String> {
    path.iter()
        .try_fold(value, |v, key| v.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn join_values(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Array(items) => {
            let parts: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
            (!parts.is_empty()).then(|| parts.join(","))
        }
        _ => None,
    }
}

/// Value of a header set anywhere in the tree, matched by name.
fn find_header(value: &Value, header: &str) -> Option<String> {
    match value {
        Value::Object(map) => {
            let named = map
                .get("name")
                .and_then(Value::as_str)
                .is_some_and(|n| n.eq_ignore_ascii_case(header));
            if named {
                if let Some(v) = map.get("value").and_then(Value::as_str) {
                    return Some(v.to_string());
                }
            }
            map.values().find_map(|v| find_header(v, header))
        }
        Value::Array(items) => items.iter().find_map(|v| find_header(v, header)),
        _ => None,
    }
}

/// Source addresses of `ALLOW` match rules.
fn allowed_addresses(tree: &Value) -> Vec<String> {
    let rules = match tree.get("iPRules").and_then(|r| r.get("matchRules")) {
        Some(Value::Array(rules)) => rules.iter().collect::<Vec<_>>(),
        Some(rule @ Value::Object(_)) => vec![rule],
        _ => return Vec::new(),
    };

    let mut addresses = Vec::new();
    for rule in rules {
        let allow = rule
            .get("action")
            .and_then(Value::as_str)
            .is_some_and(|a| a.eq_ignore_ascii_case("ALLOW"));
        if !allow {
            continue;
        }
        let sources = match rule.get("sourceAddress") {
            Some(Value::Array(items)) => items.iter().collect::<Vec<_>>(),
            Some(other) => vec![other],
            None => Vec::new(),
        };
        for source in sources {
            match source {
                Value::String(s) => addresses.push(s.clone()),
                Value::Object(_) => {
                    if let Some(addr) = str_at(source, &["value"]) {
                        match str_at(source, &["mask"]) {
                            Some(mask) => addresses.push(format!("{addr}/{mask}")),
                            None => addresses.push(addr),
                        }
                    }
                }
                _ => {}
            }
        }
    }
    addresses
}
