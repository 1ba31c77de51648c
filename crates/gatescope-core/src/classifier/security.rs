//! Policy-based security classification.

use std::collections::BTreeMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::taxonomy::{SecurityCategory, Taxonomy};
use crate::models::PolicyRecord;

static LOOPBACK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"//(?:127\.0\.0\.1|localhost)(?::\d*)?/").expect("valid loopback pattern")
});

const OAUTH2_MARKER: &str = "_oauth2_";

/// Policy types that authenticate callers even when no category matches.
const AUTH_POLICY_TYPES: &[&str] = &[
    "OAuthV1",
    "OAuthV2",
    "VerifyAPIKey",
    "BasicAuthentication",
    "VerifyJWT",
    "VerifyJWS",
    "HMAC",
    "ValidateSAMLAssertion",
];

const SPIKE_ARREST: &str = "SpikeArrest";
const JSON_THREAT: &str = "JSONThreatProtection";
const XML_THREAT: &str = "XMLThreatProtection";
const REGEX_THREAT: &str = "RegularExpressionProtection";

/// Rewrites loopback callout hosts to the canonical `localhost/` form.
///
/// `https://127.0.0.1:8443/a` and `https://localhost:9000/a` both become
/// `https://localhost/a`. Only a loopback authority directly after `//` is
/// rewritten, so `https://notlocalhost:80/a` is left alone.
pub fn normalize_callout_url(url: &str) -> String {
    LOOPBACK.replace_all(url.trim(), "//localhost/").into_owned()
}

/// Single-label security mechanism of a proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityMechanism {
    #[serde(rename = "oauth2")]
    OAuth2,
    #[serde(rename = "apikey")]
    ApiKey,
    Hmac,
    Mtls,
    Unknown,
    None,
}

impl SecurityMechanism {
    /// Returns the label as stored and reported.
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityMechanism::OAuth2 => "oauth2",
            SecurityMechanism::ApiKey => "apikey",
            SecurityMechanism::Hmac => "hmac",
            SecurityMechanism::Mtls => "mtls",
            SecurityMechanism::Unknown => "unknown",
            SecurityMechanism::None => "none",
        }
    }
}

impl fmt::Display for SecurityMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Boolean flag per security category. Every category is always present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecurityFlags(BTreeMap<SecurityCategory, bool>);

impl Default for SecurityFlags {
    fn default() -> Self {
        Self(
            SecurityCategory::all()
                .iter()
                .map(|category| (*category, false))
                .collect(),
        )
    }
}

impl SecurityFlags {
    /// Returns whether a category was recorded.
    pub fn get(&self, category: SecurityCategory) -> bool {
        self.0.get(&category).copied().unwrap_or(false)
    }

    /// Records a category.
    pub fn set(&mut self, category: SecurityCategory) {
        self.0.insert(category, true);
    }

    /// Recorded categories in report order.
    pub fn recorded(&self) -> Vec<SecurityCategory> {
        self.0
            .iter()
            .filter(|(_, set)| **set)
            .map(|(category, _)| *category)
            .collect()
    }

    /// Iterates every category with its flag.
    pub fn iter(&self) -> impl Iterator<Item = (SecurityCategory, bool)> + '_ {
        self.0.iter().map(|(category, set)| (*category, *set))
    }
}

/// Presence of enabled threat protection policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ThreatProtection {
    pub json: bool,
    pub xml: bool,
    pub regex: bool,
}

impl ThreatProtection {
    /// Returns true if any protection is present.
    pub fn any(&self) -> bool {
        self.json || self.xml || self.regex
    }
}

/// Everything derived from a proxy's executed policies.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SecurityClassification {
    pub flags: SecurityFlags,
    /// An authenticating policy was present that no higher label explains.
    pub auth_signal: bool,
    pub rate_limit: Option<String>,
    pub threat_protection: ThreatProtection,
}

impl SecurityClassification {
    /// Resolves the single label given the proxy's SSL exposure.
    ///
    /// Precedence: oauth2, apikey, hmac, mtls, unknown, none.
    pub fn mechanism(&self, two_way_ssl: bool) -> SecurityMechanism {
        if self.flags.get(SecurityCategory::OAuth2) {
            SecurityMechanism::OAuth2
        } else if self.flags.get(SecurityCategory::ApiKey) {
            SecurityMechanism::ApiKey
        } else if self.flags.get(SecurityCategory::Hmac) {
            SecurityMechanism::Hmac
        } else if two_way_ssl {
            SecurityMechanism::Mtls
        } else if self.auth_signal {
            SecurityMechanism::Unknown
        } else {
            SecurityMechanism::None
        }
    }
}

fn is_set(value: Option<&str>) -> bool {
    value.is_some_and(|v| {
        let v = v.trim();
        !v.is_empty() && !v.eq_ignore_ascii_case("none")
    })
}

fn is_oauth2_token_policy(policy: &PolicyRecord) -> bool {
    policy.policy_name.to_lowercase().contains(OAUTH2_MARKER)
        && policy.callout_url.is_none()
        && !is_set(policy.api_key.as_deref())
}

/// Classifies the enabled policies of one proxy revision.
pub(crate) fn classify(taxonomy: &Taxonomy, policies: &[PolicyRecord]) -> SecurityClassification {
    let mut result = SecurityClassification::default();
    let mut spike_arrest: Option<&PolicyRecord> = None;

    for policy in policies.iter().filter(|p| p.enabled) {
        let callout = policy.callout_url.as_deref().map(normalize_callout_url);
        let bundle = policy.shared_flow_bundle.as_deref();

        if is_set(policy.cors_policy.as_deref()) {
            result.flags.set(SecurityCategory::Cors);
        }
        if is_oauth2_token_policy(policy) {
            result.flags.set(SecurityCategory::OAuth2);
        }
        if is_set(policy.api_key.as_deref()) {
            result.flags.set(SecurityCategory::ApiKey);
        }
        if !policy.ip_allow_list.is_empty() {
            result.flags.set(SecurityCategory::IpAllowList);
        }

        for category in SecurityCategory::all() {
            if taxonomy.bucket(*category).matches(bundle, callout.as_deref()) {
                result.flags.set(*category);
            }
        }

        if AUTH_POLICY_TYPES
            .iter()
            .any(|t| policy.policy_type.eq_ignore_ascii_case(t))
        {
            result.auth_signal = true;
        }

        match policy.policy_type.as_str() {
            SPIKE_ARREST => {
                let lower = spike_arrest
                    .map_or(true, |current| policy.policy_file_name < current.policy_file_name);
                if lower && policy.rate_limit.is_some() {
                    spike_arrest = Some(policy);
                }
            }
            JSON_THREAT => result.threat_protection.json = true,
            XML_THREAT => result.threat_protection.xml = true,
            REGEX_THREAT => result.threat_protection.regex = true,
            _ => {}
        }
    }

    let unexplained = result.flags.recorded().into_iter().any(|category| {
        category.is_authentication()
            && !matches!(
                category,
                SecurityCategory::OAuth2 | SecurityCategory::ApiKey | SecurityCategory::Hmac
            )
    });
    result.auth_signal |= unexplained;
    result.rate_limit = spike_arrest.and_then(|p| p.rate_limit.clone());
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(file_name: &str, policy_type: &str) -> PolicyRecord {
        PolicyRecord {
            policy_file_name: file_name.to_string(),
            policy_name: file_name.to_string(),
            policy_type: policy_type.to_string(),
            enabled: true,
            ..Default::default()
        }
    }

    fn classify_builtin(policies: &[PolicyRecord]) -> SecurityClassification {
        classify(Taxonomy::builtin(), policies)
    }

    #[test]
    fn normalizes_loopback_callouts() {
        assert_eq!(
            normalize_callout_url("https://127.0.0.1:8443/apiplatform/x"),
            "https://localhost/apiplatform/x"
        );
        assert_eq!(
            normalize_callout_url("https://localhost:9000/apiplatform/x"),
            "https://localhost/apiplatform/x"
        );
        assert_eq!(
            normalize_callout_url("https://localhost/apiplatform/x"),
            "https://localhost/apiplatform/x"
        );
        assert_eq!(
            normalize_callout_url("https://backend.example.com/x"),
            "https://backend.example.com/x"
        );
    }

    #[test]
    fn loopback_lookalike_hosts_are_untouched() {
        for url in [
            "https://notlocalhost:80/apiplatform/x",
            "https://x127.0.0.1/apiplatform/x",
            "https://api.localhost:8443/apiplatform/x",
        ] {
            assert_eq!(normalize_callout_url(url), url);
        }
    }

    #[test]
    fn verify_api_key_is_apikey() {
        let mut p = policy("Verify-Key", "VerifyAPIKey");
        p.api_key = Some("X".into());
        let result = classify_builtin(&[p]);
        assert!(result.flags.get(SecurityCategory::ApiKey));
        assert_eq!(result.mechanism(false), SecurityMechanism::ApiKey);
    }

    #[test]
    fn no_policies_is_none() {
        let result = classify_builtin(&[]);
        assert!(result.flags.recorded().is_empty());
        assert_eq!(result.mechanism(false), SecurityMechanism::None);
        assert_eq!(result.mechanism(true), SecurityMechanism::Mtls);
    }

    #[test]
    fn oauth2_outranks_apikey() {
        let oauth = policy("Generate_OAuth2_Token", "OAuthV2");
        let mut key = policy("Verify-Key", "VerifyAPIKey");
        key.api_key = Some("request.header.apikey".into());
        let result = classify_builtin(&[key, oauth]);
        assert!(result.flags.get(SecurityCategory::OAuth2));
        assert!(result.flags.get(SecurityCategory::ApiKey));
        assert_eq!(result.mechanism(true), SecurityMechanism::OAuth2);
    }

    #[test]
    fn oauth2_marker_requires_no_callout() {
        let mut p = policy("SC_oauth2_validate", "ServiceCallout");
        p.callout_url = Some("https://backend.example.com/token".into());
        let result = classify_builtin(&[p]);
        assert!(!result.flags.get(SecurityCategory::OAuth2));
    }

    #[test]
    fn disabled_policies_contribute_nothing() {
        let mut key = policy("Verify-Key", "VerifyAPIKey");
        key.api_key = Some("X".into());
        key.enabled = false;
        let mut spike = policy("Spike", "SpikeArrest");
        spike.rate_limit = Some("10ps".into());
        spike.enabled = false;
        let mut json = policy("JTP", "JSONThreatProtection");
        json.enabled = false;

        let result = classify_builtin(&[key, spike, json]);
        assert_eq!(result, SecurityClassification::default());
        assert_eq!(result.mechanism(false), SecurityMechanism::None);
    }

    #[test]
    fn hmac_from_shared_flow_and_callout() {
        let mut fc = policy("FC-Hmac", "FlowCallout");
        fc.shared_flow_bundle = Some("APIPlatform_ValidateHmac_SharedFlow_200004162_V1".into());
        assert_eq!(
            classify_builtin(&[fc]).mechanism(false),
            SecurityMechanism::Hmac
        );

        let mut sc = policy("SC-Hmac", "ServiceCallout");
        sc.callout_url = Some("https://127.0.0.1:8443/apiplatform/validatetoken/v1/hmac".into());
        assert_eq!(
            classify_builtin(&[sc]).mechanism(false),
            SecurityMechanism::Hmac
        );
    }

    #[test]
    fn unclassified_auth_is_unknown() {
        let mut jwt = policy("FC-Jwt", "FlowCallout");
        jwt.shared_flow_bundle = Some("APIPlatform_IDCJWTCallB2B_Sharedflow_200004162_v1".into());
        let result = classify_builtin(&[jwt]);
        assert!(result.flags.get(SecurityCategory::JwtB2b));
        assert_eq!(result.mechanism(false), SecurityMechanism::Unknown);
        assert_eq!(result.mechanism(true), SecurityMechanism::Mtls);

        let basic = policy("Basic", "BasicAuthentication");
        assert_eq!(
            classify_builtin(&[basic]).mechanism(false),
            SecurityMechanism::Unknown
        );
    }

    #[test]
    fn cors_and_ip_allow_list_are_not_authentication() {
        let mut cors = policy("CORS", "CORS");
        cors.cors_policy = Some("*".into());
        let mut ip = policy("IP", "AccessControl");
        ip.ip_allow_list = vec!["10.0.0.0/8".into()];
        let mut none = policy("AM", "AssignMessage");
        none.cors_policy = Some("none".into());

        let result = classify_builtin(&[cors, ip, none]);
        assert!(result.flags.get(SecurityCategory::Cors));
        assert!(result.flags.get(SecurityCategory::IpAllowList));
        assert_eq!(result.mechanism(false), SecurityMechanism::None);
    }

    #[test]
    fn order_independent() {
        let mut key = policy("Verify-Key", "VerifyAPIKey");
        key.api_key = Some("X".into());
        let mut fc = policy("FC-Sign", "FlowCallout");
        fc.shared_flow_bundle = Some("API_Sharedflow_SignMessage_V1".into());
        let mut spike_b = policy("Spike-B", "SpikeArrest");
        spike_b.rate_limit = Some("50ps".into());
        let mut spike_a = policy("Spike-A", "SpikeArrest");
        spike_a.rate_limit = Some("20ps".into());

        let forward = vec![key.clone(), fc.clone(), spike_b.clone(), spike_a.clone()];
        let reverse = vec![spike_a, spike_b, fc, key];
        let a = classify_builtin(&forward);
        let b = classify_builtin(&reverse);
        assert_eq!(a, b);
        assert_eq!(a.rate_limit.as_deref(), Some("20ps"));
    }

    #[test]
    fn threat_protection_flags() {
        let result = classify_builtin(&[
            policy("JTP", "JSONThreatProtection"),
            policy("RE", "RegularExpressionProtection"),
        ]);
        assert!(result.threat_protection.json);
        assert!(!result.threat_protection.xml);
        assert!(result.threat_protection.regex);
        assert!(result.threat_protection.any());
    }

    #[test]
    fn flags_serialize_every_category() {
        let mut flags = SecurityFlags::default();
        flags.set(SecurityCategory::Cazm);
        let json = serde_json::to_value(&flags).unwrap();
        let map = json.as_object().unwrap();
        assert_eq!(map.len(), SecurityCategory::all().len());
        assert_eq!(map["cazm"], serde_json::json!(true));
        assert_eq!(map["oauth2"], serde_json::json!(false));
    }

    #[test]
    fn mechanism_labels() {
        assert_eq!(
            serde_json::to_string(&SecurityMechanism::OAuth2).unwrap(),
            "\"oauth2\""
        );
        assert_eq!(SecurityMechanism::Mtls.to_string(), "mtls");
        assert_eq!(SecurityMechanism::None.as_str(), "none");
    }
}
