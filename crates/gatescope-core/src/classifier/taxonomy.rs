//! Security and SSL taxonomy registry.
//!
//! The registry maps each security category to the callout URL prefixes and
//! shared-flow bundle names that identify it, and each SSL exposure bucket
//! to the virtual host names that belong to it. It is immutable once built;
//! [`Taxonomy::builtin`] is the process-wide default and
//! [`Taxonomy::from_file`] loads a replacement.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Security taxonomy entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityCategory {
    #[serde(rename = "oauth2")]
    OAuth2,
    #[serde(rename = "apikey")]
    ApiKey,
    Hmac,
    IpAllowList,
    Cors,
    MessageSigning,
    JwtC2b,
    JwtB2b,
    JwtA2a,
    #[serde(rename = "layer7")]
    Layer7,
    NextGenOauth,
    Cazm,
    MiscSecurity,
    BasicAuthentication,
}

impl SecurityCategory {
    /// Returns all categories in report order.
    pub fn all() -> &'static [SecurityCategory] {
        &[
            SecurityCategory::OAuth2,
            SecurityCategory::ApiKey,
            SecurityCategory::Hmac,
            SecurityCategory::IpAllowList,
            SecurityCategory::Cors,
            SecurityCategory::MessageSigning,
            SecurityCategory::JwtC2b,
            SecurityCategory::JwtB2b,
            SecurityCategory::JwtA2a,
            SecurityCategory::Layer7,
            SecurityCategory::NextGenOauth,
            SecurityCategory::Cazm,
            SecurityCategory::MiscSecurity,
            SecurityCategory::BasicAuthentication,
        ]
    }

    /// Returns a human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            SecurityCategory::OAuth2 => "OAuth2",
            SecurityCategory::ApiKey => "Verify Api Key",
            SecurityCategory::Hmac => "HMAC",
            SecurityCategory::IpAllowList => "IP Allow List",
            SecurityCategory::Cors => "CORS",
            SecurityCategory::MessageSigning => "Message Signing",
            SecurityCategory::JwtC2b => "JWT C2B",
            SecurityCategory::JwtB2b => "JWT B2B",
            SecurityCategory::JwtA2a => "JWT A2A",
            SecurityCategory::Layer7 => "Layer 7",
            SecurityCategory::NextGenOauth => "Next Gen OAuth",
            SecurityCategory::Cazm => "CAZM",
            SecurityCategory::MiscSecurity => "Misc Security",
            SecurityCategory::BasicAuthentication => "Basic Authentication",
        }
    }

    /// Whether a match indicates authentication of the caller.
    ///
    /// CORS and IP allow-listing restrict callers without identifying them.
    pub fn is_authentication(&self) -> bool {
        !matches!(self, SecurityCategory::Cors | SecurityCategory::IpAllowList)
    }
}

/// SSL exposure buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SslBucket {
    OneWayIntranet,
    TwoWayIntranet,
    OneWayInternet,
    TwoWayInternet,
}

impl SslBucket {
    /// Returns all buckets in match order.
    pub fn all() -> &'static [SslBucket] {
        &[
            SslBucket::OneWayIntranet,
            SslBucket::TwoWayIntranet,
            SslBucket::OneWayInternet,
            SslBucket::TwoWayInternet,
        ]
    }

    /// Returns a human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            SslBucket::OneWayIntranet => "One Way Intranet",
            SslBucket::TwoWayIntranet => "Two Way Intranet",
            SslBucket::OneWayInternet => "One Way Internet",
            SslBucket::TwoWayInternet => "Two Way Internet",
        }
    }

    /// Whether clients must present a certificate.
    pub fn is_two_way(&self) -> bool {
        matches!(self, SslBucket::TwoWayIntranet | SslBucket::TwoWayInternet)
    }
}

/// Identifying markers of one security category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityBucket {
    /// Normalized callout URL prefixes.
    #[serde(default)]
    pub callout_urls: Vec<String>,
    /// Exact shared-flow bundle names.
    #[serde(default)]
    pub shared_flow_bundles: Vec<String>,
}

impl SecurityBucket {
    /// Whether a policy with this bundle and normalized callout URL belongs here.
    pub fn matches(&self, shared_flow_bundle: Option<&str>, callout_url: Option<&str>) -> bool {
        let bundle_match = shared_flow_bundle
            .is_some_and(|bundle| self.shared_flow_bundles.iter().any(|b| b == bundle));
        let url_match = callout_url.is_some_and(|url| {
            self.callout_urls
                .iter()
                .any(|prefix| url.starts_with(prefix.as_str()))
        });
        bundle_match || url_match
    }
}

/// The classification registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taxonomy {
    #[serde(default)]
    pub security: BTreeMap<SecurityCategory, SecurityBucket>,
    #[serde(default)]
    pub ssl: BTreeMap<SslBucket, BTreeSet<String>>,
}

static EMPTY_BUCKET: SecurityBucket = SecurityBucket {
    callout_urls: Vec::new(),
    shared_flow_bundles: Vec::new(),
};

static BUILTIN: Lazy<Taxonomy> = Lazy::new(Taxonomy::default_registry);

impl Taxonomy {
    /// The built-in registry.
    pub fn builtin() -> &'static Taxonomy {
        &BUILTIN
    }

    /// Parses and validates a JSON registry.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let taxonomy: Taxonomy = serde_json::from_str(json)?;
        taxonomy.validate()?;
        Ok(taxonomy)
    }

    /// Loads and validates a JSON registry file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Markers for a category; categories absent from the registry match nothing.
    pub fn bucket(&self, category: SecurityCategory) -> &SecurityBucket {
        self.security.get(&category).unwrap_or(&EMPTY_BUCKET)
    }

    /// The first SSL bucket containing `host`, in [`SslBucket::all`] order.
    ///
    /// A host listed in several buckets reports only the earliest one.
    pub fn ssl_bucket_for(&self, host: &str) -> Option<SslBucket> {
        SslBucket::all()
            .iter()
            .copied()
            .find(|bucket| self.ssl.get(bucket).is_some_and(|hosts| hosts.contains(host)))
    }

    fn validate(&self) -> Result<()> {
        for (category, bucket) in &self.security {
            if bucket.callout_urls.iter().any(|u| u.trim().is_empty()) {
                return Err(CoreError::Taxonomy(format!(
                    "empty callout URL prefix for {}",
                    category.name()
                )));
            }
            if bucket.shared_flow_bundles.iter().any(|b| b.trim().is_empty()) {
                return Err(CoreError::Taxonomy(format!(
                    "empty shared flow bundle for {}",
                    category.name()
                )));
            }
        }
        for (bucket, hosts) in &self.ssl {
            if hosts.iter().any(|h| h.trim().is_empty()) {
                return Err(CoreError::Taxonomy(format!(
                    "empty virtual host in {}",
                    bucket.name()
                )));
            }
        }
        Ok(())
    }

    fn default_registry() -> Taxonomy {
        fn bucket(callout_urls: &[&str], shared_flow_bundles: &[&str]) -> SecurityBucket {
            SecurityBucket {
                callout_urls: callout_urls.iter().map(|s| s.to_string()).collect(),
                shared_flow_bundles: shared_flow_bundles.iter().map(|s| s.to_string()).collect(),
            }
        }

        fn hosts(names: &[&str]) -> BTreeSet<String> {
            names.iter().map(|s| s.to_string()).collect()
        }

        let mut security = BTreeMap::new();
        security.insert(
            SecurityCategory::OAuth2,
            bucket(&["https://localhost/apiplatform/oauth/token"], &[]),
        );
        security.insert(
            SecurityCategory::Hmac,
            bucket(
                &[
                    "https://localhost/apiplatform/validatetoken/v1/hmac",
                    "https://localhost/apiplatform/validatetoken/v2/hmac",
                ],
                &["APIPlatform_ValidateHmac_SharedFlow_200004162_V1"],
            ),
        );
        security.insert(
            SecurityCategory::MessageSigning,
            bucket(
                &[
                    "https://localhost/apiplatform/v1/soapsignature/sign",
                    "https://amexmktcampaigns.my.salesforce.com/services/Soap/u/30.0",
                    "https://login.salesforce.com/services/Soap/u/30.0",
                ],
                &["API_Sharedflow_SignMessage_V1"],
            ),
        );
        security.insert(
            SecurityCategory::JwtC2b,
            bucket(
                &[
                    "https://localhost/idaas/validatetoken/v2/jwt",
                    "https://localhost/iddass/validatetoken/v1",
                ],
                &["APIPlatform_IDCJWTCallC2B_Sharedflow_200004162_v1"],
            ),
        );
        security.insert(
            SecurityCategory::JwtB2b,
            bucket(
                &[
                    "https://localhost/idaas/validatetoken/v1/business/jwt",
                    "https://localhost/security/digital/v1/okta_jwt/validation",
                    "https://idcb2bjwt-green-qa.aexp.com/apiplatform/v1/idc_auth/b2b/jwt_token/validation",
                ],
                &["APIPlatform_IDCJWTCallB2B_Sharedflow_200004162_v1"],
            ),
        );
        security.insert(
            SecurityCategory::JwtA2a,
            bucket(
                &["https://localhost/security/digital/v1/validate_jwt"],
                &["APIPlatform_IDCJWTCallA2A_Sharedflow_200004162_v1"],
            ),
        );
        security.insert(
            SecurityCategory::Layer7,
            bucket(
                &[
                    "https://localhost/apiplatform/v3/oauth/validate_token",
                    "https://localhost/apiplatform/v1/mactoken",
                    "https://localhost/v1/oauth/validate_token",
                    "https://localhost/apiplatform/v2/oauth/validate_token",
                    "https://localhost/ace/v1/oauth/validate/token/mac",
                    "https://localhost/v2/oauth/validate_token",
                ],
                &[],
            ),
        );
        security.insert(SecurityCategory::ApiKey, bucket(&[], &[]));
        security.insert(
            SecurityCategory::NextGenOauth,
            bucket(
                &[
                    "https://localhost/oauth/v1/token/cc/validate",
                    "https://localhost/apiplatform/v6/oauth/validate_token",
                    "https://localhost/apiplatform/v8/oauth/validate_token",
                    "https://localhost/oauth/v2/token/cc/validate",
                ],
                &[],
            ),
        );
        security.insert(
            SecurityCategory::Cazm,
            bucket(&["https://localhost/apiplatform/cazm/v1/token/xml"], &[]),
        );
        security.insert(SecurityCategory::IpAllowList, bucket(&[], &[]));
        security.insert(
            SecurityCategory::MiscSecurity,
            bucket(
                &[
                    "https://api.loungebuddy.com/validate",
                    "https://localhost/apiplatform/v1/reserve/oauth/token/validation/mac",
                    "https://localhost/apiplatform/v1/smsession/users/session/validation",
                    "https://developer.api.intuit.com/.well-known/openid_configuration/",
                ],
                &[
                    "APICommonComponent_FlowCallout_PreFlowAuthorization",
                    "DPGMigration_Preflow_Authorization_Timestamp",
                ],
            ),
        );
        security.insert(
            SecurityCategory::BasicAuthentication,
            bucket(&[], &["API_FlowCallout_VerifyBasicAuth_V1"]),
        );
        security.insert(SecurityCategory::Cors, bucket(&[], &[]));

        let mut ssl = BTreeMap::new();
        ssl.insert(
            SslBucket::OneWayIntranet,
            hosts(&[
                "gwInternalApiC2",
                "gwInternalApi",
                "gwGDHAAPIntranet",
                "gwIntranet",
                "intranet",
                "gwIntranetSFL",
                "gwIntranetHTTP",
                "gwInternetStservices",
                "gwIntranetBeta",
                "gwGDHAAAIntranet",
                "gwInternalApiSFL",
                "gwInternalApi2T",
                "gwIntranetIDC",
                "gwIntranetSB",
                "gwsharedpocApi",
                "gwInternalApiC1",
                "gwEngineering",
                "FeatureTest",
                "gwInternalPWS",
                "gwInternalPWSTemp",
                "gwTestVHostLB",
                "gwInternalApiArena",
                "gwInternalApiArC1",
                "gwInternalApiSB",
                "gwInternalApiSbC4",
                "gwInternalApiC4",
                "gwIntranetArena",
            ]),
        );
        ssl.insert(
            SslBucket::TwoWayIntranet,
            hosts(&[
                "intranet2S",
                "gwIntranet2S",
                "gwIntranet2Sservicesout",
                "gwIntranet2Spservices2",
                "gwIntranet2Spservices",
                "gwIntranet2SFL",
                "gwInternalApi2S",
                "gwIntranetSB2S",
                "gwIntranetHTTPS",
                "gw2STesting",
                "gwIntranetCertAAS",
                "gwInternetArena2S",
            ]),
        );
        ssl.insert(
            SslBucket::OneWayInternet,
            hosts(&[
                "internet",
                "gwInternet",
                "gwApiInternet",
                "gwGDHAInternet",
                "gwInternetSFL",
                "gwInternetIDC",
                "gwInternetBeta",
                "gwInternetVir",
                "gwInternetSB",
                "gwInternetArena",
                "gwInternetEng",
            ]),
        );
        ssl.insert(
            SslBucket::TwoWayInternet,
            hosts(&[
                "gwInternet2Sob",
                "gwInternet2S",
                "gwInternet2S01",
                "gwApiInternet2S",
                "gwInternet2Sgatewayservices",
                "gwInternet2Sma",
                "gwInternet2S_Safekey2.0",
                "gwInternet2S_Safekey2.0_stl",
                "gwInternet2Sservicesin",
                "gwInternet2Sservices2",
                "gwInternet2Sservices",
                "gwInternet2SservicesAddCiphers",
                "gwInternet2SservicesCAList",
                "gwInternet2Ssb",
                "gwInternetProducts",
                "gwInternetSB2S",
                "gwInternetSbOpenAmex",
                "gwInternet2S_ds_Safekey",
            ]),
        );

        Taxonomy { security, ssl }
    }
}
