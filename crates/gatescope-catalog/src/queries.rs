//! Search query templates.
//!
//! Every template reads from a single index substituted for `{index}`.

/// Proxies with traffic in the last 30 days.
pub const ACTIVE_PROXIES: &str = r#"
index={index} sourcetype=api_proxy earliest=-30d
| eval apiproxy=coalesce(apiproxy, apiProxy_proxyName)
| stats count as requests by apiproxy
| where requests>0
| fields apiproxy
"#;

/// Proxies counted in the month they were first seen.
pub const ONBOARDED: &str = r#"
index={index} sourcetype=api_proxy earliest=-13mon
| eval apiproxy=coalesce(apiproxy, apiProxy_proxyName)
| stats earliest(_time) as first_seen by apiproxy
| eval month=strftime(first_seen,"%Y-%m-01")
| stats count as onboarded_apis by month
| sort 0 month
"#;

/// Peak and average transactions per second by month.
pub const TPS: &str = r#"
index={index} sourcetype=api_proxy earliest=-13mon
| bin _time span=1s
| stats count as rps by _time
| eval month=strftime(_time,"%Y-%m-01")
| stats max(rps) as peak_tps avg(rps) as avg_tps by month
| sort 0 month
"#;

/// New and active consumers by month.
pub const CONSUMERS: &str = r#"
index={index} sourcetype=api_proxy earliest=-13mon
| eval month=strftime(_time,"%Y-%m-01")
| eval consumer=coalesce('apigee.developer.app.name','apigee.client_id')
| eventstats earliest(_time) as first_seen by consumer
| eval is_new=if(strftime(first_seen,"%Y-%m-01")==month,1,0)
| stats sum(is_new) as new_consumers dc(consumer) as active_consumers by month
| sort 0 month
"#;

/// Request count and byte volumes by month. Emits `_time`, not `month`.
pub const TRAFFIC: &str = r#"
index={index} sourcetype=api_proxy earliest=-13mon
| eval bytes_in=tonumber('request.header.contentLength'), bytes_out=tonumber('target.received.content.length')
| timechart span=1mon count as requests sum(bytes_in) as bytes_in sum(bytes_out) as bytes_out
"#;

/// Substitutes the index into a template.
pub fn render(template: &str, index: &str) -> String {
    template.replace("{index}", index)
}

/// Default index for a deployment tier key.
pub fn default_index(env_key: &str) -> String {
    format!("api_{}_idx1", env_key.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_index() {
        let query = render(ACTIVE_PROXIES, "api_e3_idx1");
        assert!(query.contains("index=api_e3_idx1 sourcetype=api_proxy earliest=-30d"));
        assert!(!query.contains("{index}"));
    }

    #[test]
    fn every_template_has_an_index_slot() {
        for template in [ACTIVE_PROXIES, ONBOARDED, TPS, CONSUMERS, TRAFFIC] {
            assert!(template.contains("index={index}"));
        }
    }

    #[test]
    fn default_index_per_tier() {
        assert_eq!(default_index("E2"), "api_e2_idx1");
    }
}
