//! Virtual-host based SSL exposure classification.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::taxonomy::{SslBucket, Taxonomy};

/// Boolean flag per SSL exposure bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SslClassification {
    pub one_way_intranet: bool,
    pub two_way_intranet: bool,
    pub one_way_internet: bool,
    pub two_way_internet: bool,
}

impl SslClassification {
    /// Returns whether a bucket is set.
    pub fn get(&self, bucket: SslBucket) -> bool {
        match bucket {
            SslBucket::OneWayIntranet => self.one_way_intranet,
            SslBucket::TwoWayIntranet => self.two_way_intranet,
            SslBucket::OneWayInternet => self.one_way_internet,
            SslBucket::TwoWayInternet => self.two_way_internet,
        }
    }

    /// Sets a bucket.
    pub fn set(&mut self, bucket: SslBucket) {
        match bucket {
            SslBucket::OneWayIntranet => self.one_way_intranet = true,
            SslBucket::TwoWayIntranet => self.two_way_intranet = true,
            SslBucket::OneWayInternet => self.one_way_internet = true,
            SslBucket::TwoWayInternet => self.two_way_internet = true,
        }
    }

    /// Whether the proxy is exposed through any two-way bucket.
    pub fn has_two_way(&self) -> bool {
        self.two_way_intranet || self.two_way_internet
    }
}

pub(crate) fn classify<'h>(
    taxonomy: &Taxonomy,
    virtual_hosts: impl IntoIterator<Item = &'h String>,
) -> SslClassification {
    let mut result = SslClassification::default();
    for host in virtual_hosts {
        match taxonomy.ssl_bucket_for(host) {
            Some(bucket) => result.set(bucket),
            None => debug!(virtual_host = %host, "Virtual host matches no SSL bucket"),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn hosts(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn single_internet_host() {
        let result = classify(Taxonomy::builtin(), &hosts(&["gwInternet"]));
        assert_eq!(
            result,
            SslClassification {
                one_way_internet: true,
                ..Default::default()
            }
        );
        assert!(!result.has_two_way());
    }

    #[test]
    fn multiple_buckets_at_once() {
        let result = classify(
            Taxonomy::builtin(),
            &hosts(&["gwIntranet", "gwInternet2S", "default"]),
        );
        assert!(result.one_way_intranet);
        assert!(result.two_way_internet);
        assert!(!result.one_way_internet);
        assert!(result.has_two_way());
    }

    #[test]
    fn monotonic_in_membership() {
        let taxonomy = Taxonomy::builtin();
        let base = hosts(&["gwIntranet2S"]);
        let before = classify(taxonomy, &base);

        let mut with_mapped = base.clone();
        with_mapped.insert("gwIntranet".into());
        let after = classify(taxonomy, &with_mapped);
        for bucket in SslBucket::all() {
            assert!(!before.get(*bucket) || after.get(*bucket));
        }

        let mut with_unmapped = base.clone();
        with_unmapped.insert("secure".into());
        assert_eq!(classify(taxonomy, &with_unmapped), before);
    }

    #[test]
    fn empty_is_all_false() {
        assert_eq!(
            classify(Taxonomy::builtin(), &BTreeSet::new()),
            SslClassification::default()
        );
    }
}
