//! Active proxy names derived from recent traffic.

use std::collections::BTreeSet;

use gatescope_search::{LogSearch, Result};
use serde_json::Value;
use tracing::debug;

use crate::queries;

/// Lists proxies that served traffic recently.
pub trait TrafficSource {
    fn active_proxies(&self) -> Result<Vec<String>>;
}

/// Traffic source backed by the log-search backend.
pub struct SearchTrafficSource<'a> {
    search: &'a dyn LogSearch,
    index: String,
}

impl<'a> SearchTrafficSource<'a> {
    /// Creates a source querying `index`.
    pub fn new(search: &'a dyn LogSearch, index: impl Into<String>) -> Self {
        Self {
            search,
            index: index.into(),
        }
    }
}

impl TrafficSource for SearchTrafficSource<'_> {
    /// Distinct, sorted proxy names from the last 30 days.
    fn active_proxies(&self) -> Result<Vec<String>> {
        let query = queries::render(queries::ACTIVE_PROXIES, &self.index);
        let records = self.search.search(&query)?;

        let names: BTreeSet<String> = records
            .iter()
            .filter_map(|r| r.get("apiproxy").and_then(Value::as_str))
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();

        debug!(
            index = %self.index,
            records = records.len(),
            proxies = names.len(),
            "Active proxies from traffic"
        );
        Ok(names.into_iter().collect())
    }
}
