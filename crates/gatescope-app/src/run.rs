//! Run orchestration: build the catalog and/or monthly metrics and persist them.

use std::path::Path;

use gatescope_catalog::{build_catalog, build_monthly_metrics, EdgeClient, SearchTrafficSource};
use gatescope_core::classifier::{Classifier, Taxonomy};
use gatescope_core::error::CoreError;
use gatescope_core::management::ManagementClient;
use gatescope_core::models::RowSink;
use gatescope_search::{LogSearch, SearchClient, SearchError};
use gatescope_storage::{Database, StorageError};
use thiserror::Error;
use tracing::info;

use crate::settings::{Settings, SettingsError};

/// Which outputs a run produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    Catalog,
    Metrics,
    Both,
}

impl Job {
    pub fn includes_catalog(&self) -> bool {
        matches!(self, Job::Catalog | Job::Both)
    }

    pub fn includes_metrics(&self) -> bool {
        matches!(self, Job::Metrics | Job::Both)
    }
}

/// Rows written per output; `None` when the output was not requested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub catalog_rows: Option<usize>,
    pub metric_rows: Option<usize>,
}

/// Errors that end a run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("Search client setup failed: {0}")]
    Search(#[from] SearchError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Loads the taxonomy override, if one is configured.
pub fn load_taxonomy(path: Option<&Path>) -> Result<Option<Taxonomy>, CoreError> {
    path.map(|p| {
        info!("Loading taxonomy from {:?}", p);
        Taxonomy::from_file(p)
    })
    .transpose()
}

/// Builds and persists the catalog.
pub fn run_catalog<C, S>(
    client: &C,
    search: &dyn LogSearch,
    settings: &Settings,
    classifier: Classifier<'_>,
    sink: &S,
) -> Result<usize, S::Error>
where
    C: ManagementClient + ?Sized,
    S: RowSink,
{
    let traffic = SearchTrafficSource::new(search, settings.search_index.clone());
    let rows = build_catalog(
        client,
        &settings.deploy_env,
        &traffic,
        settings.force_log_search,
        classifier,
    );
    let written = sink.upsert_catalog(&rows)?;
    info!(env = %settings.deploy_env, rows = written, "Catalog upserted");
    Ok(written)
}

/// Builds and persists the monthly metrics.
pub fn run_metrics<S: RowSink>(
    search: &dyn LogSearch,
    settings: &Settings,
    sink: &S,
) -> Result<usize, S::Error> {
    let rows = build_monthly_metrics(search, &settings.search_index, settings.offset);
    let written = sink.upsert_metrics(&rows)?;
    info!(index = %settings.search_index, rows = written, "Monthly metrics upserted");
    Ok(written)
}

/// Runs `job` against the configured backends and database.
///
/// Every configuration check happens before the first request.
pub fn execute(job: Job, settings: &Settings) -> Result<Summary, RunError> {
    let edge_config = if job.includes_catalog() {
        Some(settings.management.edge_config()?)
    } else {
        None
    };
    let taxonomy = load_taxonomy(settings.taxonomy_path.as_deref())?;

    let search = SearchClient::new(settings.search.clone())?;
    let db = match &settings.db_path {
        Some(path) => Database::with_path(path)?,
        None => Database::new()?,
    };

    info!(
        tier = %settings.tier,
        env = %settings.deploy_env,
        index = %settings.search_index,
        "Starting {:?} run",
        job
    );

    let mut summary = Summary::default();

    if let Some(config) = edge_config {
        let client = EdgeClient::new(config)?;
        let classifier = match &taxonomy {
            Some(taxonomy) => Classifier::new(taxonomy),
            None => Classifier::builtin(),
        };
        summary.catalog_rows = Some(run_catalog(&client, &search, settings, classifier, &db)?);
    }

    if job.includes_metrics() {
        summary.metric_rows = Some(run_metrics(&search, settings, &db)?);
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatescope_core::error::Result as CoreResult;
    use gatescope_core::classifier::SecurityMechanism;
    use gatescope_core::management::{EnvironmentInfo, OrgDeployments, RevisionListing};
    use gatescope_core::models::MetricValue;
    use gatescope_search::{Record, Result as SearchResult};
    use serde_json::json;
    use std::cell::Cell;

    fn settings(extra: &[(&str, &str)]) -> Settings {
        let mut pairs = vec![
            ("SPLUNK_HOST", "http://127.0.0.1:9"),
            ("SPLUNK_USERNAME", "svc"),
            ("SPLUNK_PASSWORD", "secret"),
            ("APIGEE_DEPLOY_ENV", "prod"),
        ];
        pairs.extend_from_slice(extra);
        let map: std::collections::HashMap<String, String> = pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|name| map.get(name).cloned()).unwrap()
    }

    /// Returns the same rows for every query.
    struct Canned {
        rows: Vec<Record>,
        calls: Cell<u32>,
    }

    impl Canned {
        fn new(rows: serde_json::Value) -> Self {
            let rows = rows
                .as_array()
                .unwrap()
                .iter()
                .map(|r| r.as_object().cloned().unwrap())
                .collect();
            Self {
                rows,
                calls: Cell::new(0),
            }
        }
    }

    impl LogSearch for Canned {
        fn search(&self, _spl: &str) -> SearchResult<Vec<Record>> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.rows.clone())
        }
    }

    struct DeploymentsOnly;

    impl EnvironmentInfo for DeploymentsOnly {
        fn org_deployments(&self) -> CoreResult<OrgDeployments> {
            Ok(serde_json::from_value(json!({"environment": [{"name": "prod", "aPIProxy": [
                {"name": "orders", "revision": [{"name": "7", "state": "deployed"}]}
            ]}]}))?)
        }
    }

    impl ManagementClient for DeploymentsOnly {
        fn environment_info(&self) -> Option<&dyn EnvironmentInfo> {
            Some(self)
        }
    }

    #[test]
    fn job_selection() {
        assert!(Job::Both.includes_catalog() && Job::Both.includes_metrics());
        assert!(!Job::Metrics.includes_catalog());
        assert!(!Job::Catalog.includes_metrics());
    }

    #[test]
    fn catalog_run_persists_rows() {
        let db = Database::in_memory().unwrap();
        let search = Canned::new(json!([]));

        let written = run_catalog(
            &DeploymentsOnly,
            &search,
            &settings(&[]),
            Classifier::builtin(),
            &db,
        )
        .unwrap();

        assert_eq!(written, 1);
        assert_eq!(search.calls.get(), 0);
        let row = db.get_catalog_row("orders").unwrap().unwrap();
        assert_eq!(row.revision, "7");
        assert_eq!(row.security_mechanism, SecurityMechanism::None);
    }

    #[test]
    fn forced_log_search_discovery() {
        struct RevisionsOnly;

        impl RevisionListing for RevisionsOnly {
            fn list_revisions(&self, _proxy: &str) -> CoreResult<Vec<String>> {
                Ok(vec!["1".into(), "2".into()])
            }
        }

        impl ManagementClient for RevisionsOnly {
            fn revision_listing(&self) -> Option<&dyn RevisionListing> {
                Some(self)
            }
        }

        let db = Database::in_memory().unwrap();
        let search = Canned::new(json!([{"apiproxy": "users"}]));

        let written = run_catalog(
            &RevisionsOnly,
            &search,
            &settings(&[("APIGEE_FORCE_SPLUNK_DISCOVERY", "true")]),
            Classifier::builtin(),
            &db,
        )
        .unwrap();

        assert_eq!(written, 1);
        assert_eq!(search.calls.get(), 1);
        assert_eq!(db.get_catalog_row("users").unwrap().unwrap().revision, "2");
    }

    #[test]
    fn metrics_run_persists_months() {
        let db = Database::in_memory().unwrap();
        let search = Canned::new(json!([
            {"month": "2024-01-01", "requests": "100", "avg_tps": "2.5"},
            {"month": "2024-02-01", "requests": "250"}
        ]));

        let written = run_metrics(&search, &settings(&[]), &db).unwrap();

        assert_eq!(written, 2);
        assert_eq!(search.calls.get(), 4);
        let rows = db.get_metrics().unwrap();
        assert_eq!(rows[0].requests, Some(MetricValue::Int(100)));
        assert_eq!(rows[0].avg_tps, Some(MetricValue::Float(2.5)));
        assert_eq!(rows[1].requests, Some(MetricValue::Int(250)));
    }

    #[test]
    fn catalog_job_without_org_fails_before_any_request() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("g.db");
        let settings = settings(&[("GATESCOPE_DB", db_path.to_str().unwrap())]);

        let err = execute(Job::Catalog, &settings).unwrap_err();
        assert!(matches!(err, RunError::Settings(SettingsError::Missing(_))));
        assert!(!db_path.exists());
    }

    #[test]
    fn bad_taxonomy_file_fails_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let taxonomy = dir.path().join("taxonomy.json");
        std::fs::write(&taxonomy, "{not json").unwrap();

        let settings = settings(&[
            ("GATESCOPE_TAXONOMY", taxonomy.to_str().unwrap()),
            ("GATESCOPE_DB", dir.path().join("g.db").to_str().unwrap()),
        ]);

        let err = execute(Job::Metrics, &settings).unwrap_err();
        assert!(matches!(err, RunError::Core(CoreError::Json(_))));
    }

    #[test]
    fn missing_taxonomy_path_is_none() {
        assert!(load_taxonomy(None).unwrap().is_none());
    }
}
