//! Monthly usage metrics aggregated from four search queries.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Offset, Utc};
use gatescope_core::models::{MetricField, MetricValue, MonthlyMetricRow};
use gatescope_search::{LogSearch, Record};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::queries;

/// Records of one query keyed by normalized month.
pub type MonthMap = BTreeMap<NaiveDate, Record>;

const MONTH_KEY: &str = "month";
const TIME_KEY: &str = "_time";

const DEFAULT_OFFSET_SECS: i32 = 7 * 3600;

/// Default target offset for month bucketing (UTC-7, no daylight saving).
pub fn default_offset() -> FixedOffset {
    FixedOffset::west_opt(DEFAULT_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

fn epoch_to_local(seconds: f64, offset: FixedOffset) -> Option<NaiveDate> {
    if !seconds.is_finite() {
        return None;
    }
    let secs = seconds.trunc() as i64;
    let nanos = ((seconds - seconds.trunc()) * 1e9) as u32;
    DateTime::from_timestamp(secs, nanos).map(|dt| dt.with_timezone(&offset).date_naive())
}

/// Normalizes a raw month value to the first day of its month in `offset`.
///
/// Calendar dates (`YYYY-MM-DD`) are taken as already local. Epoch seconds
/// (numeric or string) and RFC 3339 timestamps are converted into `offset`
/// first. Anything else falls back to `now`.
pub fn normalize_month(value: &Value, offset: FixedOffset, now: DateTime<Utc>) -> NaiveDate {
    let local = match value {
        Value::String(s) => {
            let s = s.trim();
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(|secs| epoch_to_local(secs, offset)))
                .or_else(|| {
                    DateTime::parse_from_rfc3339(s)
                        .ok()
                        .map(|dt| dt.with_timezone(&offset).date_naive())
                })
        }
        Value::Number(n) => n.as_f64().and_then(|secs| epoch_to_local(secs, offset)),
        _ => None,
    };

    let date = local.unwrap_or_else(|| {
        debug!("Unparsable month value {}; using current month", value);
        now.with_timezone(&offset).date_naive()
    });
    first_of_month(date)
}

fn month_value(record: &Record) -> Option<&Value> {
    [MONTH_KEY, TIME_KEY]
        .iter()
        .filter_map(|key| record.get(*key))
        .find(|v| match v {
            Value::Null => false,
            Value::String(s) => !s.trim().is_empty(),
            _ => true,
        })
}

/// Keys records by normalized month, dropping records with no month.
///
/// A later record for the same month replaces an earlier one.
pub fn index_by_month(records: &[Record], offset: FixedOffset, now: DateTime<Utc>) -> MonthMap {
    let mut out = MonthMap::new();
    for record in records {
        let Some(raw) = month_value(record) else {
            continue;
        };
        let month = normalize_month(raw, offset, now);
        let fields: Record = record
            .iter()
            .filter(|(key, _)| key.as_str() != MONTH_KEY && key.as_str() != TIME_KEY)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        out.insert(month, fields);
    }
    out
}

fn coerce(field: MetricField, value: MetricValue) -> MetricValue {
    if let MetricValue::Text(s) = &value {
        if s.is_empty() {
            return value;
        }
    }
    if field.is_integer() {
        value.coerce_int()
    } else {
        value.coerce_float()
    }
}

/// Outer-joins partial results on month.
///
/// Parts are applied in order, so a later part overrides an earlier one
/// for the same field. Fields no part mentions stay absent.
pub fn merge_monthly(parts: &[&MonthMap]) -> Vec<MonthlyMetricRow> {
    let months: BTreeSet<NaiveDate> = parts.iter().flat_map(|part| part.keys().copied()).collect();

    months
        .into_iter()
        .map(|month| {
            let mut row = MonthlyMetricRow::empty(month);
            for part in parts {
                let Some(record) = part.get(&month) else {
                    continue;
                };
                for field in MetricField::all() {
                    if let Some(raw) = record.get(field.key()) {
                        *row.slot_mut(*field) = MetricValue::from_json(raw);
                    }
                }
            }
            for field in MetricField::all() {
                let slot = row.slot_mut(*field);
                if let Some(value) = slot.take() {
                    *slot = Some(coerce(*field, value));
                }
            }
            row
        })
        .collect()
}

/// Runs the four metric queries and merges them by month.
pub struct MetricsAggregator<'a> {
    search: &'a dyn LogSearch,
    index: String,
    offset: FixedOffset,
}

impl<'a> MetricsAggregator<'a> {
    /// Creates an aggregator querying `index` and bucketing in `offset`.
    pub fn new(search: &'a dyn LogSearch, index: impl Into<String>, offset: FixedOffset) -> Self {
        Self {
            search,
            index: index.into(),
            offset,
        }
    }

    /// Builds monthly rows relative to the current time.
    pub fn build(&self) -> Vec<MonthlyMetricRow> {
        self.build_at(Utc::now())
    }

    /// Builds monthly rows; `now` stands in for unparsable months.
    pub fn build_at(&self, now: DateTime<Utc>) -> Vec<MonthlyMetricRow> {
        let onboarded = self.query("onboarded", queries::ONBOARDED, now);
        let tps = self.query("tps", queries::TPS, now);
        let consumers = self.query("consumers", queries::CONSUMERS, now);
        let traffic = self.query("traffic", queries::TRAFFIC, now);

        let rows = merge_monthly(&[&onboarded, &tps, &consumers, &traffic]);
        info!(index = %self.index, months = rows.len(), "Built monthly metrics");
        rows
    }

    fn query(&self, name: &str, template: &str, now: DateTime<Utc>) -> MonthMap {
        let query = queries::render(template, &self.index);
        match self.search.search(&query) {
            Ok(records) => {
                let map = index_by_month(&records, self.offset, now);
                debug!(query = name, records = records.len(), months = map.len(), "Metric query done");
                map
            }
            Err(e) => {
                warn!(query = name, "Metric query failed, contributing nothing: {}", e);
                MonthMap::new()
            }
        }
    }
}

/// Builds monthly metric rows through `search`.
pub fn build_monthly_metrics(
    search: &dyn LogSearch,
    index: &str,
    offset: FixedOffset,
) -> Vec<MonthlyMetricRow> {
    MetricsAggregator::new(search, index, offset).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatescope_search::{Result as SearchResult, SearchError};
    use serde_json::json;
    use std::cell::RefCell;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-06-15T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn map(entries: &[(&str, Value)]) -> MonthMap {
        entries
            .iter()
            .map(|(month, fields)| {
                let d = NaiveDate::parse_from_str(month, "%Y-%m-%d").unwrap();
                (d, record(fields.clone()))
            })
            .collect()
    }

    // === Month normalization ===

    #[test]
    fn date_strings_truncate_to_first() {
        let offset = default_offset();
        assert_eq!(normalize_month(&json!("2024-03-17"), offset, now()), date(2024, 3, 1));
    }

    #[test]
    fn normalization_is_idempotent() {
        let offset = default_offset();
        let once = normalize_month(&json!("2024-01-01"), offset, now());
        let twice = normalize_month(&json!(once.format("%Y-%m-%d").to_string()), offset, now());
        assert_eq!(once, date(2024, 1, 1));
        assert_eq!(once, twice);
    }

    #[test]
    fn epoch_shifts_across_month_boundary() {
        let offset = default_offset();
        // 2024-02-01T03:00:00Z is still January at UTC-7
        let epoch = 1_706_756_400;
        assert_eq!(normalize_month(&json!(epoch), offset, now()), date(2024, 1, 1));
        assert_eq!(
            normalize_month(&json!(epoch.to_string()), offset, now()),
            date(2024, 1, 1)
        );
        assert_eq!(
            normalize_month(&json!("1706756400.000"), offset, now()),
            date(2024, 1, 1)
        );
        let utc = FixedOffset::east_opt(0).unwrap();
        assert_eq!(normalize_month(&json!(epoch), utc, now()), date(2024, 2, 1));
    }

    #[test]
    fn rfc3339_converted_to_offset() {
        let offset = default_offset();
        assert_eq!(
            normalize_month(&json!("2024-03-01T00:00:00.000+00:00"), offset, now()),
            date(2024, 2, 1)
        );
        assert_eq!(
            normalize_month(&json!("2024-03-01T00:00:00.000-07:00"), offset, now()),
            date(2024, 3, 1)
        );
    }

    #[test]
    fn garbage_uses_now() {
        let offset = default_offset();
        assert_eq!(normalize_month(&json!("soon"), offset, now()), date(2024, 6, 1));
        assert_eq!(normalize_month(&json!(true), offset, now()), date(2024, 6, 1));
    }

    // === Indexing ===

    #[test]
    fn index_accepts_time_key_and_skips_missing() {
        let records = vec![
            record(json!({"month": "2024-01-01", "onboarded_apis": "3"})),
            record(json!({"_time": "2024-02-01T00:00:00.000-07:00", "requests": 100})),
            record(json!({"requests": 5})),
            record(json!({"month": "", "requests": 6})),
        ];
        let indexed = index_by_month(&records, default_offset(), now());
        assert_eq!(indexed.len(), 2);
        assert_eq!(indexed[&date(2024, 1, 1)], record(json!({"onboarded_apis": "3"})));
        assert_eq!(indexed[&date(2024, 2, 1)], record(json!({"requests": 100})));
    }

    // === Merge ===

    #[test]
    fn merge_outer_joins_months() {
        let onboarded = map(&[("2024-01-01", json!({"onboarded_apis": 3}))]);
        let tps = map(&[("2024-01-01", json!({"peak_tps": 50}))]);
        let consumers = MonthMap::new();
        let traffic = map(&[("2024-02-01", json!({"requests": 100}))]);

        let rows = merge_monthly(&[&onboarded, &tps, &consumers, &traffic]);
        assert_eq!(rows.len(), 2);

        let jan = &rows[0];
        assert_eq!(jan.month, date(2024, 1, 1));
        assert_eq!(jan.onboarded_apis, Some(MetricValue::Int(3)));
        assert_eq!(jan.peak_tps, Some(MetricValue::Int(50)));
        assert!(jan.requests.is_none());

        let feb = &rows[1];
        assert_eq!(feb.month, date(2024, 2, 1));
        assert_eq!(feb.requests, Some(MetricValue::Int(100)));
        for field in MetricField::all() {
            if *field != MetricField::Requests {
                assert!(feb.get(*field).is_none(), "{:?}", field);
            }
        }
    }

    #[test]
    fn merge_coerces_numbers() {
        let tps = map(&[(
            "2024-01-01",
            json!({"peak_tps": "41.9", "avg_tps": "2", "bytes_in": 12.7, "bytes_out": "n/a", "requests": ""}),
        )]);
        let rows = merge_monthly(&[&tps]);
        let row = &rows[0];
        assert_eq!(row.peak_tps, Some(MetricValue::Int(41)));
        assert_eq!(row.avg_tps, Some(MetricValue::Float(2.0)));
        assert_eq!(row.bytes_in, Some(MetricValue::Int(12)));
        assert_eq!(row.bytes_out, Some(MetricValue::Text("n/a".into())));
        assert_eq!(row.requests, Some(MetricValue::Text("".into())));
    }

    #[test]
    fn later_parts_override_earlier() {
        let a = map(&[("2024-01-01", json!({"requests": 1}))]);
        let b = map(&[("2024-01-01", json!({"requests": 2}))]);
        let rows = merge_monthly(&[&a, &b]);
        assert_eq!(rows[0].requests, Some(MetricValue::Int(2)));
    }

    // === Aggregator ===

    struct Scripted {
        replies: RefCell<Vec<SearchResult<Vec<Record>>>>,
        queries: RefCell<Vec<String>>,
    }

    impl LogSearch for Scripted {
        fn search(&self, spl: &str) -> SearchResult<Vec<Record>> {
            self.queries.borrow_mut().push(spl.to_string());
            self.replies.borrow_mut().remove(0)
        }
    }

    #[test]
    fn failed_query_degrades_to_empty() {
        let search = Scripted {
            replies: RefCell::new(vec![
                Ok(vec![record(json!({"month": "2024-01-01", "onboarded_apis": "3"}))]),
                Err(SearchError::AllBasesFailed(Vec::new())),
                Ok(vec![record(json!({"month": "2024-01-01", "new_consumers": "4", "active_consumers": "9"}))]),
                Ok(vec![record(json!({"_time": "2024-02-01T00:00:00.000-07:00", "requests": "100", "bytes_in": "2048.0"}))]),
            ]),
            queries: RefCell::new(Vec::new()),
        };

        let rows = MetricsAggregator::new(&search, "api_e3_idx1", default_offset()).build_at(now());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].onboarded_apis, Some(MetricValue::Int(3)));
        assert_eq!(rows[0].active_consumers, Some(MetricValue::Int(9)));
        assert!(rows[0].peak_tps.is_none());
        assert_eq!(rows[1].requests, Some(MetricValue::Int(100)));
        assert_eq!(rows[1].bytes_in, Some(MetricValue::Int(2048)));

        let queries = search.queries.borrow();
        assert_eq!(queries.len(), 4);
        assert!(queries.iter().all(|q| q.contains("index=api_e3_idx1")));
        assert!(queries[3].contains("timechart"));
    }
}
