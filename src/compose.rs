//! Result composer - maps raw engine aggregations into stable API shapes

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One raw aggregation bucket
#[derive(Debug, Clone, Deserialize)]
pub struct Bucket {
    #[serde(default)]
    pub key: Value,
    #[serde(default)]
    pub key_as_string: Option<String>,
    #[serde(default)]
    pub doc_count: u64,
    /// Named sub-aggregations
    #[serde(flatten)]
    pub sub: Map<String, Value>,
}

impl Bucket {
    /// Formatted key when the engine provides one, else the raw key
    pub fn label(&self) -> String {
        if let Some(label) = &self.key_as_string {
            return label.clone();
        }
        match &self.key {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Numeric sub-aggregation value, 0 when absent
    pub fn metric(&self, name: &str) -> f64 {
        metric_in(&self.sub, name)
    }

    /// Buckets of a nested bucket aggregation
    pub fn nested<T: From<Bucket>>(&self, name: &str) -> Vec<T> {
        buckets_in(&self.sub, name).into_iter().map(T::from).collect()
    }
}

fn as_map(aggs: Option<&Value>) -> Option<&Map<String, Value>> {
    aggs.and_then(Value::as_object)
}

fn buckets_in(aggs: &Map<String, Value>, name: &str) -> Vec<Bucket> {
    aggs.get(name)
        .and_then(|agg| agg.get("buckets"))
        .and_then(|b| serde_json::from_value::<Vec<Bucket>>(b.clone()).ok())
        .unwrap_or_default()
}

fn metric_in(aggs: &Map<String, Value>, name: &str) -> f64 {
    aggs.get(name)
        .and_then(|agg| agg.get("value"))
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
}

/// Raw buckets of aggregation `name`; a missing aggregation has no buckets
pub fn buckets(aggs: Option<&Value>, name: &str) -> Vec<Bucket> {
    as_map(aggs)
        .map(|m| buckets_in(m, name))
        .unwrap_or_default()
}

/// Compose aggregation `name` into `T`, preserving bucket order
pub fn compose<T: From<Bucket>>(aggs: Option<&Value>, name: &str) -> Vec<T> {
    buckets(aggs, name).into_iter().map(T::from).collect()
}

/// Single-value metric (`sum`, `avg`, ...); null or absent reads as 0
pub fn metric_value(aggs: Option<&Value>, name: &str) -> f64 {
    as_map(aggs).map(|m| metric_in(m, name)).unwrap_or(0.0)
}

/// Metric nested under a single-bucket aggregation
pub fn nested_metric(aggs: Option<&Value>, parent: &str, name: &str) -> f64 {
    metric_value(as_map(aggs).and_then(|m| m.get(parent)), name)
}

/// `doc_count` of a single-bucket (`filter`) aggregation
pub fn doc_count(aggs: Option<&Value>, name: &str) -> u64 {
    as_map(aggs)
        .and_then(|m| m.get(name))
        .and_then(|agg| agg.get("doc_count"))
        .and_then(Value::as_u64)
        .unwrap_or(0)
}

/// Percentage of `errors` in `total`, two decimals; 0 when `total` is 0
pub fn error_rate(total: u64, errors: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round2(errors as f64 / total as f64 * 100.0)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelCount {
    pub label: String,
    pub count: u64,
}

impl From<Bucket> for LabelCount {
    fn from(b: Bucket) -> Self {
        Self {
            label: b.label(),
            count: b.doc_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyCount {
    pub key: String,
    pub count: u64,
}

impl From<Bucket> for KeyCount {
    fn from(b: Bucket) -> Self {
        Self {
            key: b.label(),
            count: b.doc_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelCount {
    pub level: String,
    pub count: u64,
}

impl From<Bucket> for LevelCount {
    fn from(b: Bucket) -> Self {
        Self {
            level: b.label(),
            count: b.doc_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeCount {
    #[serde(rename = "type")]
    pub log_type: String,
    pub count: u64,
}

impl From<Bucket> for TypeCount {
    fn from(b: Bucket) -> Self {
        Self {
            log_type: b.label(),
            count: b.doc_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCount {
    pub user_id: String,
    pub count: u64,
}

impl From<Bucket> for UserCount {
    fn from(b: Bucket) -> Self {
        Self {
            user_id: b.label(),
            count: b.doc_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourCount {
    pub hour: String,
    pub count: u64,
}

impl From<Bucket> for HourCount {
    fn from(b: Bucket) -> Self {
        Self {
            hour: b.label(),
            count: b.doc_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayCount {
    pub date: String,
    pub count: u64,
}

impl From<Bucket> for DayCount {
    fn from(b: Bucket) -> Self {
        Self {
            date: b.label(),
            count: b.doc_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_logs: u64,
    pub logs_today: u64,
    pub errors_today: u64,
    pub log_type_distribution: Vec<TypeCount>,
    pub logs_by_hour: Vec<HourCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Period {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedStats {
    pub period: Period,
    pub total_logs: u64,
    pub total_errors: u64,
    pub error_rate: f64,
    pub level_distribution: Vec<LevelCount>,
    pub log_type_distribution: Vec<TypeCount>,
    pub top_users: Vec<UserCount>,
    pub logs_by_day: Vec<DayCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineBucket {
    pub timestamp: String,
    pub count: u64,
    pub by_status: Vec<KeyCount>,
    pub by_index: Vec<KeyCount>,
}

impl From<Bucket> for TimelineBucket {
    fn from(b: Bucket) -> Self {
        Self {
            timestamp: b.label(),
            count: b.doc_count,
            by_status: b.nested("by_status"),
            by_index: b.nested("by_index"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    pub interval: String,
    pub buckets: Vec<TimelineBucket>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopUser {
    pub user_id: String,
    pub activity_count: u64,
    pub total_amount: f64,
}

impl From<Bucket> for TopUser {
    fn from(b: Bucket) -> Self {
        Self {
            user_id: b.label(),
            activity_count: b.doc_count,
            total_amount: b.metric("total_amount"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AmountSummary {
    pub total: f64,
    pub average: f64,
    pub max: f64,
    pub min: f64,
}

/// Earliest and latest indexed timestamps
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimestampRange {
    pub count: u64,
    pub min: Option<String>,
    pub max: Option<String>,
}

impl TimestampRange {
    pub fn from_stats(aggs: Option<&Value>, name: &str) -> Self {
        let stats = as_map(aggs).and_then(|m| m.get(name));
        let field = |key: &str| {
            stats
                .and_then(|s| s.get(key))
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        Self {
            count: stats
                .and_then(|s| s.get("count"))
                .and_then(Value::as_u64)
                .unwrap_or(0),
            min: field("min_as_string"),
            max: field("max_as_string"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStats {
    pub total_documents: u64,
    pub by_index: Vec<KeyCount>,
    pub by_status: Vec<KeyCount>,
    pub transactions: AmountSummary,
    pub errors_count: u64,
    pub fraud_count: u64,
    pub date_range: TimestampRange,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionStats {
    pub total_amount: f64,
    pub avg_amount: f64,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionSearch {
    pub total: u64,
    pub transactions: Vec<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserBehavior {
    pub user_id: String,
    pub activities: Vec<Map<String, Value>>,
    pub total_activities: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_level_buckets_keep_order() {
        let aggs = json!({
            "levels": { "buckets": [
                { "key": "ERROR", "doc_count": 5 },
                { "key": "INFO", "doc_count": 42 }
            ] }
        });

        let levels: Vec<LevelCount> = compose(Some(&aggs), "levels");
        assert_eq!(
            serde_json::to_value(&levels).unwrap(),
            json!([{ "level": "ERROR", "count": 5 }, { "level": "INFO", "count": 42 }])
        );
    }

    #[test]
    fn test_histogram_uses_formatted_key() {
        let aggs = json!({
            "logs_per_hour": { "buckets": [
                { "key_as_string": "09:00", "key": 1714554000000u64, "doc_count": 3 },
                { "key_as_string": "10:00", "key": 1714557600000u64, "doc_count": 0 }
            ] }
        });
        let hours: Vec<HourCount> = compose(Some(&aggs), "logs_per_hour");
        assert_eq!(hours[0], HourCount { hour: "09:00".into(), count: 3 });
        assert_eq!(hours[1].count, 0);
    }

    #[test]
    fn test_missing_aggregation_is_empty() {
        assert!(compose::<TypeCount>(None, "types").is_empty());
        assert!(compose::<TypeCount>(Some(&json!({})), "types").is_empty());
        assert_eq!(doc_count(None, "errors"), 0);
    }

    #[test]
    fn test_absent_metrics_default_to_zero() {
        let aggs = json!({
            "total_amount": { "value": null },
            "avg_amount": { "value": 12.5 },
            "tx": { "doc_count": 0, "max_amount": { "value": null } }
        });
        assert_eq!(metric_value(Some(&aggs), "total_amount"), 0.0);
        assert_eq!(metric_value(Some(&aggs), "avg_amount"), 12.5);
        assert_eq!(metric_value(Some(&aggs), "missing"), 0.0);
        assert_eq!(nested_metric(Some(&aggs), "tx", "max_amount"), 0.0);
    }

    #[test]
    fn test_error_rate() {
        assert_eq!(error_rate(0, 0), 0.0);
        assert_eq!(error_rate(200, 25), 12.5);
        assert_eq!(error_rate(3, 1), 33.33);
        assert_eq!(error_rate(3, 2), 66.67);
    }

    #[test]
    fn test_nested_buckets() {
        let aggs = json!({
            "logs_over_time": { "buckets": [{
                "key_as_string": "2024-05-01 10:00:00",
                "key": 1714557600000u64,
                "doc_count": 9,
                "by_status": { "buckets": [{ "key": "completed", "doc_count": 6 }] },
                "by_index": { "buckets": [{ "key": "ecommerce-transactions", "doc_count": 9 }] }
            }] }
        });

        let timeline: Vec<TimelineBucket> = compose(Some(&aggs), "logs_over_time");
        assert_eq!(
            serde_json::to_value(&timeline[0]).unwrap(),
            json!({
                "timestamp": "2024-05-01 10:00:00",
                "count": 9,
                "byStatus": [{ "key": "completed", "count": 6 }],
                "byIndex": [{ "key": "ecommerce-transactions", "count": 9 }]
            })
        );
    }

    #[test]
    fn test_top_user_amount() {
        let aggs = json!({
            "top_users": { "buckets": [
                { "key": "u-1", "doc_count": 4, "total_amount": { "value": 99.5 } },
                { "key": "u-2", "doc_count": 1, "total_amount": { "value": 0.0 } }
            ] }
        });
        let users: Vec<TopUser> = compose(Some(&aggs), "top_users");
        assert_eq!(users[0].total_amount, 99.5);
        assert_eq!(
            serde_json::to_value(&users[1]).unwrap(),
            json!({ "userId": "u-2", "activityCount": 1, "totalAmount": 0.0 })
        );
    }

    #[test]
    fn test_numeric_keys_become_labels() {
        let aggs = json!({ "codes": { "buckets": [{ "key": 500, "doc_count": 2 }] } });
        let codes: Vec<LabelCount> = compose(Some(&aggs), "codes");
        assert_eq!(codes[0].label, "500");
    }

    #[test]
    fn test_timestamp_range() {
        let aggs = json!({ "date_range": {
            "count": 10, "min": 1.0, "max": 2.0,
            "min_as_string": "2024-01-01T00:00:00.000Z",
            "max_as_string": "2024-01-02T00:00:00.000Z"
        } });
        let range = TimestampRange::from_stats(Some(&aggs), "date_range");
        assert_eq!(range.count, 10);
        assert_eq!(range.max.as_deref(), Some("2024-01-02T00:00:00.000Z"));
        assert_eq!(TimestampRange::from_stats(None, "date_range"), TimestampRange::default());
    }
}
