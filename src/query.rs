//! Query builder - turns API filter parameters into engine search bodies

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{AppError, Result};
use crate::models::{LogType, SortOrder};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Bucket count used for categorical breakdowns
pub const TOP_BUCKETS: u32 = 10;

pub const TIMESTAMP_FIELD: &str = "timestamp";
pub const STATUS_FIELD: &str = "status.keyword";
pub const LOG_TYPE_FIELD: &str = "type.keyword";
pub const LEVEL_FIELD: &str = "level.keyword";
pub const USER_FIELD: &str = "user_id.keyword";
pub const INDEX_FIELD: &str = "_index";

/// Bucket label formats (engine date-format syntax)
pub const HOUR_LABEL_FORMAT: &str = "HH:mm";
pub const DAY_LABEL_FORMAT: &str = "yyyy-MM-dd";
pub const TIMELINE_LABEL_FORMAT: &str = "yyyy-MM-dd HH:mm:ss";

/// Raw search parameters as they arrive on the query string
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    #[serde(alias = "q")]
    pub query: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub status: Option<String>,
    pub log_type: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    /// Comma-separated index names; defaults to every known index
    pub index: Option<String>,
}

/// 1-indexed page window.
///
/// Non-numeric or non-positive values are rejected; `limit` is clamped to
/// [`MAX_PAGE_SIZE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
}

impl Pagination {
    pub fn new(page: u32, limit: u32) -> Result<Self> {
        if page == 0 {
            return Err(AppError::Validation("page must be a positive integer".into()));
        }
        if limit == 0 {
            return Err(AppError::Validation("limit must be a positive integer".into()));
        }
        Ok(Self {
            page,
            limit: limit.min(MAX_PAGE_SIZE),
        })
    }

    /// Parse raw query-string values, falling back to page 1 / `default_limit`
    pub fn parse(page: Option<&str>, limit: Option<&str>, default_limit: u32) -> Result<Self> {
        let page = parse_positive("page", page, 1)?;
        let limit = parse_positive("limit", limit, default_limit)?;
        Self::new(page, limit)
    }

    /// Engine `from` offset
    pub fn offset(&self) -> u64 {
        (self.page as u64 - 1) * self.limit as u64
    }

    /// Engine `size`
    pub fn size(&self) -> u32 {
        self.limit
    }

    pub fn total_pages(&self, total: u64) -> u64 {
        total.div_ceil(self.limit as u64)
    }
}

/// Parse an optional positive integer, `default` when absent or blank
pub fn parse_positive(name: &str, raw: Option<&str>, default: u32) -> Result<u32> {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(default);
    };
    match raw.parse::<u32>() {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(AppError::Validation(format!(
            "{} must be a positive integer, got '{}'",
            name, raw
        ))),
    }
}

/// Optional inclusive timestamp window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Result<Self> {
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Err(AppError::Validation("startDate must be before endDate".into()));
            }
        }
        Ok(Self { start, end })
    }

    /// Parse ISO-8601 timestamps or plain `YYYY-MM-DD` dates.
    ///
    /// A bare end date covers the whole day.
    pub fn parse(start: Option<&str>, end: Option<&str>) -> Result<Self> {
        let start = start
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| parse_timestamp(s, false))
            .transpose()?;
        let end = end
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| parse_timestamp(s, true))
            .transpose()?;
        Self::new(start, end)
    }

    pub fn is_empty(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    /// `range` filter clause on the timestamp field, if any bound is set
    pub fn clause(&self) -> Option<Value> {
        if self.is_empty() {
            return None;
        }
        let mut bounds = Map::new();
        if let Some(start) = self.start {
            bounds.insert("gte".into(), Value::String(iso(start)));
        }
        if let Some(end) = self.end {
            bounds.insert("lte".into(), Value::String(iso(end)));
        }
        Some(json!({ "range": { TIMESTAMP_FIELD: bounds } }))
    }
}

pub fn parse_timestamp(raw: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        let time = if end_of_day {
            NaiveTime::from_hms_milli_opt(23, 59, 59, 999)
        } else {
            NaiveTime::from_hms_opt(0, 0, 0)
        };
        if let Some(time) = time {
            return Ok(date.and_time(time).and_utc());
        }
    }
    Err(AppError::Validation(format!("Invalid date '{}'", raw)))
}

/// ISO-8601 with millisecond precision, as stored on records
pub fn iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Normalized, engine-ready search request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchQuery {
    pub free_text: Option<String>,
    pub indices: Vec<String>,
    pub pagination: Pagination,
    pub range: DateRange,
    pub status: Option<String>,
    pub log_type: Option<LogType>,
    pub sort_field: String,
    pub sort_order: SortOrder,
}

impl SearchQuery {
    pub fn from_params(params: &SearchParams) -> Result<Self> {
        let free_text = params
            .query
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty() && *q != "*")
            .map(str::to_string);

        let indices = match params.index.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => parse_indices(raw)?,
            _ => LogType::all_indices(),
        };

        let sort_field = match params.sort_by.as_deref().map(str::trim) {
            Some(field) if !field.is_empty() => validate_field_name(field)?.to_string(),
            _ => TIMESTAMP_FIELD.to_string(),
        };

        let sort_order = match params.sort_order.as_deref().map(str::trim) {
            Some(order) if !order.is_empty() => SortOrder::from_str(order)?,
            _ => SortOrder::Desc,
        };

        Ok(Self {
            free_text,
            indices,
            pagination: Pagination::parse(
                params.page.as_deref(),
                params.limit.as_deref(),
                DEFAULT_PAGE_SIZE,
            )?,
            range: DateRange::parse(params.start_date.as_deref(), params.end_date.as_deref())?,
            status: non_empty(params.status.as_deref()),
            log_type: non_empty(params.log_type.as_deref())
                .map(|t| LogType::from_str(&t))
                .transpose()?,
            sort_field,
            sort_order,
        })
    }

    /// Engine search body.
    ///
    /// Filters never affect scoring; free text is a fuzzy best-fields match
    /// across every field, otherwise everything matches.
    pub fn to_body(&self) -> Value {
        let must = match &self.free_text {
            Some(text) => vec![json!({
                "multi_match": {
                    "query": text,
                    "fields": ["*"],
                    "type": "best_fields",
                    "fuzziness": "AUTO",
                    "lenient": true,
                }
            })],
            None => vec![json!({ "match_all": {} })],
        };

        let mut filter = Vec::new();
        if let Some(range) = self.range.clause() {
            filter.push(range);
        }
        if let Some(status) = &self.status {
            filter.push(term(STATUS_FIELD, status.as_str()));
        }
        if let Some(log_type) = self.log_type {
            filter.push(term(LOG_TYPE_FIELD, log_type.as_str()));
        }

        json!({
            "query": { "bool": { "must": must, "filter": filter } },
            "from": self.pagination.offset(),
            "size": self.pagination.size(),
            "sort": [ { &self.sort_field: { "order": self.sort_order.as_str() } } ],
            "track_total_hits": true,
        })
    }
}

fn non_empty(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

/// Comma-separated index names, restricted to the known indices
pub fn parse_indices(raw: &str) -> Result<Vec<String>> {
    let known = LogType::all_indices();
    let mut indices = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !known.iter().any(|k| k == name) {
            return Err(AppError::Validation(format!(
                "Unknown index '{}'. Valid indices: {}",
                name,
                known.join(", ")
            )));
        }
        if !indices.iter().any(|i: &String| i == name) {
            indices.push(name.to_string());
        }
    }
    if indices.is_empty() {
        return Ok(known);
    }
    Ok(indices)
}

fn validate_field_name(field: &str) -> Result<&str> {
    let valid = field.len() <= 64
        && field
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '@' | '-'));
    if valid {
        Ok(field)
    } else {
        Err(AppError::Validation(format!("Invalid sort field '{}'", field)))
    }
}

/// Exact-match filter clause
pub fn term(field: &str, value: impl Into<Value>) -> Value {
    let value: Value = value.into();
    json!({ "term": { field: value } })
}

/// Calendar interval accepted by the timeline endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Interval {
    Minute,
    Hour,
    Day,
    Week,
    Month,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Minute => "1m",
            Interval::Hour => "1h",
            Interval::Day => "1d",
            Interval::Week => "1w",
            Interval::Month => "1M",
        }
    }
}

impl FromStr for Interval {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "1m" | "minute" => Ok(Interval::Minute),
            "1h" | "hour" => Ok(Interval::Hour),
            "1d" | "day" => Ok(Interval::Day),
            "1w" | "week" => Ok(Interval::Week),
            "1M" | "month" => Ok(Interval::Month),
            other => Err(AppError::Validation(format!(
                "Invalid interval '{}'. Valid options: 1m, 1h, 1d, 1w, 1M",
                other
            ))),
        }
    }
}

/// Aggregation clause constructors
pub mod agg {
    use serde_json::{json, Value};

    /// Top-`size` categorical breakdown, most frequent first
    pub fn terms(field: &str, size: u32) -> Value {
        json!({ "terms": { "field": field, "size": size, "order": { "_count": "desc" } } })
    }

    /// Fixed-width time buckets labelled with `format`
    pub fn fixed_histogram(field: &str, interval: &str, format: &str) -> Value {
        json!({
            "date_histogram": {
                "field": field,
                "fixed_interval": interval,
                "format": format,
            }
        })
    }

    /// Calendar-aware time buckets that keep empty intervals
    pub fn calendar_histogram(field: &str, interval: &str, format: &str) -> Value {
        json!({
            "date_histogram": {
                "field": field,
                "calendar_interval": interval,
                "format": format,
                "min_doc_count": 0,
            }
        })
    }

    pub fn sum(field: &str) -> Value {
        json!({ "sum": { "field": field } })
    }

    /// Sum that treats documents without the field as 0
    pub fn sum_or_zero(field: &str) -> Value {
        json!({ "sum": { "field": field, "missing": 0 } })
    }

    pub fn avg(field: &str) -> Value {
        json!({ "avg": { "field": field } })
    }

    pub fn max(field: &str) -> Value {
        json!({ "max": { "field": field } })
    }

    pub fn min(field: &str) -> Value {
        json!({ "min": { "field": field } })
    }

    pub fn value_count(field: &str) -> Value {
        json!({ "value_count": { "field": field } })
    }

    pub fn stats(field: &str) -> Value {
        json!({ "stats": { "field": field } })
    }

    /// Single-bucket aggregation restricted to `clause`
    pub fn filter(clause: Value) -> Value {
        json!({ "filter": clause })
    }

    /// Attach a named sub-aggregation
    pub fn with_sub(mut parent: Value, name: &str, sub: Value) -> Value {
        if let Some(obj) = parent.as_object_mut() {
            let aggs = obj
                .entry("aggs")
                .or_insert_with(|| Value::Object(Default::default()));
            if let Some(aggs) = aggs.as_object_mut() {
                aggs.insert(name.to_string(), sub);
            }
        }
        parent
    }
}

/// Size-0 search that only returns aggregations
#[derive(Debug, Clone, Default)]
pub struct AggregationRequest {
    filters: Vec<Value>,
    aggs: Map<String, Value>,
    track_total_hits: bool,
}

impl AggregationRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, clause: Value) -> Self {
        self.filters.push(clause);
        self
    }

    pub fn range(self, range: &DateRange) -> Self {
        match range.clause() {
            Some(clause) => self.filter(clause),
            None => self,
        }
    }

    pub fn agg(mut self, name: &str, agg: Value) -> Self {
        self.aggs.insert(name.to_string(), agg);
        self
    }

    /// Ask for an exact hit count alongside the aggregations
    pub fn track_total_hits(mut self) -> Self {
        self.track_total_hits = true;
        self
    }

    pub fn into_body(self) -> Value {
        let mut body = json!({
            "size": 0,
            "query": filter_query(self.filters),
            "aggs": self.aggs,
        });
        if self.track_total_hits {
            body["track_total_hits"] = Value::Bool(true);
        }
        body
    }
}

/// Query matching documents that pass every clause (or everything when empty)
pub fn filter_query(filters: Vec<Value>) -> Value {
    if filters.is_empty() {
        json!({ "match_all": {} })
    } else {
        json!({ "bool": { "filter": filters } })
    }
}
