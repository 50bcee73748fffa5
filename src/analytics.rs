//! Analytics service - cached dashboards, statistics and search over the engine

use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::cache::{
    CacheKey, Cached, QueryCache, DASHBOARD_TTL_SECS, DETAILED_STATS_TTL_SECS,
    TRANSACTION_STATS_TTL_SECS, USER_BEHAVIOR_TTL_SECS,
};
use crate::compose::{
    compose, doc_count, error_rate, metric_value, nested_metric, AmountSummary, ClusterStats,
    DashboardStats, DetailedStats, Period, Timeline, TimestampRange, TopUser, TransactionSearch,
    TransactionStats, UserBehavior,
};
use crate::engine::{ClusterHealth, SearchEngine, SearchHit};
use crate::error::{AppError, Result};
use crate::models::{LogType, PopularSearch, SearchHistoryEntry};
use crate::query::{
    agg, filter_query, iso, parse_indices, parse_positive, term, AggregationRequest, DateRange,
    Interval, Pagination, SearchParams, SearchQuery, DAY_LABEL_FORMAT, HOUR_LABEL_FORMAT,
    INDEX_FIELD, LEVEL_FIELD, LOG_TYPE_FIELD, MAX_PAGE_SIZE, STATUS_FIELD, TIMELINE_LABEL_FORMAT,
    TIMESTAMP_FIELD, TOP_BUCKETS, USER_FIELD,
};
use crate::store::DocumentStore;

/// Window covered by detailed stats when no start date is given
const DEFAULT_DETAILED_DAYS: i64 = 7;

/// Activities returned per user behavior summary
const USER_ACTIVITY_LIMIT: u32 = 100;

const ERROR_LEVEL: &str = "ERROR";
const AMOUNT_FIELD: &str = "amount";
const TRANSACTION_ID_FIELD: &str = "transaction_id.keyword";

/// One page of search results
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPage {
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u64,
    pub hits: Vec<SearchHit>,
    pub aggregations: Option<Value>,
}

/// Query parameters of the timeline endpoint
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineParams {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub interval: Option<String>,
    pub index: Option<String>,
}

/// Filters accepted by transaction stats; also the cache key material
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionFilters {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub status: Option<String>,
    pub user_id: Option<String>,
}

/// Read-side service over the search engine.
///
/// Every method is independent per call; cached endpoints go through the
/// [`QueryCache`] and never fail because the cache is down.
#[derive(Clone)]
pub struct AnalyticsService {
    engine: Arc<dyn SearchEngine>,
    cache: QueryCache,
    store: Arc<dyn DocumentStore>,
    indices: Vec<String>,
}

impl AnalyticsService {
    pub fn new(
        engine: Arc<dyn SearchEngine>,
        cache: QueryCache,
        store: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            engine,
            cache,
            store,
            indices: LogType::all_indices(),
        }
    }

    /// Free-text search with filters, sorting and pagination
    pub async fn search(&self, params: &SearchParams) -> Result<SearchPage> {
        let query = SearchQuery::from_params(params)?;
        let started = Instant::now();
        let result = self.engine.search(&query.indices, &query.to_body()).await?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        debug!(
            total = result.total,
            took_ms = elapsed_ms,
            indices = query.indices.len(),
            "Search completed"
        );

        if let Some(text) = &query.free_text {
            self.record_search(text, &query, result.total, elapsed_ms).await;
        }

        Ok(SearchPage {
            total: result.total,
            page: query.pagination.page,
            limit: query.pagination.limit,
            total_pages: query.pagination.total_pages(result.total),
            hits: result.hits,
            aggregations: result.aggregations,
        })
    }

    async fn record_search(&self, text: &str, query: &SearchQuery, results: u64, took_ms: u64) {
        let mut filters = serde_json::Map::new();
        if let Some(start) = query.range.start {
            filters.insert("startDate".into(), Value::String(iso(start)));
        }
        if let Some(end) = query.range.end {
            filters.insert("endDate".into(), Value::String(iso(end)));
        }
        if let Some(status) = &query.status {
            filters.insert("status".into(), Value::String(status.clone()));
        }
        if let Some(log_type) = query.log_type {
            filters.insert("logType".into(), Value::String(log_type.as_str().into()));
        }

        let entry = SearchHistoryEntry {
            query: text.to_string(),
            filters: Value::Object(filters),
            page: query.pagination.page,
            size: query.pagination.limit,
            results_count: results,
            execution_time_ms: took_ms,
            search_date: Utc::now(),
        };

        if let Err(e) = self.store.record_search(&entry).await {
            warn!(error = %e, query = text, "Failed to record search history");
        }
    }

    pub async fn search_history(&self, limit: Option<&str>) -> Result<Vec<SearchHistoryEntry>> {
        let limit = parse_positive("limit", limit, TOP_BUCKETS)?.min(MAX_PAGE_SIZE);
        self.store.search_history(limit).await
    }

    pub async fn popular_searches(&self, limit: Option<&str>) -> Result<Vec<PopularSearch>> {
        let limit = parse_positive("limit", limit, TOP_BUCKETS)?.min(MAX_PAGE_SIZE);
        self.store.popular_searches(limit).await
    }

    /// Dashboard counters, cached for [`DASHBOARD_TTL_SECS`]
    pub async fn dashboard_stats(&self) -> Result<Cached<DashboardStats>> {
        self.cache
            .get_or_compute(
                &CacheKey::endpoint("stats:dashboard"),
                DASHBOARD_TTL_SECS,
                || self.compute_dashboard(Utc::now()),
            )
            .await
    }

    /// Uncached dashboard as of `now`; "today" is the current UTC day
    pub async fn compute_dashboard(&self, now: DateTime<Utc>) -> Result<DashboardStats> {
        let today = utc_day(now);
        let last_day = DateRange {
            start: Some(now - Duration::hours(24)),
            end: Some(now),
        };

        let all = filter_query(Vec::new());
        let today_query = filter_query(today.clause().into_iter().collect());
        let errors_query = filter_query(
            today
                .clause()
                .into_iter()
                .chain([term(LEVEL_FIELD, ERROR_LEVEL)])
                .collect(),
        );
        let types_body = AggregationRequest::new()
            .agg("types", agg::terms(LOG_TYPE_FIELD, TOP_BUCKETS))
            .into_body();
        let hourly_body = AggregationRequest::new()
            .range(&last_day)
            .agg(
                "logs_per_hour",
                agg::fixed_histogram(TIMESTAMP_FIELD, "1h", HOUR_LABEL_FORMAT),
            )
            .into_body();

        let (total_logs, logs_today, errors_today, types, hourly) = tokio::try_join!(
            self.engine.count(&self.indices, &all),
            self.engine.count(&self.indices, &today_query),
            self.engine.count(&self.indices, &errors_query),
            self.engine.search(&self.indices, &types_body),
            self.engine.search(&self.indices, &hourly_body),
        )?;

        Ok(DashboardStats {
            total_logs,
            logs_today,
            errors_today,
            log_type_distribution: compose(types.aggregations.as_ref(), "types"),
            logs_by_hour: compose(hourly.aggregations.as_ref(), "logs_per_hour"),
        })
    }

    /// Detailed statistics over `range`, cached per range
    pub async fn detailed_stats(&self, range: DateRange) -> Result<Cached<DetailedStats>> {
        self.cache
            .get_or_compute(
                &CacheKey::new("stats:detailed", &range),
                DETAILED_STATS_TTL_SECS,
                || self.compute_detailed(range, Utc::now()),
            )
            .await
    }

    /// Uncached detailed stats.
    ///
    /// A missing end means `now`. A missing start means the last week, or the
    /// week before `end` when `end` is further back.
    pub async fn compute_detailed(
        &self,
        range: DateRange,
        now: DateTime<Utc>,
    ) -> Result<DetailedStats> {
        let end = range.end.unwrap_or(now);
        let window_days = Duration::days(DEFAULT_DETAILED_DAYS);
        let start = range
            .start
            .unwrap_or_else(|| (now - window_days).min(end - window_days));
        let window = DateRange::new(Some(start), Some(end))?;

        let body = AggregationRequest::new()
            .range(&window)
            .agg("errors", agg::filter(term(LEVEL_FIELD, ERROR_LEVEL)))
            .agg("levels", agg::terms(LEVEL_FIELD, TOP_BUCKETS))
            .agg("types", agg::terms(LOG_TYPE_FIELD, TOP_BUCKETS))
            .agg("top_users", agg::terms(USER_FIELD, TOP_BUCKETS))
            .agg(
                "logs_per_day",
                agg::fixed_histogram(TIMESTAMP_FIELD, "1d", DAY_LABEL_FORMAT),
            )
            .track_total_hits()
            .into_body();

        let result = self.engine.search(&self.indices, &body).await?;
        let aggs = result.aggregations.as_ref();
        let total_errors = doc_count(aggs, "errors");

        Ok(DetailedStats {
            period: Period {
                start: iso(start),
                end: iso(end),
            },
            total_logs: result.total,
            total_errors,
            error_rate: error_rate(result.total, total_errors),
            level_distribution: compose(aggs, "levels"),
            log_type_distribution: compose(aggs, "types"),
            top_users: compose(aggs, "top_users"),
            logs_by_day: compose(aggs, "logs_per_day"),
        })
    }

    /// Calendar-bucketed counts broken down by status and index
    pub async fn logs_by_hour(&self, params: &TimelineParams) -> Result<Timeline> {
        let range = DateRange::parse(params.start_date.as_deref(), params.end_date.as_deref())?;
        let interval = match params.interval.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => Interval::from_str(raw)?,
            _ => Interval::Hour,
        };
        let indices = self.select_indices(params.index.as_deref())?;

        let histogram = agg::with_sub(
            agg::with_sub(
                agg::calendar_histogram(TIMESTAMP_FIELD, interval.as_str(), TIMELINE_LABEL_FORMAT),
                "by_status",
                agg::terms(STATUS_FIELD, TOP_BUCKETS),
            ),
            "by_index",
            agg::terms(INDEX_FIELD, TOP_BUCKETS),
        );
        let body = AggregationRequest::new()
            .range(&range)
            .agg("logs_over_time", histogram)
            .into_body();

        let result = self.engine.search(&indices, &body).await?;
        Ok(Timeline {
            interval: interval.as_str().to_string(),
            buckets: compose(result.aggregations.as_ref(), "logs_over_time"),
        })
    }

    /// Single document by engine id
    pub async fn log_by_id(&self, id: &str, index: Option<&str>) -> Result<SearchHit> {
        let id = id.trim();
        if id.is_empty() {
            return Err(AppError::Validation("log id is required".into()));
        }
        let indices = self.select_indices(index)?;
        let body = json!({
            "query": { "ids": { "values": [id] } },
            "size": 1,
        });

        self.engine
            .search(&indices, &body)
            .await?
            .hits
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound(format!("Log {} not found", id)))
    }

    /// Most active users with their summed transaction amounts
    pub async fn top_users(&self, size: Option<&str>, range: DateRange) -> Result<Vec<TopUser>> {
        let size = parse_positive("size", size, TOP_BUCKETS)?.min(MAX_PAGE_SIZE);
        let users = agg::with_sub(
            agg::terms(USER_FIELD, size),
            "total_amount",
            agg::sum_or_zero(AMOUNT_FIELD),
        );
        let body = AggregationRequest::new()
            .range(&range)
            .agg("top_users", users)
            .into_body();

        let result = self.engine.search(&self.indices, &body).await?;
        Ok(compose(result.aggregations.as_ref(), "top_users"))
    }

    /// Index-wide totals and transaction amount summary
    pub async fn cluster_stats(&self) -> Result<ClusterStats> {
        let transactions = agg::with_sub(
            agg::with_sub(
                agg::with_sub(
                    agg::with_sub(
                        agg::filter(term(INDEX_FIELD, LogType::Transaction.index_name())),
                        "total_amount",
                        agg::sum(AMOUNT_FIELD),
                    ),
                    "avg_amount",
                    agg::avg(AMOUNT_FIELD),
                ),
                "max_amount",
                agg::max(AMOUNT_FIELD),
            ),
            "min_amount",
            agg::min(AMOUNT_FIELD),
        );

        let body = AggregationRequest::new()
            .agg("by_index", agg::terms(INDEX_FIELD, TOP_BUCKETS))
            .agg("by_status", agg::terms(STATUS_FIELD, TOP_BUCKETS))
            .agg("transactions_stats", transactions)
            .agg(
                "errors_count",
                agg::filter(term(INDEX_FIELD, LogType::Error.index_name())),
            )
            .agg(
                "fraud_count",
                agg::filter(term(INDEX_FIELD, LogType::Fraud.index_name())),
            )
            .agg("date_range", agg::stats(TIMESTAMP_FIELD))
            .track_total_hits()
            .into_body();

        let result = self.engine.search(&self.indices, &body).await?;
        let aggs = result.aggregations.as_ref();

        Ok(ClusterStats {
            total_documents: result.total,
            by_index: compose(aggs, "by_index"),
            by_status: compose(aggs, "by_status"),
            transactions: AmountSummary {
                total: nested_metric(aggs, "transactions_stats", "total_amount"),
                average: nested_metric(aggs, "transactions_stats", "avg_amount"),
                max: nested_metric(aggs, "transactions_stats", "max_amount"),
                min: nested_metric(aggs, "transactions_stats", "min_amount"),
            },
            errors_count: doc_count(aggs, "errors_count"),
            fraud_count: doc_count(aggs, "fraud_count"),
            date_range: TimestampRange::from_stats(aggs, "date_range"),
        })
    }

    /// Amount totals over transaction logs, cached per filter set
    pub async fn transaction_stats(
        &self,
        filters: &TransactionFilters,
    ) -> Result<Cached<TransactionStats>> {
        let range = DateRange::parse(filters.start_date.as_deref(), filters.end_date.as_deref())?;
        let key = CacheKey::new("stats:transactions", filters);

        self.cache
            .get_or_compute(&key, TRANSACTION_STATS_TTL_SECS, || async {
                let mut request = AggregationRequest::new().range(&range);
                if let Some(status) = non_blank(filters.status.as_deref()) {
                    request = request.filter(term(STATUS_FIELD, status));
                }
                if let Some(user) = non_blank(filters.user_id.as_deref()) {
                    request = request.filter(term(USER_FIELD, user));
                }
                let body = request
                    .agg("total_amount", agg::sum(AMOUNT_FIELD))
                    .agg("avg_amount", agg::avg(AMOUNT_FIELD))
                    .agg("transaction_count", agg::value_count(TRANSACTION_ID_FIELD))
                    .into_body();

                let result = self
                    .engine
                    .search(&[LogType::Transaction.index_name().to_string()], &body)
                    .await?;
                let aggs = result.aggregations.as_ref();

                Ok(TransactionStats {
                    total_amount: metric_value(aggs, "total_amount"),
                    avg_amount: metric_value(aggs, "avg_amount"),
                    count: metric_value(aggs, "transaction_count") as u64,
                })
            })
            .await
    }

    /// Match transactions by id, user or status, newest first
    pub async fn search_transactions(
        &self,
        text: Option<&str>,
        pagination: Pagination,
    ) -> Result<TransactionSearch> {
        let query = match non_blank(text) {
            Some(text) => json!({
                "multi_match": {
                    "query": text,
                    "fields": ["transaction_id", "user_id", "status"],
                }
            }),
            None => json!({ "match_all": {} }),
        };
        let body = json!({
            "query": query,
            "from": pagination.offset(),
            "size": pagination.size(),
            "sort": [ { TIMESTAMP_FIELD: { "order": "desc" } } ],
            "track_total_hits": true,
        });

        let result = self
            .engine
            .search(&[LogType::Transaction.index_name().to_string()], &body)
            .await?;

        Ok(TransactionSearch {
            total: result.total,
            transactions: result.hits.into_iter().map(|hit| hit.source).collect(),
        })
    }

    /// Latest activities of one user, cached per user
    pub async fn user_behavior(&self, user_id: &str) -> Result<Cached<UserBehavior>> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(AppError::Validation("userId is required".into()));
        }
        let key = CacheKey::new("user:behavior", &json!({ "userId": user_id }));

        self.cache
            .get_or_compute(&key, USER_BEHAVIOR_TTL_SECS, || async {
                let body = json!({
                    "query": { "match": { "user_id": user_id } },
                    "size": USER_ACTIVITY_LIMIT,
                    "sort": [ { TIMESTAMP_FIELD: { "order": "desc" } } ],
                    "track_total_hits": true,
                });
                let result = self
                    .engine
                    .search(&[LogType::UserBehavior.index_name().to_string()], &body)
                    .await?;

                info!(user_id, activities = result.total, "Computed user behavior");
                Ok(UserBehavior {
                    user_id: user_id.to_string(),
                    activities: result.hits.into_iter().map(|hit| hit.source).collect(),
                    total_activities: result.total,
                })
            })
            .await
    }

    pub async fn health(&self) -> Result<ClusterHealth> {
        self.engine.health().await
    }

    fn select_indices(&self, raw: Option<&str>) -> Result<Vec<String>> {
        match non_blank(raw) {
            Some(raw) => parse_indices(raw),
            None => Ok(self.indices.clone()),
        }
    }
}

/// The UTC calendar day containing `now`, to the millisecond
fn utc_day(now: DateTime<Utc>) -> DateRange {
    let start = now.date_naive().and_time(NaiveTime::MIN).and_utc();
    DateRange {
        start: Some(start),
        end: Some(start + Duration::days(1) - Duration::milliseconds(1)),
    }
}

fn non_blank(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|s| !s.is_empty())
}
