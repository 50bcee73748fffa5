//! Search/aggregation engine interface and its Elasticsearch adapter

use std::time::Duration;

use async_trait::async_trait;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::error::{translate_engine_response, translate_transport, AppError, Result};

/// A matching document, flattened with its engine metadata
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub index: String,
    pub score: Option<f64>,
    #[serde(flatten)]
    pub source: Map<String, Value>,
}

const HIT_METADATA_KEYS: [&str; 3] = ["id", "index", "score"];

// Engine metadata takes precedence over same-named document fields.
impl Serialize for SearchHit {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let own = self
            .source
            .iter()
            .filter(|(key, _)| !HIT_METADATA_KEYS.contains(&key.as_str()));

        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("id", &self.id)?;
        map.serialize_entry("index", &self.index)?;
        map.serialize_entry("score", &self.score)?;
        for (key, value) in own {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Engine search response reduced to what callers need
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchResult {
    pub total: u64,
    pub hits: Vec<SearchHit>,
    pub aggregations: Option<Value>,
}

/// Cluster health summary
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterHealth {
    pub status: String,
    pub cluster_name: String,
    pub number_of_nodes: u64,
    pub active_shards: u64,
    pub version: Option<String>,
}

/// External search/aggregation engine
#[async_trait]
pub trait SearchEngine: Send + Sync {
    /// Run a search body against `indices`
    async fn search(&self, indices: &[String], body: &Value) -> Result<SearchResult>;

    /// Count documents in `indices` matching `query`
    async fn count(&self, indices: &[String], query: &Value) -> Result<u64>;

    async fn health(&self) -> Result<ClusterHealth>;
}

/// HTTP client for an Elasticsearch-compatible node
#[derive(Clone)]
pub struct ElasticsearchClient {
    client: reqwest::Client,
    node: String,
    timeout: Duration,
}

impl ElasticsearchClient {
    /// Create a client; every request is bounded by `timeout`
    pub fn new(node: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build engine client: {}", e)))?;

        Ok(Self {
            client,
            node: node.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn url(&self, indices: &[String], endpoint: &str) -> String {
        if indices.is_empty() {
            format!("{}/{}", self.node, endpoint)
        } else {
            format!("{}/{}/{}", self.node, indices.join(","), endpoint)
        }
    }

    async fn read(&self, request: reqwest::RequestBuilder) -> Result<String> {
        let response = request
            .send()
            .await
            .map_err(|e| translate_transport(e, self.timeout))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| translate_transport(e, self.timeout))?;

        if !status.is_success() {
            return Err(translate_engine_response(status.as_u16(), &body));
        }
        Ok(body)
    }
}

#[async_trait]
impl SearchEngine for ElasticsearchClient {
    async fn search(&self, indices: &[String], body: &Value) -> Result<SearchResult> {
        let url = self.url(indices, "_search");
        debug!(url = %url, "Engine search");

        let request = self
            .client
            .post(&url)
            .query(&[("timeout", format!("{}s", self.timeout.as_secs()))])
            .json(body);

        parse_search_response(&self.read(request).await?)
    }

    async fn count(&self, indices: &[String], query: &Value) -> Result<u64> {
        let url = self.url(indices, "_count");
        let request = self.client.post(&url).json(&json!({ "query": query }));
        parse_count_response(&self.read(request).await?)
    }

    async fn health(&self) -> Result<ClusterHealth> {
        let health = self
            .read(self.client.get(format!("{}/_cluster/health", self.node)))
            .await?;
        let mut health = parse_health_response(&health)?;

        // version is informational; a failure here does not fail the health check
        match self.read(self.client.get(format!("{}/", self.node))).await {
            Ok(info) => {
                health.version = serde_json::from_str::<Value>(&info)
                    .ok()
                    .and_then(|v| v["version"]["number"].as_str().map(str::to_string));
            }
            Err(e) => warn!(error = %e, "Failed to read engine version"),
        }
        Ok(health)
    }
}

#[derive(Deserialize)]
struct RawSearchResponse {
    #[serde(default)]
    timed_out: bool,
    hits: RawHits,
    #[serde(default)]
    aggregations: Option<Value>,
}

#[derive(Deserialize)]
struct RawHits {
    total: Option<RawTotal>,
    #[serde(default)]
    hits: Vec<RawHit>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTotal {
    Count(u64),
    Tracked { value: u64 },
}

#[derive(Deserialize)]
struct RawHit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_index")]
    index: String,
    #[serde(rename = "_score", default)]
    score: Option<f64>,
    #[serde(rename = "_source", default)]
    source: Map<String, Value>,
}

/// Decode a raw `_search` response body
pub fn parse_search_response(body: &str) -> Result<SearchResult> {
    let raw: RawSearchResponse = serde_json::from_str(body)?;
    if raw.timed_out {
        warn!("Engine search timed out, results may be partial");
    }

    let hits: Vec<SearchHit> = raw
        .hits
        .hits
        .into_iter()
        .map(|h| SearchHit {
            id: h.id,
            index: h.index,
            score: h.score,
            source: h.source,
        })
        .collect();

    let total = match raw.hits.total {
        Some(RawTotal::Count(n)) | Some(RawTotal::Tracked { value: n }) => n,
        None => hits.len() as u64,
    };

    Ok(SearchResult {
        total,
        hits,
        aggregations: raw.aggregations,
    })
}

fn parse_count_response(body: &str) -> Result<u64> {
    #[derive(Deserialize)]
    struct RawCount {
        count: u64,
    }
    Ok(serde_json::from_str::<RawCount>(body)?.count)
}

fn parse_health_response(body: &str) -> Result<ClusterHealth> {
    #[derive(Deserialize)]
    struct RawHealth {
        status: String,
        cluster_name: String,
        #[serde(default)]
        number_of_nodes: u64,
        #[serde(default)]
        active_shards: u64,
    }
    let raw: RawHealth = serde_json::from_str(body)?;
    Ok(ClusterHealth {
        status: raw.status,
        cluster_name: raw.cluster_name,
        number_of_nodes: raw.number_of_nodes,
        active_shards: raw.active_shards,
        version: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn local_client(addr: std::net::SocketAddr, timeout: Duration) -> ElasticsearchClient {
        ElasticsearchClient {
            client: reqwest::Client::builder()
                .no_proxy()
                .timeout(timeout)
                .build()
                .unwrap(),
            node: format!("http://{}", addr),
            timeout,
        }
    }

    #[tokio::test]
    async fn test_closed_port_is_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = local_client(addr, Duration::from_secs(2));
        let err = client
            .count(&["ecommerce-errors".into()], &json!({ "match_all": {} }))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Connection(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_silent_engine_is_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let silent = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let client = local_client(addr, Duration::from_millis(200));
        let err = client.health().await.unwrap_err();
        silent.abort();

        match err {
            AppError::Timeout(after) => assert_eq!(after, "200ms"),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_search_response() {
        let body = r#"{
            "took": 3,
            "timed_out": false,
            "hits": {
                "total": { "value": 42, "relation": "eq" },
                "hits": [
                    { "_index": "ecommerce-errors", "_id": "abc", "_score": 1.5,
                      "_source": { "level": "ERROR", "message": "db down" } }
                ]
            },
            "aggregations": { "levels": { "buckets": [] } }
        }"#;

        let result = parse_search_response(body).unwrap();
        assert_eq!(result.total, 42);
        assert_eq!(result.hits.len(), 1);
        assert_eq!(result.hits[0].id, "abc");
        assert_eq!(result.hits[0].source["level"], "ERROR");
        assert!(result.aggregations.is_some());
    }

    #[test]
    fn test_hit_serializes_flat() {
        let result = parse_search_response(
            r#"{"hits":{"total":1,"hits":[{"_index":"i","_id":"1","_score":null,"_source":{"amount":5}}]}}"#,
        )
        .unwrap();
        let hit = serde_json::to_value(&result.hits[0]).unwrap();
        assert_eq!(hit, json!({ "id": "1", "index": "i", "score": null, "amount": 5 }));
        assert_eq!(result.total, 1);
    }

    #[test]
    fn test_hit_metadata_wins_over_document_fields() {
        let result = parse_search_response(
            r#"{"hits":{"hits":[{"_index":"i","_id":"es-1","_score":1.0,
                "_source":{"id":"app-7","score":"high","level":"ERROR"}}]}}"#,
        )
        .unwrap();

        let text = serde_json::to_string(&result.hits[0]).unwrap();
        assert_eq!(text.matches("\"id\"").count(), 1);
        assert_eq!(text.matches("\"score\"").count(), 1);

        let hit: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            hit,
            json!({ "id": "es-1", "index": "i", "score": 1.0, "level": "ERROR" })
        );
    }

    #[test]
    fn test_parse_count_and_health() {
        assert_eq!(parse_count_response(r#"{"count":7,"_shards":{}}"#).unwrap(), 7);

        let health = parse_health_response(
            r#"{"cluster_name":"docker-cluster","status":"yellow","number_of_nodes":1,"active_shards":9}"#,
        )
        .unwrap();
        assert_eq!(health.status, "yellow");
        assert_eq!(health.active_shards, 9);
    }

    #[test]
    fn test_url_joins_indices() {
        let client = ElasticsearchClient::new("http://es:9200/", Duration::from_secs(30)).unwrap();
        assert_eq!(
            client.url(&["a".into(), "b".into()], "_search"),
            "http://es:9200/a,b/_search"
        );
        assert_eq!(client.url(&[], "_count"), "http://es:9200/_count");
    }

    #[test]
    fn test_malformed_response_is_parse_error() {
        assert!(matches!(
            parse_search_response("<html>"),
            Err(AppError::Parse(_))
        ));
    }
}
