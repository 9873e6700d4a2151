use crate::config::OpenSearchConfig;
use crate::telemetry::sample::Sample;
use crate::telemetry::schema;
use crate::telemetry::store::{StoreError, TimeSeriesStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

/// Name of the aggregation used by the rolling-average query.
const AVG_AGG: &str = "avg_cpu";

/// Default `index.max_result_window`; larger `size` values are rejected
/// by the cluster, so search sizes are clamped to it.
pub const MAX_RESULT_WINDOW: usize = 10_000;

/// Time-series store backed by an OpenSearch index over its REST API.
#[derive(Debug, Clone)]
pub struct OpenSearchStore {
    client: Client,
    base_url: String,
    index: String,
    credentials: Option<(String, String)>,
}

impl OpenSearchStore {
    pub fn new(config: &OpenSearchConfig, index: &str) -> Result<Self> {
        schema::validate_series_name(index).map_err(anyhow::Error::msg)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .context("building OpenSearch HTTP client")?;

        let credentials = if config.username.is_empty() {
            None
        } else {
            Some((config.username.clone(), config.password.clone()))
        };

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            index: index.to_string(),
            credentials,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path);
        let request = self.client.request(method, url);
        match &self.credentials {
            Some((user, pass)) => request.basic_auth(user, Some(pass)),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, StoreError> {
        request.send().await.map_err(|e| {
            StoreError::StoreUnavailable(format!("OpenSearch at {}: {e}", self.base_url))
        })
    }

    async fn search(&self, body: Value) -> Result<Value, StoreError> {
        let path = format!("{}/_search", self.index);
        let response = self
            .send(self.request(Method::POST, &path).json(&body))
            .await?;
        let response = ensure_success(response).await?;
        response
            .json::<Value>()
            .await
            .map_err(|e| StoreError::MalformedResponse(format!("search body: {e}")))
    }
}

async fn ensure_success(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(status_error(status, &text))
}

fn status_error(status: StatusCode, text: &str) -> StoreError {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        StoreError::StoreUnavailable(format!("authentication rejected ({status})"))
    } else if status.is_server_error() || status == StatusCode::NOT_FOUND {
        StoreError::StoreUnavailable(format!("request failed with status {status}: {text}"))
    } else {
        StoreError::MalformedResponse(format!("request rejected with status {status}: {text}"))
    }
}

pub fn latest_query(limit: usize) -> Value {
    json!({
        "size": limit.min(MAX_RESULT_WINDOW),
        "sort": [{ "timestamp": { "order": "desc" } }],
        "query": { "match_all": {} }
    })
}

pub fn anomalies_query(limit: usize) -> Value {
    json!({
        "size": limit.min(MAX_RESULT_WINDOW),
        "query": { "term": { "anomaly": 1 } }
    })
}

pub fn average_query(start: i64, end: i64) -> Value {
    json!({
        "size": 0,
        "query": {
            "range": { "timestamp": { "gte": start, "lte": end } }
        },
        "aggs": {
            "avg_cpu": { "avg": { "field": "cpu_usage" } }
        }
    })
}

#[derive(Deserialize)]
struct StoredDoc {
    name: String,
    timestamp: i64,
    cpu_usage: f64,
    anomaly: i64,
}

/// Extract and validate the `_source` documents of a search response.
pub fn parse_hits(body: &Value) -> Result<Vec<Sample>, StoreError> {
    let hits = body
        .get("hits")
        .and_then(|h| h.get("hits"))
        .and_then(Value::as_array)
        .ok_or_else(|| StoreError::MalformedResponse("search response has no hits array".into()))?;

    hits.iter()
        .map(|hit| {
            let source = hit
                .get("_source")
                .cloned()
                .ok_or_else(|| StoreError::MalformedResponse("hit without _source".into()))?;
            let doc: StoredDoc = serde_json::from_value(source)
                .map_err(|e| StoreError::MalformedResponse(format!("hit _source: {e}")))?;
            Sample::from_stored(doc.name, doc.timestamp, doc.cpu_usage, doc.anomaly)
                .map_err(StoreError::MalformedResponse)
        })
        .collect()
}

/// Read the average aggregation; a `null` value means the window was empty.
pub fn parse_average(body: &Value) -> Result<Option<f64>, StoreError> {
    let value = body
        .get("aggregations")
        .and_then(|a| a.get(AVG_AGG))
        .and_then(|agg| agg.get("value"))
        .ok_or_else(|| {
            StoreError::MalformedResponse(format!("response lacks aggregations.{AVG_AGG}.value"))
        })?;
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n.as_f64().map(Some).ok_or_else(|| {
            StoreError::MalformedResponse(format!("{AVG_AGG} value {n} is not a float"))
        }),
        other => Err(StoreError::MalformedResponse(format!(
            "{AVG_AGG} value has unexpected type: {other}"
        ))),
    }
}

#[async_trait]
impl TimeSeriesStore for OpenSearchStore {
    fn name(&self) -> &str {
        "opensearch"
    }

    fn series(&self) -> &str {
        &self.index
    }

    async fn reset_series(&self) -> Result<(), StoreError> {
        let response = self.send(self.request(Method::DELETE, &self.index)).await?;
        if response.status() != StatusCode::NOT_FOUND {
            ensure_success(response).await?;
        }

        let response = self
            .send(self.request(Method::PUT, &self.index).json(&schema::index_mapping()))
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        if status == StatusCode::BAD_REQUEST {
            return Err(StoreError::SchemaConflict(format!(
                "creating index `{}`: {text}",
                self.index
            )));
        }
        Err(status_error(status, &text))
    }

    async fn upsert(&self, sample: &Sample) -> Result<(), StoreError> {
        let path = format!("{}/_doc/{}", self.index, sample.timestamp);
        let response = self
            .send(self.request(Method::PUT, &path).json(sample))
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn latest(&self, limit: usize) -> Result<Vec<Sample>, StoreError> {
        let body = self.search(latest_query(limit)).await?;
        parse_hits(&body)
    }

    async fn anomalies(&self, limit: usize) -> Result<Vec<Sample>, StoreError> {
        let body = self.search(anomalies_query(limit)).await?;
        parse_hits(&body)
    }

    async fn average_usage(&self, start: i64, end: i64) -> Result<Option<f64>, StoreError> {
        if start > end {
            return Ok(None);
        }
        let body = self.search(average_query(start, end)).await?;
        parse_average(&body)
    }
}
