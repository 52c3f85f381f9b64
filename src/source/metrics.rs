use super::{RetryPolicy, SourceError, SourceResult, remaining};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;

/// One tagged series returned by the metrics store.
#[derive(Debug, Clone)]
pub struct Series {
    pub labels: BTreeMap<String, String>,
    pub samples: Vec<Sample>,
}

impl Series {
    pub fn label(&self, name: &str) -> &str {
        return self.labels.get(name).map(|v| v.as_str()).unwrap_or("");
    }

    /// Latest sample value, if the series carries any.
    pub fn value(&self) -> Option<f64> {
        return self.samples.last().map(|s| s.value);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Sample {
    pub timestamp: f64,
    pub value: f64,
}

#[derive(Deserialize)]
struct PromResponse {
    status: String,
    #[serde(default)]
    data: Option<PromData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct PromData {
    #[serde(rename = "resultType")]
    #[allow(unused)]
    result_type: String,
    #[serde(default)]
    result: Vec<PromResult>,
}

#[derive(Deserialize)]
struct PromResult {
    metric: BTreeMap<String, String>,
    #[serde(default)]
    value: Option<(f64, String)>,
    #[serde(default)]
    values: Option<Vec<(f64, String)>>,
}

/// Read-only client for the Prometheus-compatible metrics store
/// (VictoriaMetrics in production).
pub struct MetricsClient {
    endpoint: String,
    client: reqwest::Client,
    timeout: Duration,
    retry: RetryPolicy,
}

impl MetricsClient {
    pub fn new(
        endpoint: &str,
        client: reqwest::Client,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        return MetricsClient {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
            timeout,
            retry,
        };
    }

    /// Instant query; an empty vector is a valid answer (the caller decides
    /// whether absence means NA).
    pub async fn query_instant(
        &self,
        promql: &str,
        at: DateTime<Utc>,
        deadline: Instant,
    ) -> SourceResult<Vec<Series>> {
        let url = format!("{}/api/v1/query", self.endpoint);
        let time = at.timestamp().to_string();
        let params = [("query", promql), ("time", time.as_str())];
        return self.fetch(&url, &params, deadline).await;
    }

    pub async fn query_range(
        &self,
        promql: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
        deadline: Instant,
    ) -> SourceResult<Vec<Series>> {
        let url = format!("{}/api/v1/query_range", self.endpoint);
        let start = start.timestamp().to_string();
        let end = end.timestamp().to_string();
        let step = format!("{}s", step.as_secs().max(1));
        let params = [
            ("query", promql),
            ("start", start.as_str()),
            ("end", end.as_str()),
            ("step", step.as_str()),
        ];
        return self.fetch(&url, &params, deadline).await;
    }

    async fn fetch(
        &self,
        url: &str,
        params: &[(&str, &str)],
        deadline: Instant,
    ) -> SourceResult<Vec<Series>> {
        let body = self
            .retry
            .run(deadline, || self.fetch_once(url, params, deadline))
            .await?;
        return parse_prometheus_body(&body);
    }

    async fn fetch_once(
        &self,
        url: &str,
        params: &[(&str, &str)],
        deadline: Instant,
    ) -> SourceResult<String> {
        let Some(left) = remaining(deadline) else {
            return Err(SourceError::Timeout);
        };
        let response = self
            .client
            .get(url)
            .query(params)
            .timeout(self.timeout.min(left))
            .send()
            .await
            .map_err(request_error)?;
        let status = response.status();
        let text = response.text().await.map_err(request_error)?;
        if !status.is_success() {
            return Err(SourceError::Rejected {
                status: status.as_u16(),
                detail: truncate(&text),
            });
        }
        return Ok(text);
    }
}

fn parse_prometheus_body(body: &str) -> SourceResult<Vec<Series>> {
    let response: PromResponse = serde_json::from_str(body)
        .map_err(|e| SourceError::Upstream(format!("malformed response: {}", e)))?;
    if response.status != "success" {
        return Err(SourceError::Upstream(
            response.error.unwrap_or_else(|| response.status.clone()),
        ));
    }
    let data = match response.data {
        Some(data) => data,
        None => return Ok(Vec::new()),
    };
    let mut series = Vec::with_capacity(data.result.len());
    for entry in data.result {
        let mut samples = Vec::new();
        if let Some((timestamp, value)) = entry.value {
            if let Ok(value) = value.parse::<f64>() {
                samples.push(Sample { timestamp, value });
            }
        }
        for (timestamp, value) in entry.values.unwrap_or_default() {
            if let Ok(value) = value.parse::<f64>() {
                samples.push(Sample { timestamp, value });
            }
        }
        series.push(Series {
            labels: entry.metric,
            samples,
        });
    }
    return Ok(series);
}

pub(crate) fn request_error(err: reqwest::Error) -> SourceError {
    if err.is_timeout() {
        return SourceError::Timeout;
    }
    return SourceError::Unavailable(err.to_string());
}

pub(crate) fn truncate(text: &str) -> String {
    const LIMIT: usize = 256;
    if text.len() <= LIMIT {
        return text.to_string();
    }
    let mut end = LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    return format!("{}...", &text[..end]);
}
