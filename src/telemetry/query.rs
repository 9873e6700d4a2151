use crate::config::QueryConfig;
use crate::telemetry::sample::Sample;
use crate::telemetry::store::{StoreError, TimeSeriesStore};
use serde::Serialize;
use std::sync::Arc;

/// A failed read, split by whether the store or its data is at fault.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("malformed store response: {0}")]
    MalformedResponse(String),
}

impl From<StoreError> for QueryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::StoreUnavailable(msg) => Self::StoreUnavailable(msg),
            StoreError::MalformedResponse(msg) => Self::MalformedResponse(msg),
            StoreError::SchemaConflict(msg) => Self::MalformedResponse(msg),
        }
    }
}

/// Anomaly-flagged samples, with a marker when the cap cut the list short.
#[derive(Debug, Clone, Serialize)]
pub struct AnomalyListing {
    pub samples: Vec<Sample>,
    pub truncated: bool,
}

/// The three canned views, gathered in one pass.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub recent: Vec<Sample>,
    pub anomalies: AnomalyListing,
    pub window_start: i64,
    pub window_end: i64,
    pub average_usage: Option<f64>,
}

/// Number of samples listed by [`QueryService::report`].
pub const REPORT_RECENT: usize = 10;

/// Read-only views over the sample series. Holds no state between calls.
#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn TimeSeriesStore>,
    anomaly_cap: usize,
    window_secs: i64,
}

impl QueryService {
    pub fn new(store: Arc<dyn TimeSeriesStore>, config: &QueryConfig) -> Self {
        Self {
            store,
            anomaly_cap: config.anomaly_cap.max(1),
            window_secs: i64::try_from(config.average_window_secs).unwrap_or(i64::MAX),
        }
    }

    /// Up to `n` samples, newest first. Fewer (or none) is not an error.
    pub async fn recent_samples(&self, n: usize) -> Result<Vec<Sample>, QueryError> {
        if n == 0 {
            return Ok(Vec::new());
        }
        Ok(self.store.latest(n).await?)
    }

    /// Every anomaly-flagged sample up to the configured cap.
    pub async fn all_anomalies(&self) -> Result<AnomalyListing, QueryError> {
        let mut samples = self.store.anomalies(self.anomaly_cap.saturating_add(1)).await?;
        let truncated = samples.len() > self.anomaly_cap;
        if truncated {
            samples.truncate(self.anomaly_cap);
            tracing::warn!(cap = self.anomaly_cap, "anomaly listing truncated");
        }
        Ok(AnomalyListing { samples, truncated })
    }

    /// Mean `cpu_usage` over `window_start..=window_end`; `None` for an empty window.
    pub async fn average_usage(
        &self,
        window_start: i64,
        window_end: i64,
    ) -> Result<Option<f64>, QueryError> {
        if window_start > window_end {
            return Ok(None);
        }
        Ok(self.store.average_usage(window_start, window_end).await?)
    }

    /// The trailing averaging window ending now.
    pub fn last_window(&self) -> (i64, i64) {
        let end = chrono::Utc::now().timestamp();
        (end.saturating_sub(self.window_secs), end)
    }

    pub async fn average_usage_last_minute(&self) -> Result<Option<f64>, QueryError> {
        let (start, end) = self.last_window();
        self.average_usage(start, end).await
    }

    pub async fn report(&self) -> Result<Report, QueryError> {
        let recent = self.recent_samples(REPORT_RECENT).await?;
        let anomalies = self.all_anomalies().await?;
        let (window_start, window_end) = self.last_window();
        let average_usage = self.average_usage(window_start, window_end).await?;
        Ok(Report {
            recent,
            anomalies,
            window_start,
            window_end,
            average_usage,
        })
    }
}
