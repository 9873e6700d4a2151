use crate::telemetry::sample::Sample;
use async_trait::async_trait;

/// Failures reported by a time-series store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Connection, authentication or server-side failure.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    /// The store answered, but not with the shape we expect.
    #[error("malformed store response: {0}")]
    MalformedResponse(String),
    /// Creating the series clashed with an existing, incompatible one.
    #[error("series schema conflict: {0}")]
    SchemaConflict(String),
}

impl StoreError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

/// A named series of [`Sample`]s keyed by timestamp.
///
/// One handle is opened at startup and shared by the generator and the
/// query service; dropping the last handle releases the connection.
#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    /// Backend name, for logs.
    fn name(&self) -> &str;

    /// Series this handle reads and writes.
    fn series(&self) -> &str;

    /// Drop the series if present and recreate it empty with the fixed schema.
    async fn reset_series(&self) -> Result<(), StoreError>;

    /// Insert the sample, replacing any sample with the same timestamp.
    async fn upsert(&self, sample: &Sample) -> Result<(), StoreError>;

    /// Up to `limit` samples, newest first.
    async fn latest(&self, limit: usize) -> Result<Vec<Sample>, StoreError>;

    /// Up to `limit` anomaly-flagged samples in store order.
    async fn anomalies(&self, limit: usize) -> Result<Vec<Sample>, StoreError>;

    /// Mean `cpu_usage` over `start..=end`, or `None` when no sample falls in it.
    async fn average_usage(&self, start: i64, end: i64) -> Result<Option<f64>, StoreError>;
}
