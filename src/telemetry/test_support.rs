//! Store doubles shared by the generator and query tests.

use crate::telemetry::sample::Sample;
use crate::telemetry::store::{StoreError, TimeSeriesStore};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

/// Keeps every write in memory and can be told to fail.
#[derive(Default)]
pub struct RecordingStore {
    pub written: Mutex<Vec<Sample>>,
    pub resets: AtomicU32,
    /// Number of leading `reset_series` calls that report the store down.
    pub reset_outages: AtomicU32,
    pub reset_conflict: bool,
    pub fail_writes: bool,
    pub fail_reads: Option<fn() -> StoreError>,
}

impl RecordingStore {
    pub fn samples(&self) -> Vec<Sample> {
        self.written.lock().clone()
    }

    fn read_guard(&self) -> Result<(), StoreError> {
        match self.fail_reads {
            Some(make) => Err(make()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl TimeSeriesStore for RecordingStore {
    fn name(&self) -> &str {
        "recording"
    }

    fn series(&self) -> &str {
        "test-series"
    }

    async fn reset_series(&self) -> Result<(), StoreError> {
        self.resets.fetch_add(1, Ordering::Relaxed);
        if self.reset_conflict {
            return Err(StoreError::SchemaConflict("index exists".into()));
        }
        let outages = self.reset_outages.load(Ordering::Relaxed);
        if outages > 0 {
            self.reset_outages.store(outages - 1, Ordering::Relaxed);
            return Err(StoreError::StoreUnavailable("connection refused".into()));
        }
        self.written.lock().clear();
        Ok(())
    }

    async fn upsert(&self, sample: &Sample) -> Result<(), StoreError> {
        if self.fail_writes {
            return Err(StoreError::StoreUnavailable("connection refused".into()));
        }
        self.written.lock().push(sample.clone());
        Ok(())
    }

    async fn latest(&self, limit: usize) -> Result<Vec<Sample>, StoreError> {
        self.read_guard()?;
        let mut samples = self.samples();
        samples.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        samples.truncate(limit);
        Ok(samples)
    }

    async fn anomalies(&self, limit: usize) -> Result<Vec<Sample>, StoreError> {
        self.read_guard()?;
        Ok(self
            .samples()
            .into_iter()
            .filter(|s| s.anomaly)
            .take(limit)
            .collect())
    }

    async fn average_usage(&self, start: i64, end: i64) -> Result<Option<f64>, StoreError> {
        self.read_guard()?;
        let window: Vec<f64> = self
            .samples()
            .iter()
            .filter(|s| (start..=end).contains(&s.timestamp))
            .map(|s| s.cpu_usage)
            .collect();
        if window.is_empty() {
            return Ok(None);
        }
        Ok(Some(window.iter().sum::<f64>() / window.len() as f64))
    }
}
