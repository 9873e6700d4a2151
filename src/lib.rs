//! Synthetic CPU telemetry: a generator that writes one sample per tick,
//! with occasional fixed-length anomaly bursts, into a time-series store,
//! and a query service for recent samples, anomalies and windowed averages.

pub mod config;
pub mod telemetry;

pub use config::Config;
pub use telemetry::{open_store, Generator, QueryService, Sample, TimeSeriesStore};
