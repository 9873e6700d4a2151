use crate::config::GeneratorConfig;
use crate::telemetry::sample::Sample;
use crate::telemetry::store::{StoreError, TimeSeriesStore};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Which regime the simulated host is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Normal,
    Anomaly,
}

/// Outcome of advancing the burst schedule by one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub mode: Mode,
    pub burst_started: bool,
}

/// Fixed-length burst policy.
///
/// While normal, every tick draws once and starts a burst when the draw is
/// below `probability`. A burst always lasts `burst_len` ticks, including the
/// tick that started it, and never re-draws.
#[derive(Debug, Clone)]
pub struct BurstSchedule {
    probability: f64,
    burst_len: u32,
    remaining: u32,
}

impl BurstSchedule {
    pub fn new(probability: f64, burst_len: u32) -> Self {
        Self {
            probability,
            burst_len: burst_len.max(1),
            remaining: 0,
        }
    }

    /// Mode the next tick would be in without a new burst starting.
    pub fn mode(&self) -> Mode {
        if self.remaining > 0 {
            Mode::Anomaly
        } else {
            Mode::Normal
        }
    }

    /// Decide the mode for this tick. `draw` is only called in normal mode.
    pub fn advance(&mut self, draw: impl FnOnce() -> f64) -> Step {
        if self.remaining > 0 {
            self.remaining -= 1;
            return Step {
                mode: Mode::Anomaly,
                burst_started: false,
            };
        }
        if draw() < self.probability {
            self.remaining = self.burst_len - 1;
            Step {
                mode: Mode::Anomaly,
                burst_started: true,
            }
        } else {
            Step {
                mode: Mode::Normal,
                burst_started: false,
            }
        }
    }
}

/// `base` perturbed by a uniform draw within `±delta_percent` of itself.
pub fn jittered_usage<R: Rng>(rng: &mut R, base: f64, delta_percent: f64) -> f64 {
    let variation = rng.random_range(-delta_percent..=delta_percent);
    base + base * variation / 100.0
}

/// Counters reported when the generator stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GeneratorStats {
    pub ticks: u64,
    pub written: u64,
    pub failed: u64,
    pub bursts: u64,
}

/// Synthetic CPU telemetry source writing one sample per tick.
pub struct Generator {
    store: Arc<dyn TimeSeriesStore>,
    config: GeneratorConfig,
    tick_interval: Duration,
    schedule: BurstSchedule,
    rng: StdRng,
    stats: GeneratorStats,
}

impl Generator {
    pub fn new(store: Arc<dyn TimeSeriesStore>, mut config: GeneratorConfig) -> Self {
        // The jitter range is `-delta..=delta`; it must be finite and ordered.
        config.delta_percent = if config.delta_percent.is_finite() {
            config.delta_percent.abs()
        } else {
            0.0
        };
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            store,
            tick_interval: config.tick_interval(),
            schedule: BurstSchedule::new(config.anomaly_probability, config.anomaly_duration_ticks),
            config,
            rng,
            stats: GeneratorStats::default(),
        }
    }

    /// Override the tick cadence (sub-second intervals are allowed here).
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn stats(&self) -> GeneratorStats {
        self.stats
    }

    /// Advance the burst state and build the sample for `timestamp`.
    pub fn next_sample(&mut self, timestamp: i64) -> Sample {
        let rng = &mut self.rng;
        let step = self.schedule.advance(|| rng.random::<f64>());
        if step.burst_started {
            self.stats.bursts += 1;
            tracing::warn!(
                ticks = self.config.anomaly_duration_ticks,
                "anomaly burst started"
            );
        }
        let base = match step.mode {
            Mode::Normal => self.config.cpu_base,
            Mode::Anomaly => self.config.cpu_anomaly,
        };
        let usage = jittered_usage(&mut self.rng, base, self.config.delta_percent);
        Sample::new(timestamp, usage, step.mode == Mode::Anomaly)
    }

    /// Generate the sample for the current second and write it.
    pub async fn tick(&mut self) -> Result<Sample, StoreError> {
        let sample = self.next_sample(chrono::Utc::now().timestamp());
        self.stats.ticks += 1;
        match self.store.upsert(&sample).await {
            Ok(()) => {
                self.stats.written += 1;
                tracing::debug!(
                    timestamp = sample.timestamp,
                    cpu_usage = sample.cpu_usage,
                    anomaly = sample.anomaly,
                    "sample written"
                );
                Ok(sample)
            }
            Err(e) => {
                self.stats.failed += 1;
                Err(e)
            }
        }
    }

    /// Reset the series, retrying while the store is unreachable.
    ///
    /// Returns `Ok(false)` when cancelled before the reset went through.
    async fn prepare_series(&self, cancel: &CancellationToken) -> Result<bool, StoreError> {
        loop {
            match self.store.reset_series().await {
                Ok(()) => {
                    tracing::info!(
                        store = self.store.name(),
                        series = self.store.series(),
                        "series reset"
                    );
                    return Ok(true);
                }
                Err(e) if e.is_unavailable() => {
                    tracing::warn!("series reset failed, retrying: {e}");
                }
                Err(e) => return Err(e),
            }
            tokio::select! {
                _ = cancel.cancelled() => return Ok(false),
                _ = tokio::time::sleep(self.tick_interval) => {}
            }
        }
    }

    /// Run until `cancel` fires: reset the series, then write one sample per
    /// tick. Failed writes are logged and the next tick proceeds.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<GeneratorStats, StoreError> {
        let delay = self.config.startup_delay();
        if !delay.is_zero() {
            tracing::info!(secs = delay.as_secs(), "waiting before first write");
            tokio::select! {
                _ = cancel.cancelled() => return Ok(self.stats),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        match self.prepare_series(&cancel).await {
            Ok(true) => {}
            Ok(false) => return Ok(self.stats),
            Err(e) => {
                tracing::error!(
                    store = self.store.name(),
                    series = self.store.series(),
                    "cannot prepare series: {e}"
                );
                return Err(e);
            }
        }

        tracing::info!(
            interval_ms = self.tick_interval.as_millis() as u64,
            probability = self.config.anomaly_probability,
            "generator started"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }
            if let Err(e) = self.tick().await {
                tracing::warn!("dropping sample: {e}");
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.tick_interval) => {}
            }
        }

        tracing::info!(
            ticks = self.stats.ticks,
            written = self.stats.written,
            failed = self.stats.failed,
            bursts = self.stats.bursts,
            "generator stopped"
        );
        Ok(self.stats)
    }
}
