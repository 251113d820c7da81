use std::time::Duration;

use crate::{NetqOptions, ProgressSample, ewma::Ewma};

/// Bandwidth estimator fed by aggregated throughput samples.
///
/// Mirrors [`TtfbEstimator`](crate::TtfbEstimator) with the opposite blend:
/// the minimum of the fast and slow averages is reported, so a drop in
/// bandwidth is adopted quickly and a rise only once it has lasted.
#[derive(Clone, Debug)]
pub struct BandwidthEstimator {
    fast_ewma: Ewma,
    slow_ewma: Ewma,
    bytes_sampled: u64,
    min_total_bytes: u64,
    min_chunk_bytes: u64,
}

impl BandwidthEstimator {
    const FAST_HALF_LIFE_SECS: f64 = 2.0;
    const SLOW_HALF_LIFE_SECS: f64 = 5.0;
    const MIN_TOTAL_BYTES: u64 = 128_000;
    const MIN_CHUNK_BYTES: u64 = 16_000;
    const MIN_DURATION_MS: f64 = 0.5;

    #[must_use]
    pub fn new() -> Self {
        Self {
            fast_ewma: Ewma::new(Self::FAST_HALF_LIFE_SECS),
            slow_ewma: Ewma::new(Self::SLOW_HALF_LIFE_SECS),
            bytes_sampled: 0,
            min_total_bytes: Self::MIN_TOTAL_BYTES,
            min_chunk_bytes: Self::MIN_CHUNK_BYTES,
        }
    }

    pub fn configure(&mut self, cfg: &NetqOptions) {
        self.min_total_bytes = cfg.min_total_bytes;
        self.min_chunk_bytes = cfg.min_chunk_bytes;
        self.fast_ewma.update_alpha(cfg.bandwidth_fast_half_life_secs);
        self.slow_ewma.update_alpha(cfg.bandwidth_slow_half_life_secs);
    }

    /// Record `bytes` received over `duration`.
    ///
    /// Returns `false` if the sample was too small to be meaningful.
    #[expect(clippy::cast_precision_loss)] // byte counts stay far below 2^52
    pub fn sample(&mut self, duration: Duration, bytes: u64) -> bool {
        if bytes < self.min_chunk_bytes {
            return false;
        }

        let dur_ms = (duration.as_secs_f64() * 1000.0).max(Self::MIN_DURATION_MS);
        let bps = (bytes as f64) * 8000.0 / dur_ms;
        let weight_secs = dur_ms / 1000.0;

        self.fast_ewma.sample(weight_secs, bps);
        self.slow_ewma.sample(weight_secs, bps);
        self.bytes_sampled = self.bytes_sampled.saturating_add(bytes);
        true
    }

    /// Feed one flush of the progress accumulator.
    pub fn sample_progress(&mut self, sample: &ProgressSample) -> bool {
        self.sample(sample.elapsed, sample.bytes)
    }

    /// Current estimate in bits per second, or `default_bps` until enough
    /// bytes were sampled.
    pub fn get_bandwidth_estimate(&self, default_bps: f64) -> f64 {
        self.estimate_bps().unwrap_or(default_bps)
    }

    pub fn estimate_bps(&self) -> Option<f64> {
        self.has_good_estimate().then(|| {
            self.fast_ewma
                .get_estimate()
                .min(self.slow_ewma.get_estimate())
        })
    }

    pub fn has_good_estimate(&self) -> bool {
        self.bytes_sampled >= self.min_total_bytes
    }

    pub fn bytes_sampled(&self) -> u64 {
        self.bytes_sampled
    }
}

impl Default for BandwidthEstimator {
    fn default() -> Self {
        Self::new()
    }
}
