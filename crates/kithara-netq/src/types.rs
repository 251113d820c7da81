use std::time::Duration;

use crate::error::{NetqError, NetqResult};

/// How the `allow_switch` hints of concurrent requests are combined into the
/// single flag carried by a [`ProgressSample`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SwitchPolicy {
    /// The most recent progress event decides, regardless of which request
    /// produced it. The flag persists across flushes.
    #[default]
    LastWriter,
    /// Switching is allowed only if every progress event in the flush window
    /// allowed it.
    All,
    /// Switching is allowed if any progress event in the flush window
    /// allowed it.
    Any,
}

/// Network-quality estimation configuration.
#[derive(Clone, Debug)]
pub struct NetqOptions {
    /// Requests that must be sampled before the TTFB estimate is trusted.
    pub min_total_requests: u32,
    /// Half-life (seconds of sample weight) of the fast TTFB average.
    pub fast_half_life_secs: f64,
    /// Half-life (seconds of sample weight) of the slow TTFB average.
    pub slow_half_life_secs: f64,
    /// Interval between throughput flushes while requests are in flight.
    pub flush_interval: Duration,
    /// Half-life of the fast bandwidth average.
    pub bandwidth_fast_half_life_secs: f64,
    /// Half-life of the slow bandwidth average.
    pub bandwidth_slow_half_life_secs: f64,
    /// Bytes that must be sampled before the bandwidth estimate is trusted.
    pub min_total_bytes: u64,
    /// Throughput samples smaller than this are too noisy and are dropped.
    pub min_chunk_bytes: u64,
    /// Aggregation rule for `allow_switch` hints.
    pub switch_policy: SwitchPolicy,
    /// Capacity of the events broadcast channel.
    pub events_channel_capacity: usize,
}

impl Default for NetqOptions {
    fn default() -> Self {
        Self {
            min_total_requests: 4,
            fast_half_life_secs: 2.0,
            slow_half_life_secs: 5.0,
            flush_interval: Duration::from_secs(3),
            bandwidth_fast_half_life_secs: 2.0,
            bandwidth_slow_half_life_secs: 5.0,
            min_total_bytes: 128_000,
            min_chunk_bytes: 16_000,
            switch_policy: SwitchPolicy::default(),
            events_channel_capacity: 32,
        }
    }
}

impl NetqOptions {
    /// Check every value against its documented range.
    ///
    /// # Errors
    ///
    /// Returns the first rejected field as a [`NetqError`].
    pub fn validate(&self) -> NetqResult<()> {
        if self.min_total_requests == 0 {
            return Err(NetqError::InvalidMinTotalRequests);
        }
        for (name, value) in [
            ("fast_half_life_secs", self.fast_half_life_secs),
            ("slow_half_life_secs", self.slow_half_life_secs),
            (
                "bandwidth_fast_half_life_secs",
                self.bandwidth_fast_half_life_secs,
            ),
            (
                "bandwidth_slow_half_life_secs",
                self.bandwidth_slow_half_life_secs,
            ),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(NetqError::invalid_half_life(name, value));
            }
        }
        if self.flush_interval.is_zero() {
            return Err(NetqError::InvalidFlushInterval(self.flush_interval));
        }
        Ok(())
    }
}

/// One aggregated throughput observation emitted by the progress accumulator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProgressSample {
    /// Wall-clock time since the previous flush (or since the first request
    /// of the current busy period started).
    pub elapsed: Duration,
    /// Bytes received during `elapsed`.
    pub bytes: u64,
    /// Whether the requests in flight allow a variant switch.
    pub allow_switch: bool,
}

impl ProgressSample {
    /// Elapsed time in fractional milliseconds.
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed.as_secs_f64() * 1000.0
    }
}

/// Snapshot of the current estimates, published after every change.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct NetworkQuality {
    /// Trusted TTFB estimate in milliseconds, `None` below the request threshold.
    pub ttfb_ms: Option<f64>,
    /// Trusted bandwidth estimate in bits per second, `None` below the byte threshold.
    pub bandwidth_bps: Option<f64>,
    pub requests_sampled: u64,
    pub bytes_sampled: u64,
    pub active_requests: usize,
}
