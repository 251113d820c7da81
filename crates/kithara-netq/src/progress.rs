use std::time::Duration;

use tracing::{debug, trace, warn};
use web_time::Instant;

use crate::{
    ProgressSample, SwitchPolicy,
    timer::{Timer, TimerTick},
};

/// Turns irregular byte-progress events from overlapping requests into
/// periodic throughput samples.
///
/// The timer runs exactly while at least one request is in flight. When the
/// last request ends, whatever has accumulated is flushed immediately so no
/// trailing bytes are lost between ticks.
pub struct ProgressAccumulator<T: Timer> {
    timer: T,
    interval: Duration,
    switch_policy: SwitchPolicy,
    accumulated_bytes: u64,
    allow_switch: bool,
    /// Aggregated `allow_switch` over the current flush window.
    window_allow_switch: Option<bool>,
    active_requests: usize,
    last_flush_at: Instant,
    destroyed: bool,
}

impl<T: Timer> ProgressAccumulator<T> {
    const DEFAULT_INTERVAL: Duration = Duration::from_secs(3);

    pub fn new(timer: T, now: Instant) -> Self {
        Self {
            timer,
            interval: Self::DEFAULT_INTERVAL,
            switch_policy: SwitchPolicy::default(),
            accumulated_bytes: 0,
            allow_switch: false,
            window_allow_switch: None,
            active_requests: 0,
            last_flush_at: now,
            destroyed: false,
        }
    }

    /// Set the flush interval. Reschedules the running timer, keeping bytes
    /// accumulated so far.
    pub fn configure(&mut self, interval: Duration) {
        self.interval = interval;
        if self.active_requests > 0 && !self.destroyed {
            debug!(
                ?interval,
                active_requests = self.active_requests,
                accumulated_bytes = self.accumulated_bytes,
                "progress: rescheduling flush timer"
            );
            self.timer.tick_every(interval);
        }
    }

    /// Change the aggregation rule. The current window restarts only when
    /// the rule actually changes.
    pub fn set_switch_policy(&mut self, policy: SwitchPolicy) {
        if self.switch_policy != policy {
            self.switch_policy = policy;
            self.window_allow_switch = None;
        }
    }

    /// A request started producing progress.
    pub fn response_start(&mut self, now: Instant) {
        if self.destroyed {
            trace!("progress: response_start after destroy ignored");
            return;
        }
        self.active_requests += 1;
        if self.active_requests != 1 {
            return;
        }
        debug!(interval = ?self.interval, "progress: first request active, starting timer");
        self.last_flush_at = now;
        self.timer.tick_every(self.interval);
    }

    /// Record `bytes` received by any in-flight request.
    pub fn handle_progress(&mut self, bytes: u64, allow_switch: bool) {
        self.accumulated_bytes = self.accumulated_bytes.saturating_add(bytes);
        self.allow_switch = allow_switch;
        self.window_allow_switch = match self.switch_policy {
            SwitchPolicy::LastWriter => None,
            SwitchPolicy::All => Some(self.window_allow_switch.unwrap_or(true) && allow_switch),
            SwitchPolicy::Any => Some(self.window_allow_switch.unwrap_or(false) || allow_switch),
        };
    }

    /// A request finished (successfully or not).
    ///
    /// Returns the final sample when this was the last active request and
    /// bytes were pending.
    pub fn request_ended(&mut self, now: Instant) -> Option<ProgressSample> {
        if self.destroyed {
            trace!("progress: request_ended after destroy ignored");
            return None;
        }
        let Some(remaining) = self.active_requests.checked_sub(1) else {
            warn!("progress: request_ended without matching response_start");
            return None;
        };
        self.active_requests = remaining;
        if remaining != 0 {
            return None;
        }

        let tick = self.timer.tick_now();
        let sample = self.on_tick(tick, now);
        self.timer.stop();
        debug!(flushed = sample.is_some(), "progress: last request ended, timer stopped");
        sample
    }

    /// Handle a timer firing. Empty windows and stale ticks produce nothing.
    pub fn on_tick(&mut self, tick: TimerTick, now: Instant) -> Option<ProgressSample> {
        if tick.epoch != self.timer.epoch() {
            trace!(
                tick_epoch = tick.epoch,
                current_epoch = self.timer.epoch(),
                "progress: stale tick dropped"
            );
            return None;
        }
        if self.accumulated_bytes == 0 {
            return None;
        }

        let sample = ProgressSample {
            elapsed: now.saturating_duration_since(self.last_flush_at),
            bytes: self.accumulated_bytes,
            allow_switch: self.window_allow_switch.unwrap_or(self.allow_switch),
        };
        self.accumulated_bytes = 0;
        self.window_allow_switch = None;
        self.last_flush_at = now;

        trace!(
            bytes = sample.bytes,
            elapsed_ms = sample.elapsed_ms(),
            allow_switch = sample.allow_switch,
            "progress: flushed"
        );
        Some(sample)
    }

    /// Stop the timer for good. Later lifecycle calls are ignored.
    pub fn destroy(&mut self) {
        self.timer.stop();
        self.destroyed = true;
    }

    pub fn accumulated_bytes(&self) -> u64 {
        self.accumulated_bytes
    }

    pub fn active_requests(&self) -> usize {
        self.active_requests
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}
