//! Repeating timer seam used by the progress accumulator.
//!
//! Ticks are delivered as messages instead of closures: the timer only
//! schedules, and whoever owns the accumulator feeds received [`TimerTick`]s
//! back into it. Each schedule change bumps the timer's epoch so that ticks
//! already sitting in the channel can be recognised as stale.

use std::time::Duration;

#[cfg(test)]
use mockall::automock;
use tokio::{
    runtime::Handle,
    sync::mpsc,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tracing::trace;

use crate::error::{NetqError, NetqResult};

/// A single timer firing, tagged with the schedule it belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimerTick {
    pub epoch: u64,
}

/// Repeating timer driven by an external scheduler.
#[cfg_attr(test, automock)]
pub trait Timer {
    /// (Re)start firing every `interval`, first tick one interval from now.
    fn tick_every(&mut self, interval: Duration);

    /// Produce a tick for the current schedule right away.
    fn tick_now(&mut self) -> TimerTick;

    /// Stop firing. Ticks scheduled earlier become stale.
    fn stop(&mut self);

    /// Epoch of the current schedule.
    fn epoch(&self) -> u64;
}

/// [`Timer`] backed by a tokio interval task.
pub struct TokioTimer {
    runtime: Handle,
    tick_tx: mpsc::UnboundedSender<TimerTick>,
    task: Option<JoinHandle<()>>,
    epoch: u64,
}

impl TokioTimer {
    const MIN_INTERVAL: Duration = Duration::from_millis(1);

    /// Create a timer that sends its ticks to `tick_tx`.
    ///
    /// # Errors
    ///
    /// Returns [`NetqError::NoRuntime`] when called outside a tokio runtime.
    pub fn new(tick_tx: mpsc::UnboundedSender<TimerTick>) -> NetqResult<Self> {
        let runtime = Handle::try_current().map_err(|_| NetqError::NoRuntime)?;
        Ok(Self {
            runtime,
            tick_tx,
            task: None,
            epoch: 0,
        })
    }

    pub fn is_active(&self) -> bool {
        self.task.is_some()
    }

    fn abort_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Timer for TokioTimer {
    fn tick_every(&mut self, interval: Duration) {
        self.abort_task();
        self.epoch = self.epoch.wrapping_add(1);

        let interval = interval.max(Self::MIN_INTERVAL);
        let epoch = self.epoch;
        let tick_tx = self.tick_tx.clone();
        trace!(epoch, ?interval, "TokioTimer: scheduled");

        self.task = Some(self.runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if tick_tx.send(TimerTick { epoch }).is_err() {
                    break;
                }
            }
        }));
    }

    fn tick_now(&mut self) -> TimerTick {
        TimerTick { epoch: self.epoch }
    }

    fn stop(&mut self) {
        self.abort_task();
        self.epoch = self.epoch.wrapping_add(1);
        trace!(epoch = self.epoch, "TokioTimer: stopped");
    }

    fn epoch(&self) -> u64 {
        self.epoch
    }
}

impl Drop for TokioTimer {
    fn drop(&mut self) {
        self.abort_task();
    }
}

impl std::fmt::Debug for TokioTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioTimer")
            .field("epoch", &self.epoch)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_outside_runtime_fails() {
        let (tx, _rx) = mpsc::unbounded_channel();
        assert_eq!(TokioTimer::new(tx).unwrap_err(), NetqError::NoRuntime);
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_after_one_interval() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = TokioTimer::new(tx).unwrap();
        timer.tick_every(Duration::from_secs(3));
        let start = Instant::now();

        let tick = rx.recv().await.unwrap();
        assert_eq!(tick.epoch, timer.epoch());
        assert_eq!(start.elapsed(), Duration::from_secs(3));

        rx.recv().await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn reschedule_bumps_epoch() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = TokioTimer::new(tx).unwrap();
        timer.tick_every(Duration::from_secs(3));
        let first_epoch = timer.epoch();
        timer.tick_every(Duration::from_secs(1));
        assert_ne!(timer.epoch(), first_epoch);

        let tick = rx.recv().await.unwrap();
        assert_eq!(tick.epoch, timer.epoch());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_silences_timer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = TokioTimer::new(tx).unwrap();
        timer.tick_every(Duration::from_secs(1));
        assert!(timer.is_active());
        timer.stop();
        assert!(!timer.is_active());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn tick_now_uses_current_epoch() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut timer = TokioTimer::new(tx).unwrap();
        timer.tick_every(Duration::from_secs(10));
        let tick = timer.tick_now();
        assert_eq!(tick.epoch, timer.epoch());
        timer.stop();
        assert_ne!(tick.epoch, timer.epoch());
    }
}
