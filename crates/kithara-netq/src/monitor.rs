//! Session-owned driver that wires the estimators to the transport.
//!
//! All mutation happens on one tokio task: transport signals arrive as
//! commands, timer ticks arrive on their own channel, and the task applies
//! both strictly one at a time. A flush therefore never interleaves with
//! progress accumulation.

use std::{sync::Arc, time::Duration};

use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::{
    BandwidthEstimator, NetqEvent, NetqOptions, NetworkQuality, ProgressAccumulator,
    ProgressSample, TtfbEstimator,
    error::{NetqError, NetqResult},
    timer::{TimerTick, TokioTimer},
};

/// Transport signals accepted by the monitor.
#[derive(Debug)]
enum MonitorCommand {
    ResponseStarted,
    Progress { bytes: u64, allow_switch: bool },
    RequestEnded,
    Ttfb(Duration),
    Configure(NetqOptions),
}

/// Current time on the tokio clock, so paused-clock tests see elapsed values
/// consistent with the timer.
fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}

/// Background task owning one TTFB estimator, one bandwidth estimator and one
/// progress accumulator.
pub struct NetworkMonitor {
    ttfb: TtfbEstimator,
    bandwidth: BandwidthEstimator,
    progress: ProgressAccumulator<TokioTimer>,
    cmd_rx: mpsc::UnboundedReceiver<MonitorCommand>,
    tick_rx: mpsc::UnboundedReceiver<TimerTick>,
    quality: Arc<RwLock<NetworkQuality>>,
    events_tx: broadcast::Sender<NetqEvent>,
    cancel: CancellationToken,
}

impl NetworkMonitor {
    /// Validate `options` and spawn the monitor on the current tokio runtime.
    ///
    /// Cancelling `cancel` (or calling [`MonitorHandle::shutdown`]) stops the
    /// monitor; shutting down through the handle never cancels the parent
    /// token.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for invalid options, or
    /// [`NetqError::NoRuntime`] outside a tokio runtime.
    pub fn spawn(
        options: NetqOptions,
        cancel: Option<CancellationToken>,
    ) -> NetqResult<MonitorHandle> {
        options.validate()?;

        let (tick_tx, tick_rx) = mpsc::unbounded_channel();
        let timer = TokioTimer::new(tick_tx)?;
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(options.events_channel_capacity.max(1));
        let cancel = cancel.map_or_else(CancellationToken::new, |c| c.child_token());
        let quality = Arc::new(RwLock::new(NetworkQuality::default()));

        let mut monitor = Self {
            ttfb: TtfbEstimator::new(),
            bandwidth: BandwidthEstimator::new(),
            progress: ProgressAccumulator::new(timer, now()),
            cmd_rx,
            tick_rx,
            quality: Arc::clone(&quality),
            events_tx: events_tx.clone(),
            cancel: cancel.clone(),
        };
        monitor.apply_options(&options);

        tokio::spawn(monitor.run());
        debug!(?options, "NetworkMonitor spawned");

        Ok(MonitorHandle {
            cmd_tx,
            quality,
            events_tx,
            cancel,
        })
    }

    fn apply_options(&mut self, options: &NetqOptions) {
        self.ttfb.configure(options);
        self.bandwidth.configure(options);
        self.progress.set_switch_policy(options.switch_policy);
        self.progress.configure(options.flush_interval);
    }

    async fn run(mut self) {
        trace!("NetworkMonitor started");

        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => break,

                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },

                Some(tick) = self.tick_rx.recv() => {
                    if let Some(sample) = self.progress.on_tick(tick, now()) {
                        self.record_throughput(sample);
                    }
                }
            }
        }

        self.progress.destroy();
        self.publish_quality();
        let _ = self.events_tx.send(NetqEvent::Stopped);
        trace!("NetworkMonitor stopped");
    }

    fn handle_command(&mut self, cmd: MonitorCommand) {
        match cmd {
            MonitorCommand::ResponseStarted => {
                self.progress.response_start(now());
                self.publish_quality();
            }
            MonitorCommand::Progress {
                bytes,
                allow_switch,
            } => self.progress.handle_progress(bytes, allow_switch),
            MonitorCommand::RequestEnded => {
                if let Some(sample) = self.progress.request_ended(now()) {
                    self.record_throughput(sample);
                } else {
                    self.publish_quality();
                }
            }
            MonitorCommand::Ttfb(duration) => {
                let ttfb_ms = duration.as_secs_f64() * 1000.0;
                self.ttfb.sample(ttfb_ms);
                let quality = self.publish_quality();
                debug!(
                    ttfb_ms,
                    estimate_ms = quality.ttfb_ms,
                    requests_sampled = quality.requests_sampled,
                    "NetworkMonitor: TTFB sampled"
                );
                let _ = self
                    .events_tx
                    .send(NetqEvent::TtfbSampled { ttfb_ms, quality });
            }
            MonitorCommand::Configure(options) => {
                self.apply_options(&options);
                self.publish_quality();
                let _ = self.events_tx.send(NetqEvent::Reconfigured);
            }
        }
    }

    fn record_throughput(&mut self, sample: ProgressSample) {
        let accepted = self.bandwidth.sample_progress(&sample);
        let quality = self.publish_quality();
        debug!(
            bytes = sample.bytes,
            elapsed_ms = sample.elapsed_ms(),
            allow_switch = sample.allow_switch,
            accepted,
            estimate_bps = quality.bandwidth_bps,
            "NetworkMonitor: throughput sample"
        );
        let _ = self.events_tx.send(NetqEvent::Throughput {
            sample,
            accepted,
            quality,
        });
    }

    fn publish_quality(&self) -> NetworkQuality {
        let quality = NetworkQuality {
            ttfb_ms: self.ttfb.estimate_ms(),
            bandwidth_bps: self.bandwidth.estimate_bps(),
            requests_sampled: self.ttfb.requests_sampled(),
            bytes_sampled: self.bandwidth.bytes_sampled(),
            active_requests: self.progress.active_requests(),
        };
        *self.quality.write() = quality;
        quality
    }
}

/// Cloneable handle used by the transport and the bitrate policy.
#[derive(Clone, Debug)]
pub struct MonitorHandle {
    cmd_tx: mpsc::UnboundedSender<MonitorCommand>,
    quality: Arc<RwLock<NetworkQuality>>,
    events_tx: broadcast::Sender<NetqEvent>,
    cancel: CancellationToken,
}

impl MonitorHandle {
    fn send(&self, cmd: MonitorCommand) -> NetqResult<()> {
        self.cmd_tx.send(cmd).map_err(|_| NetqError::ChannelClosed)
    }

    /// A request started producing a response.
    ///
    /// # Errors
    ///
    /// Returns [`NetqError::ChannelClosed`] once the monitor has stopped.
    pub fn response_started(&self) -> NetqResult<()> {
        self.send(MonitorCommand::ResponseStarted)
    }

    /// `bytes` arrived for some in-flight request.
    ///
    /// # Errors
    ///
    /// Returns [`NetqError::ChannelClosed`] once the monitor has stopped.
    pub fn progress(&self, bytes: u64, allow_switch: bool) -> NetqResult<()> {
        self.send(MonitorCommand::Progress {
            bytes,
            allow_switch,
        })
    }

    /// A request completed or failed.
    ///
    /// # Errors
    ///
    /// Returns [`NetqError::ChannelClosed`] once the monitor has stopped.
    pub fn request_ended(&self) -> NetqResult<()> {
        self.send(MonitorCommand::RequestEnded)
    }

    /// Record the measured time to first byte of a request.
    ///
    /// # Errors
    ///
    /// Returns [`NetqError::ChannelClosed`] once the monitor has stopped.
    pub fn sample_ttfb(&self, ttfb: Duration) -> NetqResult<()> {
        self.send(MonitorCommand::Ttfb(ttfb))
    }

    /// Apply new options. Invalid options are rejected before reaching the
    /// monitor.
    ///
    /// # Errors
    ///
    /// Returns a configuration error, or [`NetqError::ChannelClosed`] once the
    /// monitor has stopped.
    pub fn configure(&self, options: NetqOptions) -> NetqResult<()> {
        options.validate()?;
        self.send(MonitorCommand::Configure(options))
    }

    /// TTFB estimate in milliseconds, or `default_ms` until enough requests
    /// were sampled.
    pub fn ttfb_estimate_ms(&self, default_ms: f64) -> f64 {
        self.quality.read().ttfb_ms.unwrap_or(default_ms)
    }

    pub fn has_good_ttfb_estimate(&self) -> bool {
        self.quality.read().ttfb_ms.is_some()
    }

    /// Bandwidth estimate in bits per second, or `default_bps` until enough
    /// bytes were sampled.
    pub fn bandwidth_estimate_bps(&self, default_bps: f64) -> f64 {
        self.quality.read().bandwidth_bps.unwrap_or(default_bps)
    }

    pub fn has_good_bandwidth_estimate(&self) -> bool {
        self.quality.read().bandwidth_bps.is_some()
    }

    /// Latest published snapshot.
    pub fn quality(&self) -> NetworkQuality {
        *self.quality.read()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<NetqEvent> {
        self.events_tx.subscribe()
    }

    /// Stop the monitor. Pending commands are dropped and the timer is
    /// stopped for good.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled() || self.cmd_tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn next_throughput(rx: &mut broadcast::Receiver<NetqEvent>) -> ProgressSample {
        loop {
            match rx.recv().await.unwrap() {
                NetqEvent::Throughput { sample, .. } => return sample,
                NetqEvent::Stopped => panic!("monitor stopped before flushing"),
                _ => {}
            }
        }
    }

    async fn wait_stopped(rx: &mut broadcast::Receiver<NetqEvent>) {
        while !matches!(rx.recv().await.unwrap(), NetqEvent::Stopped) {}
    }

    #[test]
    fn spawn_outside_runtime_fails() {
        let err = NetworkMonitor::spawn(NetqOptions::default(), None).unwrap_err();
        assert_eq!(err, NetqError::NoRuntime);
    }

    #[tokio::test]
    async fn spawn_rejects_invalid_options() {
        let options = NetqOptions {
            flush_interval: Duration::ZERO,
            ..NetqOptions::default()
        };
        let err = NetworkMonitor::spawn(options, None).unwrap_err();
        assert!(err.is_config());
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_flush_while_request_active() {
        let handle = NetworkMonitor::spawn(NetqOptions::default(), None).unwrap();
        let mut events = handle.subscribe();

        handle.response_started().unwrap();
        handle.progress(30_000, true).unwrap();

        let sample = next_throughput(&mut events).await;
        assert_eq!(sample.bytes, 30_000);
        assert_eq!(sample.elapsed, Duration::from_secs(3));
        assert!(sample.allow_switch);
        assert_eq!(handle.quality().active_requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn final_flush_on_last_request_end() {
        let handle = NetworkMonitor::spawn(NetqOptions::default(), None).unwrap();
        let mut events = handle.subscribe();

        handle.response_started().unwrap();
        tokio::time::sleep(Duration::from_millis(700)).await;
        handle.progress(1000, true).unwrap();
        handle.request_ended().unwrap();

        let sample = next_throughput(&mut events).await;
        assert_eq!(sample.bytes, 1000);
        assert_eq!(sample.elapsed, Duration::from_millis(700));
    }

    #[tokio::test]
    async fn configure_rejects_invalid_options() {
        let handle = NetworkMonitor::spawn(NetqOptions::default(), None).unwrap();
        let err = handle
            .configure(NetqOptions {
                min_total_requests: 0,
                ..NetqOptions::default()
            })
            .unwrap_err();
        assert_eq!(err, NetqError::InvalidMinTotalRequests);
    }

    #[tokio::test]
    async fn commands_after_shutdown_fail() {
        let handle = NetworkMonitor::spawn(NetqOptions::default(), None).unwrap();
        let mut events = handle.subscribe();
        handle.shutdown();
        wait_stopped(&mut events).await;

        assert!(handle.is_shutdown());
        assert_eq!(handle.response_started(), Err(NetqError::ChannelClosed));
    }

    #[tokio::test]
    async fn parent_token_stops_monitor_but_handle_does_not_cancel_parent() {
        let parent = CancellationToken::new();
        let first = NetworkMonitor::spawn(NetqOptions::default(), Some(parent.clone())).unwrap();
        let mut first_events = first.subscribe();
        first.shutdown();
        wait_stopped(&mut first_events).await;
        assert!(!parent.is_cancelled());

        let second = NetworkMonitor::spawn(NetqOptions::default(), Some(parent.clone())).unwrap();
        let mut second_events = second.subscribe();
        parent.cancel();
        wait_stopped(&mut second_events).await;
    }
}
