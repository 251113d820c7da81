use crate::{NetworkQuality, ProgressSample};

/// Events published by the [`NetworkMonitor`](crate::NetworkMonitor).
#[derive(Clone, Debug, PartialEq)]
pub enum NetqEvent {
    /// The accumulator flushed a throughput sample.
    Throughput {
        sample: ProgressSample,
        /// Whether the bandwidth estimator accepted the sample.
        accepted: bool,
        quality: NetworkQuality,
    },
    /// A TTFB measurement was recorded.
    TtfbSampled { ttfb_ms: f64, quality: NetworkQuality },
    /// New options were applied.
    Reconfigured,
    /// The monitor task exited; no further events follow.
    Stopped,
}
