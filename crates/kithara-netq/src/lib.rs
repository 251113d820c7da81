//! Network-quality estimation for adaptive streaming.
//!
//! This crate answers two questions continuously during playback: how long a
//! new request takes to start responding (TTFB), and how fast data arrives
//! while a download is running. The estimates are meant for a bitrate
//! selection policy, which lives elsewhere.
//!
//! ## Components
//!
//! - [`Ewma`]: bias-corrected exponentially-weighted moving average.
//! - [`TtfbEstimator`]: `max` of a fast and a slow EWMA, trusted after a
//!   minimum number of requests.
//! - [`BandwidthEstimator`]: `min` of a fast and a slow EWMA over throughput
//!   samples, trusted after a minimum number of bytes.
//! - [`ProgressAccumulator`]: batches byte-progress events from overlapping
//!   requests into periodic [`ProgressSample`]s.
//! - [`NetworkMonitor`]: async driver owning all of the above, fed through a
//!   cloneable [`MonitorHandle`].
//!
//! ## Example
//!
//! ```rust
//! use kithara_netq::{NetqOptions, TtfbEstimator};
//!
//! let mut ttfb = TtfbEstimator::new();
//! ttfb.configure(&NetqOptions::default());
//!
//! for ms in [120.0, 110.0, 130.0, 120.0] {
//!     ttfb.sample(ms);
//! }
//! assert!(ttfb.has_good_estimate());
//! let estimate = ttfb.get_ttfb_estimate(500.0);
//! assert!(estimate > 100.0 && estimate < 140.0);
//! ```

#![forbid(unsafe_code)]

mod bandwidth;
mod error;
mod events;
mod ewma;
mod monitor;
mod progress;
mod timer;
mod ttfb;
mod types;

pub use bandwidth::BandwidthEstimator;
pub use error::{NetqError, NetqResult};
pub use events::NetqEvent;
pub use ewma::Ewma;
pub use monitor::{MonitorHandle, NetworkMonitor};
pub use progress::ProgressAccumulator;
pub use timer::{Timer, TimerTick, TokioTimer};
pub use ttfb::TtfbEstimator;
pub use types::{NetqOptions, NetworkQuality, ProgressSample, SwitchPolicy};
