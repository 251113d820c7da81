#![forbid(unsafe_code)]

use std::time::Duration;

use thiserror::Error;

/// Errors produced at the boundary of `kithara-netq`.
///
/// The estimators themselves never fail: too little data is reported through
/// fallback values and `has_good_estimate()`. Errors only cover invalid
/// configuration and the async driver's lifecycle.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum NetqError {
    #[error("half-life `{name}` must be positive and finite, got {value}")]
    InvalidHalfLife { name: &'static str, value: f64 },

    #[error("flush interval must be non-zero, got {0:?}")]
    InvalidFlushInterval(Duration),

    #[error("min_total_requests must be greater than zero")]
    InvalidMinTotalRequests,

    #[error("no tokio runtime available to drive the timer")]
    NoRuntime,

    #[error("network monitor channel closed")]
    ChannelClosed,
}

impl NetqError {
    pub(crate) fn invalid_half_life(name: &'static str, value: f64) -> Self {
        Self::InvalidHalfLife { name, value }
    }

    /// Whether the error reports a rejected configuration value.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::InvalidHalfLife { .. }
                | Self::InvalidFlushInterval(_)
                | Self::InvalidMinTotalRequests
        )
    }
}

/// Result type for `kithara-netq`.
pub type NetqResult<T> = Result<T, NetqError>;

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::half_life(
        NetqError::invalid_half_life("fast_half_life_secs", -1.0),
        "half-life `fast_half_life_secs` must be positive and finite, got -1"
    )]
    #[case::interval(
        NetqError::InvalidFlushInterval(Duration::ZERO),
        "flush interval must be non-zero, got 0ns"
    )]
    #[case::min_requests(
        NetqError::InvalidMinTotalRequests,
        "min_total_requests must be greater than zero"
    )]
    #[case::no_runtime(NetqError::NoRuntime, "no tokio runtime available to drive the timer")]
    #[case::closed(NetqError::ChannelClosed, "network monitor channel closed")]
    fn test_error_display(#[case] error: NetqError, #[case] expected: &str) {
        assert_eq!(error.to_string(), expected);
    }

    #[test]
    fn config_errors_are_classified() {
        assert!(NetqError::InvalidMinTotalRequests.is_config());
        assert!(NetqError::invalid_half_life("slow_half_life_secs", 0.0).is_config());
        assert!(!NetqError::ChannelClosed.is_config());
        assert!(!NetqError::NoRuntime.is_config());
    }
}
