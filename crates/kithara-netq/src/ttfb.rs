use crate::{NetqOptions, ewma::Ewma};

/// Time-to-first-byte estimator.
///
/// Tracks two EWMAs with different half-lives and reports the larger of the
/// two, so latency degradation is adopted quickly while improvement must
/// persist long enough to pull the slow average down.
#[derive(Clone, Debug)]
pub struct TtfbEstimator {
    fast: Ewma,
    slow: Ewma,
    requests_sampled: u64,
    min_total_requests: u32,
}

impl TtfbEstimator {
    const FAST_HALF_LIFE_SECS: f64 = 2.0;
    const SLOW_HALF_LIFE_SECS: f64 = 5.0;
    const MIN_TOTAL_REQUESTS: u32 = 4;

    #[must_use]
    pub fn new() -> Self {
        Self {
            fast: Ewma::new(Self::FAST_HALF_LIFE_SECS),
            slow: Ewma::new(Self::SLOW_HALF_LIFE_SECS),
            requests_sampled: 0,
            min_total_requests: Self::MIN_TOTAL_REQUESTS,
        }
    }

    /// Apply the threshold and half-lives from `cfg`.
    ///
    /// Safe to call repeatedly; sampled history is kept.
    pub fn configure(&mut self, cfg: &NetqOptions) {
        self.min_total_requests = cfg.min_total_requests;
        self.fast.update_alpha(cfg.fast_half_life_secs);
        self.slow.update_alpha(cfg.slow_half_life_secs);
    }

    /// Record the TTFB of one completed request.
    pub fn sample(&mut self, duration_ms: f64) {
        self.requests_sampled = self.requests_sampled.saturating_add(1);
        self.fast.sample(1.0, duration_ms);
        self.slow.sample(1.0, duration_ms);
    }

    /// Current estimate in milliseconds, or `default_estimate` while fewer
    /// than `min_total_requests` requests were sampled.
    pub fn get_ttfb_estimate(&self, default_estimate: f64) -> f64 {
        self.estimate_ms().unwrap_or(default_estimate)
    }

    /// Trusted estimate in milliseconds, if any.
    pub fn estimate_ms(&self) -> Option<f64> {
        self.has_good_estimate()
            .then(|| self.fast.get_estimate().max(self.slow.get_estimate()))
    }

    pub fn has_good_estimate(&self) -> bool {
        self.requests_sampled >= u64::from(self.min_total_requests)
    }

    pub fn requests_sampled(&self) -> u64 {
        self.requests_sampled
    }

    #[cfg(test)]
    fn tracks(&self) -> (f64, f64) {
        (self.fast.get_estimate(), self.slow.get_estimate())
    }
}

impl Default for TtfbEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn configured(min_total_requests: u32) -> TtfbEstimator {
        let mut est = TtfbEstimator::new();
        est.configure(&NetqOptions {
            min_total_requests,
            ..NetqOptions::default()
        });
        est
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(3)]
    fn returns_default_below_threshold(#[case] samples: usize) {
        let mut est = configured(4);
        for _ in 0..samples {
            est.sample(120.0);
        }
        assert_eq!(est.get_ttfb_estimate(999.0), 999.0);
        assert!(!est.has_good_estimate());
        assert_eq!(est.estimate_ms(), None);
    }

    #[rstest]
    #[case(40.0, 0.0)]
    #[case(40.0, 5_000.0)]
    #[case(350.0, 1.0)]
    fn identical_samples_converge_regardless_of_default(
        #[case] value: f64,
        #[case] default_estimate: f64,
    ) {
        let mut est = configured(4);
        for _ in 0..4 {
            est.sample(value);
        }
        assert!(est.has_good_estimate());
        assert!((est.get_ttfb_estimate(default_estimate) - value).abs() < 1e-6);
    }

    #[test]
    fn fast_track_forgets_outlier_sooner() {
        let mut est = configured(1);
        est.sample(2_000.0);
        for _ in 0..6 {
            est.sample(100.0);
        }
        let (fast, slow) = est.tracks();
        assert!(fast < slow, "fast={fast} slow={slow}");
        assert!(fast > 100.0);
        // The estimate stays pessimistic: the slow track still remembers the outlier.
        assert_eq!(est.get_ttfb_estimate(0.0), slow);
    }

    #[test]
    fn degradation_is_adopted_quickly() {
        let mut est = configured(1);
        for _ in 0..10 {
            est.sample(100.0);
        }
        est.sample(1_000.0);
        let (fast, slow) = est.tracks();
        assert!(fast > slow);
        assert_eq!(est.get_ttfb_estimate(0.0), fast);
    }

    #[test]
    fn reconfigure_keeps_history() {
        let mut est = configured(2);
        est.sample(200.0);
        est.sample(200.0);
        assert!(est.has_good_estimate());

        est.configure(&NetqOptions {
            min_total_requests: 3,
            fast_half_life_secs: 1.0,
            slow_half_life_secs: 8.0,
            ..NetqOptions::default()
        });
        assert!(!est.has_good_estimate());
        est.sample(200.0);
        assert!(est.has_good_estimate());
        let estimate = est.get_ttfb_estimate(0.0);
        assert!(estimate > 0.0, "estimate={estimate}");
        assert_eq!(est.requests_sampled(), 3);
    }

    #[test]
    fn defaults_match_documented_values() {
        let est = TtfbEstimator::default();
        assert_eq!(est.min_total_requests, 4);
        assert_eq!(est.requests_sampled(), 0);
    }
}
