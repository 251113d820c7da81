/// Exponentially-weighted moving average with a half-life measured in units
/// of sample weight.
///
/// The running value starts at zero, so reads are bias-corrected by
/// `1 - alpha^total_weight` until enough weight has been sampled.
#[derive(Clone, Debug)]
pub struct Ewma {
    alpha: f64,
    last_estimate: f64,
    total_weight: f64,
}

impl Ewma {
    const MIN_HALF_LIFE: f64 = 0.001;

    #[must_use]
    pub fn new(half_life: f64) -> Self {
        Self {
            alpha: Self::alpha_for(half_life),
            last_estimate: 0.0,
            total_weight: 0.0,
        }
    }

    fn alpha_for(half_life: f64) -> f64 {
        f64::exp(0.5_f64.ln() / half_life.max(Self::MIN_HALF_LIFE))
    }

    /// Recompute the decay factor for a new half-life.
    ///
    /// Keeps the current estimate and accumulated weight.
    pub fn update_alpha(&mut self, half_life: f64) {
        self.alpha = Self::alpha_for(half_life);
        self.total_weight = self.total_weight.min(self.max_weight());
    }

    /// Weight beyond which `alpha^weight` no longer changes the correction
    /// factor in `f64`.
    fn max_weight(&self) -> f64 {
        let ln_alpha = self.alpha.ln();
        if ln_alpha < 0.0 {
            f64::EPSILON.ln() / ln_alpha
        } else {
            f64::INFINITY
        }
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    /// Blend `value` into the average with significance `weight`.
    ///
    /// `total_weight` is capped at `ln(f64::EPSILON) / ln(alpha)`.
    pub fn sample(&mut self, weight: f64, value: f64) {
        let weight = weight.max(0.0);
        let adj_alpha = self.alpha.powf(weight);
        let new_estimate = value * (1.0 - adj_alpha) + adj_alpha * self.last_estimate;
        if !new_estimate.is_finite() {
            return;
        }
        self.last_estimate = new_estimate;
        self.total_weight = (self.total_weight + weight).min(self.max_weight());
    }

    /// Bias-corrected estimate, `0.0` before any weight was sampled.
    pub fn get_estimate(&self) -> f64 {
        if self.total_weight <= 0.0 {
            return 0.0;
        }
        let zero_factor = 1.0 - self.alpha.powf(self.total_weight);
        if zero_factor <= 0.0 {
            return 0.0;
        }
        self.last_estimate / zero_factor
    }
}
