use super::{DifferentiableLink, LinkFunction};
use crate::numerical::{PROB_EPS, bracket_by_halving, clamp_probability};
use serde::{Deserialize, Serialize};

/// A histogram-shaped link: `2 * half_bins` non-negative weights, normalized and summed into a
/// CDF on the grid `{-half_bins * step, ..., half_bins * step}`, interpolated log-linearly.
///
/// The weights are the absolute values of the parameters, so every parameter vector is valid.
/// There is no closed-form gradient; fit it with finite differences or a derivative-free method.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NonparametricLink {
    half_bins: usize,
    step: f64,
    weights: Vec<f64>,
    log_cdf: Vec<f64>,
}

impl Default for NonparametricLink {
    fn default() -> Self {
        Self::new(10, 0.1)
    }
}

impl std::fmt::Display for NonparametricLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cdf: Vec<String> = self
            .log_cdf
            .iter()
            .map(|log_prob| format!("{:.4}", log_prob.exp()))
            .collect();
        write!(f, "histogram(step={}): [{}]", self.step, cdf.join(", "))
    }
}

impl NonparametricLink {
    pub fn new(half_bins: usize, step: f64) -> Self {
        assert!(half_bins > 0);
        assert!(step > 0.);
        let mut link = Self {
            half_bins,
            step,
            weights: vec![],
            log_cdf: vec![],
        };
        link.set_params(&link.initial_params());
        link
    }

    pub fn grid_point(&self, k: usize) -> f64 {
        (k as f64 - self.half_bins as f64) * self.step
    }

    fn last_point(&self) -> usize {
        2 * self.half_bins
    }

    fn rebuild_cdf(&mut self) {
        let total: f64 = self.weights.iter().map(|w| w.abs()).sum();
        let bins = self.weights.len() as f64;
        // A zero or non-finite total gets the uniform shape
        let normalized = |w: f64| {
            if total > 0. && total.is_finite() {
                w.abs() / total
            } else {
                bins.recip()
            }
        };

        let mut running = 0.;
        self.log_cdf.clear();
        self.log_cdf.push(clamp_probability(running).ln());
        for &w in &self.weights {
            running += normalized(w);
            self.log_cdf.push(clamp_probability(running).ln());
        }
    }
}

impl LinkFunction for NonparametricLink {
    fn num_params(&self) -> usize {
        2 * self.half_bins
    }

    fn initial_params(&self) -> Vec<f64> {
        vec![1.; self.num_params()]
    }

    fn set_params(&mut self, params: &[f64]) {
        assert_eq!(params.len(), self.num_params());
        self.weights = params.to_vec();
        self.rebuild_cdf();
    }

    fn params(&self) -> Vec<f64> {
        self.weights.clone()
    }

    fn probability(&self, x: f64) -> f64 {
        self.log_probability(x).exp()
    }

    fn log_probability(&self, x: f64) -> f64 {
        let last = self.last_point();
        if x.is_nan() {
            return x;
        }
        if x <= self.grid_point(0) {
            return self.log_cdf[0];
        }
        if x >= self.grid_point(last) {
            return self.log_cdf[last];
        }
        let (lo, hi) = bracket_by_halving((0, last), |k| self.grid_point(k) <= x);
        let t = ((x - self.grid_point(lo)) / self.step).clamp(0., 1.);
        let (a, b) = (self.log_cdf[lo], self.log_cdf[hi]);
        (a + t * (b - a)).min(b)
    }

    fn log_complement_probability(&self, x: f64) -> f64 {
        // 1 - P = -expm1(log P), which is accurate when P is close to 1
        (-self.log_probability(x).exp_m1()).max(PROB_EPS).ln()
    }

    fn soft_penalty(&self) -> f64 {
        let sum_sq: f64 = self.weights.iter().map(|w| (w.abs() - 1.).powi(2)).sum();
        sum_sq / self.weights.len() as f64
    }

    fn differentiable(&self) -> Option<&dyn DifferentiableLink> {
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_uniform_weights() {
        let link = NonparametricLink::new(4, 0.25);
        assert_eq!(link.num_params(), 8);
        assert!((link.probability(0.) - 0.5).abs() < 1e-12);
        assert!((link.probability(0.5) - 0.75).abs() < 1e-12);
        assert!((link.probability(-0.5) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_clamped_outside_support() {
        let link = NonparametricLink::new(4, 0.25);
        assert_eq!(link.probability(-5.), link.probability(-1.));
        assert_eq!(link.probability(5.), link.probability(1.));
        assert!((link.probability(-5.) - PROB_EPS).abs() < 1e-15);
        assert!(link.probability(5.) < 1.);
        assert!(link.log_complement_probability(5.).is_finite());
    }

    #[test]
    fn test_log_linear_interpolation() {
        let link = NonparametricLink::new(2, 1.);
        // Halfway between 0 (P = 0.5) and 1 (P = 0.75) in log space
        let expected = (0.5f64.ln() * 0.5 + 0.75f64.ln() * 0.5).exp();
        assert!((link.probability(0.5) - expected).abs() < 1e-12);
        assert!(link.probability(0.5) < 0.625);
    }

    #[test]
    fn test_weights_shape_the_curve() {
        let mut link = NonparametricLink::new(2, 1.);
        link.set_params(&[1., 3., -3., 1.]);
        assert!((link.probability(-1.) - 0.125).abs() < 1e-12);
        assert!((link.probability(0.) - 0.5).abs() < 1e-12);
        assert!((link.probability(1.) - 0.875).abs() < 1e-12);
        assert!(link.soft_penalty() > 0.);

        let mut last = 0.;
        for i in -250..=250 {
            let prob = link.probability(i as f64 * 0.01);
            assert!(prob >= last);
            last = prob;
        }
    }

    #[test]
    fn test_degenerate_weights_fall_back_to_uniform() {
        let mut link = NonparametricLink::new(2, 1.);
        link.set_params(&[0.; 4]);
        assert!((link.probability(0.) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_complement_matches_naive() {
        let mut link = NonparametricLink::new(3, 0.2);
        link.set_params(&[0.5, 1., 2., 2., 1., 0.5]);
        for &x in &[-0.5, -0.1, 0., 0.13, 0.4] {
            let prob = link.probability(x);
            assert!((link.log_complement_probability(x) - (1. - prob).ln()).abs() < 1e-9);
        }
    }
}
