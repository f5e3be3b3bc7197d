use super::{CALIBRATION_GAP, CALIBRATION_SPREAD, DifferentiableLink, LinkFunction, ParamVec};
use crate::numerical::{log_complement_sigmoid, log_sigmoid, sech2, sigmoid};
use serde::{Deserialize, Serialize};
use smallvec::smallvec;

const MIN_SCALE: f64 = 1e-20;
const MAX_SCALE: f64 = 1e20;
// The scale at which tanh(0.2 / scale) is close to 0.5
const DEFAULT_LOG_SCALE: f64 = -1.;

/// P(x) = 0.5 + 0.5 * tanh((x - mu) / scale), parametrized by (mu, ln(scale)).
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ParametricLink {
    mu: f64,
    log_scale: f64,
    scale: f64,
}

impl Default for ParametricLink {
    fn default() -> Self {
        Self::new(0., DEFAULT_LOG_SCALE)
    }
}

impl std::fmt::Display for ParametricLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0.5 + 0.5 * tanh((x - {}) / {})", self.mu, self.scale)
    }
}

impl ParametricLink {
    pub fn new(mu: f64, log_scale: f64) -> Self {
        let mut link = Self {
            mu: 0.,
            log_scale: 0.,
            scale: 1.,
        };
        link.set_params(&[mu, log_scale]);
        link
    }

    pub fn mu(&self) -> f64 {
        self.mu
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    fn arg(&self, x: f64) -> f64 {
        (x - self.mu) / self.scale
    }

    // dP/d(mu, log_scale) at the given tanh argument
    fn arg_gradient(&self, z: f64) -> ParamVec {
        let d = sech2(z);
        smallvec![-0.5 * d / self.scale, -0.5 * d * z]
    }
}

impl LinkFunction for ParametricLink {
    fn num_params(&self) -> usize {
        2
    }

    fn initial_params(&self) -> Vec<f64> {
        vec![0., DEFAULT_LOG_SCALE]
    }

    fn set_params(&mut self, params: &[f64]) {
        assert_eq!(params.len(), 2);
        self.mu = params[0];
        self.log_scale = params[1];
        self.scale = if self.log_scale > 50. {
            MAX_SCALE
        } else {
            self.log_scale.exp().max(MIN_SCALE)
        };
    }

    fn params(&self) -> Vec<f64> {
        vec![self.mu, self.log_scale]
    }

    fn probability(&self, x: f64) -> f64 {
        0.5 + 0.5 * self.arg(x).tanh()
    }

    fn log_probability(&self, x: f64) -> f64 {
        log_sigmoid(2. * self.arg(x))
    }

    fn log_complement_probability(&self, x: f64) -> f64 {
        log_complement_sigmoid(2. * self.arg(x))
    }

    fn soft_penalty(&self) -> f64 {
        self.mu * self.mu + (self.log_scale - DEFAULT_LOG_SCALE).powi(2)
    }

    fn differentiable(&self) -> Option<&dyn DifferentiableLink> {
        Some(self)
    }
}

impl DifferentiableLink for ParametricLink {
    fn derivative(&self, x: f64) -> f64 {
        0.5 * sech2(self.arg(x)) / self.scale
    }

    fn parameter_gradient(&self, x: f64) -> ParamVec {
        self.arg_gradient(self.arg(x))
    }

    // With y = 2 (x - mu) / scale, d log sigmoid(y)/dy = sigmoid(-y)
    fn log_gradient(&self, x: f64) -> (f64, ParamVec) {
        let y = 2. * self.arg(x);
        let w = sigmoid(-y);
        (2. * w / self.scale, smallvec![-2. * w / self.scale, -w * y])
    }

    fn log_complement_gradient(&self, x: f64) -> (f64, ParamVec) {
        let y = 2. * self.arg(x);
        let w = sigmoid(y);
        (-2. * w / self.scale, smallvec![2. * w / self.scale, w * y])
    }

    fn hard_penalty_gradient(&self) -> ParamVec {
        let z_hi = self.arg(CALIBRATION_GAP);
        let z_lo = self.arg(-CALIBRATION_GAP);
        let miss = 0.5 * (z_hi.tanh() - z_lo.tanh()) - CALIBRATION_SPREAD;
        let grad_hi = self.arg_gradient(z_hi);
        let grad_lo = self.arg_gradient(z_lo);
        grad_hi
            .iter()
            .zip(grad_lo.iter())
            .map(|(hi, lo)| 2. * miss * (hi - lo))
            .collect()
    }

    fn soft_penalty_gradient(&self) -> ParamVec {
        smallvec![2. * self.mu, 2. * (self.log_scale - DEFAULT_LOG_SCALE)]
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::numerical::central_difference;

    const DX: f64 = 1e-6;

    fn with_params(mu: f64, log_scale: f64) -> ParametricLink {
        ParametricLink::new(mu, log_scale)
    }

    #[test]
    fn test_stable_logs() {
        let link = with_params(0.1, -1.);
        for &x in &[-0.5, 0., 0.3, 1., 2.] {
            assert!((link.log_probability(x) - link.probability(x).ln()).abs() < 1e-9);
            assert!(
                (link.log_complement_probability(x) - (1. - link.probability(x)).ln()).abs()
                    < 1e-7
            );
        }
        assert!(link.log_probability(-1e3).is_finite());
        assert!(link.log_complement_probability(1e3).is_finite());
    }

    #[test]
    fn test_derivative() {
        let link = with_params(0.5, 1.);
        let numeric = central_difference(|x| link.probability(x), 0.6, DX);
        assert!((numeric - link.derivative(0.6)).abs() < 1e-8);
    }

    #[test]
    fn test_parameter_gradient() {
        let (mu, log_scale, x) = (0.5, 0.2, 1.1);
        let grad = with_params(mu, log_scale).parameter_gradient(x);
        let by_mu = central_difference(|m| with_params(m, log_scale).probability(x), mu, DX);
        let by_ls = central_difference(|s| with_params(mu, s).probability(x), log_scale, DX);
        assert!((by_mu - grad[0]).abs() < 1e-8);
        assert!((by_ls - grad[1]).abs() < 1e-8);
    }

    #[test]
    fn test_log_gradients() {
        let (mu, log_scale) = (0.1, -1.);
        let link = with_params(mu, log_scale);
        // out to 6 internal units, where P rounds to 0 or 1
        for &x in &[-6., -1.5, -0.2, 0., 0.4, 2., 6.] {
            let (by_x, by_params) = link.log_gradient(x);
            let (c_by_x, c_by_params) = link.log_complement_gradient(x);

            let numeric = central_difference(|x| link.log_probability(x), x, DX);
            assert!((numeric - by_x).abs() < 1e-6, "x {}: {} vs {}", x, numeric, by_x);
            let numeric = central_difference(|x| link.log_complement_probability(x), x, DX);
            assert!((numeric - c_by_x).abs() < 1e-6, "x {}: {} vs {}", x, numeric, c_by_x);

            let log_p = |m: f64, s: f64| with_params(m, s).log_probability(x);
            let log_q = |m: f64, s: f64| with_params(m, s).log_complement_probability(x);
            assert!((central_difference(|m| log_p(m, log_scale), mu, DX) - by_params[0]).abs() < 1e-6);
            assert!((central_difference(|s| log_p(mu, s), log_scale, DX) - by_params[1]).abs() < 1e-6);
            assert!((central_difference(|m| log_q(m, log_scale), mu, DX) - c_by_params[0]).abs() < 1e-6);
            assert!((central_difference(|s| log_q(mu, s), log_scale, DX) - c_by_params[1]).abs() < 1e-6);
        }

        // Far from the step the slope of the losing side's log stays at 2 / scale
        let (by_x, _) = link.log_gradient(-6.);
        assert!((by_x - 2. / link.scale()).abs() < 1e-6);
        assert!(link.log_complement_gradient(-6.).0.abs() < 1e-6);
    }

    #[test]
    fn test_penalty_gradients() {
        let (mu, log_scale) = (0.5, 0.3);
        let link = with_params(mu, log_scale);
        let hard = link.hard_penalty_gradient();
        let soft = link.soft_penalty_gradient();

        let hard_by_mu = central_difference(|m| with_params(m, log_scale).hard_penalty(), mu, DX);
        let hard_by_ls = central_difference(|s| with_params(mu, s).hard_penalty(), log_scale, DX);
        let soft_by_mu = central_difference(|m| with_params(m, log_scale).soft_penalty(), mu, DX);
        let soft_by_ls = central_difference(|s| with_params(mu, s).soft_penalty(), log_scale, DX);

        assert!((hard_by_mu - hard[0]).abs() < 1e-8);
        assert!((hard_by_ls - hard[1]).abs() < 1e-8);
        assert!((soft_by_mu - soft[0]).abs() < 1e-8);
        assert!((soft_by_ls - soft[1]).abs() < 1e-8);
    }

    #[test]
    fn test_symmetry_at_zero_location() {
        let link = with_params(0., -0.7);
        for &x in &[0., 0.05, 0.2, 0.9, 3.] {
            assert!((link.probability(x) + link.probability(-x) - 1.).abs() < 1e-12);
        }
    }

    #[test]
    fn test_extreme_log_scale_is_clamped() {
        let wide = with_params(0., 400.);
        assert_eq!(wide.scale(), MAX_SCALE);
        assert!((wide.probability(1.) - 0.5).abs() < 1e-12);

        let narrow = with_params(0., -400.);
        assert_eq!(narrow.scale(), MIN_SCALE);
        assert_eq!(narrow.probability(-1.), 0.);
        assert!(narrow.log_probability(-1.).is_finite());
    }
}
