//! Link functions map a rating advantage, in internal units, to a win probability.
mod nonparametric;
mod parametric;

pub use nonparametric::NonparametricLink;
pub use parametric::ParametricLink;

use crate::errors::RatingError;

pub type ParamVec = smallvec::SmallVec<[f64; 2]>;

/// A rating gap of 200 points, in internal units.
pub const CALIBRATION_GAP: f64 = 0.2;
/// Target value of `P(+200) - P(-200)`.
pub const CALIBRATION_SPREAD: f64 = 0.5;

pub trait LinkFunction: std::fmt::Debug {
    /// Length of the parameter tail in the optimization vector.
    fn num_params(&self) -> usize;
    fn initial_params(&self) -> Vec<f64>;
    /// All subsequent evaluations use these parameters.
    fn set_params(&mut self, params: &[f64]);
    fn params(&self) -> Vec<f64>;

    /// Probability that the competitor with advantage `x` wins.
    fn probability(&self, x: f64) -> f64;
    fn log_probability(&self, x: f64) -> f64;
    fn log_complement_probability(&self, x: f64) -> f64;

    /// Squared miscalibration against the conventional 200-point class gap.
    fn hard_penalty(&self) -> f64 {
        let spread = self.probability(CALIBRATION_GAP) - self.probability(-CALIBRATION_GAP);
        (spread - CALIBRATION_SPREAD).powi(2)
    }
    /// Weak prior pulling the parameters toward their defaults.
    fn soft_penalty(&self) -> f64;
    /// Squared bias of an even match away from a coin flip.
    fn symmetry_penalty(&self) -> f64 {
        (self.probability(0.) - 0.5).powi(2)
    }

    /// Analytic derivatives, if this link has them.
    fn differentiable(&self) -> Option<&dyn DifferentiableLink>;
}

pub trait DifferentiableLink {
    /// dP/dx
    fn derivative(&self, x: f64) -> f64;
    /// dP/dparams at `x`
    fn parameter_gradient(&self, x: f64) -> ParamVec;
    /// d log P/dx and d log P/dparams at `x`, accurate where P rounds to 0 or 1.
    fn log_gradient(&self, x: f64) -> (f64, ParamVec);
    /// d log(1 - P)/dx and d log(1 - P)/dparams at `x`
    fn log_complement_gradient(&self, x: f64) -> (f64, ParamVec);
    fn hard_penalty_gradient(&self) -> ParamVec;
    fn soft_penalty_gradient(&self) -> ParamVec;
}

/// Runtime choice between the link function shapes.
#[derive(Clone, Debug)]
pub enum AnyLink {
    Parametric(ParametricLink),
    Nonparametric(NonparametricLink),
}

impl std::fmt::Display for AnyLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parametric(link) => write!(f, "{}", link),
            Self::Nonparametric(link) => write!(f, "{}", link),
        }
    }
}

impl LinkFunction for AnyLink {
    fn num_params(&self) -> usize {
        match self {
            Self::Parametric(link) => link.num_params(),
            Self::Nonparametric(link) => link.num_params(),
        }
    }

    fn initial_params(&self) -> Vec<f64> {
        match self {
            Self::Parametric(link) => link.initial_params(),
            Self::Nonparametric(link) => link.initial_params(),
        }
    }

    fn set_params(&mut self, params: &[f64]) {
        match self {
            Self::Parametric(link) => link.set_params(params),
            Self::Nonparametric(link) => link.set_params(params),
        }
    }

    fn params(&self) -> Vec<f64> {
        match self {
            Self::Parametric(link) => link.params(),
            Self::Nonparametric(link) => link.params(),
        }
    }

    fn probability(&self, x: f64) -> f64 {
        match self {
            Self::Parametric(link) => link.probability(x),
            Self::Nonparametric(link) => link.probability(x),
        }
    }

    fn log_probability(&self, x: f64) -> f64 {
        match self {
            Self::Parametric(link) => link.log_probability(x),
            Self::Nonparametric(link) => link.log_probability(x),
        }
    }

    fn log_complement_probability(&self, x: f64) -> f64 {
        match self {
            Self::Parametric(link) => link.log_complement_probability(x),
            Self::Nonparametric(link) => link.log_complement_probability(x),
        }
    }

    fn hard_penalty(&self) -> f64 {
        match self {
            Self::Parametric(link) => link.hard_penalty(),
            Self::Nonparametric(link) => link.hard_penalty(),
        }
    }

    fn soft_penalty(&self) -> f64 {
        match self {
            Self::Parametric(link) => link.soft_penalty(),
            Self::Nonparametric(link) => link.soft_penalty(),
        }
    }

    fn symmetry_penalty(&self) -> f64 {
        match self {
            Self::Parametric(link) => link.symmetry_penalty(),
            Self::Nonparametric(link) => link.symmetry_penalty(),
        }
    }

    fn differentiable(&self) -> Option<&dyn DifferentiableLink> {
        match self {
            Self::Parametric(link) => link.differentiable(),
            Self::Nonparametric(link) => link.differentiable(),
        }
    }
}

pub fn get_link_function_by_name(link_name: &str) -> Result<AnyLink, RatingError> {
    match link_name {
        "parametric" | "logistic" => Ok(AnyLink::Parametric(ParametricLink::default())),
        "nonparametric" | "histogram" => Ok(AnyLink::Nonparametric(NonparametricLink::default())),
        name => Err(RatingError::UnknownLinkFunction(name.to_owned())),
    }
}
