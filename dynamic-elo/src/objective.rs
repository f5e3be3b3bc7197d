//! The penalized negative log-likelihood of a rating history and link function.
use crate::data_processing::{Game, Outcome};
use crate::errors::RatingError;
use crate::indexer::VariableIndex;
use crate::link::{LinkFunction, ParamVec};
use finitediff::FiniteDiff;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering::Relaxed};

/// Weights of the regularization terms.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Hyperparams {
    // per game, on the link's calibration to the 200-point class gap
    pub link_hard_reg: f64,
    // per game, on the link's distance from its default parameters
    pub link_soft_reg: f64,
    // on the even-match probability's distance from 1/2, not scaled by the number of games
    pub link_symmetry_reg: f64,
    // on squared rating changes between consecutive days of play
    pub smoothness: f64,
    // on squared distance from prior_mean, in millionths
    pub rating_reg: f64,
    // in internal units
    pub prior_mean: f64,
}

impl Default for Hyperparams {
    fn default() -> Self {
        Self {
            link_hard_reg: 50.,
            link_soft_reg: 1e-5,
            link_symmetry_reg: 200.,
            smoothness: 100.,
            rating_reg: 10.,
            prior_mean: 0.,
        }
    }
}

/// The objective broken down into its terms.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct ObjectiveTerms {
    pub total: f64,
    pub log_likelihood: f64,
    pub rating_regularization: f64,
    pub smoothness: f64,
    pub link_hard_penalty: f64,
    pub link_soft_penalty: f64,
    pub link_symmetry_penalty: f64,
}

#[derive(Debug)]
pub struct Objective<L> {
    link: L,
    hyper: Hyperparams,
    index: VariableIndex,
    // sorted by outcome, so that losses, wins and draws are contiguous
    games: Vec<Game>,
    losses: Range<usize>,
    wins: Range<usize>,
    draws: Range<usize>,
    // the sparse incidence structure: +1 on first_var[g], -1 on second_var[g]
    first_var: Vec<usize>,
    second_var: Vec<usize>,
    objective_calls: AtomicUsize,
    gradient_calls: AtomicUsize,
}

// Clones start with fresh call counters
impl<L: Clone> Clone for Objective<L> {
    fn clone(&self) -> Self {
        Self {
            link: self.link.clone(),
            hyper: self.hyper,
            index: self.index.clone(),
            games: self.games.clone(),
            losses: self.losses.clone(),
            wins: self.wins.clone(),
            draws: self.draws.clone(),
            first_var: self.first_var.clone(),
            second_var: self.second_var.clone(),
            objective_calls: AtomicUsize::new(0),
            gradient_calls: AtomicUsize::new(0),
        }
    }
}

impl<L: LinkFunction + Clone> Objective<L> {
    pub fn new(games: &[Game], link: L, hyper: Hyperparams) -> Result<Self, RatingError> {
        let index = VariableIndex::new(games, hyper.smoothness)?;

        let mut games = games.to_vec();
        games.sort_by_key(|game| game.outcome);
        let first_win = games.partition_point(|game| game.outcome < Outcome::Win);
        let first_draw = games.partition_point(|game| game.outcome < Outcome::Draw);

        let lookup = |player, day| {
            index
                .index_of(player, day)
                .expect("every game's competitors are indexed")
        };
        let first_var = games.iter().map(|g| lookup(g.competitor1, g.day)).collect();
        let second_var = games.iter().map(|g| lookup(g.competitor2, g.day)).collect();

        tracing::debug!(
            "Indexed {} rating variables from {} games ({} losses, {} wins, {} draws)",
            index.len(),
            games.len(),
            first_win,
            first_draw - first_win,
            games.len() - first_draw
        );

        Ok(Self {
            link,
            hyper,
            losses: 0..first_win,
            wins: first_win..first_draw,
            draws: first_draw..games.len(),
            index,
            games,
            first_var,
            second_var,
            objective_calls: AtomicUsize::new(0),
            gradient_calls: AtomicUsize::new(0),
        })
    }

    pub fn index(&self) -> &VariableIndex {
        &self.index
    }

    pub fn hyperparams(&self) -> &Hyperparams {
        &self.hyper
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn num_games(&self) -> usize {
        self.games.len()
    }

    pub fn num_rating_vars(&self) -> usize {
        self.index.len()
    }

    /// Length of the optimization vector.
    pub fn dim(&self) -> usize {
        self.index.len() + self.link.num_params()
    }

    /// Number of objective and gradient evaluations since the last reset.
    pub fn call_counts(&self) -> (usize, usize) {
        (
            self.objective_calls.load(Relaxed),
            self.gradient_calls.load(Relaxed),
        )
    }

    pub fn reset_call_counts(&self) {
        self.objective_calls.store(0, Relaxed);
        self.gradient_calls.store(0, Relaxed);
    }

    /// A copy of the link function, parametrized by the tail of `point`.
    pub fn link_at(&self, point: &[f64]) -> Result<L, RatingError> {
        let (_, link_params) = self.split(point)?;
        let mut link = self.link.clone();
        link.set_params(link_params);
        Ok(link)
    }

    fn split<'a>(&self, point: &'a [f64]) -> Result<(&'a [f64], &'a [f64]), RatingError> {
        if point.len() != self.dim() {
            return Err(RatingError::DimensionMismatch {
                expected: self.dim(),
                found: point.len(),
            });
        }
        Ok(point.split_at(self.index.len()))
    }

    fn rating_diffs(&self, ratings: &[f64]) -> Vec<f64> {
        self.first_var
            .iter()
            .zip(&self.second_var)
            .map(|(&i, &j)| ratings[i] - ratings[j])
            .collect()
    }

    pub fn objective(&self, point: &[f64]) -> Result<f64, RatingError> {
        Ok(self.objective_terms(point)?.total)
    }

    pub fn objective_terms(&self, point: &[f64]) -> Result<ObjectiveTerms, RatingError> {
        self.objective_calls.fetch_add(1, Relaxed);
        let (ratings, _) = self.split(point)?;
        let link = self.link_at(point)?;
        let diffs = self.rating_diffs(ratings);

        let log_likelihood = diffs[self.wins.clone()]
            .iter()
            .map(|&d| link.log_probability(d))
            .sum::<f64>()
            + diffs[self.losses.clone()]
                .iter()
                .map(|&d| link.log_complement_probability(d))
                .sum::<f64>()
            + diffs[self.draws.clone()]
                .iter()
                .map(|&d| 0.5 * (link.log_probability(d) + link.log_complement_probability(d)))
                .sum::<f64>();

        let rating_regularization = self.rating_reg_weight()
            * ratings
                .iter()
                .map(|r| (r - self.hyper.prior_mean).powi(2))
                .sum::<f64>();

        let smoothness = self
            .index
            .smoothness_weights()
            .iter()
            .zip(ratings.windows(2))
            .map(|(w, pair)| w * (pair[1] - pair[0]).powi(2))
            .sum::<f64>();

        let num_games = self.games.len() as f64;
        let link_hard_penalty = self.hyper.link_hard_reg * num_games * link.hard_penalty();
        let link_soft_penalty = self.hyper.link_soft_reg * num_games * link.soft_penalty();
        let link_symmetry_penalty = self.hyper.link_symmetry_reg * link.symmetry_penalty();

        Ok(ObjectiveTerms {
            total: -log_likelihood
                + rating_regularization
                + smoothness
                + link_hard_penalty
                + link_soft_penalty
                + link_symmetry_penalty,
            log_likelihood,
            rating_regularization,
            smoothness,
            link_hard_penalty,
            link_soft_penalty,
            link_symmetry_penalty,
        })
    }

    fn rating_reg_weight(&self) -> f64 {
        self.hyper.rating_reg * 1e-6
    }

    /// Gradient of the objective. Requires a link function with analytic derivatives.
    pub fn gradient(&self, point: &[f64]) -> Result<Vec<f64>, RatingError> {
        self.gradient_calls.fetch_add(1, Relaxed);
        let (ratings, _) = self.split(point)?;
        let link = self.link_at(point)?;
        let derivs = link.differentiable().ok_or(RatingError::GradientUnavailable)?;
        let diffs = self.rating_diffs(ratings);

        let mut grad = vec![0.; point.len()];
        let (rating_grad, link_grad) = grad.split_at_mut(ratings.len());

        // Subtracts one game's log-likelihood gradient, given in terms of its rating difference
        let mut scatter = |game: usize, (by_diff, by_params): (f64, ParamVec)| {
            rating_grad[self.first_var[game]] -= by_diff;
            rating_grad[self.second_var[game]] += by_diff;
            for (g, dp) in link_grad.iter_mut().zip(by_params) {
                *g -= dp;
            }
        };
        for game in self.wins.clone() {
            scatter(game, derivs.log_gradient(diffs[game]));
        }
        for game in self.losses.clone() {
            scatter(game, derivs.log_complement_gradient(diffs[game]));
        }
        for game in self.draws.clone() {
            let (win_by_diff, win_by_params) = derivs.log_gradient(diffs[game]);
            let (loss_by_diff, loss_by_params) = derivs.log_complement_gradient(diffs[game]);
            let by_params = win_by_params
                .iter()
                .zip(&loss_by_params)
                .map(|(w, l)| 0.5 * (w + l))
                .collect();
            scatter(game, (0.5 * (win_by_diff + loss_by_diff), by_params));
        }

        let reg_slope = 2. * self.rating_reg_weight();
        for (g, r) in rating_grad.iter_mut().zip(ratings) {
            *g += reg_slope * (r - self.hyper.prior_mean);
        }

        for (i, &w) in self.index.smoothness_weights().iter().enumerate() {
            let pull = 2. * w * (ratings[i + 1] - ratings[i]);
            rating_grad[i + 1] += pull;
            rating_grad[i] -= pull;
        }

        let num_games = self.games.len() as f64;
        let hard_scale = self.hyper.link_hard_reg * num_games;
        let soft_scale = self.hyper.link_soft_reg * num_games;
        let hard = derivs.hard_penalty_gradient();
        let soft = derivs.soft_penalty_gradient();
        for ((g, h), s) in link_grad.iter_mut().zip(&hard).zip(&soft) {
            *g += hard_scale * h + soft_scale * s;
        }

        let symmetry_scale = 2. * self.hyper.link_symmetry_reg * (link.probability(0.) - 0.5);
        for (g, dp) in link_grad.iter_mut().zip(derivs.parameter_gradient(0.)) {
            *g += symmetry_scale * dp;
        }

        Ok(grad)
    }

    /// Central finite-difference gradient of the objective; works with any link function.
    pub fn numerical_gradient(&self, point: &[f64]) -> Result<Vec<f64>, RatingError> {
        self.split(point)?;
        let point = point.to_vec();
        Ok(point.central_diff(&|x: &Vec<f64>| self.objective(x).unwrap_or(f64::NAN)))
    }

    /// Largest absolute difference between the analytic and finite-difference gradients.
    pub fn max_gradient_error(&self, point: &[f64]) -> Result<f64, RatingError> {
        let analytic = self.gradient(point)?;
        let numeric = self.numerical_gradient(point)?;
        Ok(analytic
            .iter()
            .zip(&numeric)
            .map(|(a, n)| (a - n).abs())
            .fold(0., f64::max))
    }
}
