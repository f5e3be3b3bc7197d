//! Drives an `argmin` solver over the rating objective.
use crate::errors::RatingError;
use crate::indexer::RatingHistory;
use crate::link::LinkFunction;
use crate::numerical::l2_norm;
use crate::objective::{Objective, ObjectiveTerms};
use argmin::core::observers::{Observe, ObserverMode};
use argmin::core::{
    CostFunction, Error, Executor, Gradient, Hessian, IterState, KV, Solver, State, TerminationReason,
    TerminationStatus,
};
use argmin::solver::conjugategradient::{NonlinearConjugateGradient, beta::PolakRibierePlus};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::neldermead::NelderMead;
use argmin::solver::newton::NewtonCG;
use argmin::solver::quasinewton::{BFGS, LBFGS};
use finitediff::FiniteDiff;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

pub type Point = Vec<f64>;
type LineSearch = MoreThuenteLineSearch<Point, Point, f64>;
type Matrix = Vec<Vec<f64>>;

const LBFGS_MEMORY: usize = 7;
const SIMPLEX_STEP: f64 = 0.1;
/// Iteration limit per optimization variable when none is given.
pub const ITERS_PER_VARIABLE: u64 = 200;
// Fresh solver runs from the best point after a failed line search
const MAX_RECOVERIES: usize = 10;
const LOG_EVERY_STEPS: u64 = 1000;
const LOG_EVERY: Duration = Duration::from_secs(10);
const MIN_STEPS_BEFORE_TIMED_LOG: u64 = 10;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Method {
    #[default]
    Lbfgs,
    #[serde(alias = "cg")]
    ConjugateGradient,
    Bfgs,
    /// Newton steps from conjugate gradients on a finite-difference Hessian.
    NewtonCg,
    NelderMead,
}

impl Method {
    pub fn uses_gradient(self) -> bool {
        self != Self::NelderMead
    }
}

impl std::str::FromStr for Method {
    type Err = RatingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lbfgs" | "l-bfgs" | "l-bfgs-b" => Ok(Self::Lbfgs),
            "cg" | "conjugate-gradient" => Ok(Self::ConjugateGradient),
            "bfgs" => Ok(Self::Bfgs),
            "newton-cg" => Ok(Self::NewtonCg),
            "nelder-mead" => Ok(Self::NelderMead),
            name => Err(RatingError::UnknownMethod(name.to_owned())),
        }
    }
}

/// Everything learned from one fit.
#[derive(Clone, Debug)]
pub struct FitResult<L> {
    pub ratings: RatingHistory,
    pub link: L,
    /// The raw optimization vector: ratings in internal units, then link parameters.
    pub point: Point,
    pub terms: ObjectiveTerms,
    pub iterations: u64,
    pub termination: TerminationStatus,
}

// What a run has reached so far, kept outside the executor so that it survives a solver error
#[derive(Debug, Default)]
struct Checkpoint {
    best: Option<(f64, Point)>,
    iterations: u64,
}

type SharedCheckpoint = Arc<Mutex<Checkpoint>>;

fn lock(checkpoint: &SharedCheckpoint) -> MutexGuard<'_, Checkpoint> {
    checkpoint.lock().unwrap_or_else(PoisonError::into_inner)
}

// The argmin side of the objective
struct FitProblem<L> {
    objective: Arc<Objective<L>>,
    analytic_gradient: bool,
    checkpoint: SharedCheckpoint,
}

impl<L: LinkFunction + Clone> FitProblem<L> {
    fn new(objective: Arc<Objective<L>>) -> Self {
        let analytic_gradient = objective.link().differentiable().is_some();
        if !analytic_gradient {
            tracing::debug!("No analytic gradient for {:?}; using finite differences", objective.link());
        }
        Self {
            objective,
            analytic_gradient,
            checkpoint: SharedCheckpoint::default(),
        }
    }

    fn checkpoint(&self) -> SharedCheckpoint {
        Arc::clone(&self.checkpoint)
    }

    fn gradient_or_nan(&self, point: &Point) -> Point {
        self.gradient(point).unwrap_or_else(|_| vec![f64::NAN; point.len()])
    }
}

impl<L: LinkFunction + Clone> CostFunction for FitProblem<L> {
    type Param = Point;
    type Output = f64;

    fn cost(&self, point: &Point) -> Result<f64, Error> {
        let cost = self.objective.objective(point)?;
        let mut checkpoint = lock(&self.checkpoint);
        if cost.is_finite() && checkpoint.best.as_ref().map_or(true, |(best, _)| cost < *best) {
            checkpoint.best = Some((cost, point.clone()));
        }
        Ok(cost)
    }
}

impl<L: LinkFunction + Clone> Gradient for FitProblem<L> {
    type Param = Point;
    type Gradient = Point;

    fn gradient(&self, point: &Point) -> Result<Point, Error> {
        if self.analytic_gradient {
            Ok(self.objective.gradient(point)?)
        } else {
            Ok(self.objective.numerical_gradient(point)?)
        }
    }
}

impl<L: LinkFunction + Clone> Hessian for FitProblem<L> {
    type Param = Point;
    type Hessian = Matrix;

    fn hessian(&self, point: &Point) -> Result<Matrix, Error> {
        if point.len() != self.objective.dim() {
            return Err(RatingError::DimensionMismatch {
                expected: self.objective.dim(),
                found: point.len(),
            }
            .into());
        }
        Ok(point.central_hessian(&|x: &Point| self.gradient_or_nan(x)))
    }
}

trait GradientNorm {
    fn norm(&self) -> Option<f64>;
}

impl GradientNorm for Point {
    fn norm(&self) -> Option<f64> {
        Some(l2_norm(self))
    }
}

impl GradientNorm for () {
    fn norm(&self) -> Option<f64> {
        None
    }
}

struct ProgressLogger<L> {
    objective: Arc<Objective<L>>,
    checkpoint: SharedCheckpoint,
    last_log: Instant,
}

impl<L: LinkFunction + Clone> ProgressLogger<L> {
    fn new(objective: Arc<Objective<L>>, checkpoint: SharedCheckpoint) -> Self {
        Self {
            objective,
            checkpoint,
            last_log: Instant::now(),
        }
    }

    fn due(&self, iter: u64) -> bool {
        (iter > 0 && iter % LOG_EVERY_STEPS == 0)
            || (iter >= MIN_STEPS_BEFORE_TIMED_LOG && self.last_log.elapsed() >= LOG_EVERY)
    }
}

impl<L, G, H> Observe<IterState<Point, G, (), H, (), f64>> for ProgressLogger<L>
where
    L: LinkFunction + Clone,
    G: GradientNorm,
{
    fn observe_init(
        &mut self,
        name: &str,
        state: &IterState<Point, G, (), H, (), f64>,
        _kv: &KV,
    ) -> Result<(), Error> {
        tracing::info!(
            "Minimizing over {} variables with {} (max {} iterations)",
            self.objective.dim(),
            name,
            state.get_max_iters()
        );
        self.last_log = Instant::now();
        Ok(())
    }

    fn observe_iter(
        &mut self,
        state: &IterState<Point, G, (), H, (), f64>,
        _kv: &KV,
    ) -> Result<(), Error> {
        let iter = state.get_iter();
        lock(&self.checkpoint).iterations = iter;
        if !self.due(iter) {
            return Ok(());
        }
        let (objective_calls, gradient_calls) = self.objective.call_counts();
        let grad_norm = state.get_gradient().and_then(GradientNorm::norm);
        match grad_norm {
            Some(norm) => tracing::info!(
                "step {:6}: objective {:.6}, |gradient| {:.3e}, {} objective and {} gradient calls",
                iter,
                state.get_best_cost(),
                norm,
                objective_calls,
                gradient_calls
            ),
            None => tracing::info!(
                "step {:6}: objective {:.6}, {} objective calls",
                iter,
                state.get_best_cost(),
                objective_calls
            ),
        }
        self.last_log = Instant::now();
        Ok(())
    }
}

fn minimizer_error(err: Error) -> RatingError {
    err.downcast::<RatingError>().unwrap_or_else(RatingError::Optimizer)
}

fn identity(dim: usize) -> Matrix {
    (0..dim)
        .map(|i| (0..dim).map(|j| if i == j { 1. } else { 0. }).collect())
        .collect()
}

fn initial_simplex(start: &[f64]) -> Vec<Point> {
    let mut simplex = vec![start.to_vec()];
    for i in 0..start.len() {
        let mut vertex = start.to_vec();
        vertex[i] += SIMPLEX_STEP;
        simplex.push(vertex);
    }
    simplex
}

// One executor run
struct Segment {
    point: Point,
    iterations: u64,
    termination: TerminationStatus,
    // stopped on a solver error, such as a line search given an ascent direction
    failed: bool,
}

pub struct Optimizer<L> {
    objective: Arc<Objective<L>>,
    seed: Option<u64>,
}

impl<L> Optimizer<L>
where
    L: LinkFunction + Clone + Send + Sync + 'static,
{
    /// Without a seed, every fit starts from fresh entropy.
    pub fn new(objective: Objective<L>, seed: Option<u64>) -> Self {
        Self {
            objective: Arc::new(objective),
            seed,
        }
    }

    pub fn objective(&self) -> &Objective<L> {
        &self.objective
    }

    /// Ratings uniform in `[-0.5, 0.5)` internal units, followed by the link's default parameters.
    pub fn initial_point(&self) -> Point {
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        let mut point: Point = (0..self.objective.num_rating_vars())
            .map(|_| rng.random_range(-0.5..0.5))
            .collect();
        point.extend(self.objective.link().initial_params());
        point
    }

    /// `max_iters`, or `ITERS_PER_VARIABLE` per variable when it is zero.
    pub fn iteration_limit(&self, max_iters: u64) -> u64 {
        if max_iters > 0 {
            max_iters
        } else {
            ITERS_PER_VARIABLE * self.objective.dim() as u64
        }
    }

    /// The result mapping at the initial point, without optimizing.
    pub fn random_solution(&self) -> Result<FitResult<L>, RatingError> {
        self.result_at(self.initial_point(), 0, TerminationStatus::NotTerminated)
    }

    pub fn run(&self, method: Method, max_iters: u64) -> Result<FitResult<L>, RatingError> {
        self.run_from(self.initial_point(), method, max_iters)
    }

    /// Minimizes from a given point. `max_iters == 0` picks the default limit.
    ///
    /// A solver error other than a `RatingError` does not fail the fit: the solver is restarted
    /// from the best point it reached, for as long as that keeps improving the objective.
    pub fn run_from(&self, start: Point, method: Method, max_iters: u64) -> Result<FitResult<L>, RatingError> {
        if start.len() != self.objective.dim() {
            return Err(RatingError::DimensionMismatch {
                expected: self.objective.dim(),
                found: start.len(),
            });
        }
        self.objective.reset_call_counts();
        let now = Instant::now();
        let limit = self.iteration_limit(max_iters);

        let mut segment = self.run_method(method, start, limit)?;
        let mut iterations = segment.iterations;
        let mut cost = self.objective.objective(&segment.point)?;
        let mut recoveries = 0;
        while segment.failed && recoveries < MAX_RECOVERIES && iterations < limit {
            recoveries += 1;
            tracing::debug!("Restarting {:?} from objective {}", method, cost);
            let next = self.run_method(method, segment.point.clone(), limit - iterations)?;
            iterations += next.iterations.max(1);
            let next_cost = self.objective.objective(&next.point)?;
            if next_cost >= cost {
                break;
            }
            cost = next_cost;
            segment = next;
        }

        let (objective_calls, gradient_calls) = self.objective.call_counts();
        tracing::info!(
            "{:?} stopped after {} iterations in {:.2}s ({:?}); {} objective and {} gradient calls",
            method,
            iterations,
            now.elapsed().as_secs_f64(),
            segment.termination,
            objective_calls,
            gradient_calls
        );
        if iterations >= limit {
            tracing::warn!("Reached the iteration limit of {} before converging", limit);
        }
        self.result_at(segment.point, iterations, segment.termination)
    }

    /// Fits once per seed, in parallel, and keeps the fit with the lowest objective.
    pub fn run_restarts(&self, seeds: &[u64], method: Method, max_iters: u64) -> Result<FitResult<L>, RatingError> {
        if seeds.is_empty() {
            return self.run(method, max_iters);
        }
        let fits = seeds
            .par_iter()
            .map(|&seed| {
                let restart = Self::new(Objective::clone(&self.objective), Some(seed));
                restart.run(method, max_iters)
            })
            .collect::<Result<Vec<_>, _>>()?;
        for (seed, fit) in seeds.iter().zip(&fits) {
            tracing::debug!("Restart with seed {} reached objective {}", seed, fit.terms.total);
        }
        fits.into_iter()
            .min_by(|a, b| a.terms.total.total_cmp(&b.terms.total))
            .ok_or_else(|| RatingError::Optimizer(Error::msg("no restart finished")))
    }

    fn run_method(&self, method: Method, start: Point, max_iters: u64) -> Result<Segment, RatingError> {
        match method {
            Method::Lbfgs => {
                let solver = LBFGS::new(LineSearch::new(), LBFGS_MEMORY);
                self.execute(solver, |state| state.param(start), max_iters)
            }
            Method::ConjugateGradient => {
                // Polak-Ribiere needs a tighter curvature condition to keep descending
                let line_search = LineSearch::new().with_c(1e-4, 0.1).map_err(minimizer_error)?;
                let solver = NonlinearConjugateGradient::new(line_search, PolakRibierePlus::new())
                    .restart_iters(10)
                    .restart_orthogonality(0.1);
                self.execute(solver, |state| state.param(start), max_iters)
            }
            Method::Bfgs => {
                let solver: BFGS<LineSearch, f64> = BFGS::new(LineSearch::new());
                let inv_hessian = identity(start.len());
                self.execute(
                    solver,
                    |state: IterState<Point, Point, (), Matrix, (), f64>| state.param(start).inv_hessian(inv_hessian),
                    max_iters,
                )
            }
            Method::NewtonCg => {
                let solver: NewtonCG<LineSearch, f64> = NewtonCG::new(LineSearch::new());
                self.execute(
                    solver,
                    |state: IterState<Point, Point, (), Matrix, (), f64>| state.param(start),
                    max_iters,
                )
            }
            Method::NelderMead => {
                let solver = NelderMead::new(initial_simplex(&start));
                self.execute(solver, |state| state.param(start), max_iters)
            }
        }
    }

    fn execute<S, G, H>(
        &self,
        solver: S,
        init: impl FnOnce(IterState<Point, G, (), H, (), f64>) -> IterState<Point, G, (), H, (), f64>,
        max_iters: u64,
    ) -> Result<Segment, RatingError>
    where
        S: Solver<FitProblem<L>, IterState<Point, G, (), H, (), f64>>,
        IterState<Point, G, (), H, (), f64>: State<Param = Point, Float = f64>,
        G: GradientNorm + Clone + 'static,
        H: Clone + 'static,
    {
        let problem = FitProblem::new(Arc::clone(&self.objective));
        let checkpoint = problem.checkpoint();
        let executor = Executor::new(problem, solver)
            .configure(init)
            .configure(|state| state.max_iters(max_iters))
            .add_observer(
                ProgressLogger::new(Arc::clone(&self.objective), Arc::clone(&checkpoint)),
                ObserverMode::Always,
            );

        match executor.run() {
            Ok(result) => {
                let state = result.state();
                let point = state.get_best_param().or_else(|| state.get_param()).cloned();
                let point = match point.or_else(|| lock(&checkpoint).best.take().map(|(_, point)| point)) {
                    Some(point) => point,
                    None => return Err(RatingError::Optimizer(Error::msg("the solver produced no parameters"))),
                };
                Ok(Segment {
                    point,
                    iterations: state.get_iter(),
                    termination: state.get_termination_status().clone(),
                    failed: false,
                })
            }
            Err(err) => {
                let err = match err.downcast::<RatingError>() {
                    Ok(err) => return Err(err),
                    Err(err) => err,
                };
                let reached = lock(&checkpoint);
                let Some((cost, point)) = reached.best.clone() else {
                    return Err(RatingError::Optimizer(err));
                };
                tracing::warn!("The minimizer stopped at objective {}: {}", cost, err);
                Ok(Segment {
                    point,
                    iterations: reached.iterations,
                    termination: TerminationStatus::Terminated(TerminationReason::SolverExit(err.to_string())),
                    failed: true,
                })
            }
        }
    }

    fn result_at(&self, point: Point, iterations: u64, termination: TerminationStatus) -> Result<FitResult<L>, RatingError> {
        let terms = self.objective.objective_terms(&point)?;
        Ok(FitResult {
            ratings: self.objective.index().ratings_from_point(&point),
            link: self.objective.link_at(&point)?,
            point,
            terms,
            iterations,
            termination,
        })
    }
}
