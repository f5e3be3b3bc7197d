use dynamic_elo::data_processing::read_games;
use dynamic_elo::errors::RatingError;
use dynamic_elo::link::ParametricLink;
use dynamic_elo::objective::{Hyperparams, Objective};
use dynamic_elo::optimizer::Optimizer;

fn run(games_file: &str, seed: u64) -> Result<(), RatingError> {
    let games = read_games(games_file)?;
    let objective = Objective::new(&games, ParametricLink::default(), Hyperparams::default())?;
    let optimizer = Optimizer::new(objective, Some(seed));
    let point = optimizer.initial_point();

    let objective = optimizer.objective();
    tracing::info!("{:?}", objective.objective_terms(&point)?);
    let error = objective.max_gradient_error(&point)?;
    tracing::info!(
        "Largest gradient error over {} coordinates: {:.3e}",
        point.len(),
        error
    );
    if error > 1e-5 {
        tracing::warn!("The analytic gradient disagrees with finite differences");
    }
    Ok(())
}

/// Compares the analytic gradient to finite differences at a random point
fn main() {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 2 && args.len() != 3 {
        tracing::error!("Usage: {} games_file [seed]", args[0]);
        return;
    }
    let seed = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(0);
    if let Err(err) = run(&args[1], seed) {
        tracing::error!("{}", err);
        std::process::exit(1);
    }
}
