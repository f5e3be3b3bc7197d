use dynamic_elo::data_processing::write_slice_to_file;
use dynamic_elo::errors::RatingError;
use dynamic_elo::fit_config::FitConfig;
use dynamic_elo::metrics::evaluate_predictions;
use dynamic_elo::summary::{print_ratings, rating_rows};

fn get_config_from_args(args: &[String]) -> Result<FitConfig, RatingError> {
    if args[1] == "file:" {
        FitConfig::from_file(&args[2])
    } else {
        let mut config = FitConfig::from_json5(&format!(
            "{{ link: {:?}, games_source: {:?} }}",
            args[1], args[2]
        ))?;
        if let Some(max_iters) = args.get(3).and_then(|s| s.parse().ok()) {
            config.max_iters = max_iters;
        }
        Ok(config)
    }
}

fn run(args: &[String]) -> Result<(), RatingError> {
    let config = get_config_from_args(args)?;
    let games = config.load_games()?;
    let fit = config.fit_games(&games)?;

    tracing::info!("Fitted link: {}", fit.link);
    tracing::info!("{:?}", fit.terms);
    tracing::info!("In-sample predictions: {}", evaluate_predictions(&fit.link, &fit.ratings, &games));

    let last_day = games.iter().map(|game| game.day).max().unwrap_or_default();
    let dir = config
        .output_dir
        .clone()
        .unwrap_or_else(|| std::path::PathBuf::from("../data/output"));
    print_ratings(&fit.ratings, last_day - 183, &dir)?;
    write_slice_to_file(&rating_rows(&fit.ratings), dir.join("ratings.json"))
}

/// Fits time-varying ratings to a history of games
fn main() {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 3 && args.len() != 4 {
        tracing::error!("Usage: {} link_name games_file [max_iters]", args[0]);
        tracing::error!("   or: {} file: config.json5", args[0]);
        return;
    }
    if let Err(err) = run(&args) {
        tracing::error!("{}", err);
        std::process::exit(1);
    }
}
