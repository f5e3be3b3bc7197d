use crate::indexer::{CompetitorId, Day};

#[derive(thiserror::Error, Debug)]
pub enum RatingError {
    #[error("No games were provided.")]
    NoGames,
    #[error("Competitor {competitor} plays against themself on day {day}.")]
    SelfPlay { competitor: CompetitorId, day: Day },
    #[error("At least 2 rating variables are required, but the games only produce {0}.")]
    TooFewVariables(usize),
    #[error("Expected a vector of length {expected}, but got {found}.")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("The link function has no analytic gradient.")]
    GradientUnavailable,
    #[error("{0} is not a valid link function. Must be one of: parametric, nonparametric")]
    UnknownLinkFunction(String),
    #[error("{0} is not a valid method. Must be one of: lbfgs, cg, bfgs, newton-cg, nelder-mead")]
    UnknownMethod(String),
    #[error("Invalid date {0:?}: expected a day index or a full YYYY-MM-DD date.")]
    InvalidDate(String),
    #[error("Invalid game result {0:?}: expected 0, 1, 2, 0-1, 1-0 or 1/2-1/2.")]
    InvalidOutcome(String),
    #[error("Invalid filename extension for {0:?}: expected csv or json.")]
    InvalidExtension(std::path::PathBuf),
    #[error("Failed to parse fit config: {0}")]
    Config(#[from] json5::Error),
    #[error("Minimizer failed: {0}")]
    Optimizer(#[source] argmin::core::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod test {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_minimizer_error_keeps_its_source() {
        let err = RatingError::Optimizer(argmin::core::Error::msg("line search failed"));
        assert_eq!(err.to_string(), "Minimizer failed: line search failed");
        let source = err.source().unwrap();
        assert_eq!(source.to_string(), "line search failed");
    }
}
