use crate::data_processing::{Game, Outcome};
use crate::indexer::{CompetitorId, Day, RatingHistory};
use crate::link::LinkFunction;
use crate::numerical::{clamp_probability, rating_diff_to_internal};
use overload::overload;
use std::fmt;
use std::ops;

pub type WeightAndSum = (f64, f64);

const METRIC_NAMES: [&str; 3] = ["log loss", "Brier score", "accuracy %"];

// Per-metric weights and weighted sums, so reports over disjoint games can be added
#[derive(Clone, Debug, PartialEq)]
pub struct PredictionReport {
    pub metrics_wt_sum: Vec<WeightAndSum>,
}

impl fmt::Display for PredictionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let averaged: Vec<String> = METRIC_NAMES
            .iter()
            .zip(self.averages())
            .map(|(name, avg)| format!("{} {:.4}", name, avg))
            .collect();
        write!(f, "{}", averaged.join(", "))
    }
}

impl Default for PredictionReport {
    fn default() -> Self {
        Self::new(METRIC_NAMES.len())
    }
}

impl PredictionReport {
    pub fn new(num_metrics: usize) -> Self {
        Self {
            metrics_wt_sum: vec![(0., 0.); num_metrics],
        }
    }

    /// NaN for metrics that saw no games.
    pub fn averages(&self) -> Vec<f64> {
        self.metrics_wt_sum
            .iter()
            .map(|&(wt, sum)| sum / wt)
            .collect()
    }
}

overload!((a: ?PredictionReport) + (b: ?PredictionReport) -> PredictionReport {
    assert_eq!(a.metrics_wt_sum.len(), b.metrics_wt_sum.len());
    let metrics_wt_sum = a.metrics_wt_sum.iter().zip(b.metrics_wt_sum.iter()).map(|((a_w, a_sum), (b_w, b_sum))| (a_w+b_w, a_sum+b_sum)).collect();
    PredictionReport {
        metrics_wt_sum
    }
});

overload!((a: &mut PredictionReport) += (b: ?PredictionReport) {
    assert_eq!(a.metrics_wt_sum.len(), b.metrics_wt_sum.len());
    for ((a_w, a_sum), (b_w, b_sum)) in a.metrics_wt_sum.iter_mut().zip(b.metrics_wt_sum.iter()) {
        *a_w += b_w;
        *a_sum += b_sum;
    }
});

/// The competitor's rating on `day`, or on their closest earlier day of play.
/// Before their first game, their first rating.
pub fn rating_on(ratings: &RatingHistory, competitor: CompetitorId, day: Day) -> Option<f64> {
    let history = ratings.get(&competitor)?;
    history
        .range(..=day)
        .next_back()
        .or_else(|| history.iter().next())
        .map(|(_, &rating)| rating)
}

/// Scores a single game's predicted first-competitor win probability.
pub fn game_metrics(prob: f64, outcome: Outcome) -> PredictionReport {
    let prob = clamp_probability(prob);
    let score = outcome.score();
    let log_loss = -(score * prob.ln() + (1. - score) * (1. - prob).ln());
    let brier = (prob - score).powi(2);
    let accuracy = match outcome {
        Outcome::Draw => (0., 0.),
        Outcome::Win => (1., if prob > 0.5 { 100. } else { 0. }),
        Outcome::Loss => (1., if prob < 0.5 { 100. } else { 0. }),
    };
    PredictionReport {
        metrics_wt_sum: vec![(1., log_loss), (1., brier), accuracy],
    }
}

/// Evaluates how well the ratings and link predict the games.
/// Games involving an unrated competitor are skipped.
pub fn evaluate_predictions(link: &impl LinkFunction, ratings: &RatingHistory, games: &[Game]) -> PredictionReport {
    let mut report = PredictionReport::default();
    let mut skipped = 0;
    for game in games {
        let first = rating_on(ratings, game.competitor1, game.day);
        let second = rating_on(ratings, game.competitor2, game.day);
        match first.zip(second) {
            Some((first, second)) => {
                let prob = link.probability(rating_diff_to_internal(first - second));
                report += game_metrics(prob, game.outcome);
            }
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        tracing::warn!("Skipped {} of {} games with unrated competitors", skipped, games.len());
    }
    report
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::link::ParametricLink;

    fn ratings(entries: &[(CompetitorId, Day, f64)]) -> RatingHistory {
        let mut history = RatingHistory::new();
        for &(player, day, rating) in entries {
            history.entry(player).or_default().insert(day, rating);
        }
        history
    }

    #[test]
    fn test_game_metrics() {
        let win = game_metrics(0.8, Outcome::Win).averages();
        assert!((win[0] + 0.8f64.ln()).abs() < 1e-12);
        assert!((win[1] - 0.04).abs() < 1e-12);
        assert_eq!(win[2], 100.);

        let draw = game_metrics(0.5, Outcome::Draw);
        assert!((draw.averages()[0] - 2f64.ln()).abs() < 1e-12);
        assert_eq!(draw.metrics_wt_sum[2], (0., 0.));

        let upset = game_metrics(0.9, Outcome::Loss).averages();
        assert_eq!(upset[2], 0.);
        assert!(upset[0] > win[0]);
    }

    #[test]
    fn test_reports_add() {
        let mut total = game_metrics(0.7, Outcome::Win) + game_metrics(0.7, Outcome::Loss);
        total += game_metrics(0.4, Outcome::Draw);
        assert_eq!(total.metrics_wt_sum[0].0, 3.);
        assert_eq!(total.metrics_wt_sum[2], (2., 100.));
        assert_eq!(total.averages()[2], 50.);
        assert!(total.to_string().starts_with("log loss "));
    }

    #[test]
    fn test_rating_on() {
        let history = ratings(&[(1, 5, 2100.), (1, 9, 2200.)]);
        assert_eq!(rating_on(&history, 1, 5), Some(2100.));
        assert_eq!(rating_on(&history, 1, 8), Some(2100.));
        assert_eq!(rating_on(&history, 1, 20), Some(2200.));
        assert_eq!(rating_on(&history, 1, 1), Some(2100.));
        assert_eq!(rating_on(&history, 2, 5), None);
    }

    #[test]
    fn test_evaluate_predictions() {
        let history = ratings(&[(1, 1, 2200.), (2, 1, 1800.), (3, 1, 2000.)]);
        let games = [
            Game::new(1, 2, 1, Outcome::Win),
            Game::new(2, 3, 1, Outcome::Loss),
            Game::new(3, 1, 1, Outcome::Draw),
            Game::new(4, 1, 1, Outcome::Win),
        ];
        let report = evaluate_predictions(&ParametricLink::default(), &history, &games);
        assert_eq!(report.metrics_wt_sum[0].0, 3.);
        assert_eq!(report.averages()[2], 100.);
        assert!(report.averages()[1] < 0.25);
    }
}
