//! Enumerates the rating variables: one per competitor per day on which they played.
use crate::data_processing::Game;
use crate::errors::RatingError;
use crate::numerical::{internal_to_rating, rating_to_internal};
use itertools::Itertools;
use std::collections::BTreeMap;
use superslice::Ext;

pub type CompetitorId = u64;
/// Days since some fixed origin, usually the Unix epoch.
pub type Day = i64;
pub type VarKey = (CompetitorId, Day);
/// Ratings of each competitor on each day they played, in conventional rating points.
pub type RatingHistory = BTreeMap<CompetitorId, BTreeMap<Day, f64>>;

#[derive(Clone, Debug)]
pub struct VariableIndex {
    // sorted by competitor, then by day
    keys: Vec<VarKey>,
    games_per_var: Vec<usize>,
    // smoothness_weights[i] couples variables i and i + 1
    smoothness_weights: Vec<f64>,
}

impl VariableIndex {
    /// `smoothness` scales the penalty on rating changes between consecutive days of play.
    pub fn new(games: &[Game], smoothness: f64) -> Result<Self, RatingError> {
        if games.is_empty() {
            return Err(RatingError::NoGames);
        }
        if let Some(game) = games.iter().find(|game| game.competitor1 == game.competitor2) {
            return Err(RatingError::SelfPlay {
                competitor: game.competitor1,
                day: game.day,
            });
        }

        let (keys, games_per_var): (Vec<VarKey>, Vec<usize>) = games
            .iter()
            .flat_map(|game| [(game.competitor1, game.day), (game.competitor2, game.day)])
            .counts()
            .into_iter()
            .sorted_unstable()
            .unzip();
        if keys.len() < 2 {
            return Err(RatingError::TooFewVariables(keys.len()));
        }

        // A long gap or a busy schedule justifies a larger jump
        let smoothness_weights = keys
            .iter()
            .zip(&games_per_var)
            .tuple_windows()
            .map(|((&(player, day), &games), (&(next_player, next_day), &next_games))| {
                if player == next_player {
                    smoothness / ((next_day - day) as f64 + (games + next_games) as f64)
                } else {
                    0.
                }
            })
            .collect();

        Ok(Self {
            keys,
            games_per_var,
            smoothness_weights,
        })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[VarKey] {
        &self.keys
    }

    pub fn key(&self, var: usize) -> VarKey {
        self.keys[var]
    }

    pub fn index_of(&self, competitor: CompetitorId, day: Day) -> Option<usize> {
        let pos = self.keys.lower_bound(&(competitor, day));
        (self.keys.get(pos) == Some(&(competitor, day))).then_some(pos)
    }

    /// Number of games the variable's competitor played on its day.
    pub fn games_on(&self, var: usize) -> usize {
        self.games_per_var[var]
    }

    pub fn smoothness_weights(&self) -> &[f64] {
        &self.smoothness_weights
    }

    /// Converts the rating segment of an optimization vector into a rating history.
    /// Any trailing link parameters are ignored.
    pub fn ratings_from_point(&self, point: &[f64]) -> RatingHistory {
        let mut ratings = RatingHistory::new();
        for (&(player, day), &value) in self.keys.iter().zip(point) {
            ratings
                .entry(player)
                .or_default()
                .insert(day, internal_to_rating(value));
        }
        ratings
    }

    /// Builds an optimization vector from a rating history followed by link parameters.
    /// Variables missing from the history start at the rating origin.
    pub fn point_from_ratings(&self, ratings: &RatingHistory, link_params: &[f64]) -> Vec<f64> {
        self.keys
            .iter()
            .map(|(player, day)| {
                ratings
                    .get(player)
                    .and_then(|history| history.get(day))
                    .map_or(0., |&rating| rating_to_internal(rating))
            })
            .chain(link_params.iter().copied())
            .collect()
    }
}
