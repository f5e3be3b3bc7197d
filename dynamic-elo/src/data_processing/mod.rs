use crate::errors::RatingError;
use crate::indexer::{CompetitorId, Day};
use chrono::NaiveDate;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// The result of a game, from the point of view of its first competitor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// The second competitor won.
    Loss = 0,
    /// The first competitor won.
    Win = 1,
    Draw = 2,
}

impl Outcome {
    /// Points scored by the first competitor.
    pub fn score(self) -> f64 {
        match self {
            Self::Loss => 0.,
            Self::Win => 1.,
            Self::Draw => 0.5,
        }
    }

    pub fn reversed(self) -> Self {
        match self {
            Self::Loss => Self::Win,
            Self::Win => Self::Loss,
            Self::Draw => Self::Draw,
        }
    }
}

impl std::str::FromStr for Outcome {
    type Err = RatingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "0" | "0-1" | "loss" => Ok(Self::Loss),
            "1" | "1-0" | "win" => Ok(Self::Win),
            "2" | "1/2-1/2" | "draw" => Ok(Self::Draw),
            other => Err(RatingError::InvalidOutcome(other.to_owned())),
        }
    }
}

/// A single two-player game, bucketed by day.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Game {
    pub competitor1: CompetitorId,
    pub competitor2: CompetitorId,
    pub day: Day,
    pub outcome: Outcome,
}

impl Game {
    pub fn new(competitor1: CompetitorId, competitor2: CompetitorId, day: Day, outcome: Outcome) -> Self {
        Self {
            competitor1,
            competitor2,
            day,
            outcome,
        }
    }

    /// The same game seen from the other side of the board.
    pub fn swapped(&self) -> Self {
        Self::new(self.competitor2, self.competitor1, self.day, self.outcome.reversed())
    }
}

#[derive(Deserialize)]
struct GameRow {
    competitor1: CompetitorId,
    competitor2: CompetitorId,
    date: String,
    result: String,
}

impl TryFrom<GameRow> for Game {
    type Error = RatingError;

    fn try_from(row: GameRow) -> Result<Self, Self::Error> {
        Ok(Self::new(
            row.competitor1,
            row.competitor2,
            parse_day(&row.date)?,
            row.result.parse()?,
        ))
    }
}

fn epoch() -> NaiveDate {
    NaiveDate::default()
}

/// Parses a day index, or a calendar date as days since the Unix epoch.
/// Dates with unknown components, such as `2001.??.??`, are rejected.
pub fn parse_day(date: &str) -> Result<Day, RatingError> {
    let date = date.trim();
    if let Ok(day) = date.parse::<Day>() {
        return Ok(day);
    }
    if date.contains('?') {
        return Err(RatingError::InvalidDate(date.to_owned()));
    }
    ["%Y-%m-%d", "%Y.%m.%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date, fmt).ok())
        .map(|parsed| (parsed - epoch()).num_days())
        .ok_or_else(|| RatingError::InvalidDate(date.to_owned()))
}

pub fn day_to_date(day: Day) -> Option<NaiveDate> {
    epoch().checked_add_signed(chrono::TimeDelta::try_days(day)?)
}

/// Reads games from CSV with the header `competitor1,competitor2,date,result`.
pub fn read_games_csv(reader: impl std::io::Read) -> Result<Vec<Game>, RatingError> {
    csv::Reader::from_reader(reader)
        .deserialize::<GameRow>()
        .map(|row| Game::try_from(row?))
        .collect()
}

/// Reads games from a `.csv` or `.json` file.
pub fn read_games(path: impl AsRef<Path>) -> Result<Vec<Game>, RatingError> {
    let path = path.as_ref();
    let games = match path.extension().and_then(|s| s.to_str()) {
        Some("csv") => read_games_csv(std::fs::File::open(path)?)?,
        Some("json") => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        _ => return Err(RatingError::InvalidExtension(path.to_owned())),
    };
    tracing::info!("Read {} games from {:?}", games.len(), path);
    Ok(games)
}

/// Drops every game involving a competitor with fewer than `min_games` games,
/// repeating until every remaining competitor has enough.
pub fn filter_min_games(games: &[Game], min_games: usize) -> Vec<Game> {
    let mut kept = games.to_vec();
    loop {
        let counts: HashMap<CompetitorId, usize> = kept
            .iter()
            .flat_map(|game| [game.competitor1, game.competitor2])
            .counts();
        let before = kept.len();
        kept.retain(|game| counts[&game.competitor1] >= min_games && counts[&game.competitor2] >= min_games);
        if kept.len() == before {
            break;
        }
    }
    if kept.len() < games.len() {
        tracing::info!(
            "Dropped {} of {} games involving competitors with fewer than {} games",
            games.len() - kept.len(),
            games.len(),
            min_games
        );
    }
    kept
}

fn write_to_json<T: Serialize + ?Sized>(value: &T, path: impl AsRef<Path>) -> Result<(), RatingError> {
    let json = serde_json::to_string_pretty(&value)?;
    std::fs::write(path.as_ref(), json)?;
    Ok(())
}

fn write_to_csv<T: Serialize>(values: &[T], path: impl AsRef<Path>) -> Result<(), RatingError> {
    let mut writer = csv::Writer::from_path(path.as_ref())?;
    for val in values {
        writer.serialize(val)?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes a table of rows as CSV or JSON, depending on the filename extension.
pub fn write_slice_to_file<T: Serialize>(values: &[T], path: impl AsRef<Path>) -> Result<(), RatingError> {
    let path = path.as_ref();
    match path.extension().and_then(|s| s.to_str()) {
        Some("json") => write_to_json(values, path)?,
        Some("csv") => write_to_csv(values, path)?,
        _ => return Err(RatingError::InvalidExtension(path.to_owned())),
    };
    tracing::info!("Successfully wrote to {:?}", path);
    Ok(())
}
