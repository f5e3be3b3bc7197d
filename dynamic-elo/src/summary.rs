use crate::data_processing::{day_to_date, write_slice_to_file};
use crate::errors::RatingError;
use crate::indexer::{CompetitorId, Day, RatingHistory};
use serde::{Deserialize, Serialize};

const NUM_CLASSES: usize = 10;
const CLASS_BOUND: [i32; NUM_CLASSES] = [-999, 1200, 1400, 1600, 1800, 2000, 2200, 2300, 2400, 2500];
const CLASS: [&str; NUM_CLASSES] = ["E", "D", "C", "B", "A", "Ex", "CM", "FM", "IM", "GM"];

pub struct GlobalSummary {
    pub mean_rating: f64,
    pub class_count: Vec<usize>,
}

/// One rating variable, as a table row.
#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct RatingRow {
    pub competitor: CompetitorId,
    pub day: Day,
    pub date: Option<String>,
    pub rating: f64,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CompetitorSummary {
    pub rank: Option<usize>,
    pub display_rating: i32,
    max_rating: i32,
    num_days: usize,
    first_day: Day,
    last_day: Day,
    last_change: i32,
    pub competitor: CompetitorId,
}

pub fn rating_rows(ratings: &RatingHistory) -> Vec<RatingRow> {
    ratings
        .iter()
        .flat_map(|(&competitor, history)| {
            history.iter().map(move |(&day, &rating)| RatingRow {
                competitor,
                day,
                date: day_to_date(day).map(|date| date.to_string()),
                rating,
            })
        })
        .collect()
}

fn class_of(display_rating: i32) -> Option<usize> {
    (0..NUM_CLASSES)
        .rev()
        .find(|&i| display_rating >= CLASS_BOUND[i])
}

/// Ranks competitors by their latest rating. Only those who played on or after
/// `rated_since` are ranked and counted in the class distribution.
pub fn make_leaderboard(ratings: &RatingHistory, rated_since: Day) -> (GlobalSummary, Vec<CompetitorSummary>) {
    let mut rating_data = Vec::with_capacity(ratings.len());
    let mut class_count = vec![0; NUM_CLASSES];
    let mut sum_ratings = 0.;

    for (&competitor, history) in ratings {
        let (Some((&first_day, _)), Some((&last_day, &latest))) =
            (history.first_key_value(), history.last_key_value())
        else {
            continue;
        };
        let display_rating = latest.round() as i32;
        let max_rating = history.values().fold(f64::NEG_INFINITY, |a, &b| a.max(b)).round() as i32;
        let prev_rating = history
            .values()
            .nth_back(1)
            .map_or(display_rating, |&rating| rating.round() as i32);
        sum_ratings += latest;

        rating_data.push(CompetitorSummary {
            rank: None,
            display_rating,
            max_rating,
            num_days: history.len(),
            first_day,
            last_day,
            last_change: display_rating - prev_rating,
            competitor,
        });

        if last_day >= rated_since {
            if let Some(class_id) = class_of(display_rating) {
                class_count[class_id] += 1;
            }
        }
    }
    rating_data.sort_unstable_by_key(|data| (-data.display_rating, data.competitor));

    let mut rank = 0;
    for data in &mut rating_data {
        if data.last_day >= rated_since {
            rank += 1;
            data.rank = Some(rank);
        }
    }

    let global_summary = GlobalSummary {
        mean_rating: sum_ratings / rating_data.len().max(1) as f64,
        class_count,
    };

    (global_summary, rating_data)
}

/// Logs the class distribution, then writes `all_competitors.csv` and `rating_history.csv` to `dir`.
pub fn print_ratings(
    ratings: &RatingHistory,
    rated_since: Day,
    dir: impl AsRef<std::path::Path>,
) -> Result<(), RatingError> {
    let (summary, rating_data) = make_leaderboard(ratings, rated_since);

    tracing::info!("Mean rating = {}", summary.mean_rating);
    for i in (0..NUM_CLASSES).rev() {
        tracing::info!(
            "{} {} x{:6}",
            CLASS_BOUND[i],
            CLASS[i],
            summary.class_count[i]
        );
    }

    std::fs::create_dir_all(dir.as_ref())?;
    write_slice_to_file(&rating_data, dir.as_ref().join("all_competitors.csv"))?;
    write_slice_to_file(&rating_rows(ratings), dir.as_ref().join("rating_history.csv"))
}
