use crate::data_processing::{Game, filter_min_games, read_games};
use crate::errors::RatingError;
use crate::link::{AnyLink, LinkFunction, get_link_function_by_name};
use crate::objective::{Hyperparams, Objective};
use crate::optimizer::{FitResult, Method, Optimizer};
use serde::Deserialize;
use std::path::{Path, PathBuf};

fn default_link() -> String {
    "parametric".to_owned()
}

fn one() -> usize {
    1
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct FitConfig {
    /// A `.csv` or `.json` file of games.
    pub games_source: PathBuf,
    #[serde(default)]
    pub min_games: usize,
    #[serde(default = "default_link")]
    pub link: String,
    #[serde(default)]
    pub method: Method,
    /// Zero means [`crate::optimizer::ITERS_PER_VARIABLE`] iterations per optimization variable.
    #[serde(default)]
    pub max_iters: u64,
    #[serde(default)]
    pub hyperparams: Hyperparams,
    pub seed: Option<u64>,
    /// Number of independently seeded fits; the best one is kept.
    #[serde(default = "one")]
    pub restarts: usize,
    pub output_dir: Option<PathBuf>,
}

impl FitConfig {
    pub fn from_json5(text: &str) -> Result<Self, RatingError> {
        // json5 rather than serde_json, so configs may carry comments and Infinity
        Ok(json5::from_str(text)?)
    }

    pub fn from_file(source: impl AsRef<Path>) -> Result<Self, RatingError> {
        let config = Self::from_json5(&std::fs::read_to_string(source)?)?;
        tracing::info!("Loaded fit config:\n{:?}", config);
        Ok(config)
    }

    pub fn load_games(&self) -> Result<Vec<Game>, RatingError> {
        let games = read_games(&self.games_source)?;
        Ok(filter_min_games(&games, self.min_games))
    }

    fn restart_seeds(&self) -> Vec<u64> {
        if self.restarts <= 1 {
            return vec![];
        }
        let base = self.seed.unwrap_or(0);
        (0..self.restarts as u64).map(|i| base.wrapping_add(i)).collect()
    }

    pub fn fit_games(&self, games: &[Game]) -> Result<FitResult<AnyLink>, RatingError> {
        let link = get_link_function_by_name(&self.link)?;
        if self.method.uses_gradient() && link.differentiable().is_none() {
            tracing::warn!(
                "The {} link has no analytic gradient; {:?} will use finite differences",
                self.link,
                self.method
            );
        }
        let objective = Objective::new(games, link, self.hyperparams)?;
        let optimizer = Optimizer::new(objective, self.seed);
        optimizer.run_restarts(&self.restart_seeds(), self.method, self.max_iters)
    }

    pub fn fit(&self) -> Result<FitResult<AnyLink>, RatingError> {
        self.fit_games(&self.load_games()?)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use claims::{assert_err, assert_ok};

    #[test]
    fn test_defaults() {
        let config = assert_ok!(FitConfig::from_json5("{ games_source: 'games.csv' }"));
        assert_eq!(config.games_source, PathBuf::from("games.csv"));
        assert_eq!(config.min_games, 0);
        assert_eq!(config.link, "parametric");
        assert_eq!(config.method, Method::Lbfgs);
        assert_eq!(config.max_iters, 0);
        assert_eq!(config.hyperparams, Hyperparams::default());
        assert_eq!(config.seed, None);
        assert!(config.restart_seeds().is_empty());
    }

    #[test]
    fn test_full_config() {
        let text = r#"{
            // comments are allowed
            games_source: "data/games.json",
            min_games: 3,
            link: "nonparametric",
            method: "nelder-mead",
            max_iters: 500,
            hyperparams: { smoothness: 20, rating_reg: 0 },
            seed: 42,
            restarts: 3,
        }"#;
        let config = assert_ok!(FitConfig::from_json5(text));
        assert_eq!(config.method, Method::NelderMead);
        assert_eq!(config.hyperparams.smoothness, 20.);
        assert_eq!(config.hyperparams.rating_reg, 0.);
        assert_eq!(config.hyperparams.link_hard_reg, Hyperparams::default().link_hard_reg);
        assert_eq!(config.restart_seeds(), vec![42, 43, 44]);

        assert_err!(FitConfig::from_json5("{ min_games: 3 }"));
        assert_err!(FitConfig::from_json5("{ games_source: 'a.csv', method: 'simplex' }"));
        let newton = assert_ok!(FitConfig::from_json5("{ games_source: 'a.csv', method: 'newton-cg' }"));
        assert_eq!(newton.method, Method::NewtonCg);
        let symmetric = assert_ok!(FitConfig::from_json5("{ games_source: 'a.csv', hyperparams: { link_symmetry_reg: 0 } }"));
        assert_eq!(symmetric.hyperparams.link_symmetry_reg, 0.);
    }

    #[test]
    fn test_fit_from_file() {
        let dir = std::env::temp_dir().join(format!("dynamic-elo-fit-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let games_file = dir.join("games.csv");
        std::fs::write(
            &games_file,
            "competitor1,competitor2,date,result\n\
             1,2,2021-03-01,1-0\n\
             2,3,2021-03-01,1-0\n\
             1,3,2021-03-05,1/2-1/2\n\
             3,2,2021-03-09,0-1\n\
             4,1,2021-03-09,1-0\n",
        )
        .unwrap();
        let config = FitConfig::from_json5(&format!(
            "{{ games_source: {:?}, min_games: 2, max_iters: 200, seed: 9 }}",
            games_file
        ))
        .unwrap();

        let games = config.load_games().unwrap();
        assert_eq!(games.len(), 4);
        let fit = config.fit().unwrap();
        assert_eq!(fit.ratings.len(), 3);
        assert!(!fit.ratings.contains_key(&4));
        assert!(fit.link.probability(0.2) > fit.link.probability(-0.2));
        assert!((fit.link.probability(0.) - 0.5).abs() < 0.1);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
