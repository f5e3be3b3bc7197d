pub mod data_processing;
pub mod errors;
pub mod fit_config;
pub mod indexer;
pub mod link;
pub mod metrics;
pub mod numerical;
pub mod objective;
pub mod optimizer;
pub mod summary;
