pub mod ai_predictor;
pub mod batch;
pub mod football_api;
pub mod match_sync;
pub mod odds_fetcher;
pub mod predictor;

pub use ai_predictor::DeepSeekClient;
pub use batch::{BatchStatus, BatchTracker};
pub use football_api::FootballApiClient;
pub use match_sync::MatchSyncService;
pub use odds_fetcher::OddsApiClient;
pub use predictor::PredictionService;
