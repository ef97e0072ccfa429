use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

use crate::db::{
    get_match_details, get_prediction_by_match_id, insert_odds, list_matches_with_predictions, list_pending_matches,
    upsert_prediction,
};
use crate::error::{AppError, Result};
use crate::models::{MatchDetails, Odds, Prediction};
use crate::services::ai_predictor::{request_ai_prediction, ChatCompletion, PromptContext};
use crate::services::batch::BatchReport;
use crate::services::football_api::FixtureSource;
use crate::services::odds_fetcher::{average_odds, find_event, FixtureKey, OddsSource};
use crate::utils::{current_season_year, season_label};

const HEAD_TO_HEAD_MEETINGS: u32 = 5;
const AVERAGE_PROVIDER: &str = "average";

/// Builds AI predictions and odds snapshots for stored matches.
pub struct PredictionService {
    pool: SqlitePool,
    fixtures: Arc<dyn FixtureSource>,
    odds: Arc<dyn OddsSource>,
    model: Arc<dyn ChatCompletion>,
    delay: Duration,
}

impl PredictionService {
    pub fn new(
        pool: SqlitePool,
        fixtures: Arc<dyn FixtureSource>,
        odds: Arc<dyn OddsSource>,
        model: Arc<dyn ChatCompletion>,
        delay: Duration,
    ) -> Self {
        Self {
            pool,
            fixtures,
            odds,
            model,
            delay,
        }
    }

    async fn load_match(&self, match_id: &str) -> Result<MatchDetails> {
        get_match_details(&self.pool, match_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("match {}", match_id)))
    }

    /// Ask the model for a prediction and store it, replacing any earlier one
    /// for the same match.
    pub async fn create_or_update_prediction(&self, match_id: &str) -> Result<Prediction> {
        let details = self.load_match(match_id).await?;

        let now = Utc::now();
        let season = season_label(now);
        let stats_season = current_season_year(now).to_string();
        let competition = details.league.api_id;
        let (home_id, away_id) = (details.home_team.api_id, details.away_team.api_id);

        let (home_stats, away_stats, head_to_head) = tokio::try_join!(
            self.fixtures.team_statistics(home_id, competition, &stats_season),
            self.fixtures.team_statistics(away_id, competition, &stats_season),
            self.fixtures.head_to_head(home_id, away_id, HEAD_TO_HEAD_MEETINGS),
        )
        .map_err(|e| {
            tracing::error!("Error gathering context for match {}: {}", match_id, e);
            e.context("failed to gather prediction context")
        })?;

        let ctx = PromptContext {
            home_team: details.home_team.name.clone(),
            away_team: details.away_team.name.clone(),
            league: details.league.name.clone(),
            season,
            home_stats,
            away_stats,
            head_to_head,
        };

        let draft = request_ai_prediction(self.model.as_ref(), &ctx).await;
        let prediction = upsert_prediction(&self.pool, match_id, &draft).await?;

        tracing::info!(
            "Prediction for {} vs {}: {} ({:.0}% confidence) H {:.2} D {:.2} A {:.2}",
            ctx.home_team,
            ctx.away_team,
            prediction.prediction,
            prediction.confidence * 100.0,
            prediction.home_chance,
            prediction.draw_chance,
            prediction.away_chance
        );

        Ok(prediction)
    }

    /// Store a fresh averaged odds row. `Ok(None)` when the board has no
    /// event for the match.
    pub async fn refresh_match_odds(&self, match_id: &str) -> Result<Option<Odds>> {
        let details = self.load_match(match_id).await?;
        let board = self.odds.odds_board().await.map_err(|e| {
            tracing::error!("Error fetching odds board: {}", e);
            e.context("failed to refresh odds")
        })?;

        let key = FixtureKey {
            api_id: details.match_info.api_id,
            home_team: &details.home_team.name,
            away_team: &details.away_team.name,
            kickoff: details.match_info.match_date,
        };
        let Some(event) = find_event(&board, &key) else {
            tracing::debug!("No odds event for match {} (fixture {})", match_id, key.api_id);
            return Ok(None);
        };

        let avg = average_odds(Some(event));
        let odds = insert_odds(&self.pool, match_id, AVERAGE_PROVIDER, avg.home_win, avg.draw, avg.away_win).await?;
        tracing::info!(
            "Odds for match {}: {:.2} / {:.2} / {:.2}",
            match_id,
            odds.home_win,
            odds.draw,
            odds.away_win
        );
        Ok(Some(odds))
    }

    /// Predict every pending match one after another, pausing between calls.
    /// Per-match failures are logged and recorded; only the initial query
    /// can fail the whole run.
    pub async fn generate_all_pending(&self) -> Result<BatchReport> {
        let pending = list_pending_matches(&self.pool, Utc::now()).await.map_err(|e| {
            tracing::error!("Error loading pending matches: {}", e);
            e.context("failed to load pending matches")
        })?;

        tracing::info!("Generating predictions for {} pending matches", pending.len());
        let mut report = BatchReport {
            attempted: pending.len(),
            ..BatchReport::default()
        };

        for (i, m) in pending.iter().enumerate() {
            if i > 0 && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match self.create_or_update_prediction(&m.id).await {
                Ok(_) => report.generated += 1,
                Err(e) => {
                    tracing::error!("Skipping match {} (fixture {}): {}", m.id, m.api_id, e);
                    report.failed.push(m.id.clone());
                }
            }
        }

        Ok(report)
    }

    pub async fn list_matches_with_predictions(&self) -> Result<Vec<MatchDetails>> {
        list_matches_with_predictions(&self.pool, Utc::now()).await.map_err(|e| {
            tracing::error!("Error fetching predictions: {}", e);
            e.context("failed to fetch predictions")
        })
    }

    pub async fn get_prediction(&self, match_id: &str) -> Result<Option<Prediction>> {
        get_prediction_by_match_id(&self.pool, match_id).await
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use crate::services::odds_fetcher::OddsEvent;
    use async_trait::async_trait;

    /// Serves a fixed board, or fails every call when `None`.
    pub struct StaticBoard(pub Option<Vec<OddsEvent>>);

    #[async_trait]
    impl OddsSource for StaticBoard {
        async fn odds_board(&self) -> Result<Vec<OddsEvent>> {
            self.0
                .clone()
                .ok_or_else(|| AppError::Upstream("odds API returned 500".to_string()))
        }
    }

    pub const GOOD_REPLY: &str = r#"{"prediction":"AWAY_WIN","confidence":0.62,"homeChance":0.2,"drawChance":0.25,"awayChance":0.55,"reasoning":"Away side in form"}"#;
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::db::test_support::{count_rows, memory_pool, seed_match};
    use crate::models::{MatchStatus, PredictionOutcome};
    use crate::services::ai_predictor::test_support::ScriptedModel;
    use crate::services::match_sync::test_support::FakeFixtures;
    use crate::services::odds_fetcher::OddsEvent;
    use chrono::Duration as ChronoDuration;
    use std::collections::HashSet;

    fn service(pool: &SqlitePool, fixtures: FakeFixtures, board: StaticBoard, model: ScriptedModel) -> PredictionService {
        PredictionService::new(
            pool.clone(),
            Arc::new(fixtures),
            Arc::new(board),
            Arc::new(model),
            Duration::ZERO,
        )
    }

    fn board_event(id: &str, prices: [(&str, f64); 3]) -> OddsEvent {
        let outcomes: Vec<serde_json::Value> = prices
            .iter()
            .map(|(name, price)| serde_json::json!({ "name": name, "price": price }))
            .collect();
        serde_json::from_value(serde_json::json!({
            "id": id,
            "bookmakers": [
                { "key": "bk1", "markets": [{ "key": "h2h", "outcomes": outcomes }] }
            ]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_missing_match_writes_nothing() {
        let pool = memory_pool().await;
        let svc = service(
            &pool,
            FakeFixtures::default(),
            StaticBoard(Some(vec![])),
            ScriptedModel::always(GOOD_REPLY),
        );

        let err = svc.create_or_update_prediction("no-such-match").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(count_rows(&pool, "predictions").await, 0);
    }

    #[tokio::test]
    async fn test_repeat_prediction_updates_single_row() {
        let pool = memory_pool().await;
        let m = seed_match(&pool, 7, Utc::now() + ChronoDuration::days(1), MatchStatus::NotStarted).await;
        let model = ScriptedModel::new(vec![
            Ok(GOOD_REPLY.to_string()),
            Ok(r#"{"prediction":"DRAW","confidence":0.4,"homeChance":0.3,"drawChance":0.4,"awayChance":0.3,"reasoning":"Even"}"#.to_string()),
        ]);
        let svc = service(&pool, FakeFixtures::default(), StaticBoard(Some(vec![])), model);

        let first = svc.create_or_update_prediction(&m.id).await.unwrap();
        let second = svc.create_or_update_prediction(&m.id).await.unwrap();

        assert_eq!(count_rows(&pool, "predictions").await, 1);
        assert_eq!(first.id, second.id);
        assert_eq!(first.prediction, PredictionOutcome::AwayWin);
        assert_eq!(second.prediction, PredictionOutcome::Draw);
        assert_eq!(svc.get_prediction(&m.id).await.unwrap().unwrap().confidence, 0.4);
    }

    #[tokio::test]
    async fn test_model_failure_stores_fallback() {
        let pool = memory_pool().await;
        let m = seed_match(&pool, 8, Utc::now() + ChronoDuration::days(1), MatchStatus::NotStarted).await;
        let model = ScriptedModel::new(vec![Err(AppError::Upstream("connection reset".to_string()))]);
        let svc = service(&pool, FakeFixtures::default(), StaticBoard(Some(vec![])), model);

        let p = svc.create_or_update_prediction(&m.id).await.unwrap();
        assert_eq!(p.prediction, PredictionOutcome::HomeWin);
        assert_eq!(p.confidence, 0.33);
        assert_eq!((p.home_chance, p.draw_chance, p.away_chance), (0.4, 0.3, 0.3));
    }

    #[tokio::test]
    async fn test_prompt_uses_league_and_season() {
        let pool = memory_pool().await;
        let m = seed_match(&pool, 9, Utc::now() + ChronoDuration::days(1), MatchStatus::NotStarted).await;
        let model = Arc::new(ScriptedModel::always(GOOD_REPLY));
        let fixtures = Arc::new(FakeFixtures::default());
        let svc = PredictionService::new(
            pool.clone(),
            fixtures.clone(),
            Arc::new(StaticBoard(Some(vec![]))),
            model.clone(),
            Duration::ZERO,
        );

        svc.create_or_update_prediction(&m.id).await.unwrap();

        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[0].contains("Team 91"));
        assert!(prompts[0].contains(&season_label(Utc::now())));

        let calls = fixtures.stats_calls.lock().unwrap();
        let teams: HashSet<i64> = calls.iter().map(|(team, _, _)| *team).collect();
        assert_eq!(teams, HashSet::from([91, 92]));
        assert!(calls.iter().all(|(_, competition, _)| *competition == 39));
    }

    #[tokio::test]
    async fn test_stats_failure_propagates() {
        let pool = memory_pool().await;
        let m = seed_match(&pool, 4, Utc::now() + ChronoDuration::days(1), MatchStatus::NotStarted).await;
        let fixtures = FakeFixtures {
            failing_stats: HashSet::from([42]),
            ..Default::default()
        };
        let svc = service(&pool, fixtures, StaticBoard(Some(vec![])), ScriptedModel::always(GOOD_REPLY));

        let err = svc.create_or_update_prediction(&m.id).await.unwrap_err();
        assert!(matches!(err, AppError::Upstream(_)));
        assert_eq!(count_rows(&pool, "predictions").await, 0);
    }

    #[tokio::test]
    async fn test_batch_continues_past_failure() {
        let pool = memory_pool().await;
        let now = Utc::now();
        let first = seed_match(&pool, 1, now + ChronoDuration::hours(1), MatchStatus::NotStarted).await;
        let second = seed_match(&pool, 2, now + ChronoDuration::hours(2), MatchStatus::NotStarted).await;
        let third = seed_match(&pool, 3, now + ChronoDuration::hours(3), MatchStatus::NotStarted).await;
        // not pending: already kicked off, or in the past
        seed_match(&pool, 5, now + ChronoDuration::hours(4), MatchStatus::Live).await;
        seed_match(&pool, 6, now - ChronoDuration::hours(4), MatchStatus::NotStarted).await;

        // home team of the second match is 21
        let fixtures = FakeFixtures {
            failing_stats: HashSet::from([21]),
            ..Default::default()
        };
        let svc = service(&pool, fixtures, StaticBoard(Some(vec![])), ScriptedModel::always(GOOD_REPLY));

        let report = svc.generate_all_pending().await.unwrap();
        assert_eq!(report.attempted, 3);
        assert_eq!(report.generated, 2);
        assert_eq!(report.failed, vec![second.id.clone()]);

        assert!(svc.get_prediction(&first.id).await.unwrap().is_some());
        assert!(svc.get_prediction(&second.id).await.unwrap().is_none());
        assert!(svc.get_prediction(&third.id).await.unwrap().is_some());

        let listed: Vec<String> = svc
            .list_matches_with_predictions()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.match_info.id)
            .collect();
        assert_eq!(listed, vec![first.id, third.id]);
    }

    #[tokio::test]
    async fn test_refresh_odds_inserts_average_row() {
        let pool = memory_pool().await;
        let m = seed_match(&pool, 12, Utc::now() + ChronoDuration::days(1), MatchStatus::NotStarted).await;
        let board = StaticBoard(Some(vec![
            board_event("999", [("1", 9.0), ("X", 9.0), ("2", 9.0)]),
            board_event("12", [("1", 1.85), ("X", 3.4), ("2", 4.2)]),
        ]));
        let svc = service(&pool, FakeFixtures::default(), board, ScriptedModel::always(GOOD_REPLY));

        let odds = svc.refresh_match_odds(&m.id).await.unwrap().unwrap();
        assert_eq!(odds.provider, "average");
        assert_eq!((odds.home_win, odds.draw, odds.away_win), (1.85, 3.4, 4.2));

        svc.refresh_match_odds(&m.id).await.unwrap();
        assert_eq!(count_rows(&pool, "odds").await, 2);
    }

    #[tokio::test]
    async fn test_refresh_odds_without_event_is_noop() {
        let pool = memory_pool().await;
        let m = seed_match(&pool, 13, Utc::now() + ChronoDuration::days(1), MatchStatus::NotStarted).await;
        let board = StaticBoard(Some(vec![board_event("999", [("1", 2.0), ("X", 3.0), ("2", 4.0)])]));
        let svc = service(&pool, FakeFixtures::default(), board, ScriptedModel::always(GOOD_REPLY));

        assert!(svc.refresh_match_odds(&m.id).await.unwrap().is_none());
        assert_eq!(count_rows(&pool, "odds").await, 0);
    }

    #[tokio::test]
    async fn test_refresh_odds_board_failure_is_upstream() {
        let pool = memory_pool().await;
        let m = seed_match(&pool, 14, Utc::now() + ChronoDuration::days(1), MatchStatus::NotStarted).await;
        let svc = service(&pool, FakeFixtures::default(), StaticBoard(None), ScriptedModel::always(GOOD_REPLY));

        let err = svc.refresh_match_odds(&m.id).await.unwrap_err();
        assert!(matches!(err, AppError::Upstream(_)));
    }
}
