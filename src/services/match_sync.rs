use chrono::{FixedOffset, NaiveDate, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::db::{
    get_match_details, get_or_create_league, get_or_create_team, list_matches_between, list_upcoming_matches,
    upsert_match,
};
use crate::error::{AppError, Result};
use crate::models::{MatchDetails, MatchStatus};
use crate::services::football_api::{Fixture, FixtureSource, MAJOR_COMPETITIONS};
use crate::utils::local_day_bounds;

const COMPETITION_FIXTURE_LIMIT: u32 = 10;

/// Pulls fixtures from the provider and keeps League/Team/Match rows in step.
/// Syncing is idempotent per external fixture id.
pub struct MatchSyncService {
    pool: SqlitePool,
    fixtures: Arc<dyn FixtureSource>,
    local_offset: FixedOffset,
}

impl MatchSyncService {
    pub fn new(pool: SqlitePool, fixtures: Arc<dyn FixtureSource>, local_offset: FixedOffset) -> Self {
        Self {
            pool,
            fixtures,
            local_offset,
        }
    }

    /// Upsert one fixture: league, then both teams, then the match.
    pub async fn sync_fixture(&self, fixture: &Fixture) -> Result<MatchDetails> {
        let league = get_or_create_league(&self.pool, &fixture.league).await?;
        let home_team = get_or_create_team(&self.pool, &fixture.home).await?;
        let away_team = get_or_create_team(&self.pool, &fixture.away).await?;

        let status = MatchStatus::from_provider_code(&fixture.status_code);
        let stored = upsert_match(
            &self.pool,
            fixture.api_id,
            &league.id,
            &home_team.id,
            &away_team.id,
            fixture.kickoff,
            status,
        )
        .await?;

        tracing::debug!(
            "Synced fixture {} ({} vs {}) as {} [{}]",
            fixture.api_id,
            fixture.home.name,
            fixture.away.name,
            stored.id,
            status
        );

        get_match_details(&self.pool, &stored.id)
            .await?
            .ok_or_else(|| AppError::Persistence(format!("match {} missing after sync", stored.id)))
    }

    async fn sync_all(&self, fixtures: &[Fixture]) -> Result<Vec<MatchDetails>> {
        let mut synced = Vec::with_capacity(fixtures.len());
        for fixture in fixtures {
            synced.push(self.sync_fixture(fixture).await?);
        }
        Ok(synced)
    }

    pub async fn sync_upcoming_fixtures(&self, date: Option<NaiveDate>) -> Result<Vec<MatchDetails>> {
        let result = async {
            let fixtures = self.fixtures.upcoming_fixtures(date).await?;
            self.sync_all(&fixtures).await
        }
        .await;

        match result {
            Ok(synced) => {
                tracing::info!("Synced {} upcoming fixtures", synced.len());
                Ok(synced)
            }
            Err(e) => {
                tracing::error!("Error syncing upcoming matches: {}", e);
                Err(e.context("failed to sync upcoming matches"))
            }
        }
    }

    /// Sync the next fixtures of every major competition for `season`.
    pub async fn sync_competition_fixtures(&self, season: &str) -> Result<Vec<MatchDetails>> {
        let mut all = Vec::new();
        for (name, competition_id) in MAJOR_COMPETITIONS {
            let result = async {
                let fixtures = self
                    .fixtures
                    .fixtures_by_competition(competition_id, season, COMPETITION_FIXTURE_LIMIT)
                    .await?;
                self.sync_all(&fixtures).await
            }
            .await;

            match result {
                Ok(synced) => {
                    tracing::info!("Synced {} fixtures for {}", synced.len(), name);
                    all.extend(synced);
                }
                Err(e) => {
                    tracing::error!("Error syncing {} fixtures: {}", name, e);
                    return Err(e.context("failed to sync league matches"));
                }
            }
        }
        Ok(all)
    }

    pub async fn sync_fixture_by_id(&self, fixture_id: i64) -> Result<MatchDetails> {
        let fixture = self.fixtures.fixture_by_id(fixture_id).await.map_err(|e| {
            tracing::error!("Error fetching fixture {}: {}", fixture_id, e);
            e.context(format!("failed to fetch fixture {}", fixture_id))
        })?;
        self.sync_fixture(&fixture).await
    }

    /// With a date: every match kicking off on that local calendar day.
    /// Without: not-started matches from now on. Both ordered by kickoff.
    pub async fn list_matches(&self, date: Option<NaiveDate>) -> Result<Vec<MatchDetails>> {
        let result = match date {
            Some(date) => {
                let (start, end) = local_day_bounds(date, self.local_offset);
                list_matches_between(&self.pool, start, end).await
            }
            None => list_upcoming_matches(&self.pool, Utc::now()).await,
        };

        result.map_err(|e| {
            tracing::error!("Error fetching matches: {}", e);
            e.context("failed to fetch matches")
        })
    }

    pub async fn get_match(&self, match_id: &str) -> Result<Option<MatchDetails>> {
        get_match_details(&self.pool, match_id).await
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use crate::models::{LeagueInfo, TeamInfo};
    use crate::services::football_api::HeadToHeadMeeting;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::collections::HashSet;
    use std::sync::Mutex;

    pub fn fixture(api_id: i64, home: i64, away: i64, kickoff: DateTime<Utc>, status: &str) -> Fixture {
        Fixture {
            api_id,
            kickoff,
            status_code: status.to_string(),
            league: LeagueInfo {
                api_id: 39,
                name: "Premier League".to_string(),
                country: "England".to_string(),
                logo: None,
                flag: None,
            },
            home: TeamInfo {
                api_id: home,
                name: format!("Home {}", home),
                logo: None,
            },
            away: TeamInfo {
                api_id: away,
                name: format!("Away {}", away),
                logo: None,
            },
        }
    }

    /// In-process fixtures provider. Statistics requests for teams listed in
    /// `failing_stats` fail with an upstream error.
    #[derive(Default)]
    pub struct FakeFixtures {
        pub fixtures: Vec<Fixture>,
        pub failing_stats: HashSet<i64>,
        pub fail_all: bool,
        pub stats_calls: Mutex<Vec<(i64, i64, String)>>,
    }

    #[async_trait]
    impl FixtureSource for FakeFixtures {
        async fn upcoming_fixtures(&self, _date: Option<NaiveDate>) -> Result<Vec<Fixture>> {
            if self.fail_all {
                return Err(AppError::Upstream("fixtures API error 503".to_string()));
            }
            Ok(self.fixtures.clone())
        }

        async fn fixtures_by_competition(&self, competition_id: i64, _season: &str, limit: u32) -> Result<Vec<Fixture>> {
            Ok(self
                .fixtures
                .iter()
                .filter(|f| f.league.api_id == competition_id)
                .take(limit as usize)
                .cloned()
                .collect())
        }

        async fn fixture_by_id(&self, fixture_id: i64) -> Result<Fixture> {
            self.fixtures
                .iter()
                .find(|f| f.api_id == fixture_id)
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("fixture {}", fixture_id)))
        }

        async fn team_statistics(&self, team_id: i64, competition_id: i64, season: &str) -> Result<serde_json::Value> {
            self.stats_calls
                .lock()
                .unwrap()
                .push((team_id, competition_id, season.to_string()));
            if self.failing_stats.contains(&team_id) {
                return Err(AppError::Upstream(format!("stats for team {} unavailable", team_id)));
            }
            Ok(serde_json::json!({ "team": team_id, "form": "WDWLW" }))
        }

        async fn head_to_head(&self, _team_a: i64, _team_b: i64, _last: u32) -> Result<Vec<HeadToHeadMeeting>> {
            Ok(vec![])
        }
    }
}
