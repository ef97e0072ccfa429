use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::{AppConfig, FootballApiConfig};
use crate::error::{AppError, Result};
use crate::models::{LeagueInfo, TeamInfo};

/// Competitions synced by `sync_competition_fixtures`, by provider league id.
pub const MAJOR_COMPETITIONS: [(&str, i64); 7] = [
    ("Premier League", 39),
    ("La Liga", 140),
    ("Bundesliga", 78),
    ("Serie A", 135),
    ("Ligue 1", 61),
    ("Champions League", 2),
    ("Europa League", 3),
];

/// A scheduled match as reported by the fixtures provider, validated.
#[derive(Debug, Clone, PartialEq)]
pub struct Fixture {
    pub api_id: i64,
    pub kickoff: DateTime<Utc>,
    /// Provider short status code ("NS", "FT", "PST", ...).
    pub status_code: String,
    pub league: LeagueInfo,
    pub home: TeamInfo,
    pub away: TeamInfo,
}

/// One past meeting between two teams, as fed to the prediction prompt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeadToHeadMeeting {
    pub fixture_id: i64,
    pub date: DateTime<Utc>,
    pub league: String,
    pub home_team: String,
    pub away_team: String,
    pub home_goals: Option<i32>,
    pub away_goals: Option<i32>,
    pub status: String,
}

#[async_trait]
pub trait FixtureSource: Send + Sync {
    /// Fixtures on `date`, or on today's local date when `None`.
    async fn upcoming_fixtures(&self, date: Option<NaiveDate>) -> Result<Vec<Fixture>>;

    /// The next `limit` fixtures of a competition/season pair.
    async fn fixtures_by_competition(&self, competition_id: i64, season: &str, limit: u32) -> Result<Vec<Fixture>>;

    async fn fixture_by_id(&self, fixture_id: i64) -> Result<Fixture>;

    /// Opaque statistics blob, only used as prompt input.
    async fn team_statistics(&self, team_id: i64, competition_id: i64, season: &str) -> Result<serde_json::Value>;

    async fn head_to_head(&self, team_a: i64, team_b: i64, last: u32) -> Result<Vec<HeadToHeadMeeting>>;
}

// ── api-football structures ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    errors: serde_json::Value,
    response: T,
}

#[derive(Debug, Deserialize)]
struct RawFixture {
    fixture: RawFixtureInfo,
    league: RawLeague,
    teams: RawTeams,
    #[serde(default)]
    goals: Option<RawGoals>,
}

#[derive(Debug, Deserialize)]
struct RawFixtureInfo {
    id: i64,
    date: String,
    status: RawStatus,
}

#[derive(Debug, Deserialize)]
struct RawStatus {
    short: String,
}

#[derive(Debug, Deserialize)]
struct RawLeague {
    id: i64,
    name: String,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    logo: Option<String>,
    #[serde(default)]
    flag: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTeams {
    home: RawTeam,
    away: RawTeam,
}

#[derive(Debug, Deserialize)]
struct RawTeam {
    id: i64,
    name: String,
    #[serde(default)]
    logo: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawGoals {
    home: Option<i32>,
    away: Option<i32>,
}

impl TryFrom<RawFixture> for Fixture {
    type Error = AppError;

    fn try_from(raw: RawFixture) -> Result<Self> {
        let kickoff = DateTime::parse_from_rfc3339(&raw.fixture.date)
            .map_err(|e| {
                AppError::Upstream(format!("fixture {} has bad date {:?}: {}", raw.fixture.id, raw.fixture.date, e))
            })?
            .with_timezone(&Utc);

        Ok(Fixture {
            api_id: raw.fixture.id,
            kickoff,
            status_code: raw.fixture.status.short,
            league: LeagueInfo {
                api_id: raw.league.id,
                name: raw.league.name,
                country: raw.league.country.unwrap_or_default(),
                logo: raw.league.logo,
                flag: raw.league.flag,
            },
            home: TeamInfo {
                api_id: raw.teams.home.id,
                name: raw.teams.home.name,
                logo: raw.teams.home.logo,
            },
            away: TeamInfo {
                api_id: raw.teams.away.id,
                name: raw.teams.away.name,
                logo: raw.teams.away.logo,
            },
        })
    }
}

impl From<RawFixture> for HeadToHeadMeeting {
    fn from(raw: RawFixture) -> Self {
        let date = DateTime::parse_from_rfc3339(&raw.fixture.date)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let goals = raw.goals.unwrap_or(RawGoals { home: None, away: None });
        HeadToHeadMeeting {
            fixture_id: raw.fixture.id,
            date,
            league: raw.league.name,
            home_team: raw.teams.home.name,
            away_team: raw.teams.away.name,
            home_goals: goals.home,
            away_goals: goals.away,
            status: raw.fixture.status.short,
        }
    }
}

/// Provider-level errors arrive with HTTP 200 and a non-empty `errors` field.
fn check_provider_errors(errors: &serde_json::Value) -> Result<()> {
    let empty = match errors {
        serde_json::Value::Null => true,
        serde_json::Value::Array(items) => items.is_empty(),
        serde_json::Value::Object(map) => map.is_empty(),
        _ => false,
    };
    if empty {
        Ok(())
    } else {
        Err(AppError::Upstream(format!("fixtures API reported errors: {}", errors)))
    }
}

/// Validate a fixtures list. Individual records that fail validation are
/// dropped with a warning rather than failing the whole batch.
fn fixtures_from_body(body: &str) -> Result<Vec<Fixture>> {
    let envelope: Envelope<Vec<RawFixture>> = serde_json::from_str(body)?;
    check_provider_errors(&envelope.errors)?;

    let mut fixtures = Vec::with_capacity(envelope.response.len());
    for raw in envelope.response {
        match Fixture::try_from(raw) {
            Ok(f) => fixtures.push(f),
            Err(e) => tracing::warn!("Skipping fixture: {}", e),
        }
    }
    Ok(fixtures)
}

fn head_to_head_from_body(body: &str) -> Result<Vec<HeadToHeadMeeting>> {
    let envelope: Envelope<Vec<RawFixture>> = serde_json::from_str(body)?;
    check_provider_errors(&envelope.errors)?;
    Ok(envelope.response.into_iter().map(HeadToHeadMeeting::from).collect())
}

/// Today's calendar date at the given offset.
pub fn local_today(offset: FixedOffset) -> NaiveDate {
    Utc::now().with_timezone(&offset).date_naive()
}

// ── FootballApiClient ────────────────────────────────────────────────────────

pub struct FootballApiClient {
    client: Client,
    config: FootballApiConfig,
    local_offset: FixedOffset,
}

impl FootballApiClient {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.http_timeout).build()?;
        Ok(Self {
            client,
            config: config.football.clone(),
            local_offset: config.local_offset,
        })
    }

    async fn get_body(&self, path: &str, query: &[(&str, String)]) -> Result<String> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| AppError::Upstream("FOOTBALL_API_KEY not set".to_string()))?;

        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), path);
        let response = self
            .client
            .get(&url)
            .header("x-rapidapi-key", api_key)
            .header("x-rapidapi-host", &self.config.host)
            .query(query)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!("fixtures API {} error {}: {}", path, status, body)));
        }

        Ok(response.text().await?)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let body = self.get_body(path, query).await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl FixtureSource for FootballApiClient {
    async fn upcoming_fixtures(&self, date: Option<NaiveDate>) -> Result<Vec<Fixture>> {
        let date = date.unwrap_or_else(|| local_today(self.local_offset));
        tracing::info!("Fetching fixtures for {} from api-football…", date);

        let body = self
            .get_body(
                "fixtures",
                &[
                    ("date", date.format("%Y-%m-%d").to_string()),
                    ("timezone", self.config.timezone.clone()),
                ],
            )
            .await?;
        fixtures_from_body(&body)
    }

    async fn fixtures_by_competition(&self, competition_id: i64, season: &str, limit: u32) -> Result<Vec<Fixture>> {
        tracing::info!("Fetching next {} fixtures for competition {} ({})…", limit, competition_id, season);

        let body = self
            .get_body(
                "fixtures",
                &[
                    ("league", competition_id.to_string()),
                    ("season", season.to_string()),
                    ("next", limit.to_string()),
                ],
            )
            .await?;
        fixtures_from_body(&body)
    }

    async fn fixture_by_id(&self, fixture_id: i64) -> Result<Fixture> {
        let body = self.get_body("fixtures", &[("id", fixture_id.to_string())]).await?;
        let envelope: Envelope<Vec<RawFixture>> = serde_json::from_str(&body)?;
        check_provider_errors(&envelope.errors)?;

        let raw = envelope
            .response
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound(format!("fixture {}", fixture_id)))?;
        Fixture::try_from(raw)
    }

    async fn team_statistics(&self, team_id: i64, competition_id: i64, season: &str) -> Result<serde_json::Value> {
        let envelope: Envelope<serde_json::Value> = self
            .get_json(
                "teams/statistics",
                &[
                    ("team", team_id.to_string()),
                    ("league", competition_id.to_string()),
                    ("season", season.to_string()),
                ],
            )
            .await?;
        check_provider_errors(&envelope.errors)?;
        Ok(envelope.response)
    }

    async fn head_to_head(&self, team_a: i64, team_b: i64, last: u32) -> Result<Vec<HeadToHeadMeeting>> {
        let body = self
            .get_body(
                "fixtures/headtohead",
                &[("h2h", format!("{}-{}", team_a, team_b)), ("last", last.to_string())],
            )
            .await?;
        head_to_head_from_body(&body)
    }
}
