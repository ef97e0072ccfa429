use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct League {
    pub id: String,
    pub api_id: i64,
    pub name: String,
    pub country: String,
    pub logo: Option<String>,
    pub flag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub id: String,
    pub api_id: i64,
    pub name: String,
    pub logo: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    NotStarted,
    Live,
    Finished,
    Postponed,
    Cancelled,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::NotStarted => "NOT_STARTED",
            MatchStatus::Live => "LIVE",
            MatchStatus::Finished => "FINISHED",
            MatchStatus::Postponed => "POSTPONED",
            MatchStatus::Cancelled => "CANCELLED",
        }
    }

    /// Map a provider short status code onto our status. Unknown codes are
    /// treated as not started.
    pub fn from_provider_code(code: &str) -> Self {
        match code {
            "LIVE" => MatchStatus::Live,
            "FT" | "AET" | "PEN" => MatchStatus::Finished,
            "PST" => MatchStatus::Postponed,
            "CANC" => MatchStatus::Cancelled,
            _ => MatchStatus::NotStarted,
        }
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NOT_STARTED" => Ok(MatchStatus::NotStarted),
            "LIVE" => Ok(MatchStatus::Live),
            "FINISHED" => Ok(MatchStatus::Finished),
            "POSTPONED" => Ok(MatchStatus::Postponed),
            "CANCELLED" => Ok(MatchStatus::Cancelled),
            other => Err(AppError::Persistence(format!("unknown match status {:?}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PredictionOutcome {
    HomeWin,
    Draw,
    AwayWin,
}

impl PredictionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionOutcome::HomeWin => "HOME_WIN",
            PredictionOutcome::Draw => "DRAW",
            PredictionOutcome::AwayWin => "AWAY_WIN",
        }
    }
}

impl fmt::Display for PredictionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PredictionOutcome {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HOME_WIN" => Ok(PredictionOutcome::HomeWin),
            "DRAW" => Ok(PredictionOutcome::Draw),
            "AWAY_WIN" => Ok(PredictionOutcome::AwayWin),
            other => Err(AppError::InvalidInput(format!("unknown outcome {:?}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    pub id: String,
    pub api_id: i64,
    pub league_id: String,
    pub home_team_id: String,
    pub away_team_id: String,
    pub match_date: DateTime<Utc>,
    pub status: MatchStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One averaged (or per-provider) price snapshot. Rows are append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Odds {
    pub id: String,
    pub match_id: String,
    pub provider: String,
    pub home_win: f64,
    pub draw: f64,
    pub away_win: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub id: String,
    pub match_id: String,
    pub home_chance: f64,
    pub draw_chance: f64,
    pub away_chance: f64,
    pub prediction: PredictionOutcome,
    pub confidence: f64,
    pub reasoning: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A match with its league, both teams, the latest odds row (if any) and
/// its prediction (if any). This is the shape the HTTP layer returns.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchDetails {
    #[serde(flatten)]
    pub match_info: Match,
    pub league: League,
    pub home_team: Team,
    pub away_team: Team,
    pub odds: Vec<Odds>,
    pub prediction: Option<Prediction>,
}

impl MatchDetails {
    pub fn latest_odds(&self) -> Option<&Odds> {
        self.odds.first()
    }
}

// Validated provider records, ready to be persisted

#[derive(Debug, Clone, PartialEq)]
pub struct LeagueInfo {
    pub api_id: i64,
    pub name: String,
    pub country: String,
    pub logo: Option<String>,
    pub flag: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TeamInfo {
    pub api_id: i64,
    pub name: String,
    pub logo: Option<String>,
}

/// Outcome, confidence, chances and reasoning produced by the AI model
/// (or the fallback), before it is attached to a match.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionDraft {
    pub prediction: PredictionOutcome,
    pub confidence: f64,
    pub home_chance: f64,
    pub draw_chance: f64,
    pub away_chance: f64,
    pub reasoning: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self { error: message.into() }
    }
}
