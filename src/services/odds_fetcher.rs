//! Odds board from The Odds API, resolution of a board event to one of our
//! fixtures, and averaging of head-to-head prices across bookmakers.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::config::{AppConfig, OddsApiConfig};
use crate::error::{AppError, Result};

// ── Odds API response types ───────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct OddsEvent {
    pub id: String,
    #[serde(default)]
    pub commence_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub home_team: Option<String>,
    #[serde(default)]
    pub away_team: Option<String>,
    /// Identifiers of the same event at other providers, when supplied.
    #[serde(default)]
    pub external_ids: Vec<serde_json::Value>,
    #[serde(default)]
    pub bookmakers: Vec<Bookmaker>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Bookmaker {
    pub key: String,
    #[serde(default)]
    pub markets: Vec<Market>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Market {
    pub key: String,
    #[serde(default)]
    pub outcomes: Vec<Outcome>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Outcome {
    pub name: String,
    pub price: f64,
}

/// Mean decimal prices across qualifying bookmakers, rounded to 2 places.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AverageOdds {
    pub home_win: f64,
    pub draw: f64,
    pub away_win: f64,
}

#[async_trait]
pub trait OddsSource: Send + Sync {
    /// The current odds board across bookmakers for the configured sport.
    async fn odds_board(&self) -> Result<Vec<OddsEvent>>;
}

pub struct OddsApiClient {
    client: Client,
    config: OddsApiConfig,
}

impl OddsApiClient {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.http_timeout).build()?;
        Ok(Self {
            client,
            config: config.odds.clone(),
        })
    }
}

#[async_trait]
impl OddsSource for OddsApiClient {
    async fn odds_board(&self) -> Result<Vec<OddsEvent>> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| AppError::Upstream("ODDS_API_KEY not set".to_string()))?;

        let url = format!(
            "{}/sports/{}/odds",
            self.config.base_url.trim_end_matches('/'),
            self.config.sport_key
        );

        let resp = self
            .client
            .get(&url)
            .query(&[
                ("apiKey", api_key.as_str()),
                ("regions", self.config.regions.as_str()),
                ("markets", "h2h"),
                ("oddsFormat", "decimal"),
                ("dateFormat", "iso"),
            ])
            .send()
            .await?;

        let status = resp.status();
        if status == 401 {
            return Err(AppError::Upstream("Odds API: invalid API key (401)".to_string()));
        }
        if status == 422 {
            return Err(AppError::Upstream(format!(
                "Odds API: sport {} not in subscription (422)",
                self.config.sport_key
            )));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!("Odds API HTTP {}: {}", status, body)));
        }

        let body = resp.text().await?;
        let events: Vec<OddsEvent> = serde_json::from_str(&body)?;
        tracing::debug!("Odds: board has {} events", events.len());
        Ok(events)
    }
}

/// What we know about a fixture when looking for it on the odds board.
#[derive(Debug, Clone, Copy)]
pub struct FixtureKey<'a> {
    pub api_id: i64,
    pub home_team: &'a str,
    pub away_team: &'a str,
    pub kickoff: DateTime<Utc>,
}

/// Find the board event for a fixture. Id comparison first (event id or any
/// external id equal to the fixture id); failing that, both team names must
/// match and the event must start within 4 hours of kickoff.
pub fn find_event<'a>(board: &'a [OddsEvent], key: &FixtureKey<'_>) -> Option<&'a OddsEvent> {
    let wanted = key.api_id.to_string();
    let by_id = board.iter().find(|event| {
        event.id == wanted
            || event.external_ids.iter().any(|ext| match ext {
                serde_json::Value::Number(n) => n.as_i64() == Some(key.api_id),
                serde_json::Value::String(s) => s == &wanted,
                _ => false,
            })
    });
    if by_id.is_some() {
        return by_id;
    }

    let window = Duration::hours(4);
    board.iter().find(|event| {
        let (Some(home), Some(away), Some(start)) = (&event.home_team, &event.away_team, event.commence_time) else {
            return false;
        };
        (start - key.kickoff).abs() <= window
            && names_match(home, key.home_team)
            && names_match(away, key.away_team)
    })
}

/// Average head-to-head prices across every bookmaker whose h2h market has
/// exactly three outcomes with home, draw and away all identifiable.
/// Returns all zeros when nothing qualifies.
pub fn average_odds(event: Option<&OddsEvent>) -> AverageOdds {
    let Some(event) = event else {
        return AverageOdds::default();
    };

    let is_home = |name: &str| {
        name.eq_ignore_ascii_case("home")
            || name == "1"
            || event.home_team.as_deref().is_some_and(|t| name.eq_ignore_ascii_case(t))
    };
    let is_draw = |name: &str| name.eq_ignore_ascii_case("draw") || name.eq_ignore_ascii_case("x");
    let is_away = |name: &str| {
        name.eq_ignore_ascii_case("away")
            || name == "2"
            || event.away_team.as_deref().is_some_and(|t| name.eq_ignore_ascii_case(t))
    };

    let mut totals = (0.0, 0.0, 0.0);
    let mut count = 0u32;

    for bookmaker in &event.bookmakers {
        let Some(market) = bookmaker.markets.iter().find(|m| m.key == "h2h") else {
            continue;
        };
        if market.outcomes.len() != 3 {
            continue;
        }

        let price = |pred: &dyn Fn(&str) -> bool| market.outcomes.iter().find(|o| pred(&o.name)).map(|o| o.price);
        if let (Some(h), Some(d), Some(a)) = (price(&is_home), price(&is_draw), price(&is_away)) {
            totals.0 += h;
            totals.1 += d;
            totals.2 += a;
            count += 1;
        } else {
            tracing::debug!("Odds: bookmaker {} h2h market lacks a recognizable outcome", bookmaker.key);
        }
    }

    if count == 0 {
        return AverageOdds::default();
    }

    let n = count as f64;
    AverageOdds {
        home_win: round2(totals.0 / n),
        draw: round2(totals.1 / n),
        away_win: round2(totals.2 / n),
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Fuzzy team-name match: normalises common suffixes, then compares with
/// Jaro-Winkler similarity.
fn names_match(a: &str, b: &str) -> bool {
    let norm = |s: &str| -> String {
        s.to_lowercase()
            .replace('.', "")
            .replace('-', " ")
            .split_whitespace()
            .filter(|w| !matches!(*w, "fc" | "afc" | "sc" | "cf"))
            .collect::<Vec<_>>()
            .join(" ")
    };
    let a = norm(a);
    let b = norm(b);
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a == b || strsim::jaro_winkler(&a, &b) >= 0.85
}
