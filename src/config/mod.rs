use anyhow::{anyhow, Context, Result};
use chrono::FixedOffset;
use std::env;
use std::time::Duration;

/// Process-wide settings, built once at startup and handed to each client.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub football: FootballApiConfig,
    pub odds: OddsApiConfig,
    pub deepseek: DeepSeekConfig,
    /// Offset used for local calendar-day boundaries (`?date=` filters, "today").
    pub local_offset: FixedOffset,
    pub http_timeout: Duration,
    /// Pause between items of a bulk prediction run.
    pub prediction_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct FootballApiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub host: String,
    /// Timezone name passed to the provider with date queries.
    pub timezone: String,
}

#[derive(Debug, Clone)]
pub struct OddsApiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub sport_key: String,
    pub regions: String,
}

#[derive(Debug, Clone)]
pub struct DeepSeekConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let offset_hours: i32 = parse_var("LOCAL_UTC_OFFSET_HOURS", 0)?;
        let local_offset = FixedOffset::east_opt(offset_hours * 3600)
            .ok_or_else(|| anyhow!("LOCAL_UTC_OFFSET_HOURS out of range: {}", offset_hours))?;

        let timeout_secs: u64 = parse_var("HTTP_TIMEOUT_SECS", 20)?;
        if timeout_secs == 0 {
            return Err(anyhow!("HTTP_TIMEOUT_SECS must be greater than zero"));
        }

        Ok(Self {
            database_url: var_or("DATABASE_URL", "sqlite:data/matchcast.db"),
            football: FootballApiConfig {
                api_key: key_var("FOOTBALL_API_KEY"),
                base_url: var_or("FOOTBALL_API_BASE_URL", "https://api-football-v1.p.rapidapi.com/v3"),
                host: var_or("FOOTBALL_API_HOST", "api-football-v1.p.rapidapi.com"),
                timezone: var_or("FIXTURES_TIMEZONE", "America/New_York"),
            },
            odds: OddsApiConfig {
                api_key: key_var("ODDS_API_KEY"),
                base_url: var_or("ODDS_API_BASE_URL", "https://api.the-odds-api.com/v4"),
                sport_key: var_or("ODDS_SPORT_KEY", "soccer"),
                regions: var_or("ODDS_REGIONS", "us,uk,eu"),
            },
            deepseek: DeepSeekConfig {
                api_key: key_var("DEEPSEEK_API_KEY"),
                base_url: var_or("DEEPSEEK_BASE_URL", "https://api.deepseek.com/v1"),
                model: var_or("DEEPSEEK_MODEL", "deepseek-coder"),
            },
            local_offset,
            http_timeout: Duration::from_secs(timeout_secs),
            prediction_delay: Duration::from_millis(parse_var("PREDICTION_DELAY_MS", 500)?),
        })
    }

    /// Log which providers are usable without printing the keys themselves.
    pub fn log_summary(&self) {
        tracing::info!(
            "Config: db={} football_key={} odds_key={} deepseek_key={} utc_offset={} timeout={:?}",
            self.database_url,
            self.football.api_key.is_some(),
            self.odds.api_key.is_some(),
            self.deepseek.api_key.is_some(),
            self.local_offset,
            self.http_timeout,
        );
    }
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn key_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match key_var(name) {
        Some(raw) => raw.trim().parse().with_context(|| format!("invalid {}: {:?}", name, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
impl AppConfig {
    /// Offline configuration for tests: no keys, UTC day boundaries, no pacing.
    pub fn for_tests() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            football: FootballApiConfig {
                api_key: None,
                base_url: "http://127.0.0.1:9".to_string(),
                host: "localhost".to_string(),
                timezone: "UTC".to_string(),
            },
            odds: OddsApiConfig {
                api_key: None,
                base_url: "http://127.0.0.1:9".to_string(),
                sport_key: "soccer".to_string(),
                regions: "eu".to_string(),
            },
            deepseek: DeepSeekConfig {
                api_key: None,
                base_url: "http://127.0.0.1:9".to_string(),
                model: "deepseek-coder".to_string(),
            },
            local_offset: FixedOffset::east_opt(0).expect("zero offset"),
            http_timeout: Duration::from_secs(1),
            prediction_delay: Duration::ZERO,
        }
    }
}
