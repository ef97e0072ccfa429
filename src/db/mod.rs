use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::*;

pub async fn create_pool(database_url: &str) -> anyhow::Result<SqlitePool> {
    // Strip the "sqlite:" prefix to get the file path, create parent dir if needed
    let file_path = database_url
        .strip_prefix("sqlite:///")
        .or_else(|| database_url.strip_prefix("sqlite://"))
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(database_url);

    if !file_path.starts_with(":memory:") {
        if let Some(parent) = std::path::Path::new(file_path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
        }
    }

    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePool::connect_with(options).await?;
    Ok(pool)
}

/// Create tables and indexes. Safe to run on every start.
pub async fn init_database_with_pool(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS leagues (
            id TEXT PRIMARY KEY,
            api_id INTEGER NOT NULL UNIQUE,
            name TEXT NOT NULL,
            country TEXT NOT NULL,
            logo TEXT,
            flag TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS teams (
            id TEXT PRIMARY KEY,
            api_id INTEGER NOT NULL UNIQUE,
            name TEXT NOT NULL,
            logo TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS matches (
            id TEXT PRIMARY KEY,
            api_id INTEGER NOT NULL UNIQUE,
            league_id TEXT NOT NULL,
            home_team_id TEXT NOT NULL,
            away_team_id TEXT NOT NULL,
            match_date TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'NOT_STARTED',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY (league_id) REFERENCES leagues (id),
            FOREIGN KEY (home_team_id) REFERENCES teams (id),
            FOREIGN KEY (away_team_id) REFERENCES teams (id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // odds: append-only history, latest row per match is "current"
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS odds (
            id TEXT PRIMARY KEY,
            match_id TEXT NOT NULL,
            provider TEXT NOT NULL,
            home_win REAL NOT NULL,
            draw REAL NOT NULL,
            away_win REAL NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY (match_id) REFERENCES matches (id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS predictions (
            id TEXT PRIMARY KEY,
            match_id TEXT NOT NULL UNIQUE,
            home_chance REAL NOT NULL,
            draw_chance REAL NOT NULL,
            away_chance REAL NOT NULL,
            prediction TEXT NOT NULL,
            confidence REAL NOT NULL,
            reasoning TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY (match_id) REFERENCES matches (id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_matches_date ON matches(match_date)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_matches_status ON matches(status)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_odds_match_created ON odds(match_id, created_at)")
        .execute(pool)
        .await?;

    tracing::info!("Database initialized successfully");
    Ok(())
}

/// Fixed-width RFC 3339 so that text order in SQLite is chronological order.
pub fn to_db_time(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn from_db_time(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

// League / team operations

/// Insert the league unless one with the same external id exists, then
/// return the stored row. The first writer's data wins.
pub async fn get_or_create_league(pool: &SqlitePool, info: &LeagueInfo) -> Result<League> {
    sqlx::query(
        r#"
        INSERT INTO leagues (id, api_id, name, country, logo, flag, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(api_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(info.api_id)
    .bind(&info.name)
    .bind(&info.country)
    .bind(&info.logo)
    .bind(&info.flag)
    .bind(to_db_time(Utc::now()))
    .execute(pool)
    .await?;

    let row = sqlx::query("SELECT * FROM leagues WHERE api_id = ?")
        .bind(info.api_id)
        .fetch_one(pool)
        .await?;

    Ok(League {
        id: row.try_get("id")?,
        api_id: row.try_get("api_id")?,
        name: row.try_get("name")?,
        country: row.try_get("country")?,
        logo: row.try_get("logo")?,
        flag: row.try_get("flag")?,
    })
}

pub async fn get_or_create_team(pool: &SqlitePool, info: &TeamInfo) -> Result<Team> {
    sqlx::query(
        r#"
        INSERT INTO teams (id, api_id, name, logo, created_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(api_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(info.api_id)
    .bind(&info.name)
    .bind(&info.logo)
    .bind(to_db_time(Utc::now()))
    .execute(pool)
    .await?;

    let row = sqlx::query("SELECT * FROM teams WHERE api_id = ?")
        .bind(info.api_id)
        .fetch_one(pool)
        .await?;

    Ok(Team {
        id: row.try_get("id")?,
        api_id: row.try_get("api_id")?,
        name: row.try_get("name")?,
        logo: row.try_get("logo")?,
    })
}

// Match operations

/// Create the match, or for an already known external id update only its
/// status and kickoff. League and team associations are never re-resolved.
pub async fn upsert_match(
    pool: &SqlitePool,
    api_id: i64,
    league_id: &str,
    home_team_id: &str,
    away_team_id: &str,
    match_date: DateTime<Utc>,
    status: MatchStatus,
) -> Result<Match> {
    let now = to_db_time(Utc::now());
    sqlx::query(
        r#"
        INSERT INTO matches
        (id, api_id, league_id, home_team_id, away_team_id, match_date, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(api_id) DO UPDATE SET
            status     = excluded.status,
            match_date = excluded.match_date,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(api_id)
    .bind(league_id)
    .bind(home_team_id)
    .bind(away_team_id)
    .bind(to_db_time(match_date))
    .bind(status.as_str())
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    get_match_by_api_id(pool, api_id)
        .await?
        .ok_or_else(|| AppError::Persistence(format!("match {} vanished after upsert", api_id)))
}

fn match_from_row(row: &SqliteRow) -> Result<Match> {
    Ok(Match {
        id: row.try_get("id")?,
        api_id: row.try_get("api_id")?,
        league_id: row.try_get("league_id")?,
        home_team_id: row.try_get("home_team_id")?,
        away_team_id: row.try_get("away_team_id")?,
        match_date: from_db_time(&row.try_get::<String, _>("match_date")?)?,
        status: row.try_get::<String, _>("status")?.parse()?,
        created_at: from_db_time(&row.try_get::<String, _>("created_at")?)?,
        updated_at: from_db_time(&row.try_get::<String, _>("updated_at")?)?,
    })
}

pub async fn get_match_by_api_id(pool: &SqlitePool, api_id: i64) -> Result<Option<Match>> {
    let row = sqlx::query("SELECT * FROM matches WHERE api_id = ?")
        .bind(api_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(match_from_row).transpose()
}

const DETAILS_SELECT: &str = r#"
    SELECT m.*,
           l.api_id  AS league_api_id,
           l.name    AS league_name,
           l.country AS league_country,
           l.logo    AS league_logo,
           l.flag    AS league_flag,
           ht.api_id AS home_api_id,
           ht.name   AS home_name,
           ht.logo   AS home_logo,
           at.api_id AS away_api_id,
           at.name   AS away_name,
           at.logo   AS away_logo
    FROM matches m
    JOIN leagues l ON l.id = m.league_id
    JOIN teams ht ON ht.id = m.home_team_id
    JOIN teams at ON at.id = m.away_team_id
"#;

/// Map a `DETAILS_SELECT` row and load its latest odds row and prediction.
async fn details_from_row(pool: &SqlitePool, row: &SqliteRow) -> Result<MatchDetails> {
    let match_info = match_from_row(row)?;

    let league = League {
        id: match_info.league_id.clone(),
        api_id: row.try_get("league_api_id")?,
        name: row.try_get("league_name")?,
        country: row.try_get("league_country")?,
        logo: row.try_get("league_logo")?,
        flag: row.try_get("league_flag")?,
    };
    let home_team = Team {
        id: match_info.home_team_id.clone(),
        api_id: row.try_get("home_api_id")?,
        name: row.try_get("home_name")?,
        logo: row.try_get("home_logo")?,
    };
    let away_team = Team {
        id: match_info.away_team_id.clone(),
        api_id: row.try_get("away_api_id")?,
        name: row.try_get("away_name")?,
        logo: row.try_get("away_logo")?,
    };

    let odds: Vec<Odds> = get_latest_odds(pool, &match_info.id).await?.into_iter().collect();
    let prediction = get_prediction_by_match_id(pool, &match_info.id).await?;

    Ok(MatchDetails {
        match_info,
        league,
        home_team,
        away_team,
        odds,
        prediction,
    })
}

async fn details_from_rows(pool: &SqlitePool, rows: &[SqliteRow]) -> Result<Vec<MatchDetails>> {
    let mut matches = Vec::with_capacity(rows.len());
    for row in rows {
        matches.push(details_from_row(pool, row).await?);
    }
    Ok(matches)
}

pub async fn get_match_details(pool: &SqlitePool, match_id: &str) -> Result<Option<MatchDetails>> {
    let row = sqlx::query(&format!("{} WHERE m.id = ?", DETAILS_SELECT))
        .bind(match_id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => Ok(Some(details_from_row(pool, &row).await?)),
        None => Ok(None),
    }
}

/// Matches kicking off within `[start, end]`, any status.
pub async fn list_matches_between(
    pool: &SqlitePool,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<MatchDetails>> {
    let rows = sqlx::query(&format!(
        "{} WHERE m.match_date >= ? AND m.match_date <= ? ORDER BY m.match_date ASC",
        DETAILS_SELECT
    ))
    .bind(to_db_time(start))
    .bind(to_db_time(end))
    .fetch_all(pool)
    .await?;

    details_from_rows(pool, &rows).await
}

/// Not-started matches kicking off at or after `now`.
pub async fn list_upcoming_matches(pool: &SqlitePool, now: DateTime<Utc>) -> Result<Vec<MatchDetails>> {
    let rows = sqlx::query(&format!(
        "{} WHERE m.match_date >= ? AND m.status = 'NOT_STARTED' ORDER BY m.match_date ASC",
        DETAILS_SELECT
    ))
    .bind(to_db_time(now))
    .fetch_all(pool)
    .await?;

    details_from_rows(pool, &rows).await
}

pub async fn list_matches_with_predictions(pool: &SqlitePool, now: DateTime<Utc>) -> Result<Vec<MatchDetails>> {
    let rows = sqlx::query(&format!(
        r#"{}
        WHERE m.match_date >= ?
          AND EXISTS (SELECT 1 FROM predictions p WHERE p.match_id = m.id)
        ORDER BY m.match_date ASC"#,
        DETAILS_SELECT
    ))
    .bind(to_db_time(now))
    .fetch_all(pool)
    .await?;

    details_from_rows(pool, &rows).await
}

/// Not-started future matches that have no prediction yet.
pub async fn list_pending_matches(pool: &SqlitePool, now: DateTime<Utc>) -> Result<Vec<Match>> {
    let rows = sqlx::query(
        r#"
        SELECT m.* FROM matches m
        WHERE m.status = 'NOT_STARTED'
          AND m.match_date >= ?
          AND NOT EXISTS (SELECT 1 FROM predictions p WHERE p.match_id = m.id)
        ORDER BY m.match_date ASC
        "#,
    )
    .bind(to_db_time(now))
    .fetch_all(pool)
    .await?;

    rows.iter().map(match_from_row).collect()
}

// Odds operations

pub async fn insert_odds(
    pool: &SqlitePool,
    match_id: &str,
    provider: &str,
    home_win: f64,
    draw: f64,
    away_win: f64,
) -> Result<Odds> {
    let odds = Odds {
        id: Uuid::new_v4().to_string(),
        match_id: match_id.to_string(),
        provider: provider.to_string(),
        home_win,
        draw,
        away_win,
        created_at: Utc::now(),
    };

    sqlx::query(
        r#"INSERT INTO odds (id, match_id, provider, home_win, draw, away_win, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&odds.id)
    .bind(&odds.match_id)
    .bind(&odds.provider)
    .bind(odds.home_win)
    .bind(odds.draw)
    .bind(odds.away_win)
    .bind(to_db_time(odds.created_at))
    .execute(pool)
    .await?;

    Ok(odds)
}

pub async fn get_latest_odds(pool: &SqlitePool, match_id: &str) -> Result<Option<Odds>> {
    let row = sqlx::query(
        "SELECT * FROM odds WHERE match_id = ? ORDER BY created_at DESC, rowid DESC LIMIT 1",
    )
    .bind(match_id)
    .fetch_optional(pool)
    .await?;

    let Some(r) = row else { return Ok(None) };
    Ok(Some(Odds {
        id: r.try_get("id")?,
        match_id: r.try_get("match_id")?,
        provider: r.try_get("provider")?,
        home_win: r.try_get("home_win")?,
        draw: r.try_get("draw")?,
        away_win: r.try_get("away_win")?,
        created_at: from_db_time(&r.try_get::<String, _>("created_at")?)?,
    }))
}

// Prediction operations

/// One prediction per match: a second write for the same match overwrites
/// the existing row in place and keeps its id.
pub async fn upsert_prediction(pool: &SqlitePool, match_id: &str, draft: &PredictionDraft) -> Result<Prediction> {
    let now = to_db_time(Utc::now());
    sqlx::query(
        r#"
        INSERT INTO predictions
        (id, match_id, home_chance, draw_chance, away_chance, prediction, confidence, reasoning, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(match_id) DO UPDATE SET
            home_chance = excluded.home_chance,
            draw_chance = excluded.draw_chance,
            away_chance = excluded.away_chance,
            prediction  = excluded.prediction,
            confidence  = excluded.confidence,
            reasoning   = excluded.reasoning,
            updated_at  = excluded.updated_at
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(match_id)
    .bind(draft.home_chance)
    .bind(draft.draw_chance)
    .bind(draft.away_chance)
    .bind(draft.prediction.as_str())
    .bind(draft.confidence)
    .bind(&draft.reasoning)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    get_prediction_by_match_id(pool, match_id)
        .await?
        .ok_or_else(|| AppError::Persistence(format!("prediction for {} vanished after upsert", match_id)))
}

pub async fn get_prediction_by_match_id(pool: &SqlitePool, match_id: &str) -> Result<Option<Prediction>> {
    let row = sqlx::query("SELECT * FROM predictions WHERE match_id = ?")
        .bind(match_id)
        .fetch_optional(pool)
        .await?;

    let Some(row) = row else { return Ok(None) };
    Ok(Some(Prediction {
        id: row.try_get("id")?,
        match_id: row.try_get("match_id")?,
        home_chance: row.try_get("home_chance")?,
        draw_chance: row.try_get("draw_chance")?,
        away_chance: row.try_get("away_chance")?,
        prediction: row.try_get::<String, _>("prediction")?.parse()?,
        confidence: row.try_get("confidence")?,
        reasoning: row.try_get("reasoning")?,
        created_at: from_db_time(&row.try_get::<String, _>("created_at")?)?,
        updated_at: from_db_time(&row.try_get::<String, _>("updated_at")?)?,
    }))
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use chrono::{Duration, TimeZone};

    fn draft(outcome: PredictionOutcome, confidence: f64) -> PredictionDraft {
        PredictionDraft {
            prediction: outcome,
            confidence,
            home_chance: 0.5,
            draw_chance: 0.3,
            away_chance: 0.2,
            reasoning: "form".to_string(),
        }
    }

    #[tokio::test]
    async fn league_creation_is_first_write_wins() {
        let pool = memory_pool().await;
        let first = get_or_create_league(&pool, &league(39)).await.unwrap();

        let mut renamed = league(39);
        renamed.name = "Renamed".to_string();
        let second = get_or_create_league(&pool, &renamed).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(second.name, "League 39");
        assert_eq!(count_rows(&pool, "leagues").await, 1);
    }

    #[tokio::test]
    async fn upsert_match_only_touches_status_and_kickoff() {
        let pool = memory_pool().await;
        let kickoff = Utc.with_ymd_and_hms(2030, 5, 1, 15, 0, 0).unwrap();
        let created = seed_match(&pool, 1001, kickoff, MatchStatus::NotStarted).await;

        let other_league = get_or_create_league(&pool, &league(140)).await.unwrap();
        let other_team = get_or_create_team(&pool, &team(999)).await.unwrap();
        let later = kickoff + Duration::hours(2);
        let updated = upsert_match(
            &pool,
            1001,
            &other_league.id,
            &other_team.id,
            &other_team.id,
            later,
            MatchStatus::Postponed,
        )
        .await
        .unwrap();

        assert_eq!(updated.id, created.id);
        assert_eq!(updated.league_id, created.league_id);
        assert_eq!(updated.home_team_id, created.home_team_id);
        assert_eq!(updated.away_team_id, created.away_team_id);
        assert_eq!(updated.status, MatchStatus::Postponed);
        assert_eq!(updated.match_date, later);
        assert_eq!(count_rows(&pool, "matches").await, 1);
    }

    #[tokio::test]
    async fn latest_odds_is_most_recent_insert() {
        let pool = memory_pool().await;
        let m = seed_match(&pool, 7, Utc::now() + Duration::days(1), MatchStatus::NotStarted).await;

        insert_odds(&pool, &m.id, "average", 2.0, 3.0, 4.0).await.unwrap();
        insert_odds(&pool, &m.id, "average", 2.1, 3.1, 3.9).await.unwrap();

        let latest = get_latest_odds(&pool, &m.id).await.unwrap().unwrap();
        assert_eq!(latest.home_win, 2.1);
        assert_eq!(count_rows(&pool, "odds").await, 2);

        let details = get_match_details(&pool, &m.id).await.unwrap().unwrap();
        assert_eq!(details.odds.len(), 1);
        assert_eq!(details.latest_odds().unwrap().away_win, 3.9);
    }

    #[tokio::test]
    async fn prediction_upsert_overwrites_in_place() {
        let pool = memory_pool().await;
        let m = seed_match(&pool, 8, Utc::now() + Duration::days(1), MatchStatus::NotStarted).await;

        let first = upsert_prediction(&pool, &m.id, &draft(PredictionOutcome::HomeWin, 0.6)).await.unwrap();
        let second = upsert_prediction(&pool, &m.id, &draft(PredictionOutcome::AwayWin, 0.8)).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.prediction, PredictionOutcome::AwayWin);
        assert_eq!(second.confidence, 0.8);
        assert_eq!(count_rows(&pool, "predictions").await, 1);
    }

    #[tokio::test]
    async fn pending_excludes_predicted_started_and_past_matches() {
        let pool = memory_pool().await;
        let now = Utc::now();
        let pending = seed_match(&pool, 1, now + Duration::hours(3), MatchStatus::NotStarted).await;
        let predicted = seed_match(&pool, 2, now + Duration::hours(4), MatchStatus::NotStarted).await;
        seed_match(&pool, 3, now + Duration::hours(5), MatchStatus::Postponed).await;
        seed_match(&pool, 4, now - Duration::hours(5), MatchStatus::NotStarted).await;
        upsert_prediction(&pool, &predicted.id, &draft(PredictionOutcome::Draw, 0.5)).await.unwrap();

        let ids: Vec<String> = list_pending_matches(&pool, now).await.unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![pending.id]);

        let with_predictions = list_matches_with_predictions(&pool, now).await.unwrap();
        assert_eq!(with_predictions.len(), 1);
        assert_eq!(with_predictions[0].match_info.id, predicted.id);
        assert!(with_predictions[0].prediction.is_some());
    }

    #[test]
    fn db_time_is_fixed_width() {
        let a = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let b = a + Duration::milliseconds(500);
        assert_eq!(to_db_time(a), "2024-05-01T09:00:00.000Z");
        assert!(to_db_time(a) < to_db_time(b));
        assert_eq!(from_db_time(&to_db_time(b)).unwrap(), b);
    }
}
