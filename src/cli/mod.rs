use anyhow::{bail, Result};
use chrono::{NaiveDate, Utc};

use crate::api::AppState;
use crate::config::AppConfig;
use crate::db::{create_pool, init_database_with_pool};
use crate::models::MatchDetails;
use crate::utils::current_season_year;

async fn open_state(config: &AppConfig) -> Result<AppState> {
    let pool = create_pool(&config.database_url).await?;
    init_database_with_pool(&pool).await?;
    Ok(AppState::from_config(pool, config)?)
}

pub async fn init_db(config: &AppConfig) -> Result<()> {
    let pool = create_pool(&config.database_url).await?;
    init_database_with_pool(&pool).await?;
    println!("✅ Database ready at {}", config.database_url);
    Ok(())
}

pub async fn sync(
    config: &AppConfig,
    date: Option<NaiveDate>,
    fixture: Option<i64>,
    season: Option<String>,
) -> Result<()> {
    let state = open_state(config).await?;

    let synced = if let Some(fixture_id) = fixture {
        println!("📥 Syncing fixture {}...", fixture_id);
        vec![state.sync.sync_fixture_by_id(fixture_id).await?]
    } else if let Some(season) = season {
        println!("📥 Syncing major competitions for season {}...", season);
        state.sync.sync_competition_fixtures(&season).await?
    } else {
        match date {
            Some(d) => println!("📥 Syncing fixtures for {}...", d),
            None => println!("📥 Syncing today's fixtures..."),
        }
        state.sync.sync_upcoming_fixtures(date).await?
    };

    println!("✅ Synced {} matches", synced.len());
    print_matches(&synced);
    Ok(())
}

pub async fn predict(config: &AppConfig, match_id: Option<String>, all: bool) -> Result<()> {
    let state = open_state(config).await?;

    match (match_id, all) {
        (Some(match_id), _) => {
            println!("🔮 Predicting match {}...", match_id);
            let p = state.predictions.create_or_update_prediction(&match_id).await?;
            println!(
                "   {} ({:.0}% confidence) | Home {:.1}% | Draw {:.1}% | Away {:.1}%",
                p.prediction,
                p.confidence * 100.0,
                p.home_chance * 100.0,
                p.draw_chance * 100.0,
                p.away_chance * 100.0
            );
            println!("   {}", p.reasoning);
        }
        (None, true) => {
            println!("🔮 Generating predictions for all pending matches...");
            let report = state.predictions.generate_all_pending().await?;
            println!(
                "✅ Generated {}/{} predictions",
                report.generated, report.attempted
            );
            for id in &report.failed {
                println!("   ❌ {}", id);
            }
        }
        (None, false) => bail!("pass --match-id ID or --all"),
    }

    Ok(())
}

pub async fn odds(config: &AppConfig, match_id: &str) -> Result<()> {
    let state = open_state(config).await?;

    match state.predictions.refresh_match_odds(match_id).await? {
        Some(o) => println!(
            "💰 Average odds for {}: Home {:.2} | Draw {:.2} | Away {:.2}",
            match_id, o.home_win, o.draw, o.away_win
        ),
        None => println!("📭 No odds listed for match {}", match_id),
    }
    Ok(())
}

pub async fn list(config: &AppConfig, date: Option<NaiveDate>) -> Result<()> {
    let state = open_state(config).await?;
    let matches = state.sync.list_matches(date).await?;

    if matches.is_empty() {
        println!(
            "📭 No matches found. Try syncing first with: matchcast sync --season {}",
            current_season_year(Utc::now())
        );
        return Ok(());
    }

    print_matches(&matches);
    Ok(())
}

fn print_matches(matches: &[MatchDetails]) {
    for (i, m) in matches.iter().enumerate() {
        println!(
            "{}. {} vs {} [{}] {} ({})",
            i + 1,
            m.home_team.name,
            m.away_team.name,
            m.league.name,
            m.match_info.match_date.format("%Y-%m-%d %H:%M"),
            m.match_info.status
        );
        println!("   id: {}", m.match_info.id);
        if let Some(o) = m.latest_odds() {
            println!("   Odds: {:.2} / {:.2} / {:.2}", o.home_win, o.draw, o.away_win);
        }
        if let Some(p) = &m.prediction {
            println!("   Prediction: {} ({:.0}%)", p.prediction, p.confidence * 100.0);
        }
    }
}
