use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::AppConfig;
use crate::db::{create_pool, init_database_with_pool};
use crate::models::{ErrorBody, MatchDetails, Prediction};
use crate::services::{
    BatchStatus, BatchTracker, DeepSeekClient, FootballApiClient, MatchSyncService, OddsApiClient, PredictionService,
};
use crate::utils::parse_date;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub sync: Arc<MatchSyncService>,
    pub predictions: Arc<PredictionService>,
    pub batch: BatchTracker,
}

impl AppState {
    /// Wire the production clients and services around `pool`.
    pub fn from_config(pool: SqlitePool, config: &AppConfig) -> crate::error::Result<Self> {
        let fixtures = Arc::new(FootballApiClient::new(config)?);
        let odds = Arc::new(OddsApiClient::new(config)?);
        let model = Arc::new(DeepSeekClient::new(config)?);

        Ok(Self {
            sync: Arc::new(MatchSyncService::new(pool.clone(), fixtures.clone(), config.local_offset)),
            predictions: Arc::new(PredictionService::new(
                pool.clone(),
                fixtures,
                odds,
                model,
                config.prediction_delay,
            )),
            batch: BatchTracker::new(),
            pool,
        })
    }
}

pub async fn serve(config: &AppConfig, port: u16) -> anyhow::Result<()> {
    let pool = create_pool(&config.database_url).await?;
    init_database_with_pool(&pool).await?;

    let state = AppState::from_config(pool, config)?;
    let app = create_router().with_state(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    tracing::info!("Matchcast API server listening on port {}", port);

    axum::serve(listener, app).await?;
    Ok(())
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/matches", get(list_matches_handler))
        .route("/matches/{id}", get(get_match_handler))
        .route("/predictions", get(list_predictions_handler).post(create_prediction_handler))
        .route("/predictions/batch", get(batch_status_handler))
        .route("/predictions/{match_id}", get(get_prediction_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(ErrorBody::new(message))).into_response()
}

// GET /health
async fn health_check(State(state): State<AppState>) -> Response {
    match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => Json(serde_json::json!({ "status": "ok" })).into_response(),
        Err(e) => {
            tracing::error!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "status": "unavailable" })),
            )
                .into_response()
        }
    }
}

// GET /matches?date=YYYY-MM-DD&sync=true
#[derive(Deserialize)]
struct MatchesQuery {
    date: Option<String>,
    /// Only the literal `true` triggers a sync.
    sync: Option<String>,
}

async fn list_matches_handler(
    State(state): State<AppState>,
    Query(params): Query<MatchesQuery>,
) -> Result<Json<Vec<MatchDetails>>, Response> {
    let date = match params.date.as_deref().filter(|d| !d.is_empty()) {
        Some(raw) => Some(parse_date(raw).map_err(|e| {
            tracing::warn!("Rejected matches query: {}", e);
            error_response(StatusCode::BAD_REQUEST, "Invalid date. Use YYYY-MM-DD")
        })?),
        None => None,
    };

    let result = if params.sync.as_deref() == Some("true") {
        state.sync.sync_upcoming_fixtures(date).await
    } else {
        state.sync.list_matches(date).await
    };

    result.map(Json).map_err(|e| {
        tracing::error!("Failed to fetch matches: {}", e);
        error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch matches")
    })
}

// GET /matches/{id}
async fn get_match_handler(
    State(state): State<AppState>,
    Path(match_id): Path<String>,
) -> Result<Json<MatchDetails>, Response> {
    match state.sync.get_match(&match_id).await {
        Ok(Some(details)) => Ok(Json(details)),
        Ok(None) => Err(error_response(StatusCode::NOT_FOUND, "Match not found")),
        Err(e) => {
            tracing::error!("Failed to fetch match {}: {}", match_id, e);
            Err(error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch match"))
        }
    }
}

// GET /predictions
async fn list_predictions_handler(State(state): State<AppState>) -> Result<Json<Vec<MatchDetails>>, Response> {
    state.predictions.list_matches_with_predictions().await.map(Json).map_err(|e| {
        tracing::error!("Failed to fetch predictions: {}", e);
        error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch predictions")
    })
}

// GET /predictions/{match_id}
async fn get_prediction_handler(
    State(state): State<AppState>,
    Path(match_id): Path<String>,
) -> Result<Json<Prediction>, Response> {
    match state.predictions.get_prediction(&match_id).await {
        Ok(Some(prediction)) => Ok(Json(prediction)),
        Ok(None) => Err(error_response(StatusCode::NOT_FOUND, "Prediction not found")),
        Err(e) => {
            tracing::error!("Failed to fetch prediction for {}: {}", match_id, e);
            Err(error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch prediction"))
        }
    }
}

// POST /predictions
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PredictionRequest {
    match_id: Option<String>,
    #[serde(default)]
    generate_all: bool,
}

#[derive(Serialize)]
struct BatchStarted {
    success: bool,
    message: &'static str,
}

const INVALID_PREDICTION_REQUEST: &str = "Invalid request. Provide matchId or generateAll";

async fn create_prediction_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let Ok(request) = serde_json::from_slice::<PredictionRequest>(&body) else {
        return error_response(StatusCode::BAD_REQUEST, INVALID_PREDICTION_REQUEST);
    };

    if let Some(match_id) = request.match_id.filter(|id| !id.is_empty()) {
        return predict_one(&state, &match_id).await;
    }

    if request.generate_all {
        let service = Arc::clone(&state.predictions);
        let started = state
            .batch
            .start(async move { service.generate_all_pending().await })
            .await;
        let message = if started {
            "Predictions generation started"
        } else {
            "Predictions generation already running"
        };
        return Json(BatchStarted { success: true, message }).into_response();
    }

    error_response(StatusCode::BAD_REQUEST, INVALID_PREDICTION_REQUEST)
}

async fn predict_one(state: &AppState, match_id: &str) -> Response {
    let prediction = match state.predictions.create_or_update_prediction(match_id).await {
        Ok(p) => p,
        Err(e) if e.is_not_found() => return error_response(StatusCode::NOT_FOUND, "Match not found"),
        Err(e) => {
            tracing::error!("Failed to create prediction for {}: {}", match_id, e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create prediction");
        }
    };

    if let Err(e) = state.predictions.refresh_match_odds(match_id).await {
        tracing::warn!("Prediction stored but odds refresh failed for {}: {}", match_id, e);
    }

    Json(prediction).into_response()
}

// GET /predictions/batch
async fn batch_status_handler(State(state): State<AppState>) -> Json<BatchStatus> {
    Json(state.batch.status().await)
}
