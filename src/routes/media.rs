use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::db::history::{HistoryFilter, HistoryStore};
use crate::db::media::MediaStore;
use crate::error::EngineError;
use crate::AppState;

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

fn fail(status: StatusCode, error: impl std::fmt::Display) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "success": false, "error": error.to_string() })))
}

/// Maps the typed engine errors onto status codes; everything else is a 500.
fn engine_fail(e: anyhow::Error) -> (StatusCode, Json<Value>) {
    let status = match e.downcast_ref::<EngineError>() {
        Some(EngineError::NotFound(_)) => StatusCode::NOT_FOUND,
        Some(EngineError::AlreadyProcessed) => StatusCode::CONFLICT,
        Some(EngineError::Unkeepable) => StatusCode::UNPROCESSABLE_ENTITY,
        None => StatusCode::INTERNAL_SERVER_ERROR,
    };
    fail(status, e)
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub include_protected: bool,
    /// Restrict to one media type ("movie" | "tv").
    pub media_type: Option<String>,
}

pub async fn list_media(State(state): State<AppState>, Query(query): Query<ListQuery>) -> ApiResult {
    let media = match &query.media_type {
        Some(raw) => {
            let media_type = raw
                .parse::<crate::models::MediaType>()
                .map_err(|e| fail(StatusCode::BAD_REQUEST, e))?;
            MediaStore::list_by_type(&state.db, media_type).await
        }
        None => MediaStore::list(&state.db, query.include_protected).await,
    };
    media
        .map(|media| Json(json!({ "success": true, "media": media })))
        .map_err(|e| fail(StatusCode::INTERNAL_SERVER_ERROR, e))
}

/// Media with at least one keep request awaiting an operator decision.
pub async fn list_pending(State(state): State<AppState>) -> ApiResult {
    MediaStore::list_pending_request(&state.db)
        .await
        .map(|media| Json(json!({ "success": true, "media": media })))
        .map_err(|e| fail(StatusCode::INTERNAL_SERVER_ERROR, e))
}

pub async fn media_history(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult {
    HistoryStore::list_events(
        &state.db,
        HistoryFilter { media_id: Some(id), event_type: None },
    )
    .await
    .map(|events| Json(json!({ "success": true, "events": events })))
    .map_err(|e| fail(StatusCode::INTERNAL_SERVER_ERROR, e))
}

#[derive(Debug, Deserialize)]
pub struct KeepBody {
    pub username: String,
}

pub async fn request_keep(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<KeepBody>,
) -> ApiResult {
    state
        .keep
        .request_keep(&body.username, id)
        .await
        .map(|auto| Json(json!({ "success": true, "auto_approved": auto })))
        .map_err(engine_fail)
}

#[derive(Debug, Deserialize)]
pub struct DecideBody {
    pub user_id: i64,
    pub accept: bool,
}

pub async fn decide(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<DecideBody>,
) -> ApiResult {
    state
        .keep
        .decide(body.user_id, id, body.accept)
        .await
        .map(|_| Json(json!({ "success": true })))
        .map_err(engine_fail)
}

#[derive(Debug, Deserialize)]
pub struct AdminBody {
    pub admin: String,
}

pub async fn keep_forever(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<AdminBody>,
) -> ApiResult {
    state
        .keep
        .force_keep_forever(&body.admin, id)
        .await
        .map(|_| Json(json!({ "success": true })))
        .map_err(engine_fail)
}

pub async fn admin_protect(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<AdminBody>,
) -> ApiResult {
    state
        .keep
        .admin_protect(&body.admin, id)
        .await
        .map(|_| Json(json!({ "success": true })))
        .map_err(engine_fail)
}

pub async fn admin_unkeep(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<AdminBody>,
) -> ApiResult {
    state
        .keep
        .admin_unkeep(&body.admin, id)
        .await
        .map(|_| Json(json!({ "success": true })))
        .map_err(engine_fail)
}
