use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::services::webpush::PushSubscription;
use crate::AppState;

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

fn not_configured() -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "success": false, "error": "web push is not configured" })),
    )
}

pub async fn public_key(State(state): State<AppState>) -> ApiResult {
    let webpush = state.webpush.as_ref().ok_or_else(not_configured)?;
    Ok(Json(json!({ "success": true, "public_key": webpush.public_key() })))
}

#[derive(Debug, Deserialize)]
pub struct SubscribeBody {
    pub username: String,
    pub subscription: PushSubscription,
}

pub async fn subscribe(State(state): State<AppState>, Json(body): Json<SubscribeBody>) -> ApiResult {
    let webpush = state.webpush.as_ref().ok_or_else(not_configured)?;
    webpush.subscribe(&body.username, body.subscription).await;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub struct UnsubscribeBody {
    pub username: String,
    pub endpoint: String,
}

pub async fn unsubscribe(
    State(state): State<AppState>,
    Json(body): Json<UnsubscribeBody>,
) -> ApiResult {
    let webpush = state.webpush.as_ref().ok_or_else(not_configured)?;
    webpush.unsubscribe(&body.username, &body.endpoint).await;
    Ok(Json(json!({ "success": true })))
}
