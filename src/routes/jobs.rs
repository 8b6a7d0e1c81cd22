use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};

use crate::AppState;

pub async fn list_jobs(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "success": true, "jobs": state.scheduler.inventory() }))
}

/// On-demand trigger; reports whether the fire was accepted or skipped by
/// the singleton guard.
pub async fn run_job(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match state.scheduler.run_now(&name) {
        Ok(started) => Ok(Json(json!({ "success": true, "started": started }))),
        Err(e) => Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "success": false, "error": e.to_string() })),
        )),
    }
}
