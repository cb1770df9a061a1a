//! Session-level handlers: costs, maintenance, health.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use muvi_models::CostLedger;

use crate::error::ApiResult;
use crate::state::AppState;

/// Health probe.
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// The session-wide cost ledger (in-memory, capped).
pub async fn session_costs(State(app): State<AppState>) -> Json<CostLedger> {
    Json(app.ctx.session_costs.snapshot())
}

#[derive(Debug, Deserialize)]
pub struct CleanupRequest {
    #[serde(default = "default_max_age")]
    pub max_age_hours: u64,
}

fn default_max_age() -> u64 {
    24
}

/// Remove stale files from the global temp dir.
pub async fn cleanup_temp(
    State(app): State<AppState>,
    body: Option<Json<CleanupRequest>>,
) -> ApiResult<Json<serde_json::Value>> {
    let max_age = body.map(|Json(r)| r.max_age_hours).unwrap_or(24);
    let removed = app.ctx.paths().cleanup_temp(max_age)?;
    Ok(Json(json!({ "removed": removed })))
}
