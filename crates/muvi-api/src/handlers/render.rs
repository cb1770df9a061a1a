//! Shot render handlers.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use muvi_engine::RenderOrchestrator;
use muvi_models::{CastId, ProjectId, ShotId};

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct RenderShotRequest {
    #[serde(default)]
    pub negative_prompt: Option<String>,
}

/// Render one shot. The orchestrator handles its own locking; the
/// request returns once the render is persisted.
pub async fn render_shot(
    State(app): State<AppState>,
    Path((project_id, shot_id)): Path<(ProjectId, ShotId)>,
    body: Option<Json<RenderShotRequest>>,
) -> ApiResult<Json<serde_json::Value>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let image_url = RenderOrchestrator::new(&app.ctx)
        .render_shot(project_id, &shot_id, request.negative_prompt.as_deref())
        .await?;
    Ok(Json(json!({ "shot_id": shot_id, "image_url": image_url })))
}

#[derive(Debug, Deserialize)]
pub struct EditShotRequest {
    pub edit_prompt: String,
    #[serde(default)]
    pub extra_cast: Vec<CastId>,
    #[serde(default)]
    pub ref_image: Option<String>,
}

/// Img2img over a shot's existing render.
pub async fn edit_shot(
    State(app): State<AppState>,
    Path((project_id, shot_id)): Path<(ProjectId, ShotId)>,
    Json(request): Json<EditShotRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let image_url = RenderOrchestrator::new(&app.ctx)
        .edit_shot(
            project_id,
            &shot_id,
            &request.edit_prompt,
            &request.extra_cast,
            request.ref_image,
        )
        .await?;
    Ok(Json(json!({ "shot_id": shot_id, "image_url": image_url })))
}

/// Upload every reference a render batch will need.
pub async fn prewarm(
    State(app): State<AppState>,
    Path(project_id): Path<ProjectId>,
) -> ApiResult<Json<serde_json::Value>> {
    let uploaded = RenderOrchestrator::new(&app.ctx).prewarm(project_id).await?;
    Ok(Json(json!({ "uploaded": uploaded })))
}
