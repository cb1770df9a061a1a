//! Cast management handlers.

use axum::extract::{Multipart, Path, State};
use axum::Json;

use muvi_engine::{RefVariant, ReferenceGraph};
use muvi_models::{CastId, ProjectId, ProjectState, Role};
use muvi_state::SaveOptions;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Add a cast member from a multipart upload (`file`, `name`, `role`,
/// optional `impact`, `prompt_extra`).
pub async fn add_cast(
    State(app): State<AppState>,
    Path(project_id): Path<ProjectId>,
    mut multipart: Multipart,
) -> ApiResult<Json<ProjectState>> {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut name = String::new();
    let mut role = Role::Lead;
    let mut impact: Option<f64> = None;
    let mut prompt_extra = String::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("multipart: {e}")))?
    {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("file") => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("upload read: {e}")))?;
                file_bytes = Some(bytes.to_vec());
            }
            Some("name") => name = field.text().await.unwrap_or_default(),
            Some("role") => {
                let raw = field.text().await.unwrap_or_default();
                role = raw
                    .parse()
                    .map_err(|_| ApiError::bad_request(format!("unknown role '{raw}'")))?;
            }
            Some("impact") => {
                impact = field.text().await.ok().and_then(|t| t.parse().ok());
            }
            Some("prompt_extra") => prompt_extra = field.text().await.unwrap_or_default(),
            _ => {}
        }
    }

    let bytes =
        file_bytes.ok_or_else(|| ApiError::bad_request("multipart field 'file' is required"))?;
    if name.trim().is_empty() {
        return Err(ApiError::bad_request("cast name must not be empty"));
    }

    let guard = app.ctx.store.lock(project_id).await;
    let mut state = app.ctx.store.load_unlocked(project_id).await?;

    // Stage the upload in the global temp dir; the graph copies it into
    // the project.
    let staged = app.ctx.paths().temp_file("cast_upload", ".png");
    tokio::fs::write(&staged, &bytes)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;

    let cast_id = ReferenceGraph::new(&app.ctx)
        .add_cast(&mut state, name.trim(), role, &staged)
        .await?;
    let _ = tokio::fs::remove_file(&staged).await;

    if let Some(member) = state.cast_member_mut(&cast_id) {
        if let Some(impact) = impact {
            member.impact = impact.clamp(0.0, 1.0);
        }
        member.prompt_extra = prompt_extra;
    }

    app.ctx
        .store
        .save_unlocked(&mut state, SaveOptions::forced())
        .await?;
    drop(guard);
    Ok(Json(state))
}

/// Delete a cast member; canonical refs and storyboard references go too.
pub async fn delete_cast(
    State(app): State<AppState>,
    Path((project_id, cast_id)): Path<(ProjectId, CastId)>,
) -> ApiResult<Json<ProjectState>> {
    let guard = app.ctx.store.lock(project_id).await;
    let mut state = app.ctx.store.load_unlocked(project_id).await?;
    if !state.delete_cast(&cast_id) {
        return Err(ApiError::not_found(format!("cast {}", cast_id)));
    }
    app.ctx
        .store
        .save_unlocked(&mut state, SaveOptions::forced())
        .await?;
    drop(guard);
    Ok(Json(state))
}

/// Generate both canonical refs for a member.
pub async fn generate_canonical_refs(
    State(app): State<AppState>,
    Path((project_id, cast_id)): Path<(ProjectId, CastId)>,
) -> ApiResult<Json<ProjectState>> {
    let guard = app.ctx.store.lock(project_id).await;
    let mut state = app.ctx.store.load_unlocked(project_id).await?;
    ReferenceGraph::new(&app.ctx)
        .generate_canonical_refs(&mut state, &cast_id)
        .await?;
    app.ctx
        .store
        .save_unlocked(&mut state, SaveOptions::forced())
        .await?;
    drop(guard);
    Ok(Json(state))
}

/// Regenerate one canonical ref (`a` or `b`).
pub async fn rerender_ref(
    State(app): State<AppState>,
    Path((project_id, cast_id, variant)): Path<(ProjectId, CastId, String)>,
) -> ApiResult<Json<ProjectState>> {
    let variant = match variant.as_str() {
        "a" => RefVariant::A,
        "b" => RefVariant::B,
        other => {
            return Err(ApiError::bad_request(format!(
                "variant must be 'a' or 'b', got '{other}'"
            )))
        }
    };

    let guard = app.ctx.store.lock(project_id).await;
    let mut state = app.ctx.store.load_unlocked(project_id).await?;
    ReferenceGraph::new(&app.ctx)
        .generate_ref(&mut state, &cast_id, variant)
        .await?;
    app.ctx
        .store
        .save_unlocked(&mut state, SaveOptions::forced())
        .await?;
    drop(guard);
    Ok(Json(state))
}
