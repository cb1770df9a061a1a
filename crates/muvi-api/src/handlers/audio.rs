//! Audio upload and analysis handlers.

use axum::extract::{Multipart, Path, State};
use axum::Json;
use serde::Deserialize;

use muvi_engine::AudioAnalyzer;
use muvi_models::audio::{BPM_MAX, BPM_MIN};
use muvi_models::{LyricLine, ProjectId, ProjectState};
use muvi_state::SaveOptions;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Upload an audio file (multipart `file`, optional `prompt`) and run the
/// full analysis. Replaces any previous track.
pub async fn upload_audio(
    State(app): State<AppState>,
    Path(project_id): Path<ProjectId>,
    mut multipart: Multipart,
) -> ApiResult<Json<ProjectState>> {
    let mut file_bytes: Option<(String, Vec<u8>)> = None;
    let mut prompt = String::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("multipart: {e}")))?
    {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("file") => {
                let name = field
                    .file_name()
                    .map(str::to_string)
                    .unwrap_or_else(|| "track.mp3".to_string());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("upload read: {e}")))?;
                file_bytes = Some((name, bytes.to_vec()));
            }
            Some("prompt") => {
                prompt = field.text().await.unwrap_or_default();
            }
            _ => {}
        }
    }

    let (file_name, bytes) =
        file_bytes.ok_or_else(|| ApiError::bad_request("multipart field 'file' is required"))?;
    if bytes.is_empty() {
        return Err(ApiError::bad_request("uploaded audio file is empty"));
    }

    let guard = app.ctx.store.lock(project_id).await;
    let mut state = app.ctx.store.load_unlocked(project_id).await?;

    // New upload replaces the previous track entirely.
    let audio_dir = app.ctx.paths().audio_dir(&state)?;
    for entry in std::fs::read_dir(&audio_dir).map_err(|e| ApiError::internal(e.to_string()))? {
        if let Ok(entry) = entry {
            let _ = std::fs::remove_file(entry.path());
        }
    }
    let safe_name = muvi_models::sanitize_filename(&file_name, 80);
    let audio_path = audio_dir.join(&safe_name);
    tokio::fs::write(&audio_path, &bytes)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;

    AudioAnalyzer::new(&app.ctx)
        .analyze(&mut state, &audio_path, &prompt)
        .await?;

    app.ctx
        .store
        .save_unlocked(&mut state, SaveOptions::forced())
        .await?;
    drop(guard);
    Ok(Json(state))
}

#[derive(Debug, Deserialize)]
pub struct BpmPatchRequest {
    pub bpm: f64,
}

/// Manual BPM override; rebuilds the beat grid.
pub async fn patch_bpm(
    State(app): State<AppState>,
    Path(project_id): Path<ProjectId>,
    Json(request): Json<BpmPatchRequest>,
) -> ApiResult<Json<ProjectState>> {
    if !(BPM_MIN..=BPM_MAX).contains(&request.bpm) {
        return Err(ApiError::bad_request(format!(
            "bpm must be within [{BPM_MIN}, {BPM_MAX}]"
        )));
    }

    let guard = app.ctx.store.lock(project_id).await;
    let mut state = app.ctx.store.load_unlocked(project_id).await?;
    let dna = state
        .audio_dna
        .as_mut()
        .ok_or_else(|| ApiError::bad_request("project has no analyzed audio"))?;
    dna.update_bpm(request.bpm);

    app.ctx
        .store
        .save_unlocked(&mut state, SaveOptions::forced())
        .await?;
    drop(guard);
    Ok(Json(state))
}

#[derive(Debug, Deserialize)]
pub struct LyricsPatchRequest {
    pub text: String,
}

/// Replace the lyrics wholesale.
pub async fn patch_lyrics(
    State(app): State<AppState>,
    Path(project_id): Path<ProjectId>,
    Json(request): Json<LyricsPatchRequest>,
) -> ApiResult<Json<ProjectState>> {
    let guard = app.ctx.store.lock(project_id).await;
    let mut state = app.ctx.store.load_unlocked(project_id).await?;
    let dna = state
        .audio_dna
        .as_mut()
        .ok_or_else(|| ApiError::bad_request("project has no analyzed audio"))?;

    dna.lyrics = request
        .text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| LyricLine {
            text: l.to_string(),
            start: None,
        })
        .collect();
    dna.lyrics_source = "manual".to_string();

    app.ctx
        .store
        .save_unlocked(&mut state, SaveOptions::forced())
        .await?;
    drop(guard);
    Ok(Json(state))
}
