//! Export handlers.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use muvi_engine::{export, ExportOptions, ExportResult, ExportStatus};
use muvi_models::{ExportMode, ProjectId};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ExportRequest {
    #[serde(default)]
    pub mode: ExportMode,
    #[serde(default)]
    pub fps: Option<u32>,
    /// "1920x1080" style.
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub fade_duration: Option<f64>,
}

/// Run an export. Progress is polled via the status endpoint.
pub async fn export_video(
    State(app): State<AppState>,
    Path(project_id): Path<ProjectId>,
    body: Option<Json<ExportRequest>>,
) -> ApiResult<Json<ExportResult>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();

    let mut options = ExportOptions {
        mode: request.mode,
        ..Default::default()
    };
    if let Some(fps) = request.fps {
        if fps == 0 || fps > 120 {
            return Err(ApiError::bad_request("fps must be within 1..=120"));
        }
        options.fps = fps;
    }
    if let Some(resolution) = request.resolution {
        let (w, h) = parse_resolution(&resolution)
            .ok_or_else(|| ApiError::bad_request(format!("bad resolution '{resolution}'")))?;
        options.width = w;
        options.height = h;
    }
    if let Some(fade) = request.fade_duration {
        options.fade_duration = fade.max(0.0);
    }

    let result = export(&app.ctx, project_id, options).await?;
    Ok(Json(result))
}

/// Poll export progress.
pub async fn export_status(
    State(app): State<AppState>,
    Path(project_id): Path<ProjectId>,
) -> ApiResult<Json<ExportStatus>> {
    Ok(Json(app.ctx.export_status.get(project_id)))
}

fn parse_resolution(raw: &str) -> Option<(u32, u32)> {
    let (w, h) = raw.split_once(['x', 'X'])?;
    let w: u32 = w.trim().parse().ok()?;
    let h: u32 = h.trim().parse().ok()?;
    if w == 0 || h == 0 {
        return None;
    }
    Some((w, h))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_resolution() {
        assert_eq!(parse_resolution("1920x1080"), Some((1920, 1080)));
        assert_eq!(parse_resolution("1080X1920"), Some((1080, 1920)));
        assert_eq!(parse_resolution("0x100"), None);
        assert_eq!(parse_resolution("wide"), None);
    }
}
