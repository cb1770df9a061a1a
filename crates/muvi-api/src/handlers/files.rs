//! `/files/` serving.
//!
//! State URLs are workspace-relative, but project artifacts live in
//! user-chosen folders outside the workspace. Resolution mirrors the
//! path manager: direct workspace hit first, then a filename search over
//! the known project folders.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use std::path::PathBuf;

use crate::state::AppState;

/// Serve a file referenced by a `/files/<rel>` URL.
pub async fn serve_file(
    State(app): State<AppState>,
    Path(rel): Path<String>,
) -> Result<Response, StatusCode> {
    if rel.split('/').any(|part| part == "..") {
        return Err(StatusCode::BAD_REQUEST);
    }

    let direct = app.ctx.paths().workspace_root().join(&rel);
    let resolved = if direct.is_file() {
        Some(direct)
    } else {
        find_in_projects(&app, &rel)
    };

    let Some(path) = resolved else {
        return Err(StatusCode::NOT_FOUND);
    };

    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?;
    let mime = content_type_for(&path);
    Ok(([(header::CONTENT_TYPE, mime)], Body::from(bytes)).into_response())
}

fn find_in_projects(app: &AppState, rel: &str) -> Option<PathBuf> {
    let filename = std::path::Path::new(rel).file_name()?;
    for folder in app.ctx.store.project_folders() {
        let exact = folder.join(rel);
        if exact.is_file() {
            return Some(exact);
        }
        for subdir in ["renders", "video", "audio", "exports", ""] {
            let candidate = if subdir.is_empty() {
                folder.join(filename)
            } else {
                folder.join(subdir).join(filename)
            };
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

fn content_type_for(path: &std::path::Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("mp4") => "video/mp4",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for(std::path::Path::new("a.webp")), "image/webp");
        assert_eq!(content_type_for(std::path::Path::new("b.mp4")), "video/mp4");
        assert_eq!(
            content_type_for(std::path::Path::new("c.bin")),
            "application/octet-stream"
        );
    }
}
