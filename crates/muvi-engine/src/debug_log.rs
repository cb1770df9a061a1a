//! Structured persistence of backend calls.
//!
//! Every LLM and generation call gets a timestamped JSON file under the
//! project's `llm/` folder: prompt, payload summary, response, duration
//! and cost. Logging never fails the pipeline; write errors are warned
//! and dropped.

use chrono::Utc;
use serde_json::{json, Value};
use tracing::warn;

use muvi_models::ProjectState;
use muvi_storage::PathManager;

/// Write one call record. `kind` becomes part of the filename
/// (`sequences_build`, `shot_render`, ...).
pub fn record_call(
    paths: &PathManager,
    state: &ProjectState,
    kind: &str,
    request: Value,
    response: &Value,
    duration_ms: u128,
    cost: f64,
) {
    let entry = json!({
        "kind": kind,
        "ts": Utc::now().to_rfc3339(),
        "duration_ms": duration_ms,
        "cost": cost,
        "request": request,
        "response": response,
    });

    let result = paths.llm_dir(state).and_then(|dir| {
        let name = format!("{}_{}.json", Utc::now().format("%Y%m%d_%H%M%S%3f"), kind);
        let file = dir.join(name);
        std::fs::write(&file, serde_json::to_vec_pretty(&entry).unwrap_or_default())
            .map_err(Into::into)
    });

    if let Err(e) = result {
        warn!("debug log write failed for {}: {}", kind, e);
    }
}

/// Shorthand for logging a failed call.
pub fn record_failure(
    paths: &PathManager,
    state: &ProjectState,
    kind: &str,
    request: Value,
    error: &str,
) {
    record_call(
        paths,
        state,
        kind,
        request,
        &json!({ "error": error }),
        0,
        0.0,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use muvi_models::{Project, STATE_VERSION};
    use tempfile::TempDir;

    #[test]
    fn test_record_writes_json_file() {
        let tmp = TempDir::new().unwrap();
        let paths = PathManager::new(tmp.path()).unwrap();
        let mut state = ProjectState::new(Project::new("Logged", STATE_VERSION));
        state.project.project_location =
            Some(tmp.path().join("proj").to_string_lossy().into_owned());

        record_call(
            &paths,
            &state,
            "sequences_build",
            json!({"prompt": "plan"}),
            &json!({"sequences": []}),
            1234,
            0.01,
        );

        let llm_dir = paths.llm_dir(&state).unwrap();
        let files: Vec<_> = std::fs::read_dir(llm_dir).unwrap().collect();
        assert_eq!(files.len(), 1);
        let body = std::fs::read_to_string(files[0].as_ref().unwrap().path()).unwrap();
        let value: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["kind"], "sequences_build");
        assert_eq!(value["duration_ms"], 1234);
    }
}
