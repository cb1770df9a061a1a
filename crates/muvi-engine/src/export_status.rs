//! Export progress, polled by the control surface.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use muvi_models::ProjectId;

/// Phase of an export run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExportPhase {
    #[default]
    Idle,
    Running,
    Done,
    Error,
}

/// Single-writer, many-reader progress record for one project's export.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExportStatus {
    pub status: ExportPhase,
    pub current: usize,
    pub total: usize,
    pub message: String,
}

/// Process-wide export status map. Resets to idle on restart.
#[derive(Default)]
pub struct ExportStatusMap {
    inner: Mutex<HashMap<ProjectId, ExportStatus>>,
}

impl ExportStatusMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, project_id: ProjectId) -> ExportStatus {
        self.inner
            .lock()
            .expect("export status map poisoned")
            .get(&project_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn set(&self, project_id: ProjectId, status: ExportStatus) {
        self.inner
            .lock()
            .expect("export status map poisoned")
            .insert(project_id, status);
    }

    pub fn update(
        &self,
        project_id: ProjectId,
        phase: ExportPhase,
        current: usize,
        total: usize,
        message: impl Into<String>,
    ) {
        self.set(
            project_id,
            ExportStatus {
                status: phase,
                current,
                total,
                message: message.into(),
            },
        );
    }
}
