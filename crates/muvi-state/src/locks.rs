//! Per-project locks.
//!
//! All mutation of a project's state serializes through its lock. The map
//! itself sits behind a std mutex so concurrent first-touch of the same
//! project cannot mint two locks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use muvi_models::ProjectId;

/// Handle held while mutating a project.
pub type ProjectGuard = OwnedMutexGuard<()>;

/// Keyed lock map.
#[derive(Default)]
pub struct ProjectLocks {
    locks: Mutex<HashMap<ProjectId, Arc<AsyncMutex<()>>>>,
}

impl ProjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, project_id: ProjectId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().expect("project lock map poisoned");
        locks
            .entry(project_id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Acquire the project's lock, waiting if another task holds it.
    ///
    /// Non-reentrant: a task already holding the guard must not acquire
    /// again.
    pub async fn acquire(&self, project_id: ProjectId) -> ProjectGuard {
        self.lock_for(project_id).lock_owned().await
    }

    /// Try to acquire without waiting.
    pub fn try_acquire(&self, project_id: ProjectId) -> Option<ProjectGuard> {
        self.lock_for(project_id).try_lock_owned().ok()
    }
}
