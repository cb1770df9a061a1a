//! Project state persistence.
//!
//! One canonical `project.json` per project, written atomically, mutated
//! only under a per-project lock. Loading runs recovery (orphaned render
//! files on disk, dangling render references) and localizes externally
//! hosted artifacts.

mod error;
mod locks;
mod store;

pub use error::{StateError, StateResult};
pub use locks::{ProjectGuard, ProjectLocks};
pub use store::{SaveOptions, StateStore};
