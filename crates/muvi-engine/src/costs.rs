//! Session-wide cost tallying.

use std::sync::Mutex;

use muvi_models::{CostLedger, ProjectState};

/// In-memory ledger of every backend call this process made, across all
/// projects. Capped; per-project accounting persists in state instead.
#[derive(Default)]
pub struct SessionCost {
    inner: Mutex<CostLedger>,
}

impl SessionCost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a priced call into the session ledger.
    pub fn record(&self, model: &str, cost: f64, note: Option<String>) {
        self.inner
            .lock()
            .expect("session cost ledger poisoned")
            .record_capped(model, cost, note, muvi_models::cost::SESSION_COST_CAP);
    }

    /// Snapshot of the current ledger.
    pub fn snapshot(&self) -> CostLedger {
        self.inner
            .lock()
            .expect("session cost ledger poisoned")
            .clone()
    }
}

/// Record a priced call in both the session ledger and the project state.
pub fn record_cost(
    session: &SessionCost,
    state: &mut ProjectState,
    model: &str,
    cost: f64,
    note: &str,
) {
    session.record(model, cost, Some(note.to_string()));
    state.costs.record(model, cost, Some(note.to_string()));
}
