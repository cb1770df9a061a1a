//! Backend-call cost tallying.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Session-wide ledgers keep only the most recent calls.
pub const SESSION_COST_CAP: usize = 200;

/// One priced backend call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CostCall {
    pub model: String,
    /// USD.
    pub cost: f64,
    pub ts: DateTime<Utc>,
    /// Call site tag (`ref_a`, `shot_render`, `scene_decor`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Running tally of backend spend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct CostLedger {
    pub total: f64,
    #[serde(default)]
    pub calls: Vec<CostCall>,
}

impl CostLedger {
    /// Record a successful backend call.
    pub fn record(&mut self, model: impl Into<String>, cost: f64, note: Option<String>) {
        self.calls.push(CostCall {
            model: model.into(),
            cost,
            ts: Utc::now(),
            note,
        });
        self.total += cost;
    }

    /// Record and drop oldest entries beyond `cap`.
    ///
    /// The total keeps counting evicted calls; the cap bounds memory, not
    /// accounting.
    pub fn record_capped(
        &mut self,
        model: impl Into<String>,
        cost: f64,
        note: Option<String>,
        cap: usize,
    ) {
        self.record(model, cost, note);
        if self.calls.len() > cap {
            let excess = self.calls.len() - cap;
            self.calls.drain(..excess);
        }
    }

    /// Verify the total against the retained calls.
    ///
    /// Only meaningful for uncapped ledgers (the per-project one).
    pub fn is_consistent(&self) -> bool {
        let sum: f64 = self.calls.iter().map(|c| c.cost).sum();
        (sum - self.total).abs() < 1e-4
    }
}
