//! Model pricing.
//!
//! Baselines come from the model catalogs; a live refresh can override
//! them from a published price sheet. Lookup never fails: unknown models
//! cost the family baseline or zero.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use tracing::{debug, warn};

use muvi_models::{ImageModel, VideoModel};

/// USD per call for every known model, refreshable at runtime.
pub struct PricingTable {
    prices: RwLock<HashMap<String, f64>>,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PricingTable {
    pub fn new() -> Self {
        let mut prices = HashMap::new();
        for model in ImageModel::ALL {
            prices.insert(model.as_str().to_string(), model.base_cost());
            prices.insert(model.t2i_endpoint().to_string(), model.base_cost());
            prices.insert(model.edit_endpoint().to_string(), model.base_cost());
        }
        for model in VideoModel::ALL {
            prices.insert(model.as_str().to_string(), model.base_cost());
            prices.insert(model.endpoint().to_string(), model.base_cost());
        }
        // Flat figures for the non-catalog calls.
        prices.insert("fal-ai/audio-understanding".to_string(), 0.02);
        prices.insert("fal-ai/whisper".to_string(), 0.01);
        prices.insert("fal-ai/any-llm".to_string(), 0.01);

        Self {
            prices: RwLock::new(prices),
        }
    }

    /// Price of one call to `model` (name or endpoint id).
    pub fn cost_of(&self, model: &str) -> f64 {
        self.prices
            .read()
            .expect("pricing table poisoned")
            .get(model)
            .copied()
            .unwrap_or(0.0)
    }

    /// Merge a `model -> usd` map over the current table.
    pub fn apply(&self, updates: HashMap<String, f64>) {
        let mut prices = self.prices.write().expect("pricing table poisoned");
        for (model, cost) in updates {
            prices.insert(model, cost);
        }
    }

    /// Fetch a live price sheet (a flat JSON object of `model: usd`) and
    /// merge it in. Failure leaves the current table untouched.
    pub async fn refresh_from(&self, url: &str) {
        let client = reqwest::Client::new();
        let result = client
            .get(url)
            .timeout(Duration::from_secs(10))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                match response.json::<HashMap<String, f64>>().await {
                    Ok(updates) => {
                        debug!("refreshed {} model prices", updates.len());
                        self.apply(updates);
                    }
                    Err(e) => warn!("price sheet parse failed: {}", e),
                }
            }
            Ok(response) => warn!("price sheet fetch returned {}", response.status()),
            Err(e) => warn!("price sheet fetch failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baselines_present() {
        let table = PricingTable::new();
        assert!(table.cost_of("nanobanana") > 0.0);
        assert!(table.cost_of("fal-ai/nano-banana/edit") > 0.0);
        assert!(table.cost_of("veo3-fast") > 0.0);
        assert_eq!(table.cost_of("unknown-model"), 0.0);
    }

    #[test]
    fn test_apply_overrides() {
        let table = PricingTable::new();
        table.apply(HashMap::from([("nanobanana".to_string(), 0.05)]));
        assert_eq!(table.cost_of("nanobanana"), 0.05);
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_table() {
        let table = PricingTable::new();
        let before = table.cost_of("nanobanana");
        table.refresh_from("http://127.0.0.1:1/prices.json").await;
        assert_eq!(table.cost_of("nanobanana"), before);
    }
}
