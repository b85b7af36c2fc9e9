//! Provider Registry: holds adapter instances keyed by name, ranks them by a
//! composite score, and exposes weight/status snapshots for the Aggregator.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::warn;

use crate::providers::ProviderAdapter;
use crate::types::ProviderStatus;

struct Entry {
    adapter: Arc<dyn ProviderAdapter>,
    base_weight: f64,
}

/// Holds the configured set of provider adapters and ranks them for selection.
pub struct Registry {
    entries: Vec<Entry>,
    weights: RwLock<HashMap<String, f64>>,
    weight_decay_factor: f64,
}

impl Registry {
    /// `adapters` is the full configured set, registered once at startup.
    pub fn new(adapters: Vec<(Arc<dyn ProviderAdapter>, f64)>, weight_decay_factor: f64) -> Self {
        let mut weights = HashMap::with_capacity(adapters.len());
        let entries: Vec<Entry> = adapters
            .into_iter()
            .map(|(adapter, base_weight)| {
                weights.insert(adapter.name().to_string(), base_weight);
                Entry { adapter, base_weight }
            })
            .collect();

        Self {
            entries,
            weights: RwLock::new(weights),
            weight_decay_factor,
        }
    }

    pub fn all(&self) -> Vec<Arc<dyn ProviderAdapter>> {
        self.entries.iter().map(|e| e.adapter.clone()).collect()
    }

    pub fn healthy(&self) -> Vec<Arc<dyn ProviderAdapter>> {
        self.entries.iter().filter(|e| e.adapter.is_healthy()).map(|e| e.adapter.clone()).collect()
    }

    pub fn weights(&self) -> HashMap<String, f64> {
        self.weights.read().clone()
    }

    pub fn update_weight(&self, name: &str, weight: f64) {
        self.weights.write().insert(name.to_string(), weight);
    }

    pub fn statuses(&self) -> HashMap<String, ProviderStatus> {
        self.entries.iter().map(|e| (e.adapter.name().to_string(), e.adapter.status())).collect()
    }

    /// Ping every adapter concurrently under `deadline`; returns per-name outcome.
    pub async fn health_check(&self, deadline: Duration) -> HashMap<String, bool> {
        let futures = self.entries.iter().map(|e| {
            let adapter = e.adapter.clone();
            async move {
                let ok = adapter.ping(deadline).await.is_ok();
                if !ok {
                    warn!(provider = adapter.name(), "health check ping failed");
                }
                (adapter.name().to_string(), ok)
            }
        });
        futures::future::join_all(futures).await.into_iter().collect()
    }

    /// Composite score: `base_weight × reliability_factor × latency_factor × recency_decay`.
    fn score(&self, entry: &Entry) -> f64 {
        let configured_weight = self.weights.read().get(entry.adapter.name()).copied().unwrap_or(entry.base_weight);
        let snapshot = entry.adapter.health_snapshot();
        let reliability_factor = if snapshot.total_requests == 0 { 1.0 } else { snapshot.success_rate };
        let latency_factor = 1.0 / (1.0 + snapshot.avg_latency.as_secs_f64());
        let hours_idle = snapshot.last_request_secs_ago.map(|s| s as f64 / 3600.0).unwrap_or(0.0);
        let recency_decay = (-self.weight_decay_factor * hours_idle).exp();
        configured_weight * reliability_factor * latency_factor * recency_decay
    }

    /// Top `max_providers` healthy adapters by composite score, ties broken by name.
    pub fn select(&self, max_providers: usize) -> Vec<Arc<dyn ProviderAdapter>> {
        let mut scored: Vec<(f64, &Entry)> = self
            .entries
            .iter()
            .filter(|e| e.adapter.is_healthy())
            .map(|e| (self.score(e), e))
            .collect();

        scored.sort_by(|(score_a, a), (score_b, b)| {
            score_b
                .partial_cmp(score_a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.adapter.name().cmp(b.adapter.name()))
        });

        scored.into_iter().take(max_providers).map(|(_, e)| e.adapter.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::MockAdapter;
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn selects_up_to_max_providers_by_score() {
        let a = Arc::new(MockAdapter::new("a", 2.0));
        let b = Arc::new(MockAdapter::new("b", 1.0));
        let c = Arc::new(MockAdapter::new("c", 3.0));
        a.push_price(Decimal::ONE);
        b.push_price(Decimal::ONE);
        c.push_price(Decimal::ONE);

        let registry = Registry::new(
            vec![(a as Arc<dyn ProviderAdapter>, 2.0), (b as _, 1.0), (c as _, 3.0)],
            0.1,
        );

        let selected = registry.select(2);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].name(), "c");
        assert_eq!(selected[1].name(), "a");
    }

    #[test]
    fn excludes_unhealthy_adapters() {
        let a = Arc::new(MockAdapter::new("a", 1.0));
        a.set_maintenance(true);
        let registry = Registry::new(vec![(a as Arc<dyn ProviderAdapter>, 1.0)], 0.1);
        assert!(registry.healthy().is_empty());
    }

    #[test]
    fn ties_break_deterministically_on_name() {
        let a = Arc::new(MockAdapter::new("zeta", 1.0));
        let b = Arc::new(MockAdapter::new("alpha", 1.0));
        let registry = Registry::new(vec![(a as Arc<dyn ProviderAdapter>, 1.0), (b as _, 1.0)], 0.1);
        let selected = registry.select(2);
        assert_eq!(selected[0].name(), "alpha");
        assert_eq!(selected[1].name(), "zeta");
    }
}
