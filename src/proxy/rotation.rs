use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{AggregatorError, Result};
use crate::proxy::endpoint::SharedEndpoint;

/// Which rotation strategy the pool runs with, selected via configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationKind {
    RoundRobin,
    Random,
}

/// Tunables shared by all strategies
#[derive(Debug, Clone, Copy)]
pub struct RotationSettings {
    pub max_failures: u32,
    pub reactivation_delay: Duration,
}

impl Default for RotationSettings {
    fn default() -> Self {
        Self {
            max_failures: 3,
            reactivation_delay: Duration::from_secs(30),
        }
    }
}

/// Selects the next egress endpoint and receives success/failure feedback.
///
/// The orchestration layer is agnostic to which strategy is configured:
/// both variants share this contract.
#[async_trait]
pub trait RotationStrategy: Send + Sync {
    async fn next(&self, candidates: &[SharedEndpoint]) -> Result<SharedEndpoint>;
    async fn on_success(&self, endpoint: &SharedEndpoint);
    async fn on_failure(&self, endpoint: &SharedEndpoint);
}

pub fn build_strategy(kind: RotationKind, settings: RotationSettings) -> Arc<dyn RotationStrategy> {
    match kind {
        RotationKind::RoundRobin => Arc::new(RoundRobinRotation::new(settings)),
        RotationKind::Random => Arc::new(RandomRotation::new(settings)),
    }
}

#[derive(Debug, Default)]
struct RotationOrder {
    keys: Vec<String>,
    cursor: usize,
}

/// Cycles through endpoints in a stable order, skipping deactivated ones
/// until their cool-down elapses.
pub struct RoundRobinRotation {
    order: Mutex<RotationOrder>,
    settings: RotationSettings,
}

impl RoundRobinRotation {
    pub fn new(settings: RotationSettings) -> Self {
        Self {
            order: Mutex::new(RotationOrder::default()),
            settings,
        }
    }
}

#[async_trait]
impl RotationStrategy for RoundRobinRotation {
    async fn next(&self, candidates: &[SharedEndpoint]) -> Result<SharedEndpoint> {
        if candidates.is_empty() {
            return Err(
                AggregatorError::NoActiveEndpoint("endpoint pool is empty".to_string()).into(),
            );
        }

        let mut by_key: HashMap<String, SharedEndpoint> = HashMap::new();
        for endpoint in candidates {
            by_key.insert(endpoint.read().await.key(), endpoint.clone());
        }

        // reconcile the internal order against the external candidate list
        let mut order = self.order.lock().await;
        order.keys.retain(|key| by_key.contains_key(key));
        for endpoint in candidates {
            let key = endpoint.read().await.key();
            if !order.keys.contains(&key) {
                debug!("Rotation tracking new endpoint {}", key);
                order.keys.push(key);
            }
        }

        let len = order.keys.len();
        for _ in 0..len {
            let key = order.keys[order.cursor % len].clone();
            order.cursor = (order.cursor + 1) % len;

            let endpoint = by_key[&key].clone();
            let mut guard = endpoint.write().await;

            if guard.active {
                drop(guard);
                return Ok(endpoint);
            }

            if guard.reactivation_due(self.settings.reactivation_delay) {
                info!("Reactivating endpoint {} after cool-down", key);
                guard.reactivate();
                drop(guard);
                return Ok(endpoint);
            }
        }

        Err(AggregatorError::NoActiveEndpoint(
            "all proxy endpoints are deactivated".to_string(),
        )
        .into())
    }

    async fn on_success(&self, endpoint: &SharedEndpoint) {
        endpoint.write().await.record_success();
    }

    async fn on_failure(&self, endpoint: &SharedEndpoint) {
        let mut guard = endpoint.write().await;
        guard.record_failure(self.settings.max_failures);
        if !guard.active {
            warn!(
                "Endpoint {} deactivated after {} consecutive failures",
                guard.key(),
                guard.failure_count
            );
        }
    }
}

/// Picks uniformly among eligible endpoints, never repeating the previous
/// pick when more than one candidate exists.
pub struct RandomRotation {
    last_index: Mutex<Option<usize>>,
    settings: RotationSettings,
}

impl RandomRotation {
    pub fn new(settings: RotationSettings) -> Self {
        Self {
            last_index: Mutex::new(None),
            settings,
        }
    }
}

#[async_trait]
impl RotationStrategy for RandomRotation {
    async fn next(&self, candidates: &[SharedEndpoint]) -> Result<SharedEndpoint> {
        if candidates.is_empty() {
            return Err(
                AggregatorError::NoActiveEndpoint("endpoint pool is empty".to_string()).into(),
            );
        }

        let mut eligible: Vec<usize> = Vec::new();
        for (index, endpoint) in candidates.iter().enumerate() {
            let mut guard = endpoint.write().await;
            if guard.active {
                eligible.push(index);
            } else if guard.reactivation_due(self.settings.reactivation_delay) {
                info!("Reactivating endpoint {} after cool-down", guard.key());
                guard.reactivate();
                eligible.push(index);
            }
        }

        if eligible.is_empty() {
            return Err(AggregatorError::NoActiveEndpoint(
                "all proxy endpoints are deactivated".to_string(),
            )
            .into());
        }

        let mut last_index = self.last_index.lock().await;
        if eligible.len() > 1 {
            if let Some(last) = *last_index {
                eligible.retain(|&index| index != last);
            }
        }

        let chosen = eligible[rand::thread_rng().gen_range(0..eligible.len())];
        *last_index = Some(chosen);
        Ok(candidates[chosen].clone())
    }

    async fn on_success(&self, endpoint: &SharedEndpoint) {
        endpoint.write().await.record_success();
    }

    async fn on_failure(&self, endpoint: &SharedEndpoint) {
        {
            let mut guard = endpoint.write().await;
            guard.record_failure(self.settings.max_failures);
        }
        // forget the last pick so the next call is unconstrained
        let mut last_index = self.last_index.lock().await;
        *last_index = None;
    }
}
