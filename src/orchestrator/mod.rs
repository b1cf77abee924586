#[cfg(test)]
mod tests;

use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backends::{ScrapeBackend, ScrapeOptions};
use crate::cache::{CacheStats, OfferCache};
use crate::error::{AggregatorError, Result};
use crate::offers::{
    apply_filters, deduplicate_offers, AttemptStatus, BackendAttempt, ConsolidatedResult, Offer,
    OfferFilters,
};
use crate::proxy::{PoolStatus, ProxyPool, RotationStrategy};
use crate::storage::ObjectStore;
use crate::webhooks::WebhookManager;

/// Timeout and retry budgets applied per backend
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub timeout_per_backend: Duration,
    pub max_retries_per_backend: u32,
    pub backoff_ms: (u64, u64),
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            timeout_per_backend: Duration::from_secs(30),
            max_retries_per_backend: 3,
            backoff_ms: (250, 1500),
        }
    }
}

/// Orchestrator health and throughput summary
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub backends: Vec<String>,
    pub runs_completed: u64,
    pub error_count: u32,
    #[serde(with = "humantime_serde")]
    pub uptime: Duration,
}

/// Drives the configured backends in order, rotates egress endpoints,
/// consolidates offers and hands the result to cache, persistence and
/// notification collaborators.
///
/// Backends run strictly sequentially by design: they may share a
/// constrained resource such as a single automated browser session.
pub struct ScrapeOrchestrator {
    backends: Vec<Box<dyn ScrapeBackend>>,
    rotation: Arc<dyn RotationStrategy>,
    pool: Arc<ProxyPool>,
    cache: Arc<OfferCache>,
    store: Arc<dyn ObjectStore>,
    webhooks: Arc<WebhookManager>,
    options: OrchestratorOptions,
    runs_completed: Arc<RwLock<u64>>,
    error_count: Arc<RwLock<u32>>,
    start_time: Instant,
}

impl ScrapeOrchestrator {
    pub fn new(
        backends: Vec<Box<dyn ScrapeBackend>>,
        rotation: Arc<dyn RotationStrategy>,
        pool: Arc<ProxyPool>,
        cache: Arc<OfferCache>,
        store: Arc<dyn ObjectStore>,
        webhooks: Arc<WebhookManager>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            backends,
            rotation,
            pool,
            cache,
            store,
            webhooks,
            options,
            runs_completed: Arc::new(RwLock::new(0)),
            error_count: Arc::new(RwLock::new(0)),
            start_time: Instant::now(),
        }
    }

    /// Run one orchestration pass over all configured backends.
    ///
    /// A backend failure never stops the run; a run with zero successful
    /// backends still returns a well-formed empty result. Callers tell
    /// "no data" from "system down" via `successful_backends` and the
    /// attempt log.
    pub async fn run(
        &self,
        target_url: &str,
        filters: &OfferFilters,
    ) -> Result<ConsolidatedResult> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let run_started = Instant::now();
        info!("Starting orchestration run {} for {}", run_id, target_url);

        let mut merged: Vec<Offer> = Vec::new();
        let mut attempts: Vec<BackendAttempt> = Vec::new();

        for backend in &self.backends {
            if !backend.enabled() {
                info!("Backend {} is disabled, skipping", backend.id());
                attempts.push(BackendAttempt {
                    backend_id: backend.id().to_string(),
                    status: AttemptStatus::Skipped,
                    duration: Duration::from_millis(0),
                    error: None,
                    raw_offer_count: 0,
                    attempts_made: 0,
                });
                continue;
            }

            let (attempt, offers) = self.invoke_backend(backend.as_ref(), target_url).await;
            debug!(
                "Backend {} finished with status {:?} after {} attempts",
                attempt.backend_id, attempt.status, attempt.attempts_made
            );
            attempts.push(attempt);
            merged.extend(offers);
        }

        let merged_count = merged.len();
        let deduped = deduplicate_offers(merged);
        let duplicates_removed = merged_count - deduped.len();
        let offers = apply_filters(deduped, filters);

        let successful_backends = attempts
            .iter()
            .filter(|attempt| attempt.status == AttemptStatus::Success)
            .count();

        let result = ConsolidatedResult {
            run_id,
            target_url: target_url.to_string(),
            offers,
            successful_backends,
            duplicates_removed,
            attempts,
            started_at,
            duration: run_started.elapsed(),
        };

        // write-through cache under the (url, filters) key
        let cache_key = filters.cache_key(target_url);
        self.cache
            .set(&cache_key, result.offers.clone(), None)
            .await;

        // persistence failure is logged, never fails the run
        if let Err(e) = self.persist_run(&result).await {
            self.increment_error_count().await;
            error!("Failed to persist run {}: {}", run_id, e);
        }

        if let Err(e) = self.webhooks.notify_result(&result).await {
            warn!("Failed to deliver run {} notifications: {}", run_id, e);
        }

        {
            let mut runs = self.runs_completed.write().await;
            *runs += 1;
        }

        info!(
            "Orchestration run {} completed: {} offers from {}/{} backends ({} duplicates removed)",
            run_id,
            result.offers.len(),
            result.successful_backends,
            result.attempts.len(),
            result.duplicates_removed
        );
        Ok(result)
    }

    /// Offers for (url, filters), recomputed only when the cached copy
    /// has expired.
    pub async fn cached_offers(
        &self,
        target_url: &str,
        filters: &OfferFilters,
    ) -> Result<Vec<Offer>> {
        let cache_key = filters.cache_key(target_url);
        self.cache
            .get_or_set(
                &cache_key,
                || async {
                    let result = self.run(target_url, filters).await?;
                    Ok(result.offers)
                },
                None,
            )
            .await
    }

    async fn invoke_backend(
        &self,
        backend: &dyn ScrapeBackend,
        target_url: &str,
    ) -> (BackendAttempt, Vec<Offer>) {
        let backend_started = Instant::now();
        let max_attempts = self.options.max_retries_per_backend.max(1);

        let mut attempts_made = 0u32;
        let mut last_error: Option<String> = None;
        let mut offers: Vec<Offer> = Vec::new();
        let mut status = AttemptStatus::Failed;

        for attempt in 1..=max_attempts {
            attempts_made = attempt;

            // resolve an egress endpoint; a fresh one per attempt moves
            // retries away from an endpoint that just failed
            let endpoint = if backend.requires_proxy() {
                let candidates = self.pool.snapshot().await;
                match self.rotation.next(&candidates).await {
                    Ok(endpoint) => Some(endpoint),
                    Err(e) => {
                        warn!(
                            "Backend {} has no usable egress endpoint: {}",
                            backend.id(),
                            e
                        );
                        last_error = Some(e.to_string());
                        break;
                    }
                }
            } else {
                None
            };

            let proxy_url = match &endpoint {
                Some(endpoint) => Some(endpoint.read().await.proxy_url()),
                None => None,
            };
            let scrape_options = ScrapeOptions {
                timeout: self.options.timeout_per_backend,
                proxy_url,
            };

            let attempt_started = Instant::now();
            let outcome = tokio::time::timeout(
                self.options.timeout_per_backend,
                backend.scrape(target_url, &scrape_options),
            )
            .await;

            match outcome {
                Ok(Ok(scraped)) => {
                    if let Some(endpoint) = &endpoint {
                        self.rotation.on_success(endpoint).await;
                        endpoint
                            .write()
                            .await
                            .record_latency(attempt_started.elapsed());
                    }
                    debug!(
                        "Backend {} returned {} offers on attempt {}",
                        backend.id(),
                        scraped.len(),
                        attempt
                    );
                    offers = scraped;
                    status = AttemptStatus::Success;
                    last_error = None;
                    break;
                }
                Ok(Err(e)) => {
                    if let Some(endpoint) = &endpoint {
                        self.rotation.on_failure(endpoint).await;
                    }
                    warn!("Backend {} attempt {} failed: {}", backend.id(), attempt, e);
                    last_error = Some(e.to_string());
                }
                Err(_) => {
                    if let Some(endpoint) = &endpoint {
                        self.rotation.on_failure(endpoint).await;
                    }
                    let timeout_error = AggregatorError::BackendTimeout(format!(
                        "backend {} exceeded its {:?} budget",
                        backend.id(),
                        self.options.timeout_per_backend
                    ));
                    warn!("{}", timeout_error);
                    last_error = Some(timeout_error.to_string());
                }
            }

            if attempt < max_attempts {
                // randomized backoff avoids retry storms
                let (low, high) = self.options.backoff_ms;
                let backoff = rand::thread_rng().gen_range(low..=high);
                debug!(
                    "Backing off {}ms before retrying backend {}",
                    backoff,
                    backend.id()
                );
                sleep(Duration::from_millis(backoff)).await;
            }
        }

        let raw_offer_count = offers.len();
        offers.retain(|offer| {
            if offer.is_valid() {
                true
            } else {
                debug!(
                    "Dropping malformed offer '{}' from backend {}",
                    offer.id,
                    backend.id()
                );
                false
            }
        });

        let attempt = BackendAttempt {
            backend_id: backend.id().to_string(),
            status,
            duration: backend_started.elapsed(),
            error: last_error,
            raw_offer_count,
            attempts_made,
        };

        (attempt, offers)
    }

    async fn persist_run(&self, result: &ConsolidatedResult) -> Result<()> {
        for attempt in &result.attempts {
            let key = format!("{}_{}", result.run_id, attempt.backend_id);
            let mut payload = serde_json::to_value(attempt)?;
            if let Some(object) = payload.as_object_mut() {
                object.insert("source".to_string(), json!(attempt.backend_id));
                object.insert("run_id".to_string(), json!(result.run_id));
                object.insert("target_url".to_string(), json!(result.target_url));
            }
            self.store.store("attempts", &key, payload).await?;
        }

        let mut payload = serde_json::to_value(result)?;
        if let Some(object) = payload.as_object_mut() {
            object.insert("source".to_string(), json!("consolidated"));
        }
        self.store
            .store("runs", &result.run_id.to_string(), payload)
            .await?;

        Ok(())
    }

    pub async fn get_cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    /// Invalidate cache entries by pattern, or everything when no pattern
    /// is given. Returns the removed entry count.
    pub async fn invalidate_cache(&self, pattern: Option<&str>) -> Result<usize> {
        match pattern {
            Some(pattern) => self.cache.invalidate_pattern(pattern).await,
            None => {
                let count = self.cache.len().await;
                self.cache.clear().await;
                Ok(count)
            }
        }
    }

    pub async fn get_proxy_status(&self) -> PoolStatus {
        self.pool.status().await
    }

    pub async fn status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            backends: self
                .backends
                .iter()
                .map(|backend| backend.id().to_string())
                .collect(),
            runs_completed: *self.runs_completed.read().await,
            error_count: *self.error_count.read().await,
            uptime: self.start_time.elapsed(),
        }
    }

    async fn increment_error_count(&self) {
        let mut error_count = self.error_count.write().await;
        *error_count += 1;
    }
}
