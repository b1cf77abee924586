use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::backends::{ScrapeBackend, ScrapeOptions};
use crate::cache::{CacheConfig, OfferCache, TtlCache};
use crate::error::{AggregatorError, Result};
use crate::offers::{AttemptStatus, Availability, Offer, OfferFilters};
use crate::orchestrator::{OrchestratorOptions, ScrapeOrchestrator};
use crate::proxy::{
    build_strategy, ProxyEndpoint, ProxyPool, ProxyProtocol, RotationKind, RotationSettings,
};
use crate::storage::MockObjectStore;
use crate::webhooks::WebhookManager;

enum ScriptedOutcome {
    Offers(Vec<Offer>),
    Fail(String),
    Hang(Duration),
}

/// Backend that replays a fixed sequence of outcomes, one per scrape call.
struct ScriptedBackend {
    backend_id: String,
    enabled: bool,
    requires_proxy: bool,
    outcomes: Mutex<VecDeque<ScriptedOutcome>>,
    calls: Arc<AtomicU32>,
}

impl ScriptedBackend {
    fn new(backend_id: &str, outcomes: Vec<ScriptedOutcome>) -> Self {
        Self {
            backend_id: backend_id.to_string(),
            enabled: true,
            requires_proxy: false,
            outcomes: Mutex::new(outcomes.into()),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    fn with_proxy(mut self) -> Self {
        self.requires_proxy = true;
        self
    }

    fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    fn call_counter(&self) -> Arc<AtomicU32> {
        self.calls.clone()
    }
}

#[async_trait]
impl ScrapeBackend for ScriptedBackend {
    fn id(&self) -> &str {
        &self.backend_id
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn requires_proxy(&self) -> bool {
        self.requires_proxy
    }

    async fn scrape(&self, _url: &str, _options: &ScrapeOptions) -> Result<Vec<Offer>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .outcomes
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| ScriptedOutcome::Fail("script exhausted".to_string()));

        match outcome {
            ScriptedOutcome::Offers(offers) => Ok(offers),
            ScriptedOutcome::Fail(message) => {
                Err(AggregatorError::BackendScrape(message).into())
            }
            ScriptedOutcome::Hang(duration) => {
                tokio::time::sleep(duration).await;
                Ok(Vec::new())
            }
        }
    }
}

fn create_test_offer(id: &str, price: f64, source: &str) -> Offer {
    Offer {
        id: id.to_string(),
        title: format!("Offer {}", id),
        price,
        original_price: None,
        brand: None,
        category: None,
        availability: Availability::InStock,
        image_url: None,
        timestamp: Utc::now(),
        source_backend: source.to_string(),
    }
}

fn accepting_store() -> MockObjectStore {
    let mut store = MockObjectStore::new();
    store.expect_store().returning(|_, _, _| Ok(()));
    store
}

fn fast_options() -> OrchestratorOptions {
    OrchestratorOptions {
        timeout_per_backend: Duration::from_millis(100),
        max_retries_per_backend: 3,
        backoff_ms: (1, 5),
    }
}

fn create_orchestrator(
    backends: Vec<Box<dyn ScrapeBackend>>,
    endpoint_count: usize,
    store: MockObjectStore,
    options: OrchestratorOptions,
) -> ScrapeOrchestrator {
    let endpoints: Vec<ProxyEndpoint> = (0..endpoint_count)
        .map(|i| ProxyEndpoint::new("10.0.0.1", 8000 + i as u16, ProxyProtocol::Http))
        .collect();

    ScrapeOrchestrator::new(
        backends,
        build_strategy(RotationKind::RoundRobin, RotationSettings::default()),
        Arc::new(ProxyPool::from_endpoints(endpoints)),
        Arc::new(TtlCache::new(CacheConfig::default())),
        Arc::new(store),
        Arc::new(WebhookManager::new()),
        options,
    )
}

#[tokio::test]
async fn test_retry_succeeds_on_third_attempt() {
    // backend 2 times out twice, then succeeds on the third attempt: the
    // run must report it as a success with 3 logged attempts
    let backends: Vec<Box<dyn ScrapeBackend>> = vec![
        Box::new(ScriptedBackend::new(
            "backend-1",
            vec![ScriptedOutcome::Offers(vec![create_test_offer(
                "a", 1.0, "backend-1",
            )])],
        )),
        Box::new(ScriptedBackend::new(
            "backend-2",
            vec![
                ScriptedOutcome::Hang(Duration::from_millis(500)),
                ScriptedOutcome::Hang(Duration::from_millis(500)),
                ScriptedOutcome::Offers(vec![create_test_offer("b", 2.0, "backend-2")]),
            ],
        )),
        Box::new(ScriptedBackend::new(
            "backend-3",
            vec![ScriptedOutcome::Offers(vec![])],
        )),
    ];

    let orchestrator = create_orchestrator(backends, 0, accepting_store(), fast_options());
    let result = orchestrator
        .run("https://shop.example/deals", &OfferFilters::default())
        .await
        .unwrap();

    assert_eq!(result.attempts.len(), 3);
    assert_eq!(result.attempts[1].backend_id, "backend-2");
    assert_eq!(result.attempts[1].status, AttemptStatus::Success);
    assert_eq!(result.attempts[1].attempts_made, 3);
    assert!(result.attempts[1].error.is_none());
    assert_eq!(result.successful_backends, 3);
    assert_eq!(result.offers.len(), 2);
}

#[tokio::test]
async fn test_first_seen_backend_wins_deduplication() {
    // A returns [x@10], B returns [x@12, y@5]: A's copy of x must win
    let backends: Vec<Box<dyn ScrapeBackend>> = vec![
        Box::new(ScriptedBackend::new(
            "backend-a",
            vec![ScriptedOutcome::Offers(vec![create_test_offer(
                "x", 10.0, "backend-a",
            )])],
        )),
        Box::new(ScriptedBackend::new(
            "backend-b",
            vec![ScriptedOutcome::Offers(vec![
                create_test_offer("x", 12.0, "backend-b"),
                create_test_offer("y", 5.0, "backend-b"),
            ])],
        )),
    ];

    let orchestrator = create_orchestrator(backends, 0, accepting_store(), fast_options());
    let result = orchestrator
        .run("https://shop.example/deals", &OfferFilters::default())
        .await
        .unwrap();

    assert_eq!(result.offers.len(), 2);
    assert_eq!(result.offers[0].id, "x");
    assert_eq!(result.offers[0].price, 10.0);
    assert_eq!(result.offers[0].source_backend, "backend-a");
    assert_eq!(result.offers[1].id, "y");
    assert_eq!(result.offers[1].price, 5.0);
    assert_eq!(result.duplicates_removed, 1);
}

#[tokio::test]
async fn test_all_backends_failing_still_returns_result() {
    let backends: Vec<Box<dyn ScrapeBackend>> = vec![
        Box::new(ScriptedBackend::new(
            "backend-1",
            vec![
                ScriptedOutcome::Fail("403".to_string()),
                ScriptedOutcome::Fail("403".to_string()),
                ScriptedOutcome::Fail("403".to_string()),
            ],
        )),
        Box::new(ScriptedBackend::new(
            "backend-2",
            vec![
                ScriptedOutcome::Fail("captcha".to_string()),
                ScriptedOutcome::Fail("captcha".to_string()),
                ScriptedOutcome::Fail("captcha".to_string()),
            ],
        )),
    ];

    let orchestrator = create_orchestrator(backends, 0, accepting_store(), fast_options());
    let result = orchestrator
        .run("https://shop.example/deals", &OfferFilters::default())
        .await
        .unwrap();

    assert!(result.offers.is_empty());
    assert_eq!(result.successful_backends, 0);
    assert_eq!(result.attempts.len(), 2);
    for attempt in &result.attempts {
        assert_eq!(attempt.status, AttemptStatus::Failed);
        assert_eq!(attempt.attempts_made, 3);
        assert!(attempt.error.is_some());
    }
}

#[tokio::test]
async fn test_no_active_endpoint_fails_backend_but_not_run() {
    // empty pool: the proxied backend is never invoked, the other runs
    let proxied = ScriptedBackend::new(
        "needs-proxy",
        vec![ScriptedOutcome::Offers(vec![create_test_offer(
            "a", 1.0, "needs-proxy",
        )])],
    )
    .with_proxy();
    let proxied_calls = proxied.call_counter();

    let backends: Vec<Box<dyn ScrapeBackend>> = vec![
        Box::new(proxied),
        Box::new(ScriptedBackend::new(
            "direct",
            vec![ScriptedOutcome::Offers(vec![create_test_offer(
                "b", 2.0, "direct",
            )])],
        )),
    ];

    let orchestrator = create_orchestrator(backends, 0, accepting_store(), fast_options());
    let result = orchestrator
        .run("https://shop.example/deals", &OfferFilters::default())
        .await
        .unwrap();

    assert_eq!(proxied_calls.load(Ordering::SeqCst), 0);
    assert_eq!(result.attempts[0].status, AttemptStatus::Failed);
    assert!(result.attempts[0]
        .error
        .as_ref()
        .unwrap()
        .contains("No active proxy endpoint"));
    assert_eq!(result.attempts[1].status, AttemptStatus::Success);
    assert_eq!(result.offers.len(), 1);
    assert_eq!(result.successful_backends, 1);
}

#[tokio::test]
async fn test_timeout_counts_as_failure() {
    let backends: Vec<Box<dyn ScrapeBackend>> = vec![Box::new(ScriptedBackend::new(
        "slow",
        vec![
            ScriptedOutcome::Hang(Duration::from_millis(500)),
            ScriptedOutcome::Hang(Duration::from_millis(500)),
        ],
    ))];

    let options = OrchestratorOptions {
        timeout_per_backend: Duration::from_millis(30),
        max_retries_per_backend: 2,
        backoff_ms: (1, 5),
    };

    let orchestrator = create_orchestrator(backends, 0, accepting_store(), options);
    let result = orchestrator
        .run("https://shop.example/deals", &OfferFilters::default())
        .await
        .unwrap();

    assert_eq!(result.attempts[0].status, AttemptStatus::Failed);
    assert_eq!(result.attempts[0].attempts_made, 2);
    assert!(result.attempts[0].error.as_ref().unwrap().contains("budget"));
    assert_eq!(result.successful_backends, 0);
}

#[tokio::test]
async fn test_disabled_backend_is_skipped() {
    let disabled = ScriptedBackend::new(
        "disabled",
        vec![ScriptedOutcome::Offers(vec![create_test_offer(
            "a", 1.0, "disabled",
        )])],
    )
    .disabled();
    let disabled_calls = disabled.call_counter();

    let backends: Vec<Box<dyn ScrapeBackend>> = vec![Box::new(disabled)];

    let orchestrator = create_orchestrator(backends, 0, accepting_store(), fast_options());
    let result = orchestrator
        .run("https://shop.example/deals", &OfferFilters::default())
        .await
        .unwrap();

    assert_eq!(disabled_calls.load(Ordering::SeqCst), 0);
    assert_eq!(result.attempts[0].status, AttemptStatus::Skipped);
    assert_eq!(result.attempts[0].attempts_made, 0);
    assert!(result.offers.is_empty());
}

#[tokio::test]
async fn test_proxy_feedback_reaches_endpoints() {
    let backends: Vec<Box<dyn ScrapeBackend>> = vec![Box::new(
        ScriptedBackend::new(
            "proxied",
            vec![
                ScriptedOutcome::Fail("blocked".to_string()),
                ScriptedOutcome::Offers(vec![create_test_offer("a", 1.0, "proxied")]),
            ],
        )
        .with_proxy(),
    )];

    let orchestrator = create_orchestrator(backends, 1, accepting_store(), fast_options());
    let result = orchestrator
        .run("https://shop.example/deals", &OfferFilters::default())
        .await
        .unwrap();

    assert_eq!(result.attempts[0].status, AttemptStatus::Success);
    assert_eq!(result.attempts[0].attempts_made, 2);

    // failure then success: counters reset, endpoint active with latency
    let status = orchestrator.get_proxy_status().await;
    assert_eq!(status.total, 1);
    assert_eq!(status.active, 1);
    assert_eq!(status.endpoints[0].failure_count, 0);
    assert!(status.endpoints[0].latency_ms.is_some());
}

#[tokio::test]
async fn test_malformed_offers_are_dropped_but_counted_raw() {
    let mut bad_offer = create_test_offer("", 1.0, "backend-1");
    bad_offer.title = String::new();

    let backends: Vec<Box<dyn ScrapeBackend>> = vec![Box::new(ScriptedBackend::new(
        "backend-1",
        vec![ScriptedOutcome::Offers(vec![
            bad_offer,
            create_test_offer("ok", 2.0, "backend-1"),
        ])],
    ))];

    let orchestrator = create_orchestrator(backends, 0, accepting_store(), fast_options());
    let result = orchestrator
        .run("https://shop.example/deals", &OfferFilters::default())
        .await
        .unwrap();

    assert_eq!(result.attempts[0].raw_offer_count, 2);
    assert_eq!(result.offers.len(), 1);
    assert_eq!(result.offers[0].id, "ok");
}

#[tokio::test]
async fn test_filters_are_applied_and_keyed_into_cache() {
    let backends: Vec<Box<dyn ScrapeBackend>> = vec![Box::new(ScriptedBackend::new(
        "backend-1",
        vec![ScriptedOutcome::Offers(vec![
            create_test_offer("cheap", 5.0, "backend-1"),
            create_test_offer("pricey", 50.0, "backend-1"),
        ])],
    ))];

    let filters = OfferFilters {
        max_price: Some(10.0),
        ..Default::default()
    };

    let orchestrator = create_orchestrator(backends, 0, accepting_store(), fast_options());
    let result = orchestrator
        .run("https://shop.example/deals", &filters)
        .await
        .unwrap();

    assert_eq!(result.offers.len(), 1);
    assert_eq!(result.offers[0].id, "cheap");

    // the filtered list is what landed in the cache
    let stats = orchestrator.get_cache_stats().await;
    assert_eq!(stats.entries, 1);
}

#[tokio::test]
async fn test_run_writes_through_to_cache() {
    let backends: Vec<Box<dyn ScrapeBackend>> = vec![Box::new(ScriptedBackend::new(
        "backend-1",
        vec![ScriptedOutcome::Offers(vec![create_test_offer(
            "a", 1.0, "backend-1",
        )])],
    ))];

    let cache: Arc<OfferCache> = Arc::new(TtlCache::new(CacheConfig::default()));
    let orchestrator = ScrapeOrchestrator::new(
        backends,
        build_strategy(RotationKind::RoundRobin, RotationSettings::default()),
        Arc::new(ProxyPool::new()),
        cache.clone(),
        Arc::new(accepting_store()),
        Arc::new(WebhookManager::new()),
        fast_options(),
    );

    let filters = OfferFilters::default();
    let url = "https://shop.example/deals";
    let result = orchestrator.run(url, &filters).await.unwrap();

    let cached = cache.get(&filters.cache_key(url)).await.unwrap();
    assert_eq!(cached, result.offers);
}

#[tokio::test]
async fn test_cached_offers_computes_once_per_ttl_window() {
    let backend = ScriptedBackend::new(
        "backend-1",
        vec![
            ScriptedOutcome::Offers(vec![create_test_offer("a", 1.0, "backend-1")]),
            ScriptedOutcome::Offers(vec![create_test_offer("b", 2.0, "backend-1")]),
        ],
    );
    let calls = backend.call_counter();

    let orchestrator = create_orchestrator(
        vec![Box::new(backend)],
        0,
        accepting_store(),
        fast_options(),
    );

    let filters = OfferFilters::default();
    let url = "https://shop.example/deals";

    let first = orchestrator.cached_offers(url, &filters).await.unwrap();
    let second = orchestrator.cached_offers(url, &filters).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_persistence_failure_does_not_fail_run() {
    let mut store = MockObjectStore::new();
    store
        .expect_store()
        .returning(|_, _, _| Err(AggregatorError::PersistenceWrite("disk full".to_string()).into()));

    let backends: Vec<Box<dyn ScrapeBackend>> = vec![Box::new(ScriptedBackend::new(
        "backend-1",
        vec![ScriptedOutcome::Offers(vec![create_test_offer(
            "a", 1.0, "backend-1",
        )])],
    ))];

    let orchestrator = create_orchestrator(backends, 0, store, fast_options());
    let result = orchestrator
        .run("https://shop.example/deals", &OfferFilters::default())
        .await
        .unwrap();

    assert_eq!(result.offers.len(), 1);

    let status = orchestrator.status().await;
    assert_eq!(status.error_count, 1);
    assert_eq!(status.runs_completed, 1);
}

#[tokio::test]
async fn test_persists_one_record_per_attempt_plus_consolidated() {
    let mut store = MockObjectStore::new();
    store
        .expect_store()
        .withf(|namespace, _, _| namespace == "attempts")
        .times(2)
        .returning(|_, _, _| Ok(()));
    store
        .expect_store()
        .withf(|namespace, _, payload| {
            namespace == "runs" && payload["source"] == "consolidated"
        })
        .times(1)
        .returning(|_, _, _| Ok(()));

    let backends: Vec<Box<dyn ScrapeBackend>> = vec![
        Box::new(ScriptedBackend::new(
            "backend-1",
            vec![ScriptedOutcome::Offers(vec![])],
        )),
        Box::new(ScriptedBackend::new(
            "backend-2",
            vec![ScriptedOutcome::Offers(vec![])],
        )),
    ];

    let orchestrator = create_orchestrator(backends, 0, store, fast_options());
    orchestrator
        .run("https://shop.example/deals", &OfferFilters::default())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_invalidate_cache_with_and_without_pattern() {
    let backends: Vec<Box<dyn ScrapeBackend>> = vec![Box::new(ScriptedBackend::new(
        "backend-1",
        vec![ScriptedOutcome::Offers(vec![create_test_offer(
            "a", 1.0, "backend-1",
        )])],
    ))];

    let orchestrator = create_orchestrator(backends, 0, accepting_store(), fast_options());
    orchestrator
        .run("https://shop.example/deals", &OfferFilters::default())
        .await
        .unwrap();

    let removed = orchestrator
        .invalidate_cache(Some("^offers:https://shop\\.example/deals:.*"))
        .await
        .unwrap();
    assert_eq!(removed, 1);

    let removed = orchestrator.invalidate_cache(None).await.unwrap();
    assert_eq!(removed, 0);
}
