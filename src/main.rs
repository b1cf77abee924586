use std::path::PathBuf;
use std::sync::Arc;

use offer_aggregator::api;
use offer_aggregator::backends::build_backends;
use offer_aggregator::cache::{OfferCache, TtlCache};
use offer_aggregator::config::{ConfigManager, FileConfigManager};
use offer_aggregator::offers::OfferFilters;
use offer_aggregator::orchestrator::ScrapeOrchestrator;
use offer_aggregator::proxy::{build_strategy, ProxyPool};
use offer_aggregator::storage::FileObjectStore;
use offer_aggregator::webhooks::{DiscordWebhook, WebhookManager};

#[tokio::main]
async fn main() -> offer_aggregator::error::Result<()> {
    tracing_subscriber::fmt::init();

    let config_manager = Arc::new(FileConfigManager::new(PathBuf::from("config.toml")));
    let config = config_manager.load_config().await?;

    tracing::info!("Starting Offer Aggregator");

    // creating output dir right away
    if let Err(e) = std::fs::create_dir_all(&config.storage.directory) {
        tracing::error!("Failed to create storage directory: {}", e);
    }

    let pool = Arc::new(ProxyPool::from_specs(&config.proxy.endpoints)?);
    let rotation = build_strategy(config.proxy.strategy, config.proxy.rotation_settings());

    let cache: Arc<OfferCache> = Arc::new(TtlCache::new(config.cache.to_cache_config()));
    cache.start_sweeper().await;

    let store = Arc::new(FileObjectStore::new(config.storage.directory.clone()));
    let backends = build_backends(&config.backends)?;

    let mut webhooks = WebhookManager::new();
    if let Some(ref webhook_url) = config.monitoring.discord_webhook_url {
        webhooks.add_provider(Box::new(DiscordWebhook::new(webhook_url.clone())?));
    }

    let orchestrator = Arc::new(ScrapeOrchestrator::new(
        backends,
        rotation,
        pool,
        cache.clone(),
        store,
        Arc::new(webhooks),
        config.orchestrator.to_options(),
    ));

    // query surface in the background
    let api_orchestrator = orchestrator.clone();
    let api_port = config.monitoring.api_port;
    tokio::spawn(async move {
        if let Err(e) = api::start_api_server(api_orchestrator, api_port).await {
            tracing::error!("API server error: {}", e);
        }
    });

    // config edits invalidate cached offers so the next query rescrapes
    // with the new settings
    let watcher_cache = cache.clone();
    let watcher_manager = config_manager.clone();
    tokio::spawn(async move {
        match watcher_manager.watch_config_changes().await {
            Ok(mut config_rx) => {
                while let Some(new_config) = config_rx.recv().await {
                    tracing::info!(
                        "Configuration updated ({} targets, {} backends)",
                        new_config.targets.len(),
                        new_config.backends.len()
                    );
                    match watcher_cache.invalidate_offers(None).await {
                        Ok(count) => tracing::info!("Invalidated {} cached offer entries", count),
                        Err(e) => tracing::error!("Failed to invalidate offer cache: {}", e),
                    }
                }
                tracing::debug!("Config watcher channel closed");
            }
            Err(e) => tracing::error!("Failed to start config watcher: {}", e),
        }
    });

    // initial pass over the configured targets
    for target in &config.targets {
        match orchestrator.run(target, &OfferFilters::default()).await {
            Ok(result) => tracing::info!(
                "{}: {} offers from {}/{} backends ({} duplicates removed)",
                target,
                result.offers.len(),
                result.successful_backends,
                result.attempts.len(),
                result.duplicates_removed
            ),
            Err(e) => tracing::error!("Run failed for {}: {}", target, e),
        }
    }

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| offer_aggregator::AggregatorError::ConfigError(format!("Signal error: {}", e)))?;

    tracing::info!("Shutting down");
    cache.stop().await;

    tracing::info!("Offer Aggregator stopped.");
    Ok(())
}
