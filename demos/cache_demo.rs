use std::time::Duration;
use tokio::time::sleep;
use tracing::info;

use offer_aggregator::cache::{CacheConfig, TtlCache};

#[tokio::main]
async fn main() -> offer_aggregator::error::Result<()> {
    tracing_subscriber::fmt::init();

    info!("Starting Cache Store Demo");

    // short TTLs so expiry is visible within the demo
    let config = CacheConfig {
        offers_ttl: Duration::from_secs(2),
        session_ttl: Duration::from_secs(10),
        proxy_ttl: Duration::from_secs(5),
        health_ttl: Duration::from_secs(1),
        default_ttl: Duration::from_secs(3),
        sweep_interval: Duration::from_secs(1),
    };
    let cache: TtlCache<String> = TtlCache::new(config);
    cache.start_sweeper().await;

    // category prefixes drive the TTL each entry gets
    cache
        .set("offers:https://shop.example/deals:unfiltered", "[3 offers]".to_string(), None)
        .await;
    cache.set("session:abc123", "session payload".to_string(), None).await;
    cache.set("health:pool", "all green".to_string(), None).await;
    info!("Stored {} entries across categories", cache.len().await);

    // compute runs once, the second lookup is served from cache
    let value = cache
        .get_or_set(
            "offers:https://shop.example/sale:unfiltered",
            || async {
                info!("  computing expensive value...");
                Ok("[7 offers]".to_string())
            },
            None,
        )
        .await?;
    info!("get_or_set returned {}", value);

    let value = cache
        .get_or_set(
            "offers:https://shop.example/sale:unfiltered",
            || async {
                info!("  this compute never runs");
                Ok("unreachable".to_string())
            },
            None,
        )
        .await?;
    info!("second lookup served from cache: {}", value);

    // pattern invalidation scoped to one target URL
    let removed = cache
        .invalidate_pattern("^offers:https://shop\\.example/deals:.*")
        .await?;
    info!("Invalidated {} entries for the deals page", removed);

    // letting the health entry expire, then sweeping
    sleep(Duration::from_millis(1500)).await;
    let removed = cache.cleanup().await;
    info!("Cleanup removed {} expired entries", removed);

    let stats = cache.stats().await;
    info!(
        "Cache stats: {} entries, {} hits, {} misses, hit rate {:.2}, ~{} bytes",
        stats.entries, stats.hits, stats.misses, stats.hit_rate, stats.approx_memory_bytes
    );

    cache.stop().await;
    info!("Demo completed");
    Ok(())
}
