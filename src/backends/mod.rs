pub mod html_listing;
pub mod json_api;

use async_trait::async_trait;
use std::time::Duration;

use crate::config::{BackendConfig, BackendKind};
use crate::error::Result;
use crate::offers::Offer;

pub use html_listing::HtmlListingBackend;
pub use json_api::JsonApiBackend;

/// Per-invocation options resolved by the orchestrator
#[derive(Debug, Clone)]
pub struct ScrapeOptions {
    pub timeout: Duration,
    pub proxy_url: Option<String>,
}

/// One independent scraping implementation.
///
/// The orchestration layer treats every backend identically through this
/// contract regardless of how it extracts offers.
#[async_trait]
pub trait ScrapeBackend: Send + Sync {
    fn id(&self) -> &str;

    fn enabled(&self) -> bool {
        true
    }

    fn requires_proxy(&self) -> bool {
        true
    }

    async fn scrape(&self, url: &str, options: &ScrapeOptions) -> Result<Vec<Offer>>;
}

/// Build the configured backend set, preserving configuration order.
pub fn build_backends(configs: &[BackendConfig]) -> Result<Vec<Box<dyn ScrapeBackend>>> {
    let mut backends: Vec<Box<dyn ScrapeBackend>> = Vec::with_capacity(configs.len());
    for config in configs {
        let backend: Box<dyn ScrapeBackend> = match config.kind {
            BackendKind::HtmlListing => Box::new(HtmlListingBackend::new(config)?),
            BackendKind::JsonApi => Box::new(JsonApiBackend::new(config)),
        };
        backends.push(backend);
    }
    Ok(backends)
}

pub(crate) fn build_http_client(options: &ScrapeOptions) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(options.timeout)
        .user_agent("Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36");

    if let Some(ref proxy_url) = options.proxy_url {
        builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
    }

    Ok(builder.build()?)
}
