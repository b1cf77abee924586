use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::backends::{build_http_client, ScrapeBackend, ScrapeOptions};
use crate::config::BackendConfig;
use crate::error::{AggregatorError, Result};
use crate::offers::{Availability, Offer};

const DEFAULT_OFFERS_FIELD: &str = "offers";

/// Offer document shape exposed by JSON listing endpoints
#[derive(Debug, Deserialize)]
struct RawOffer {
    id: String,
    title: String,
    price: f64,
    original_price: Option<f64>,
    brand: Option<String>,
    category: Option<String>,
    availability: Option<Availability>,
    image_url: Option<String>,
}

/// Scrapes JSON listing endpoints.
pub struct JsonApiBackend {
    backend_id: String,
    enabled: bool,
    requires_proxy: bool,
    offers_field: String,
}

impl JsonApiBackend {
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            backend_id: config.id.clone(),
            enabled: config.enabled,
            requires_proxy: config.requires_proxy,
            offers_field: config
                .offers_field
                .clone()
                .unwrap_or_else(|| DEFAULT_OFFERS_FIELD.to_string()),
        }
    }

    /// Decode offers from a response document.
    ///
    /// Accepts either a top-level array or an object carrying the
    /// configured offers field. Undecodable items are skipped, not fatal.
    pub fn decode_offers(&self, value: &Value) -> Result<Vec<Offer>> {
        let items = if let Some(array) = value.as_array() {
            array
        } else if let Some(array) = value.get(&self.offers_field).and_then(Value::as_array) {
            array
        } else {
            return Err(AggregatorError::ParseError(format!(
                "{}: response carries no '{}' array",
                self.backend_id, self.offers_field
            ))
            .into());
        };

        let mut offers = Vec::with_capacity(items.len());
        for item in items {
            match serde_json::from_value::<RawOffer>(item.clone()) {
                Ok(raw) => offers.push(Offer {
                    id: raw.id,
                    title: raw.title,
                    price: raw.price,
                    original_price: raw.original_price,
                    brand: raw.brand,
                    category: raw.category,
                    availability: raw.availability.unwrap_or(Availability::InStock),
                    image_url: raw.image_url,
                    timestamp: Utc::now(),
                    source_backend: self.backend_id.clone(),
                }),
                Err(e) => {
                    warn!("Backend {} skipping undecodable offer: {}", self.backend_id, e);
                }
            }
        }

        debug!(
            "Backend {} decoded {} offers from JSON response",
            self.backend_id,
            offers.len()
        );
        Ok(offers)
    }
}

#[async_trait]
impl ScrapeBackend for JsonApiBackend {
    fn id(&self) -> &str {
        &self.backend_id
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn requires_proxy(&self) -> bool {
        self.requires_proxy
    }

    async fn scrape(&self, url: &str, options: &ScrapeOptions) -> Result<Vec<Offer>> {
        let client = build_http_client(options)?;

        let response = client.get(url).send().await.map_err(|e| {
            AggregatorError::BackendScrape(format!("{}: request failed: {}", self.backend_id, e))
        })?;

        if !response.status().is_success() {
            return Err(AggregatorError::BackendScrape(format!(
                "{}: HTTP {} from {}",
                self.backend_id,
                response.status(),
                url
            ))
            .into());
        }

        let body: Value = response.json().await.map_err(|e| {
            AggregatorError::BackendScrape(format!("{}: invalid JSON body: {}", self.backend_id, e))
        })?;

        self.decode_offers(&body)
    }
}
