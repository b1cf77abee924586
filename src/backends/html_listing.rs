use async_trait::async_trait;
use chrono::Utc;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::backends::{build_http_client, ScrapeBackend, ScrapeOptions};
use crate::config::{BackendConfig, ListingSelectors};
use crate::error::{AggregatorError, Result};
use crate::offers::{Availability, Offer};

/// Scrapes server-rendered listing pages with CSS selectors.
pub struct HtmlListingBackend {
    backend_id: String,
    enabled: bool,
    requires_proxy: bool,
    offer_selector: Selector,
    title_selector: Selector,
    price_selector: Selector,
    original_price_selector: Selector,
    brand_selector: Selector,
    availability_selector: Selector,
    image_selector: Selector,
}

impl HtmlListingBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let selectors = config
            .selectors
            .clone()
            .unwrap_or_else(ListingSelectors::default);

        Ok(Self {
            backend_id: config.id.clone(),
            enabled: config.enabled,
            requires_proxy: config.requires_proxy,
            offer_selector: parse_selector(&selectors.offer, "offer")?,
            title_selector: parse_selector(&selectors.title, "title")?,
            price_selector: parse_selector(&selectors.price, "price")?,
            original_price_selector: parse_selector(&selectors.original_price, "original price")?,
            brand_selector: parse_selector(&selectors.brand, "brand")?,
            availability_selector: parse_selector(&selectors.availability, "availability")?,
            image_selector: parse_selector(&selectors.image, "image")?,
        })
    }

    /// Extract offers from a listing page.
    pub fn parse_listing(&self, html: &str) -> Vec<Offer> {
        let document = Html::parse_document(html);
        let mut offers = Vec::new();

        for element in document.select(&self.offer_selector) {
            match self.parse_single_offer(&element) {
                Some(offer) => offers.push(offer),
                None => {
                    debug!("Skipped listing element without title or price");
                }
            }
        }

        debug!(
            "Backend {} parsed {} offers from listing",
            self.backend_id,
            offers.len()
        );
        offers
    }

    fn parse_single_offer(&self, element: &ElementRef) -> Option<Offer> {
        let title = self.select_text(element, &self.title_selector)?;
        let price_text = self.select_text(element, &self.price_selector)?;
        let price = parse_price(&price_text)?;

        let original_price = self
            .select_text(element, &self.original_price_selector)
            .and_then(|text| parse_price(&text));
        let brand = self.select_text(element, &self.brand_selector);

        let availability = match self.select_text(element, &self.availability_selector) {
            Some(text) => parse_availability(&text),
            None => Availability::InStock,
        };

        let image_url = element
            .select(&self.image_selector)
            .next()
            .and_then(|img| img.value().attr("src"))
            .map(|src| src.to_string());

        // prefer the site's own product id so copies of the same product
        // scraped by different backends collide in deduplication
        let id = match element.value().attr("data-offer-id") {
            Some(raw_id) if !raw_id.is_empty() => raw_id.to_string(),
            _ => Offer::derived_id(&title, brand.as_deref()),
        };

        Some(Offer {
            id,
            title,
            price,
            original_price,
            brand,
            category: None,
            availability,
            image_url,
            timestamp: Utc::now(),
            source_backend: self.backend_id.clone(),
        })
    }

    fn select_text(&self, element: &ElementRef, selector: &Selector) -> Option<String> {
        let text = element
            .select(selector)
            .next()?
            .text()
            .collect::<String>()
            .trim()
            .to_string();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

#[async_trait]
impl ScrapeBackend for HtmlListingBackend {
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

        let html = response.text().await.map_err(|e| {
            AggregatorError::BackendScrape(format!("{}: reading body failed: {}", self.backend_id, e))
        })?;

        Ok(self.parse_listing(&html))
    }
}

fn parse_selector(selector: &str, name: &str) -> Result<Selector> {
    Selector::parse(selector)
        .map_err(|e| AggregatorError::ParseError(format!("Invalid {} selector: {}", name, e)).into())
}

// tolerate currency symbols and thousands separators
fn parse_price(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();

    if cleaned.is_empty() {
        return None;
    }

    let normalized = if cleaned.contains('.') && cleaned.contains(',') {
        cleaned.replace(',', "")
    } else if cleaned.contains(',') {
        cleaned.replace(',', ".")
    } else {
        cleaned
    };

    normalized.parse::<f64>().ok().filter(|p| p.is_finite() && *p >= 0.0)
}

fn parse_availability(text: &str) -> Availability {
    let lowered = text.to_lowercase();
    if lowered.contains("out of stock") || lowered.contains("sold out") {
        Availability::OutOfStock
    } else if lowered.contains("limited") || lowered.contains("few left") {
        Availability::Limited
    } else {
        Availability::InStock
    }
}
