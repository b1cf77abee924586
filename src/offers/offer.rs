use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Stock status reported by a backend for one offer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    InStock,
    Limited,
    OutOfStock,
}

/// A single product offer as returned by a scraping backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Offer {
    pub id: String,
    pub title: String,
    pub price: f64,
    pub original_price: Option<f64>,
    pub brand: Option<String>,
    pub category: Option<String>,
    pub availability: Availability,
    pub image_url: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub source_backend: String,
}

impl Offer {
    // check the offer has everything downstream consumers rely on
    pub fn is_valid(&self) -> bool {
        !self.id.is_empty()
            && !self.title.is_empty()
            && self.price.is_finite()
            && self.price >= 0.0
    }

    // discount relative to the original price, if one was listed
    pub fn discount_percent(&self) -> Option<f64> {
        match self.original_price {
            Some(original) if original > 0.0 && original > self.price => {
                Some((original - self.price) / original * 100.0)
            }
            _ => None,
        }
    }

    /// Derive a stable offer identity from product attributes.
    ///
    /// Used when a listing carries no explicit product id. Two backends
    /// scraping the same product must land on the same identity, so the
    /// hash covers only site-level attributes, never the backend tag.
    pub fn derived_id(title: &str, brand: Option<&str>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(title.trim().to_lowercase().as_bytes());
        if let Some(brand) = brand {
            hasher.update(brand.trim().to_lowercase().as_bytes());
        }
        let digest = format!("{:x}", hasher.finalize());
        format!("derived:{}", &digest[..16])
    }
}

/// Filter criteria applied to a consolidated offer list
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OfferFilters {
    pub max_price: Option<f64>,
    pub brand: Option<String>,
    pub category: Option<String>,
    pub availability: Option<Availability>,
}

impl OfferFilters {
    pub fn is_empty(&self) -> bool {
        self.max_price.is_none()
            && self.brand.is_none()
            && self.category.is_none()
            && self.availability.is_none()
    }

    pub fn matches(&self, offer: &Offer) -> bool {
        if let Some(max_price) = self.max_price {
            if offer.price > max_price {
                return false;
            }
        }
        if let Some(ref brand) = self.brand {
            match &offer.brand {
                Some(offer_brand) if offer_brand.eq_ignore_ascii_case(brand) => {}
                _ => return false,
            }
        }
        if let Some(ref category) = self.category {
            match &offer.category {
                Some(offer_category) if offer_category.eq_ignore_ascii_case(category) => {}
                _ => return false,
            }
        }
        if let Some(availability) = self.availability {
            if offer.availability != availability {
                return false;
            }
        }
        true
    }

    // stable fingerprint of the applied filters for cache keying
    pub fn fingerprint(&self) -> String {
        if self.is_empty() {
            return "unfiltered".to_string();
        }

        let mut hasher = Sha256::new();
        hasher.update(format!("max_price={:?}", self.max_price).as_bytes());
        hasher.update(format!("brand={:?}", self.brand).as_bytes());
        hasher.update(format!("category={:?}", self.category).as_bytes());
        hasher.update(format!("availability={:?}", self.availability).as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        digest[..16].to_string()
    }

    /// Cache key for one (target URL, filters) combination.
    pub fn cache_key(&self, target_url: &str) -> String {
        format!("offers:{}:{}", target_url, self.fingerprint())
    }
}
