use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::offers::offer::{Offer, OfferFilters};

pub type RunId = Uuid;

/// Terminal state of one backend invocation within a run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Success,
    Failed,
    Skipped,
}

/// Outcome record for one backend, retries included
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendAttempt {
    pub backend_id: String,
    pub status: AttemptStatus,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    pub error: Option<String>,
    pub raw_offer_count: usize,
    pub attempts_made: u32,
}

/// The deduplicated, cross-backend merged result of one orchestration run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidatedResult {
    pub run_id: RunId,
    pub target_url: String,
    pub offers: Vec<Offer>,
    pub successful_backends: usize,
    pub duplicates_removed: usize,
    pub attempts: Vec<BackendAttempt>,
    pub started_at: DateTime<Utc>,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
}

/// Remove duplicate offers by id, keeping the first occurrence.
///
/// Backends run in a fixed configured order, so first-seen-wins favors
/// whichever backend ran earliest.
pub fn deduplicate_offers(offers: Vec<Offer>) -> Vec<Offer> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut unique = Vec::with_capacity(offers.len());

    for offer in offers {
        if seen.insert(offer.id.clone()) {
            unique.push(offer);
        } else {
            debug!("Dropping duplicate offer {}", offer.id);
        }
    }

    unique
}

/// Apply the caller's filter criteria, preserving order.
pub fn apply_filters(offers: Vec<Offer>, filters: &OfferFilters) -> Vec<Offer> {
    if filters.is_empty() {
        return offers;
    }

    let before = offers.len();
    let filtered: Vec<Offer> = offers
        .into_iter()
        .filter(|offer| filters.matches(offer))
        .collect();
    debug!("Filters kept {} of {} offers", filtered.len(), before);
    filtered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offers::offer::Availability;

    fn create_test_offer(id: &str, price: f64, source: &str) -> Offer {
        Offer {
            id: id.to_string(),
            title: format!("Offer {}", id),
            price,
            original_price: None,
            brand: Some("Acme".to_string()),
            category: None,
            availability: Availability::InStock,
            image_url: None,
            timestamp: Utc::now(),
            source_backend: source.to_string(),
        }
    }

    #[test]
    fn test_first_seen_copy_wins() {
        // backend A ran first, so its copy of "x" must survive
        let merged = vec![
            create_test_offer("x", 10.0, "backend-a"),
            create_test_offer("x", 12.0, "backend-b"),
            create_test_offer("y", 5.0, "backend-b"),
        ];

        let deduped = deduplicate_offers(merged);

        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].id, "x");
        assert_eq!(deduped[0].price, 10.0);
        assert_eq!(deduped[0].source_backend, "backend-a");
        assert_eq!(deduped[1].id, "y");
        assert_eq!(deduped[1].price, 5.0);
    }

    #[test]
    fn test_deduplication_is_idempotent() {
        let merged = vec![
            create_test_offer("a", 1.0, "backend-a"),
            create_test_offer("b", 2.0, "backend-a"),
            create_test_offer("a", 3.0, "backend-b"),
        ];

        let once = deduplicate_offers(merged);
        let twice = deduplicate_offers(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_deduplication_preserves_order() {
        let merged = vec![
            create_test_offer("c", 3.0, "backend-a"),
            create_test_offer("a", 1.0, "backend-a"),
            create_test_offer("b", 2.0, "backend-b"),
            create_test_offer("a", 9.0, "backend-b"),
        ];

        let deduped = deduplicate_offers(merged);
        let ids: Vec<&str> = deduped.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_apply_filters() {
        let offers = vec![
            create_test_offer("a", 10.0, "backend-a"),
            create_test_offer("b", 30.0, "backend-a"),
            create_test_offer("c", 20.0, "backend-b"),
        ];

        let filters = OfferFilters {
            max_price: Some(25.0),
            ..Default::default()
        };

        let filtered = apply_filters(offers, &filters);
        let ids: Vec<&str> = filtered.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_empty_filters_pass_everything() {
        let offers = vec![
            create_test_offer("a", 10.0, "backend-a"),
            create_test_offer("b", 30.0, "backend-a"),
        ];

        let filtered = apply_filters(offers.clone(), &OfferFilters::default());
        assert_eq!(filtered, offers);
    }

    #[test]
    fn test_attempt_status_serialization() {
        let json = serde_json::to_string(&AttemptStatus::Skipped).unwrap();
        assert_eq!(json, "\"skipped\"");
    }
}
