pub mod consolidator;
pub mod offer;

pub use consolidator::{
    apply_filters, deduplicate_offers, AttemptStatus, BackendAttempt, ConsolidatedResult, RunId,
};
pub use offer::{Availability, Offer, OfferFilters};
