use axum::{
    extract::{Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::cache::CacheStats;
use crate::error::{AggregatorError, Result};
use crate::offers::{Availability, ConsolidatedResult, Offer, OfferFilters};
use crate::orchestrator::{OrchestratorStatus, ScrapeOrchestrator};
use crate::proxy::PoolStatus;

#[derive(Serialize)]
pub struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

pub fn create_router(orchestrator: Arc<ScrapeOrchestrator>) -> Router {
    Router::new()
        .route("/runs", post(trigger_run))
        .route("/offers", get(get_offers))
        .route("/status", get(get_status))
        .route("/cache/stats", get(get_cache_stats))
        .route("/cache/invalidate", post(invalidate_cache))
        .route("/proxies/status", get(get_proxy_status))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(orchestrator)
}

pub async fn start_api_server(orchestrator: Arc<ScrapeOrchestrator>, port: u16) -> Result<()> {
    let app = create_router(orchestrator);

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
        AggregatorError::NetworkError(format!("Failed to bind API server on {}: {}", addr, e))
    })?;
    info!("API server listening on {}", addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| AggregatorError::NetworkError(format!("API server error: {}", e)))?;

    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct RunRequest {
    url: String,
    #[serde(default)]
    filters: OfferFilters,
}

async fn trigger_run(
    State(orchestrator): State<Arc<ScrapeOrchestrator>>,
    Json(payload): Json<RunRequest>,
) -> Json<ApiResponse<ConsolidatedResult>> {
    match orchestrator.run(&payload.url, &payload.filters).await {
        Ok(result) => Json(ApiResponse::success(result)),
        Err(e) => Json(ApiResponse::error(format!("Run failed: {}", e))),
    }
}

#[derive(Debug, Deserialize)]
pub struct OffersQuery {
    url: String,
    max_price: Option<f64>,
    brand: Option<String>,
    category: Option<String>,
    availability: Option<Availability>,
}

async fn get_offers(
    State(orchestrator): State<Arc<ScrapeOrchestrator>>,
    Query(query): Query<OffersQuery>,
) -> Json<ApiResponse<Vec<Offer>>> {
    let filters = OfferFilters {
        max_price: query.max_price,
        brand: query.brand,
        category: query.category,
        availability: query.availability,
    };

    match orchestrator.cached_offers(&query.url, &filters).await {
        Ok(offers) => Json(ApiResponse::success(offers)),
        Err(e) => Json(ApiResponse::error(format!("Offer lookup failed: {}", e))),
    }
}

async fn get_status(
    State(orchestrator): State<Arc<ScrapeOrchestrator>>,
) -> Json<ApiResponse<OrchestratorStatus>> {
    Json(ApiResponse::success(orchestrator.status().await))
}

async fn get_cache_stats(
    State(orchestrator): State<Arc<ScrapeOrchestrator>>,
) -> Json<ApiResponse<CacheStats>> {
    Json(ApiResponse::success(orchestrator.get_cache_stats().await))
}

#[derive(Debug, Deserialize)]
pub struct InvalidateRequest {
    pattern: Option<String>,
}

async fn invalidate_cache(
    State(orchestrator): State<Arc<ScrapeOrchestrator>>,
    Json(payload): Json<InvalidateRequest>,
) -> Json<ApiResponse<usize>> {
    match orchestrator.invalidate_cache(payload.pattern.as_deref()).await {
        Ok(count) => Json(ApiResponse::success(count)),
        Err(e) => Json(ApiResponse::error(format!("Invalidation failed: {}", e))),
    }
}

async fn get_proxy_status(
    State(orchestrator): State<Arc<ScrapeOrchestrator>>,
) -> Json<ApiResponse<PoolStatus>> {
    Json(ApiResponse::success(orchestrator.get_proxy_status().await))
}
