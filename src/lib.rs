//! BNPL checkout-provider integration for an e-commerce storefront.
//!
//! The core is the order reconciliation engine: the translator/restorer pair
//! mapping the local basket onto the provider's flat order representation,
//! and the state machine that turns provider callbacks into local order
//! transitions. Storefront concerns (persistence, pricing, catalog, gift
//! certificates) enter through the trait seams in [`stores`].

pub mod config;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod models;
pub mod money;
pub mod services;
pub mod stores;

use std::sync::Arc;

use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::services::payments::PaymentProcessorRegistry;
use crate::services::provider_api::ProviderOrderService;
use crate::services::reconciliation::ReconciliationEngine;
use crate::stores::{GiftCertificateVault, PricingEngine, ProductCatalog};

/// Shared application state behind the callback routes.
pub struct AppState {
    pub config: AppConfig,
    pub engine: Arc<ReconciliationEngine>,
    pub provider: Arc<ProviderOrderService>,
    pub catalog: Arc<dyn ProductCatalog>,
    pub pricing: Arc<dyn PricingEngine>,
    pub vault: Arc<dyn GiftCertificateVault>,
    pub payments: Arc<PaymentProcessorRegistry>,
}

pub fn app_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/flexpay/update/:country", post(handlers::callbacks::update_order))
        .route("/flexpay/validate", post(handlers::callbacks::validate_order))
        .route(
            "/flexpay/push/:country/:order_id",
            post(handlers::callbacks::push_order),
        )
        .route(
            "/flexpay/notification/:country",
            post(handlers::callbacks::notification),
        )
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}
