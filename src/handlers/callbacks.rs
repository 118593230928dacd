//! Provider webhook endpoints.
//!
//! Handled failures on the asynchronous endpoints (push, notification)
//! respond 200 with the error logged, so the provider does not retry-storm
//! on conditions we have already dealt with. Signature failures are the
//! exception: an unauthenticated caller gets 401. The validation endpoint
//! answers 303 when the order must bounce back to checkout.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{error, info, warn};
use validator::Validate;

use crate::errors::ServiceError;
use crate::models::basket::Basket;
use crate::models::remote_order::RemoteOrderPayload;
use crate::models::CheckoutSession;
use crate::money::to_minor_units;
use crate::services::restorer::BasketRestorer;
use crate::services::translator::OrderPayloadBuilder;
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_HEADER: &str = "x-flexpay-signature";
const FALLBACK_CHECKOUT_URL: &str = "/checkout";

const EVENT_FRAUD_ACCEPTED: &str = "FRAUD_RISK_ACCEPTED";
const EVENT_FRAUD_STOPPED: &str = "FRAUD_RISK_STOPPED";

#[derive(Debug, Deserialize, Validate)]
pub struct NotificationRequest {
    #[validate(length(min = 1))]
    pub order_id: String,
    #[validate(length(min = 1))]
    pub event_type: String,
}

/// Address/shipping-change callback: rehydrate the basket from the payload,
/// re-price, and answer with a refreshed order representation.
pub async fn update_order(
    State(state): State<Arc<AppState>>,
    Path(country): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ServiceError> {
    verify_signature(state.config.provider.push_secret.as_deref(), &headers, &body)?;
    let payload: RemoteOrderPayload = parse_json(&body)?;

    let Some(locale) = state.config.locale_for(&country) else {
        error!(%country, "Update callback for unconfigured country");
        return Ok((StatusCode::OK, Json(payload)).into_response());
    };

    let mut session = CheckoutSession::new(&locale.country);
    session.remote_order_id = payload.order_id.clone();
    session.shipping_option_selected = payload.selected_shipping_option.is_some();

    let restorer = BasketRestorer::new(
        state.catalog.as_ref(),
        state.pricing.as_ref(),
        state.vault.as_ref(),
        &state.payments,
    );
    let mut basket = Basket::new();
    if let Err(e) = restorer.restore(&mut basket, &payload, &session) {
        warn!("Update callback restore failed: {e}");
        return Ok((StatusCode::OK, Json(payload)).into_response());
    }

    let builder = OrderPayloadBuilder::new(locale);
    let options = match builder.shipping_options(&mut basket, state.pricing.as_ref()) {
        Ok(options) => options,
        Err(e) => {
            warn!("Shipping re-pricing failed: {e}");
            Vec::new()
        }
    };
    match builder.build(&basket, &session) {
        Ok(mut refreshed) => {
            refreshed.order_id = payload.order_id.clone();
            refreshed.selected_shipping_option = payload.selected_shipping_option.clone();
            refreshed.shipping_options = options;
            Ok((StatusCode::OK, Json(refreshed)).into_response())
        }
        Err(e) => {
            warn!("Update callback rebuild failed: {e}");
            Ok((StatusCode::OK, Json(payload)).into_response())
        }
    }
}

/// Pre-completion validation: the provider asks whether the order as it
/// stands is still acceptable. A mismatch bounces the shopper back to
/// checkout with a 303.
pub async fn validate_order(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ServiceError> {
    verify_signature(state.config.provider.push_secret.as_deref(), &headers, &body)?;
    let payload: RemoteOrderPayload = parse_json(&body)?;

    let mut session = CheckoutSession::new(payload.purchase_country.clone());
    session.shipping_option_selected = payload.selected_shipping_option.is_some();

    let restorer = BasketRestorer::new(
        state.catalog.as_ref(),
        state.pricing.as_ref(),
        state.vault.as_ref(),
        &state.payments,
    );
    let mut basket = Basket::new();
    let valid = match restorer.restore(&mut basket, &payload, &session) {
        Ok(()) => to_minor_units(basket.open_amount()) == payload.order_amount,
        Err(e) => {
            warn!("Validation restore failed: {e}");
            false
        }
    };

    if valid {
        Ok(StatusCode::OK.into_response())
    } else {
        let location = payload
            .merchant_urls
            .as_ref()
            .and_then(|u| u.checkout.clone())
            .unwrap_or_else(|| FALLBACK_CHECKOUT_URL.to_string());
        info!(order_id = ?payload.order_id, "Order validation refused, redirecting to checkout");
        Ok((StatusCode::SEE_OTHER, [(header::LOCATION, location)]).into_response())
    }
}

/// Completed-order push: fetch the final order from the provider and run it
/// through the reconciliation engine.
pub async fn push_order(
    State(state): State<Arc<AppState>>,
    Path((country, order_id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ServiceError> {
    verify_signature(state.config.provider.push_secret.as_deref(), &headers, &body)?;
    let Some(locale) = state.config.locale_for(&country) else {
        error!(%country, "Push for unconfigured country");
        return Ok(StatusCode::OK.into_response());
    };
    let Some(payload) = state.provider.get_order(&order_id, true, locale).await else {
        warn!(%order_id, "Push received but completed order could not be fetched");
        return Ok(StatusCode::OK.into_response());
    };

    let mut session = CheckoutSession::new(&locale.country);
    match state
        .engine
        .place_order(&payload, locale, &mut session, false)
        .await
    {
        Ok(outcome) => info!(order_no = %outcome.order().order_no, "Push processed"),
        Err(e) => warn!(%order_id, "Push handling failed: {e}"),
    }
    Ok(StatusCode::OK.into_response())
}

/// Fraud-review notifications. Accepted-after-review re-runs placement as a
/// pending order; stopped routes to the dedicated fraud-stop handling.
pub async fn notification(
    State(state): State<Arc<AppState>>,
    Path(country): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ServiceError> {
    verify_signature(state.config.provider.push_secret.as_deref(), &headers, &body)?;
    let request: NotificationRequest = parse_json(&body)?;
    request.validate()?;

    let Some(locale) = state.config.locale_for(&country) else {
        error!(%country, "Notification for unconfigured country");
        return Ok(StatusCode::OK.into_response());
    };

    match request.event_type.as_str() {
        EVENT_FRAUD_ACCEPTED => {
            let Some(payload) = state
                .provider
                .get_order(&request.order_id, true, locale)
                .await
            else {
                warn!(order_id = %request.order_id, "Accepted-after-review order could not be fetched");
                return Ok(StatusCode::OK.into_response());
            };
            let mut session = CheckoutSession::new(&locale.country);
            if let Err(e) = state
                .engine
                .place_order(&payload, locale, &mut session, true)
                .await
            {
                warn!(order_id = %request.order_id, "Post-review placement failed: {e}");
            }
        }
        EVENT_FRAUD_STOPPED => {
            if let Err(e) = state.engine.handle_fraud_stopped(&request.order_id).await {
                warn!(order_id = %request.order_id, "Fraud-stop handling failed: {e}");
            }
        }
        other => info!(event_type = %other, "Unhandled notification type"),
    }
    Ok(StatusCode::OK.into_response())
}

fn parse_json<T: serde::de::DeserializeOwned>(body: &Bytes) -> Result<T, ServiceError> {
    serde_json::from_slice(body)
        .map_err(|e| ServiceError::ValidationError(format!("invalid callback body: {e}")))
}

/// Verifies the HMAC-SHA256 body signature when a push secret is configured;
/// unsigned callbacks pass in development setups without one.
fn verify_signature(
    secret: Option<&str>,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<(), ServiceError> {
    let Some(secret) = secret else {
        return Ok(());
    };
    let provided = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| ServiceError::Unauthorized("missing webhook signature".to_string()))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| ServiceError::InternalError("unusable webhook secret".to_string()))?;
    mac.update(body);
    let expected = hex::encode(mac.finalize().into_bytes());
    if constant_time_eq(&expected, provided) {
        Ok(())
    } else {
        warn!("Webhook signature verification failed");
        Err(ServiceError::Unauthorized(
            "invalid webhook signature".to_string(),
        ))
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}
