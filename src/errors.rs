use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Standard error payload returned by the callback endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Bad Request", "Internal Server Error")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

/// Sub-classification of a failed payment authorization. Drives the
/// user-facing message on the checkout page: declines get a payment-specific
/// message, everything else a generic technical one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum AuthFailure {
    Technical,
    Declined,
    MissingPaymentInfo,
}

/// Why a coupon could not be re-applied during basket restoration.
/// `AlreadyApplied` is benign on replay; every other kind aborts the restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum CouponFailure {
    AlreadyApplied,
    NotFound,
    NotRedeemable,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Order total mismatch: remote {remote} != local {local} minor units")]
    TotalMismatch { remote: i64, local: i64 },

    #[error("Remote call failed: {0}")]
    RemoteCallError(String),

    #[error("Authorization failed: {0}")]
    AuthorizationFailed(AuthFailure),

    #[error("Ambiguous fraud status from provider: {0}")]
    FraudAmbiguous(String),

    #[error("Coupon '{code}' could not be applied: {kind}")]
    CouponReplay { code: String, kind: CouponFailure },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::SerializationError(err.to_string())
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ValidationError(_) | Self::InvalidOperation(_) | Self::CouponReplay { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::AuthorizationFailed(AuthFailure::Declined) => StatusCode::PAYMENT_REQUIRED,
            Self::AuthorizationFailed(_) | Self::TotalMismatch { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::RemoteCallError(_) => StatusCode::BAD_GATEWAY,
            Self::FraudAmbiguous(_)
            | Self::SerializationError(_)
            | Self::InternalError(_)
            | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message suitable for HTTP responses. Internal errors return generic
    /// messages so implementation details never leak to the shopper.
    pub fn response_message(&self) -> String {
        match self {
            Self::SerializationError(_) | Self::InternalError(_) | Self::Other(_) => {
                "Internal server error".to_string()
            }
            Self::FraudAmbiguous(_) => "Payment could not be verified".to_string(),
            Self::AuthorizationFailed(AuthFailure::Declined) => {
                "The payment was declined".to_string()
            }
            Self::AuthorizationFailed(_) => {
                "A technical error occurred while processing the payment".to_string()
            }
            Self::TotalMismatch { .. } => {
                "The order total no longer matches the basket".to_string()
            }
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            details: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        (status, Json(err)).into_response()
    }
}
