//! The persisted local order and its status dimensions.
//!
//! An order is created exactly once per successful checkout from a basket
//! snapshot, keyed both by a local order number and by the provider's order
//! id (`external_order_no`). Status moves along four independent axes the
//! storefront platform understands: order status, confirmation, export and
//! payment.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;
use crate::models::basket::{Basket, PaymentInstrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    /// Persisted but not yet authorized/submitted. The only status from
    /// which `place_order` continues; everything else short-circuits.
    Created,
    /// Submitted into fulfillment.
    Open,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConfirmationStatus {
    NotConfirmed,
    Confirmed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ExportStatus {
    NotExported,
    Ready,
    Exported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum PaymentStatus {
    NotPaid,
    PartPaid,
    Paid,
}

/// Fraud verdict as stored on the order. Distinguishes first-pass decisions
/// from post-review ones so downstream reporting can tell them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum StoredFraudStatus {
    Accepted,
    AcceptedAfterReview,
    Pending,
    Rejected,
    RejectedAfterReview,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderNote {
    pub subject: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Site-defined custom attributes. The VCN fields hold decrypted card data
/// as opaque secrets for downstream processor handoff; this crate never
/// interprets them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderCustomAttrs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vcn_pan: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vcn_csc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vcn_expiration_month: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vcn_expiration_year: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalOrder {
    pub order_no: String,
    /// The provider's order id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_order_no: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_no: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
    pub currency: String,
    /// Grand total including tax.
    pub order_total: Decimal,
    /// Portion covered by gift certificates at creation time.
    pub gift_certificate_coverage: Decimal,
    pub status: OrderStatus,
    pub confirmation_status: ConfirmationStatus,
    pub export_status: ExportStatus,
    pub payment_status: PaymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fraud_status: Option<StoredFraudStatus>,
    pub payment_instruments: Vec<PaymentInstrument>,
    #[serde(default)]
    pub notes: Vec<OrderNote>,
    #[serde(default)]
    pub custom: OrderCustomAttrs,
    pub created_at: DateTime<Utc>,
}

impl LocalOrder {
    /// Snapshots a basket into a fresh `Created` order.
    pub fn from_basket(
        order_no: impl Into<String>,
        external_order_no: Option<String>,
        basket: &Basket,
    ) -> Result<Self, ServiceError> {
        let currency = basket
            .currency
            .clone()
            .ok_or_else(|| ServiceError::ValidationError("basket has no currency".into()))?;
        Ok(Self {
            order_no: order_no.into(),
            external_order_no,
            customer_no: basket.customer_no.clone(),
            customer_email: basket.customer_email.clone(),
            currency,
            order_total: basket.totals.total,
            gift_certificate_coverage: basket.gift_certificate_coverage(),
            status: OrderStatus::Created,
            confirmation_status: ConfirmationStatus::NotConfirmed,
            export_status: ExportStatus::NotExported,
            payment_status: PaymentStatus::NotPaid,
            fraud_status: None,
            payment_instruments: basket.payment_instruments.clone(),
            notes: Vec::new(),
            custom: OrderCustomAttrs::default(),
            created_at: Utc::now(),
        })
    }

    /// True once the order moved past `Created` — the idempotency guard for
    /// replayed callbacks.
    pub fn is_past_created(&self) -> bool {
        self.status != OrderStatus::Created
    }

    /// What remains to be paid through the provider.
    pub fn open_amount(&self) -> Decimal {
        self.order_total - self.gift_certificate_coverage
    }

    pub fn is_paid(&self) -> bool {
        self.payment_status == PaymentStatus::Paid
    }

    pub fn add_note(&mut self, subject: impl Into<String>, body: impl Into<String>) {
        self.notes.push(OrderNote {
            subject: subject.into(),
            body: body.into(),
            created_at: Utc::now(),
        });
    }
}
