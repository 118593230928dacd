//! Typed codec for the provider's `merchant_data` side channel.
//!
//! The remote schema has no first-class fields for coupon codes, gift
//! messages, gift-certificate details, or customer-group markers, so they
//! travel as JSON strings attached to otherwise opaque order lines. The raw
//! string exists only at the translator/restorer boundary; everything inside
//! the crate works with this enum.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MerchantDataPayload {
    /// Coupon behind a discount line, re-applied by code on restore.
    CouponRef { code: String },
    /// Gift message attached to a product line.
    GiftMessage { message: String },
    /// Marks an adjustment gated on customer-group eligibility. The remote
    /// side cannot evaluate eligibility rules itself, so restore re-derives
    /// the adjustment locally instead of replaying it.
    CustomerGroupTag { group_id: String },
    /// Zero-priced promotional item; restore must not create a line item.
    BonusProduct,
    /// Purchased gift certificate, carried on a `gift_card` line.
    GiftCertificate {
        sender_name: String,
        recipient_name: String,
        recipient_email: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        amount: Decimal,
    },
    Empty,
}

impl MerchantDataPayload {
    /// Serializes for the wire. `Empty` encodes as absence, not as a string.
    pub fn encode(&self) -> Result<Option<String>, ServiceError> {
        if matches!(self, MerchantDataPayload::Empty) {
            return Ok(None);
        }
        Ok(Some(serde_json::to_string(self)?))
    }

    /// Decodes an optional raw `merchant_data` string. Absent data is
    /// `Empty`; malformed data aborts the enclosing restore.
    pub fn decode(raw: Option<&str>) -> Result<Self, ServiceError> {
        match raw {
            None => Ok(MerchantDataPayload::Empty),
            Some(s) if s.trim().is_empty() => Ok(MerchantDataPayload::Empty),
            Some(s) => serde_json::from_str(s).map_err(|e| {
                ServiceError::ValidationError(format!("unreadable merchant_data: {e}"))
            }),
        }
    }
}
