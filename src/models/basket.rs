//! The local, mutable pre-order cart.
//!
//! The basket is owned by the storefront platform; this crate mutates it in
//! exactly one place, the basket restorer, and otherwise treats it as a
//! read-only input to the translator. Totals are written by the
//! [`PricingEngine`](crate::stores::PricingEngine) collaborator, never
//! computed ad hoc.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::remote_order::RemoteAddress;

/// Identifier of the default shipment every basket starts with.
pub const DEFAULT_SHIPMENT_ID: &str = "me";

/// Payment method id of the provider's own instrument.
pub const PAYMENT_METHOD_FLEXPAY: &str = "FLEXPAY";
/// Payment method id of store gift certificates.
pub const PAYMENT_METHOD_GIFT_CERTIFICATE: &str = "GIFT_CERTIFICATE";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalAddress {
    pub first_name: String,
    pub last_name: String,
    pub address1: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address2: Option<String>,
    pub city: String,
    pub postal_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_code: Option<String>,
    pub country_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl LocalAddress {
    pub fn to_remote(&self) -> RemoteAddress {
        RemoteAddress {
            title: None,
            given_name: Some(self.first_name.clone()),
            family_name: Some(self.last_name.clone()),
            street_address: Some(self.address1.clone()),
            street_address2: self.address2.clone(),
            postal_code: Some(self.postal_code.clone()),
            city: Some(self.city.clone()),
            region: self.state_code.clone(),
            country: Some(self.country_code.clone()),
            email: None,
            phone: self.phone.clone(),
        }
    }
}

/// A promotion's effect on a line, a shipment, or the whole order.
/// Amounts are negative for discounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceAdjustment {
    pub promotion_id: String,
    pub amount: Decimal,
    /// Set when the adjustment belongs to a product option rather than the
    /// product itself.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub option_id: Option<String>,
    /// Customer-group-gated promotions cannot be replayed remotely; the
    /// restorer re-derives them through local recalculation instead.
    #[serde(default)]
    pub customer_group_gated: bool,
}

/// A selected product option (engraving, warranty, etc.), priced per unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionItem {
    pub option_id: String,
    pub value_id: String,
    pub name: String,
    pub price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductLineItem {
    pub product_id: String,
    pub name: String,
    pub quantity: i64,
    /// Unit price as displayed (gross under gross tax mode, net under net).
    pub base_price: Decimal,
    /// Fractional tax rate, e.g. `0.0875`.
    pub tax_rate: Decimal,
    #[serde(default)]
    pub option_items: Vec<OptionItem>,
    #[serde(default)]
    pub price_adjustments: Vec<PriceAdjustment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gift_message: Option<String>,
    /// Zero-priced promotional item granted by a promotion.
    #[serde(default)]
    pub bonus: bool,
}

impl ProductLineItem {
    /// Line total excluding options and adjustments.
    pub fn line_total(&self) -> Decimal {
        self.base_price * Decimal::from(self.quantity)
    }

    pub fn options_total(&self) -> Decimal {
        self.option_items
            .iter()
            .map(|o| o.price * Decimal::from(self.quantity))
            .sum()
    }

    pub fn adjustments_total(&self) -> Decimal {
        self.price_adjustments.iter().map(|a| a.amount).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShippingMethodRecord {
    pub id: String,
    pub name: String,
    pub price: Decimal,
    pub tax_rate: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shipment {
    pub id: String,
    pub is_default: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipping_address: Option<LocalAddress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipping_method: Option<ShippingMethodRecord>,
    #[serde(default)]
    pub price_adjustments: Vec<PriceAdjustment>,
}

impl Shipment {
    pub fn default_shipment() -> Self {
        Self {
            id: DEFAULT_SHIPMENT_ID.to_string(),
            is_default: true,
            shipping_address: None,
            shipping_method: None,
            price_adjustments: Vec::new(),
        }
    }

    pub fn shipping_total(&self) -> Decimal {
        self.shipping_method
            .as_ref()
            .map(|m| m.price)
            .unwrap_or(Decimal::ZERO)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CouponLineItem {
    pub code: String,
    #[serde(default)]
    pub price_adjustments: Vec<PriceAdjustment>,
}

/// A gift certificate being *purchased* in this basket (not one used to pay).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GiftCertificateLineItem {
    pub sender_name: String,
    pub recipient_name: String,
    pub recipient_email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentInstrument {
    /// Payment method id; dispatches to the matching processor.
    pub method: String,
    pub amount: Decimal,
    /// Set for gift-certificate instruments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gift_certificate_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
}

impl PaymentInstrument {
    pub fn gift_certificate(code: impl Into<String>, amount: Decimal) -> Self {
        Self {
            method: PAYMENT_METHOD_GIFT_CERTIFICATE.to_string(),
            amount,
            gift_certificate_code: Some(code.into()),
            transaction_id: None,
        }
    }

    pub fn is_gift_certificate(&self) -> bool {
        self.method == PAYMENT_METHOD_GIFT_CERTIFICATE
    }
}

/// Basket totals, written only by the pricing engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BasketTotals {
    /// Grand total including tax and adjustments.
    pub total: Decimal,
    pub tax_total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Basket {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_no: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub billing_address: Option<LocalAddress>,
    pub product_items: Vec<ProductLineItem>,
    pub coupon_items: Vec<CouponLineItem>,
    pub gift_certificate_items: Vec<GiftCertificateLineItem>,
    pub payment_instruments: Vec<PaymentInstrument>,
    /// Always at least one shipment; index 0 is the default.
    pub shipments: Vec<Shipment>,
    pub order_price_adjustments: Vec<PriceAdjustment>,
    pub totals: BasketTotals,
}

impl Default for Basket {
    fn default() -> Self {
        Self::new()
    }
}

impl Basket {
    pub fn new() -> Self {
        Self {
            currency: None,
            customer_email: None,
            customer_no: None,
            billing_address: None,
            product_items: Vec::new(),
            coupon_items: Vec::new(),
            gift_certificate_items: Vec::new(),
            payment_instruments: Vec::new(),
            shipments: vec![Shipment::default_shipment()],
            order_price_adjustments: Vec::new(),
            totals: BasketTotals::default(),
        }
    }

    pub fn default_shipment(&self) -> &Shipment {
        // Invariant: constructed with a default shipment that is never removed.
        &self.shipments[0]
    }

    pub fn default_shipment_mut(&mut self) -> &mut Shipment {
        &mut self.shipments[0]
    }

    /// Removes all payment instruments, product/coupon/gift-certificate line
    /// items and every non-default shipment. First step of a restore.
    pub fn clear_checkout_state(&mut self) {
        self.payment_instruments.clear();
        self.product_items.clear();
        self.coupon_items.clear();
        self.gift_certificate_items.clear();
        self.order_price_adjustments.clear();
        self.shipments.retain(|s| s.is_default);
        if self.shipments.is_empty() {
            self.shipments.push(Shipment::default_shipment());
        }
    }

    /// Portion of the total covered by gift-certificate instruments.
    pub fn gift_certificate_coverage(&self) -> Decimal {
        self.payment_instruments
            .iter()
            .filter(|pi| pi.is_gift_certificate())
            .map(|pi| pi.amount)
            .sum()
    }

    /// What remains to be paid through the provider.
    pub fn open_amount(&self) -> Decimal {
        self.totals.total - self.gift_certificate_coverage()
    }

    pub fn has_coupon(&self, code: &str) -> bool {
        self.coupon_items.iter().any(|c| c.code == code)
    }
}
