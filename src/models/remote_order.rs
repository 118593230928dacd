//! Wire schema exchanged with the Flexpay checkout API.
//!
//! These types are pure data: built fresh from basket state by the
//! translator, or taken verbatim from provider responses. They are never
//! mutated in place. Field names are fixed by the provider contract.

use serde::{Deserialize, Serialize};

/// Typed order line kinds accepted by the provider.
///
/// Bonus products have no wire type of their own: they travel as `Physical`
/// lines tagged through `merchant_data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderLineType {
    Physical,
    ShippingFee,
    SalesTax,
    Discount,
    Surcharge,
    StoreCredit,
    GiftCard,
}

/// A single flat order line in the provider's representation.
///
/// For product lines `total_amount` is the rounded line total; dividing it
/// back across `quantity` can lose a cent for some quantity/price pairs.
/// That drift is a known property of the wire format and is not reconciled
/// per line — the total-equality gate operates on `order_amount`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteOrderLine {
    #[serde(rename = "type")]
    pub line_type: OrderLineType,
    pub name: String,
    pub reference: String,
    pub quantity: i64,
    /// Minor currency units. Negative for discount and store-credit lines,
    /// which fold their quantity into the unit price.
    pub unit_price: i64,
    /// Basis points, 0..=10000.
    pub tax_rate: u32,
    pub total_amount: i64,
    pub total_tax_amount: i64,
    /// Opaque side channel; JSON-encoded [`MerchantDataPayload`] when set.
    ///
    /// [`MerchantDataPayload`]: super::merchant_data::MerchantDataPayload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchant_data: Option<String>,
}

/// Provider-assigned risk verdict gating order approval.
///
/// Anything the provider sends outside the documented set deserializes into
/// `Unknown` and is treated as a hard error downstream, never as pending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FraudStatus {
    #[serde(rename = "ACCEPTED")]
    Accepted,
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "REJECTED")]
    Rejected,
    #[serde(rename = "STOPPED")]
    Stopped,
    #[serde(untagged)]
    Unknown(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteAddress {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub street_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub street_address2: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// A shipping method offered to the shopper inside the provider's widget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteShippingOption {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Minor currency units.
    pub price: i64,
    pub tax_amount: i64,
    pub tax_rate: u32,
    pub preselected: bool,
}

/// Storefront URLs the provider redirects to or calls back on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MerchantUrls {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terms: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address_update: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipping_option_update: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<String>,
}

/// Widget appearance options sent on order creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuiOptions {
    pub radius_border: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_button: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_button_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_checkbox: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_header: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_link: Option<String>,
    pub title_mandatory: bool,
    pub allow_separate_shipping_address: bool,
}

impl Default for GuiOptions {
    fn default() -> Self {
        Self {
            radius_border: "5px".to_string(),
            color_button: None,
            color_button_text: None,
            color_checkbox: None,
            color_header: None,
            color_link: None,
            title_mandatory: false,
            allow_separate_shipping_address: false,
        }
    }
}

/// The order representation exchanged with the provider.
///
/// One type serves both the full "create order" variant and the slimmer
/// "update order" variant; sections the update call does not carry are
/// simply left unset and skipped during serialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteOrderPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    pub purchase_country: String,
    pub purchase_currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub billing_address: Option<RemoteAddress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipping_address: Option<RemoteAddress>,
    pub order_lines: Vec<RemoteOrderLine>,
    /// Grand total owed to the provider, excluding the portion covered by
    /// gift certificates. Minor currency units.
    pub order_amount: i64,
    pub order_tax_amount: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_shipping_option: Option<RemoteShippingOption>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shipping_options: Vec<RemoteShippingOption>,
    /// Local order number, registered once the local order exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchant_reference1: Option<String>,
    /// Local customer number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchant_reference2: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchant_urls: Option<MerchantUrls>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<GuiOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fraud_status: Option<FraudStatus>,
    /// Rendered checkout widget markup returned by create/update calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html_snippet: Option<String>,
}

impl RemoteOrderPayload {
    pub fn lines_of_type(&self, line_type: OrderLineType) -> impl Iterator<Item = &RemoteOrderLine> {
        self.order_lines
            .iter()
            .filter(move |l| l.line_type == line_type)
    }
}
