pub mod basket;
pub mod merchant_data;
pub mod order;
pub mod remote_order;

use serde::{Deserialize, Serialize};

/// Request-scoped checkout state, passed explicitly through the call chain
/// instead of living in ambient session globals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckoutSession {
    /// Provider order id for the checkout in flight, cleared when the order
    /// fails so the shopper starts a fresh remote order.
    pub remote_order_id: Option<String>,
    /// Resolved country driving locale configuration lookup.
    pub country: String,
    /// Set once the shopper picked a shipping option in the provider widget;
    /// relaxes the email precondition during address entry and stops
    /// shipping-fee lines from overriding the selection on restore.
    pub shipping_option_selected: bool,
}

impl CheckoutSession {
    pub fn new(country: impl Into<String>) -> Self {
        Self {
            remote_order_id: None,
            country: country.into(),
            shipping_option_selected: false,
        }
    }
}
