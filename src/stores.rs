//! Collaborator seams to the storefront platform.
//!
//! Order persistence, product lookup, pricing recalculation and
//! gift-certificate balances are owned by the surrounding platform; the
//! reconciliation core consumes them through these traits. The in-memory
//! implementations back the development server and the test suite.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use tracing::info;

use crate::config::TaxDisplayMode;
use crate::errors::{CouponFailure, ServiceError};
use crate::models::basket::{
    Basket, CouponLineItem, PriceAdjustment, ShippingMethodRecord,
};
use crate::models::order::{
    ConfirmationStatus, ExportStatus, LocalOrder, OrderStatus,
};

/// Transactional order entity store. Creation uniqueness per order number is
/// this collaborator's guarantee; the reconciliation engine relies on it to
/// make duplicate callbacks safe.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn next_order_no(&self) -> String;
    async fn find_by_order_no(&self, order_no: &str) -> Option<LocalOrder>;
    async fn find_by_external_order_no(&self, external: &str) -> Option<LocalOrder>;
    /// Persists a new order; refuses an order number that already exists.
    async fn create(&self, order: LocalOrder) -> Result<LocalOrder, ServiceError>;
    async fn save(&self, order: &LocalOrder) -> Result<(), ServiceError>;
    async fn fail(&self, order_no: &str) -> Result<LocalOrder, ServiceError>;
    async fn cancel(&self, order_no: &str) -> Result<LocalOrder, ServiceError>;
    /// Hands the order to fulfillment: `Open`, confirmed, export-ready.
    async fn submit(&self, order_no: &str) -> Result<LocalOrder, ServiceError>;
}

pub struct InMemoryOrderStore {
    orders: DashMap<String, LocalOrder>,
    counter: AtomicU64,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self {
            orders: DashMap::new(),
            counter: AtomicU64::new(1),
        }
    }

    fn update_status(
        &self,
        order_no: &str,
        apply: impl FnOnce(&mut LocalOrder),
    ) -> Result<LocalOrder, ServiceError> {
        let mut entry = self
            .orders
            .get_mut(order_no)
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_no} not found")))?;
        apply(entry.value_mut());
        Ok(entry.value().clone())
    }
}

impl Default for InMemoryOrderStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn next_order_no(&self) -> String {
        format!("{:08}", self.counter.fetch_add(1, Ordering::SeqCst))
    }

    async fn find_by_order_no(&self, order_no: &str) -> Option<LocalOrder> {
        self.orders.get(order_no).map(|o| o.value().clone())
    }

    async fn find_by_external_order_no(&self, external: &str) -> Option<LocalOrder> {
        self.orders
            .iter()
            .find(|o| o.value().external_order_no.as_deref() == Some(external))
            .map(|o| o.value().clone())
    }

    async fn create(&self, order: LocalOrder) -> Result<LocalOrder, ServiceError> {
        if self.orders.contains_key(&order.order_no) {
            return Err(ServiceError::InvalidOperation(format!(
                "Order {} already exists",
                order.order_no
            )));
        }
        info!(order_no = %order.order_no, "Created order");
        self.orders.insert(order.order_no.clone(), order.clone());
        Ok(order)
    }

    async fn save(&self, order: &LocalOrder) -> Result<(), ServiceError> {
        if !self.orders.contains_key(&order.order_no) {
            return Err(ServiceError::NotFound(format!(
                "Order {} not found",
                order.order_no
            )));
        }
        self.orders.insert(order.order_no.clone(), order.clone());
        Ok(())
    }

    async fn fail(&self, order_no: &str) -> Result<LocalOrder, ServiceError> {
        self.update_status(order_no, |o| {
            o.status = OrderStatus::Failed;
        })
    }

    async fn cancel(&self, order_no: &str) -> Result<LocalOrder, ServiceError> {
        self.update_status(order_no, |o| {
            o.status = OrderStatus::Cancelled;
            o.export_status = ExportStatus::NotExported;
        })
    }

    async fn submit(&self, order_no: &str) -> Result<LocalOrder, ServiceError> {
        self.update_status(order_no, |o| {
            o.status = OrderStatus::Open;
            o.confirmation_status = ConfirmationStatus::Confirmed;
            o.export_status = ExportStatus::Ready;
        })
    }
}

/// Read-only product lookup used when restoring physical lines.
pub trait ProductCatalog: Send + Sync {
    fn product(&self, product_id: &str) -> Option<ProductRecord>;
}

#[derive(Debug, Clone)]
pub struct ProductRecord {
    pub product_id: String,
    pub name: String,
    pub price: Decimal,
    pub tax_rate: Decimal,
    pub options: Vec<ProductOptionRecord>,
}

#[derive(Debug, Clone)]
pub struct ProductOptionRecord {
    pub option_id: String,
    pub value_id: String,
    pub name: String,
    pub price: Decimal,
}

pub struct StaticProductCatalog {
    products: HashMap<String, ProductRecord>,
}

impl StaticProductCatalog {
    pub fn new(products: impl IntoIterator<Item = ProductRecord>) -> Self {
        Self {
            products: products
                .into_iter()
                .map(|p| (p.product_id.clone(), p))
                .collect(),
        }
    }
}

impl ProductCatalog for StaticProductCatalog {
    fn product(&self, product_id: &str) -> Option<ProductRecord> {
        self.products.get(product_id).cloned()
    }
}

/// Remaining balances of store gift certificates used as payment.
pub trait GiftCertificateVault: Send + Sync {
    fn remaining_value(&self, code: &str) -> Option<Decimal>;
}

pub struct InMemoryGiftCertificateVault {
    balances: HashMap<String, Decimal>,
}

impl InMemoryGiftCertificateVault {
    pub fn new(balances: impl IntoIterator<Item = (String, Decimal)>) -> Self {
        Self {
            balances: balances.into_iter().collect(),
        }
    }
}

impl GiftCertificateVault for InMemoryGiftCertificateVault {
    fn remaining_value(&self, code: &str) -> Option<Decimal> {
        self.balances.get(code).copied()
    }
}

/// The storefront's pricing oracle. Recalculation is the single authority
/// over basket totals; the reconciliation core never sums prices itself.
pub trait PricingEngine: Send + Sync {
    fn recalculate(&self, basket: &mut Basket) -> Result<(), ServiceError>;
    /// Applies a coupon by code. Returns
    /// [`ServiceError::CouponReplay`] with `AlreadyApplied` when the basket
    /// already carries the coupon — callers replaying remote state treat
    /// that kind as benign.
    fn apply_coupon(&self, basket: &mut Basket, code: &str) -> Result<(), ServiceError>;
    fn shipping_method(&self, id: &str) -> Option<ShippingMethodRecord>;
    fn applicable_shipping_methods(&self, basket: &Basket) -> Vec<ShippingMethodRecord>;
}

#[derive(Debug, Clone)]
pub struct CouponRule {
    pub code: String,
    pub promotion_id: String,
    pub amount: Decimal,
}

/// Deterministic pricing engine for development and tests. Real storefronts
/// plug their own engine in; the contract is only that recalculation is
/// idempotent over basket contents.
pub struct SimplePricingEngine {
    tax_mode: TaxDisplayMode,
    methods: Vec<ShippingMethodRecord>,
    coupons: HashMap<String, CouponRule>,
}

impl SimplePricingEngine {
    pub fn new(
        tax_mode: TaxDisplayMode,
        methods: Vec<ShippingMethodRecord>,
        coupons: impl IntoIterator<Item = CouponRule>,
    ) -> Self {
        Self {
            tax_mode,
            methods,
            coupons: coupons.into_iter().map(|c| (c.code.clone(), c)).collect(),
        }
    }
}

impl PricingEngine for SimplePricingEngine {
    fn recalculate(&self, basket: &mut Basket) -> Result<(), ServiceError> {
        let mut net_or_gross = Decimal::ZERO;
        let mut tax = Decimal::ZERO;

        for item in &basket.product_items {
            let line = item.line_total() + item.options_total() + item.adjustments_total();
            net_or_gross += line;
            tax += match self.tax_mode {
                // Tax embedded in gross prices.
                TaxDisplayMode::GrossPrices => {
                    line - line / (Decimal::ONE + item.tax_rate)
                }
                TaxDisplayMode::NetPrices => line * item.tax_rate,
            };
        }

        for shipment in &basket.shipments {
            let adj: Decimal = shipment.price_adjustments.iter().map(|a| a.amount).sum();
            let line = shipment.shipping_total() + adj;
            net_or_gross += line;
            if let Some(method) = &shipment.shipping_method {
                tax += match self.tax_mode {
                    TaxDisplayMode::GrossPrices => {
                        line - line / (Decimal::ONE + method.tax_rate)
                    }
                    TaxDisplayMode::NetPrices => line * method.tax_rate,
                };
            }
        }

        // Order-level and coupon adjustments reduce the total tax-free.
        let order_adj: Decimal = basket
            .order_price_adjustments
            .iter()
            .map(|a| a.amount)
            .sum();
        let coupon_adj: Decimal = basket
            .coupon_items
            .iter()
            .flat_map(|c| c.price_adjustments.iter())
            .map(|a| a.amount)
            .sum();
        net_or_gross += order_adj + coupon_adj;

        // Purchased gift certificates are tax-free merchandise.
        let gift_certs: Decimal = basket.gift_certificate_items.iter().map(|g| g.amount).sum();
        net_or_gross += gift_certs;

        basket.totals.tax_total = tax;
        basket.totals.total = match self.tax_mode {
            TaxDisplayMode::GrossPrices => net_or_gross,
            TaxDisplayMode::NetPrices => net_or_gross + tax,
        };
        Ok(())
    }

    fn apply_coupon(&self, basket: &mut Basket, code: &str) -> Result<(), ServiceError> {
        if basket.has_coupon(code) {
            return Err(ServiceError::CouponReplay {
                code: code.to_string(),
                kind: CouponFailure::AlreadyApplied,
            });
        }
        let rule = self
            .coupons
            .get(code)
            .ok_or_else(|| ServiceError::CouponReplay {
                code: code.to_string(),
                kind: CouponFailure::NotFound,
            })?;
        // Nothing to discount; redemption against an empty basket would
        // strand a negative adjustment.
        if basket.product_items.is_empty() {
            return Err(ServiceError::CouponReplay {
                code: code.to_string(),
                kind: CouponFailure::NotRedeemable,
            });
        }
        basket.coupon_items.push(CouponLineItem {
            code: rule.code.clone(),
            price_adjustments: vec![PriceAdjustment {
                promotion_id: rule.promotion_id.clone(),
                amount: rule.amount,
                option_id: None,
                customer_group_gated: false,
            }],
        });
        Ok(())
    }

    fn shipping_method(&self, id: &str) -> Option<ShippingMethodRecord> {
        self.methods.iter().find(|m| m.id == id).cloned()
    }

    fn applicable_shipping_methods(&self, _basket: &Basket) -> Vec<ShippingMethodRecord> {
        self.methods.clone()
    }
}
