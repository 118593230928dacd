//! Line-item translator: local basket state to the provider's flat order
//! representation.
//!
//! The translator never mutates the basket except inside
//! [`OrderPayloadBuilder::shipping_options`], which speculatively applies
//! shipping methods under a guard that restores the prior method
//! unconditionally. Callers must recalculate the basket before building so
//! totals are current.

use rust_decimal::Decimal;
use tracing::instrument;

use crate::config::{LocaleConfig, TaxDisplayMode};
use crate::errors::ServiceError;
use crate::models::basket::{Basket, PriceAdjustment, ShippingMethodRecord};
use crate::models::merchant_data::MerchantDataPayload;
use crate::models::remote_order::{
    OrderLineType, RemoteOrderLine, RemoteOrderPayload, RemoteShippingOption,
};
use crate::models::CheckoutSession;
use crate::money::{to_basis_points, to_minor_units};
use crate::stores::PricingEngine;

/// Reference prefix marking customer-group-gated adjustments. The provider
/// cannot evaluate group eligibility, so restore re-derives these locally
/// instead of replaying them.
pub const CUSTOMER_GROUP_PREFIX: &str = "cg_";

const SALES_TAX_REFERENCE: &str = "sales-tax";

pub struct OrderPayloadBuilder<'a> {
    locale: &'a LocaleConfig,
}

impl<'a> OrderPayloadBuilder<'a> {
    pub fn new(locale: &'a LocaleConfig) -> Self {
        Self { locale }
    }

    /// Builds the outbound order payload from the basket.
    ///
    /// Fails on a basket without a resolved default-shipment shipping
    /// address or currency; a partial request must never be sent.
    #[instrument(skip(self, basket, session), fields(country = %self.locale.country))]
    pub fn build(
        &self,
        basket: &Basket,
        session: &CheckoutSession,
    ) -> Result<RemoteOrderPayload, ServiceError> {
        let currency = basket
            .currency
            .clone()
            .ok_or_else(|| ServiceError::ValidationError("basket has no currency".into()))?;
        let shipping_address = basket
            .default_shipment()
            .shipping_address
            .clone()
            .ok_or_else(|| {
                ServiceError::ValidationError(
                    "default shipment has no resolved shipping address".into(),
                )
            })?;
        if self.locale.country.is_empty() {
            return Err(ServiceError::ValidationError(
                "locale has no resolved country".into(),
            ));
        }

        let order_lines = self.build_order_lines(basket)?;
        let order_amount: i64 = order_lines.iter().map(|l| l.total_amount).sum();
        let order_tax_amount = match self.locale.tax_mode {
            TaxDisplayMode::GrossPrices => order_lines.iter().map(|l| l.total_tax_amount).sum(),
            TaxDisplayMode::NetPrices => to_minor_units(basket.totals.tax_total),
        };

        let mut billing = basket
            .billing_address
            .as_ref()
            .map(|a| a.to_remote())
            .unwrap_or_default();
        billing.email = basket.customer_email.clone();
        let mut shipping = shipping_address.to_remote();
        shipping.email = basket.customer_email.clone();

        Ok(RemoteOrderPayload {
            order_id: session.remote_order_id.clone(),
            purchase_country: self.locale.country.clone(),
            purchase_currency: currency,
            locale: Some(self.locale.locale.clone()),
            billing_address: Some(billing),
            shipping_address: Some(shipping),
            order_lines,
            order_amount,
            order_tax_amount,
            selected_shipping_option: None,
            shipping_options: Vec::new(),
            merchant_reference1: None,
            merchant_reference2: basket.customer_no.clone(),
            merchant_urls: None,
            options: None,
            fraud_status: None,
            html_snippet: None,
        })
    }

    fn build_order_lines(&self, basket: &Basket) -> Result<Vec<RemoteOrderLine>, ServiceError> {
        let mut lines = Vec::new();

        for item in &basket.product_items {
            lines.push(self.product_line(item)?);

            for option in &item.option_items {
                let total = option.price * Decimal::from(item.quantity);
                let (tax_rate, tax_amount) = self.embedded_tax(total, item.tax_rate);
                lines.push(RemoteOrderLine {
                    line_type: OrderLineType::Surcharge,
                    name: option.name.clone(),
                    reference: format!("{}_{}", item.product_id, option.option_id),
                    quantity: item.quantity,
                    unit_price: to_minor_units(option.price),
                    tax_rate,
                    total_amount: to_minor_units(total),
                    total_tax_amount: tax_amount,
                    merchant_data: None,
                });
            }

            for adj in &item.price_adjustments {
                lines.push(self.adjustment_line(
                    adj,
                    adjustment_reference(&item.product_id, adj),
                    item.tax_rate,
                    None,
                )?);
            }
        }

        for shipment in &basket.shipments {
            let Some(method) = &shipment.shipping_method else {
                continue;
            };
            let (tax_rate, tax_amount) = self.embedded_tax(method.price, method.tax_rate);
            lines.push(RemoteOrderLine {
                line_type: OrderLineType::ShippingFee,
                name: method.name.clone(),
                reference: method.id.clone(),
                quantity: 1,
                unit_price: to_minor_units(method.price),
                tax_rate,
                total_amount: to_minor_units(method.price),
                total_tax_amount: tax_amount,
                merchant_data: None,
            });
            for adj in &shipment.price_adjustments {
                lines.push(self.adjustment_line(
                    adj,
                    format!("{}_{}", method.id, adj.promotion_id),
                    method.tax_rate,
                    None,
                )?);
            }
        }

        for coupon in &basket.coupon_items {
            for adj in &coupon.price_adjustments {
                lines.push(self.adjustment_line(
                    adj,
                    adj.promotion_id.clone(),
                    Decimal::ZERO,
                    Some(MerchantDataPayload::CouponRef {
                        code: coupon.code.clone(),
                    }),
                )?);
            }
        }

        for adj in &basket.order_price_adjustments {
            lines.push(self.adjustment_line(adj, adj.promotion_id.clone(), Decimal::ZERO, None)?);
        }

        for cert in &basket.gift_certificate_items {
            let data = MerchantDataPayload::GiftCertificate {
                sender_name: cert.sender_name.clone(),
                recipient_name: cert.recipient_name.clone(),
                recipient_email: cert.recipient_email.clone(),
                message: cert.message.clone(),
                amount: cert.amount,
            };
            lines.push(RemoteOrderLine {
                line_type: OrderLineType::GiftCard,
                name: format!("Gift certificate for {}", cert.recipient_name),
                reference: cert.recipient_email.clone(),
                quantity: 1,
                unit_price: to_minor_units(cert.amount),
                tax_rate: 0,
                total_amount: to_minor_units(cert.amount),
                total_tax_amount: 0,
                merchant_data: data.encode()?,
            });
        }

        // Gift certificates used as payment reduce the amount owed to the
        // provider via negative store-credit lines.
        for instrument in basket
            .payment_instruments
            .iter()
            .filter(|pi| pi.is_gift_certificate())
        {
            let code = instrument
                .gift_certificate_code
                .clone()
                .ok_or_else(|| {
                    ServiceError::ValidationError(
                        "gift certificate instrument without code".into(),
                    )
                })?;
            let amount = -to_minor_units(instrument.amount);
            lines.push(RemoteOrderLine {
                line_type: OrderLineType::StoreCredit,
                name: "Gift certificate".into(),
                reference: code,
                quantity: 1,
                unit_price: amount,
                tax_rate: 0,
                total_amount: amount,
                total_tax_amount: 0,
                merchant_data: None,
            });
        }

        // Regions with tax-exclusive display carry tax as its own line.
        if self.locale.tax_mode == TaxDisplayMode::NetPrices {
            let tax = to_minor_units(basket.totals.tax_total);
            lines.push(RemoteOrderLine {
                line_type: OrderLineType::SalesTax,
                name: "Sales Tax".into(),
                reference: SALES_TAX_REFERENCE.into(),
                quantity: 1,
                unit_price: tax,
                tax_rate: 0,
                total_amount: tax,
                total_tax_amount: 0,
                merchant_data: None,
            });
        }

        Ok(lines)
    }

    fn product_line(
        &self,
        item: &crate::models::basket::ProductLineItem,
    ) -> Result<RemoteOrderLine, ServiceError> {
        let line_total = item.line_total();
        let total_amount = to_minor_units(line_total);
        // Unit price is the rounded per-unit share of the line total; for
        // some quantity/price pairs unit*quantity drifts a cent from
        // total_amount. Known wire-format property, left as is.
        let unit_price = to_minor_units(line_total / Decimal::from(item.quantity.max(1)));
        let (tax_rate, total_tax_amount) = self.embedded_tax(line_total, item.tax_rate);

        let merchant_data = if item.bonus {
            MerchantDataPayload::BonusProduct.encode()?
        } else if let Some(message) = &item.gift_message {
            MerchantDataPayload::GiftMessage {
                message: message.clone(),
            }
            .encode()?
        } else {
            None
        };

        Ok(RemoteOrderLine {
            line_type: OrderLineType::Physical,
            name: item.name.clone(),
            reference: item.product_id.clone(),
            quantity: item.quantity,
            unit_price,
            tax_rate,
            total_amount,
            total_tax_amount,
            merchant_data,
        })
    }

    fn adjustment_line(
        &self,
        adj: &PriceAdjustment,
        reference: String,
        tax_rate: Decimal,
        merchant_data: Option<MerchantDataPayload>,
    ) -> Result<RemoteOrderLine, ServiceError> {
        let amount = to_minor_units(adj.amount);
        let (rate, tax_amount) = self.embedded_tax(adj.amount, tax_rate);
        let reference = if adj.customer_group_gated {
            format!("{CUSTOMER_GROUP_PREFIX}{reference}")
        } else {
            reference
        };
        let merchant_data = if adj.customer_group_gated {
            Some(MerchantDataPayload::CustomerGroupTag {
                group_id: adj.promotion_id.clone(),
            })
        } else {
            merchant_data
        };
        Ok(RemoteOrderLine {
            line_type: OrderLineType::Discount,
            name: adj.promotion_id.clone(),
            reference,
            // Adjustment lines fold quantity into the unit price.
            quantity: 1,
            unit_price: amount,
            tax_rate: rate,
            total_amount: amount,
            total_tax_amount: tax_amount,
            merchant_data: merchant_data.map(|d| d.encode()).transpose()?.flatten(),
        })
    }

    /// Per-line tax representation under the locale's display mode: basis
    /// points plus embedded tax under gross pricing, zero under net pricing
    /// (the synthetic sales-tax line carries it instead).
    fn embedded_tax(&self, amount: Decimal, rate: Decimal) -> (u32, i64) {
        match self.locale.tax_mode {
            TaxDisplayMode::GrossPrices => {
                let embedded = amount - amount / (Decimal::ONE + rate);
                (to_basis_points(rate), to_minor_units(embedded))
            }
            TaxDisplayMode::NetPrices => (0, 0),
        }
    }

    /// Re-prices every applicable shipping method by speculatively applying
    /// it and recalculating, then restores the previously active method.
    ///
    /// Restoration happens in the guard's destructor, so it holds even when
    /// recalculation fails partway through the candidate list. Totals are
    /// recomputed for the restored method before returning.
    #[instrument(skip_all)]
    pub fn shipping_options(
        &self,
        basket: &mut Basket,
        pricing: &dyn PricingEngine,
    ) -> Result<Vec<RemoteShippingOption>, ServiceError> {
        let methods = pricing.applicable_shipping_methods(basket);
        let selected_id = basket
            .default_shipment()
            .shipping_method
            .as_ref()
            .map(|m| m.id.clone());

        let mut guard = ShippingMethodGuard::new(basket);
        let collected = self.collect_options(&mut guard, pricing, &methods, selected_id.as_deref());
        drop(guard);

        // The guard put the prior method back; bring totals in line with it.
        pricing.recalculate(basket)?;
        collected
    }

    fn collect_options(
        &self,
        guard: &mut ShippingMethodGuard<'_>,
        pricing: &dyn PricingEngine,
        methods: &[ShippingMethodRecord],
        selected_id: Option<&str>,
    ) -> Result<Vec<RemoteShippingOption>, ServiceError> {
        let mut options = Vec::with_capacity(methods.len());
        for method in methods {
            let basket = guard.basket();
            basket.default_shipment_mut().shipping_method = Some(method.clone());
            pricing.recalculate(basket)?;

            let shipment = basket.default_shipment();
            let adj: Decimal = shipment.price_adjustments.iter().map(|a| a.amount).sum();
            let line = method.price + adj;
            let (tax_rate, tax_amount) = self.embedded_tax(line, method.tax_rate);
            options.push(RemoteShippingOption {
                id: method.id.clone(),
                name: method.name.clone(),
                description: None,
                price: to_minor_units(line),
                tax_amount,
                tax_rate,
                preselected: selected_id == Some(method.id.as_str()),
            });
        }
        Ok(options)
    }
}

fn adjustment_reference(product_id: &str, adj: &PriceAdjustment) -> String {
    match &adj.option_id {
        Some(option_id) => format!("{option_id}_{product_id}_{}", adj.promotion_id),
        None => format!("{product_id}_{}", adj.promotion_id),
    }
}

/// Scoped snapshot of the default shipment's method. Restores the snapshot
/// when dropped, so speculative re-pricing can never leak a method change,
/// including on early error returns.
struct ShippingMethodGuard<'a> {
    basket: &'a mut Basket,
    saved: Option<Option<ShippingMethodRecord>>,
}

impl<'a> ShippingMethodGuard<'a> {
    fn new(basket: &'a mut Basket) -> Self {
        let saved = Some(basket.default_shipment().shipping_method.clone());
        Self { basket, saved }
    }

    fn basket(&mut self) -> &mut Basket {
        self.basket
    }
}

impl Drop for ShippingMethodGuard<'_> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            self.basket.default_shipment_mut().shipping_method = saved;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{test_config, TaxDisplayMode};
    use crate::models::basket::{
        LocalAddress, OptionItem, PaymentInstrument, ProductLineItem,
    };
    use crate::stores::{CouponRule, SimplePricingEngine};
    use rust_decimal_macros::dec;

    fn us_locale() -> crate::config::LocaleConfig {
        test_config().locale_for("US").unwrap().clone()
    }

    fn de_locale() -> crate::config::LocaleConfig {
        test_config().locale_for("DE").unwrap().clone()
    }

    fn address() -> LocalAddress {
        LocalAddress {
            first_name: "Jane".into(),
            last_name: "Doe".into(),
            address1: "1 Main St".into(),
            address2: None,
            city: "Springfield".into(),
            postal_code: "62704".into(),
            state_code: Some("IL".into()),
            country_code: "US".into(),
            phone: None,
        }
    }

    fn basket_with_item(price: Decimal, quantity: i64, tax_rate: Decimal) -> Basket {
        let mut basket = Basket::new();
        basket.currency = Some("USD".into());
        basket.customer_email = Some("jane@example.com".into());
        basket.customer_no = Some("C-1001".into());
        basket.billing_address = Some(address());
        basket.default_shipment_mut().shipping_address = Some(address());
        basket.product_items.push(ProductLineItem {
            product_id: "SKU-100".into(),
            name: "Desk lamp".into(),
            quantity,
            base_price: price,
            tax_rate,
            option_items: Vec::new(),
            price_adjustments: Vec::new(),
            gift_message: None,
            bonus: false,
        });
        basket
    }

    #[test]
    fn happy_path_single_hundred_dollar_item() {
        let locale = us_locale();
        let basket = basket_with_item(dec!(100.00), 1, dec!(0));
        let payload = OrderPayloadBuilder::new(&locale)
            .build(&basket, &CheckoutSession::new("US"))
            .unwrap();

        let physical: Vec<_> = payload.lines_of_type(OrderLineType::Physical).collect();
        assert_eq!(physical.len(), 1);
        assert_eq!(physical[0].unit_price, 10_000);
        assert_eq!(physical[0].total_amount, 10_000);
        // Net mode, zero tax: sales-tax line present with zero amount.
        assert_eq!(payload.order_amount, 10_000);
        assert_eq!(payload.order_tax_amount, 0);
        assert_eq!(payload.merchant_reference2.as_deref(), Some("C-1001"));
        assert_eq!(payload.purchase_country, "US");
    }

    #[test]
    fn build_requires_shipping_address() {
        let locale = us_locale();
        let mut basket = basket_with_item(dec!(10.00), 1, dec!(0));
        basket.default_shipment_mut().shipping_address = None;
        let result = OrderPayloadBuilder::new(&locale).build(&basket, &CheckoutSession::new("US"));
        assert!(matches!(result, Err(ServiceError::ValidationError(_))));
    }

    #[test]
    fn build_requires_currency() {
        let locale = us_locale();
        let mut basket = basket_with_item(dec!(10.00), 1, dec!(0));
        basket.currency = None;
        let result = OrderPayloadBuilder::new(&locale).build(&basket, &CheckoutSession::new("US"));
        assert!(matches!(result, Err(ServiceError::ValidationError(_))));
    }

    #[test]
    fn gross_mode_sends_basis_points_and_embedded_tax() {
        let locale = de_locale();
        let mut basket = basket_with_item(dec!(119.00), 1, dec!(0.19));
        basket.currency = Some("EUR".into());
        let payload = OrderPayloadBuilder::new(&locale)
            .build(&basket, &CheckoutSession::new("DE"))
            .unwrap();

        let line = payload
            .lines_of_type(OrderLineType::Physical)
            .next()
            .unwrap();
        assert_eq!(line.tax_rate, 1_900);
        // 119 - 119/1.19 = 19
        assert_eq!(line.total_tax_amount, 1_900);
        assert!(payload
            .lines_of_type(OrderLineType::SalesTax)
            .next()
            .is_none());
    }

    #[test]
    fn net_mode_emits_synthetic_sales_tax_line() {
        let locale = us_locale();
        let mut basket = basket_with_item(dec!(100.00), 1, dec!(0.10));
        basket.totals.tax_total = dec!(10.00);
        let payload = OrderPayloadBuilder::new(&locale)
            .build(&basket, &CheckoutSession::new("US"))
            .unwrap();

        let line = payload
            .lines_of_type(OrderLineType::Physical)
            .next()
            .unwrap();
        assert_eq!(line.tax_rate, 0);
        assert_eq!(line.total_tax_amount, 0);

        let tax_line = payload
            .lines_of_type(OrderLineType::SalesTax)
            .next()
            .unwrap();
        assert_eq!(tax_line.total_amount, 1_000);
        assert_eq!(payload.order_amount, 11_000);
        assert_eq!(payload.order_tax_amount, 1_000);
    }

    #[test]
    fn adjustment_references_are_namespaced() {
        let locale = us_locale();
        let mut basket = basket_with_item(dec!(50.00), 1, dec!(0));
        basket.product_items[0].price_adjustments = vec![
            PriceAdjustment {
                promotion_id: "summer10".into(),
                amount: dec!(-5.00),
                option_id: None,
                customer_group_gated: false,
            },
            PriceAdjustment {
                promotion_id: "engraving-free".into(),
                amount: dec!(-2.00),
                option_id: Some("engraving".into()),
                customer_group_gated: false,
            },
            PriceAdjustment {
                promotion_id: "vip-only".into(),
                amount: dec!(-3.00),
                option_id: None,
                customer_group_gated: true,
            },
        ];
        let payload = OrderPayloadBuilder::new(&locale)
            .build(&basket, &CheckoutSession::new("US"))
            .unwrap();

        let refs: Vec<_> = payload
            .lines_of_type(OrderLineType::Discount)
            .map(|l| l.reference.clone())
            .collect();
        assert!(refs.contains(&"SKU-100_summer10".to_string()));
        assert!(refs.contains(&"engraving_SKU-100_engraving-free".to_string()));
        assert!(refs.contains(&"cg_SKU-100_vip-only".to_string()));

        let gated = payload
            .lines_of_type(OrderLineType::Discount)
            .find(|l| l.reference.starts_with(CUSTOMER_GROUP_PREFIX))
            .unwrap();
        let data = MerchantDataPayload::decode(gated.merchant_data.as_deref()).unwrap();
        assert_eq!(
            data,
            MerchantDataPayload::CustomerGroupTag {
                group_id: "vip-only".into()
            }
        );
        // All adjustment lines fold quantity into unit price.
        assert!(payload
            .lines_of_type(OrderLineType::Discount)
            .all(|l| l.quantity == 1 && l.unit_price == l.total_amount));
    }

    #[test]
    fn options_become_surcharge_lines() {
        let locale = us_locale();
        let mut basket = basket_with_item(dec!(20.00), 2, dec!(0));
        basket.product_items[0].option_items = vec![OptionItem {
            option_id: "giftwrap".into(),
            value_id: "standard".into(),
            name: "Gift wrap".into(),
            price: dec!(2.50),
        }];
        let payload = OrderPayloadBuilder::new(&locale)
            .build(&basket, &CheckoutSession::new("US"))
            .unwrap();

        let surcharge = payload
            .lines_of_type(OrderLineType::Surcharge)
            .next()
            .unwrap();
        assert_eq!(surcharge.reference, "SKU-100_giftwrap");
        assert_eq!(surcharge.quantity, 2);
        assert_eq!(surcharge.unit_price, 250);
        assert_eq!(surcharge.total_amount, 500);
    }

    #[test]
    fn bonus_product_is_tagged_not_priced() {
        let locale = us_locale();
        let mut basket = basket_with_item(dec!(30.00), 1, dec!(0));
        basket.product_items.push(ProductLineItem {
            product_id: "SKU-FREE".into(),
            name: "Free tote".into(),
            quantity: 1,
            base_price: dec!(0),
            tax_rate: dec!(0),
            option_items: Vec::new(),
            price_adjustments: Vec::new(),
            gift_message: None,
            bonus: true,
        });
        let payload = OrderPayloadBuilder::new(&locale)
            .build(&basket, &CheckoutSession::new("US"))
            .unwrap();

        let bonus = payload
            .lines_of_type(OrderLineType::Physical)
            .find(|l| l.reference == "SKU-FREE")
            .unwrap();
        assert_eq!(bonus.total_amount, 0);
        assert_eq!(
            MerchantDataPayload::decode(bonus.merchant_data.as_deref()).unwrap(),
            MerchantDataPayload::BonusProduct
        );
    }

    #[test]
    fn gift_certificate_payment_becomes_negative_store_credit() {
        let locale = us_locale();
        let mut basket = basket_with_item(dec!(100.00), 1, dec!(0));
        basket
            .payment_instruments
            .push(PaymentInstrument::gift_certificate("GC-42", dec!(25.00)));
        let payload = OrderPayloadBuilder::new(&locale)
            .build(&basket, &CheckoutSession::new("US"))
            .unwrap();

        let credit = payload
            .lines_of_type(OrderLineType::StoreCredit)
            .next()
            .unwrap();
        assert_eq!(credit.reference, "GC-42");
        assert_eq!(credit.unit_price, -2_500);
        assert_eq!(credit.total_amount, -2_500);
        // order_amount excludes the gift-certificate-covered portion.
        assert_eq!(payload.order_amount, 7_500);
    }

    #[test]
    fn coupon_adjustments_carry_coupon_ref() {
        let locale = us_locale();
        let mut basket = basket_with_item(dec!(60.00), 1, dec!(0));
        let pricing = SimplePricingEngine::new(
            TaxDisplayMode::NetPrices,
            Vec::new(),
            vec![CouponRule {
                code: "SAVE10".into(),
                promotion_id: "promo_10_off".into(),
                amount: dec!(-10.00),
            }],
        );
        pricing.apply_coupon(&mut basket, "SAVE10").unwrap();
        let payload = OrderPayloadBuilder::new(&locale)
            .build(&basket, &CheckoutSession::new("US"))
            .unwrap();

        let discount = payload
            .lines_of_type(OrderLineType::Discount)
            .next()
            .unwrap();
        assert_eq!(
            MerchantDataPayload::decode(discount.merchant_data.as_deref()).unwrap(),
            MerchantDataPayload::CouponRef {
                code: "SAVE10".into()
            }
        );
    }

    struct FailingPricing;

    impl PricingEngine for FailingPricing {
        fn recalculate(&self, _basket: &mut Basket) -> Result<(), ServiceError> {
            Err(ServiceError::InternalError("pricing unavailable".into()))
        }
        fn apply_coupon(&self, _basket: &mut Basket, _code: &str) -> Result<(), ServiceError> {
            Ok(())
        }
        fn shipping_method(&self, _id: &str) -> Option<ShippingMethodRecord> {
            None
        }
        fn applicable_shipping_methods(&self, _basket: &Basket) -> Vec<ShippingMethodRecord> {
            vec![ShippingMethodRecord {
                id: "EXPRESS".into(),
                name: "Express".into(),
                price: dec!(20.00),
                tax_rate: dec!(0),
            }]
        }
    }

    #[test]
    fn shipping_guard_restores_method_on_error() {
        let locale = us_locale();
        let mut basket = basket_with_item(dec!(10.00), 1, dec!(0));
        let ground = ShippingMethodRecord {
            id: "GROUND".into(),
            name: "Ground".into(),
            price: dec!(5.00),
            tax_rate: dec!(0),
        };
        basket.default_shipment_mut().shipping_method = Some(ground.clone());

        let result = OrderPayloadBuilder::new(&locale).shipping_options(&mut basket, &FailingPricing);
        assert!(result.is_err());
        // The speculative EXPRESS method must not leak out of the loop.
        assert_eq!(
            basket.default_shipment().shipping_method.as_ref().map(|m| m.id.as_str()),
            Some("GROUND")
        );
    }

    #[test]
    fn shipping_options_preselect_active_method() {
        let locale = us_locale();
        let mut basket = basket_with_item(dec!(10.00), 1, dec!(0));
        let methods = vec![
            ShippingMethodRecord {
                id: "GROUND".into(),
                name: "Ground".into(),
                price: dec!(5.00),
                tax_rate: dec!(0),
            },
            ShippingMethodRecord {
                id: "EXPRESS".into(),
                name: "Express".into(),
                price: dec!(20.00),
                tax_rate: dec!(0),
            },
        ];
        basket.default_shipment_mut().shipping_method = Some(methods[0].clone());
        let pricing = SimplePricingEngine::new(TaxDisplayMode::NetPrices, methods, Vec::new());

        let options = OrderPayloadBuilder::new(&locale)
            .shipping_options(&mut basket, &pricing)
            .unwrap();
        assert_eq!(options.len(), 2);
        assert!(options.iter().find(|o| o.id == "GROUND").unwrap().preselected);
        assert!(!options.iter().find(|o| o.id == "EXPRESS").unwrap().preselected);
        assert_eq!(options.iter().find(|o| o.id == "EXPRESS").unwrap().price, 2_000);
        assert_eq!(
            basket.default_shipment().shipping_method.as_ref().unwrap().id,
            "GROUND"
        );
    }
}
