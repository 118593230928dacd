//! Basket restorer: the inverse of the translator.
//!
//! Given a provider order payload, overwrites local basket state so that a
//! subsequent local recalculation reproduces the remote total. Any missing
//! required field aborts the whole restore; callers work on a scratch basket
//! and discard it on error, so partial state never persists.

use rust_decimal::Decimal;
use tracing::instrument;

use crate::errors::{CouponFailure, ServiceError};
use crate::models::basket::{
    Basket, GiftCertificateLineItem, LocalAddress, OptionItem, PaymentInstrument,
    ProductLineItem,
};
use crate::models::merchant_data::MerchantDataPayload;
use crate::models::remote_order::{
    OrderLineType, RemoteAddress, RemoteOrderLine, RemoteOrderPayload,
};
use crate::models::CheckoutSession;
use crate::services::payments::PaymentProcessorRegistry;
use crate::stores::{GiftCertificateVault, PricingEngine, ProductCatalog};

pub struct BasketRestorer<'a> {
    catalog: &'a dyn ProductCatalog,
    pricing: &'a dyn PricingEngine,
    vault: &'a dyn GiftCertificateVault,
    payments: &'a PaymentProcessorRegistry,
}

impl<'a> BasketRestorer<'a> {
    pub fn new(
        catalog: &'a dyn ProductCatalog,
        pricing: &'a dyn PricingEngine,
        vault: &'a dyn GiftCertificateVault,
        payments: &'a PaymentProcessorRegistry,
    ) -> Self {
        Self {
            catalog,
            pricing,
            vault,
            payments,
        }
    }

    /// Rebuilds the basket from a remote payload. Steps are ordered, each
    /// depending on the previous one.
    #[instrument(skip_all, fields(order_id = ?payload.order_id))]
    pub fn restore(
        &self,
        basket: &mut Basket,
        payload: &RemoteOrderPayload,
        session: &CheckoutSession,
    ) -> Result<(), ServiceError> {
        basket.clear_checkout_state();

        if payload.purchase_currency.is_empty() {
            return Err(ServiceError::ValidationError(
                "remote order has no currency".into(),
            ));
        }
        basket.currency = Some(payload.purchase_currency.clone());

        let billing = payload.billing_address.as_ref().ok_or_else(|| {
            ServiceError::ValidationError("remote order has no billing address".into())
        })?;
        basket.billing_address = Some(local_address(billing)?);
        basket.customer_no = payload.merchant_reference2.clone();

        let email = billing
            .email
            .clone()
            .or_else(|| payload.shipping_address.as_ref().and_then(|a| a.email.clone()));
        match email {
            Some(email) => basket.customer_email = Some(email),
            // Tolerated mid-address-entry: the shopper has already picked a
            // shipping option, so the payload predates email capture.
            None if session.shipping_option_selected => {}
            None => {
                return Err(ServiceError::ValidationError(
                    "remote order has no customer email".into(),
                ))
            }
        }

        let store_credits = self.replay_lines(basket, payload, session)?;

        let shipping = payload.shipping_address.as_ref().ok_or_else(|| {
            ServiceError::ValidationError("remote order has no shipping address".into())
        })?;
        basket.default_shipment_mut().shipping_address = Some(local_address(shipping)?);
        if let Some(option) = &payload.selected_shipping_option {
            let method = self.pricing.shipping_method(&option.id).ok_or_else(|| {
                ServiceError::ValidationError(format!("unknown shipping method {}", option.id))
            })?;
            basket.default_shipment_mut().shipping_method = Some(method);
        }

        self.pricing.recalculate(basket)?;
        self.apply_store_credits(basket, &store_credits)?;
        self.payments.handle_all(basket)?;
        self.pricing.recalculate(basket)?;
        Ok(())
    }

    /// Replays order lines onto the cleared basket. Store-credit lines are
    /// returned for later application, once totals exist to cap against.
    fn replay_lines(
        &self,
        basket: &mut Basket,
        payload: &RemoteOrderPayload,
        session: &CheckoutSession,
    ) -> Result<Vec<String>, ServiceError> {
        let surcharges: Vec<&RemoteOrderLine> =
            payload.lines_of_type(OrderLineType::Surcharge).collect();
        let mut store_credits = Vec::new();

        for line in &payload.order_lines {
            match line.line_type {
                OrderLineType::Physical => {
                    self.replay_physical(basket, line, &surcharges)?;
                }
                OrderLineType::ShippingFee => {
                    // A shipping option selected in the widget wins over the
                    // shipping-fee line echoed from an earlier state.
                    if !session.shipping_option_selected {
                        let method =
                            self.pricing.shipping_method(&line.reference).ok_or_else(|| {
                                ServiceError::ValidationError(format!(
                                    "unknown shipping method {}",
                                    line.reference
                                ))
                            })?;
                        basket.default_shipment_mut().shipping_method = Some(method);
                    }
                }
                OrderLineType::Discount => {
                    if let MerchantDataPayload::CouponRef { code } =
                        MerchantDataPayload::decode(line.merchant_data.as_deref())?
                    {
                        self.replay_coupon(basket, &code)?;
                    }
                    // Plain and customer-group-gated adjustments are
                    // re-derived by the pricing engine, not replayed.
                }
                OrderLineType::GiftCard => {
                    let MerchantDataPayload::GiftCertificate {
                        sender_name,
                        recipient_name,
                        recipient_email,
                        message,
                        amount,
                    } = MerchantDataPayload::decode(line.merchant_data.as_deref())?
                    else {
                        return Err(ServiceError::ValidationError(
                            "gift card line without certificate data".into(),
                        ));
                    };
                    basket.gift_certificate_items.push(GiftCertificateLineItem {
                        sender_name,
                        recipient_name,
                        recipient_email,
                        message,
                        amount,
                    });
                }
                OrderLineType::StoreCredit => {
                    store_credits.push(line.reference.clone());
                }
                // Tax is recomputed locally.
                OrderLineType::SalesTax => {}
                OrderLineType::Surcharge => {}
            }
        }
        Ok(store_credits)
    }

    fn replay_physical(
        &self,
        basket: &mut Basket,
        line: &RemoteOrderLine,
        surcharges: &[&RemoteOrderLine],
    ) -> Result<(), ServiceError> {
        let mut gift_message = None;
        match MerchantDataPayload::decode(line.merchant_data.as_deref())? {
            // Bonus items are re-granted by local promotions; recreating
            // them would double the grant.
            MerchantDataPayload::BonusProduct => return Ok(()),
            MerchantDataPayload::GiftMessage { message } => gift_message = Some(message),
            _ => {}
        }

        let record = self.catalog.product(&line.reference).ok_or_else(|| {
            ServiceError::ValidationError(format!("unknown product {}", line.reference))
        })?;

        let prefix = format!("{}_", record.product_id);
        let mut option_items = Vec::new();
        for surcharge in surcharges {
            let Some(option_id) = surcharge.reference.strip_prefix(&prefix) else {
                continue;
            };
            let option = record
                .options
                .iter()
                .find(|o| o.option_id == option_id)
                .ok_or_else(|| {
                    ServiceError::ValidationError(format!(
                        "unknown option {option_id} for product {}",
                        record.product_id
                    ))
                })?;
            option_items.push(OptionItem {
                option_id: option.option_id.clone(),
                value_id: option.value_id.clone(),
                name: option.name.clone(),
                price: option.price,
            });
        }

        basket.product_items.push(ProductLineItem {
            product_id: record.product_id,
            name: record.name,
            quantity: line.quantity,
            base_price: record.price,
            tax_rate: record.tax_rate,
            option_items,
            price_adjustments: Vec::new(),
            gift_message,
            bonus: false,
        });
        Ok(())
    }

    /// Re-applies a coupon by code. A benign "already applied" replay is
    /// swallowed; every other failure aborts the restore.
    fn replay_coupon(&self, basket: &mut Basket, code: &str) -> Result<(), ServiceError> {
        match self.pricing.apply_coupon(basket, code) {
            Ok(())
            | Err(ServiceError::CouponReplay {
                kind: CouponFailure::AlreadyApplied,
                ..
            }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Recreates gift-certificate payment instruments, each capped at the
    /// lesser of the remaining order balance and the certificate's remaining
    /// value. Sequential and order-dependent: an earlier certificate shrinks
    /// the balance available to later ones.
    fn apply_store_credits(
        &self,
        basket: &mut Basket,
        codes: &[String],
    ) -> Result<(), ServiceError> {
        for code in codes {
            let remaining_balance = basket.open_amount();
            if remaining_balance <= Decimal::ZERO {
                break;
            }
            let certificate_value = self.vault.remaining_value(code).ok_or_else(|| {
                ServiceError::ValidationError(format!("unknown gift certificate {code}"))
            })?;
            let amount = remaining_balance.min(certificate_value);
            if amount > Decimal::ZERO {
                basket
                    .payment_instruments
                    .push(PaymentInstrument::gift_certificate(code.clone(), amount));
            }
        }
        Ok(())
    }
}

fn local_address(remote: &RemoteAddress) -> Result<LocalAddress, ServiceError> {
    let country = remote
        .country
        .clone()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ServiceError::ValidationError("address has no country code".into()))?;
    Ok(LocalAddress {
        first_name: remote.given_name.clone().unwrap_or_default(),
        last_name: remote.family_name.clone().unwrap_or_default(),
        address1: remote.street_address.clone().unwrap_or_default(),
        address2: remote.street_address2.clone(),
        city: remote.city.clone().unwrap_or_default(),
        postal_code: remote.postal_code.clone().unwrap_or_default(),
        state_code: remote.region.clone(),
        country_code: country,
        phone: remote.phone.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{test_config, TaxDisplayMode};
    use crate::models::remote_order::RemoteShippingOption;
    use crate::stores::{
        CouponRule, InMemoryGiftCertificateVault, ProductOptionRecord, ProductRecord,
        SimplePricingEngine, StaticProductCatalog,
    };
    use rust_decimal_macros::dec;

    fn catalog() -> StaticProductCatalog {
        StaticProductCatalog::new(vec![ProductRecord {
            product_id: "SKU-100".into(),
            name: "Desk lamp".into(),
            price: dec!(50.00),
            tax_rate: dec!(0.10),
            options: vec![ProductOptionRecord {
                option_id: "giftwrap".into(),
                value_id: "standard".into(),
                name: "Gift wrap".into(),
                price: dec!(2.50),
            }],
        }])
    }

    fn pricing() -> SimplePricingEngine {
        SimplePricingEngine::new(
            TaxDisplayMode::NetPrices,
            vec![crate::models::basket::ShippingMethodRecord {
                id: "GROUND".into(),
                name: "Ground".into(),
                price: dec!(5.00),
                tax_rate: dec!(0),
            }],
            vec![CouponRule {
                code: "SAVE10".into(),
                promotion_id: "promo_10_off".into(),
                amount: dec!(-10.00),
            }],
        )
    }

    fn vault() -> InMemoryGiftCertificateVault {
        InMemoryGiftCertificateVault::new(vec![
            ("GC30".to_string(), dec!(30.00)),
            ("GC40".to_string(), dec!(40.00)),
        ])
    }

    fn address(email: Option<&str>) -> RemoteAddress {
        RemoteAddress {
            given_name: Some("Jane".into()),
            family_name: Some("Doe".into()),
            street_address: Some("1 Main St".into()),
            postal_code: Some("62704".into()),
            city: Some("Springfield".into()),
            region: Some("IL".into()),
            country: Some("US".into()),
            email: email.map(String::from),
            ..Default::default()
        }
    }

    fn line(line_type: OrderLineType, reference: &str, quantity: i64) -> RemoteOrderLine {
        RemoteOrderLine {
            line_type,
            name: reference.to_string(),
            reference: reference.to_string(),
            quantity,
            unit_price: 0,
            tax_rate: 0,
            total_amount: 0,
            total_tax_amount: 0,
            merchant_data: None,
        }
    }

    fn payload(order_lines: Vec<RemoteOrderLine>) -> RemoteOrderPayload {
        RemoteOrderPayload {
            order_id: Some("fp_7".into()),
            purchase_country: "US".into(),
            purchase_currency: "USD".into(),
            billing_address: Some(address(Some("jane@example.com"))),
            shipping_address: Some(address(None)),
            order_lines,
            ..Default::default()
        }
    }

    fn restore(
        payload: &RemoteOrderPayload,
        session: &CheckoutSession,
    ) -> Result<Basket, ServiceError> {
        let catalog = catalog();
        let pricing = pricing();
        let vault = vault();
        let payments = PaymentProcessorRegistry::new();
        let restorer = BasketRestorer::new(&catalog, &pricing, &vault, &payments);
        let mut basket = Basket::new();
        restorer.restore(&mut basket, payload, session)?;
        Ok(basket)
    }

    #[test]
    fn restores_products_shipping_and_totals() {
        let payload = payload(vec![
            line(OrderLineType::Physical, "SKU-100", 2),
            line(OrderLineType::Surcharge, "SKU-100_giftwrap", 2),
            line(OrderLineType::ShippingFee, "GROUND", 1),
        ]);
        let basket = restore(&payload, &CheckoutSession::new("US")).unwrap();

        assert_eq!(basket.currency.as_deref(), Some("USD"));
        assert_eq!(basket.customer_email.as_deref(), Some("jane@example.com"));
        assert_eq!(basket.product_items.len(), 1);
        let item = &basket.product_items[0];
        assert_eq!(item.quantity, 2);
        assert_eq!(item.base_price, dec!(50.00));
        assert_eq!(item.option_items.len(), 1);
        assert_eq!(
            basket
                .default_shipment()
                .shipping_method
                .as_ref()
                .map(|m| m.id.as_str()),
            Some("GROUND")
        );
        // 100 merchandise + 5 wrap + 5 shipping + 10.50 tax
        assert_eq!(basket.totals.total, dec!(120.50));
    }

    #[test]
    fn missing_currency_aborts() {
        let mut p = payload(vec![line(OrderLineType::Physical, "SKU-100", 1)]);
        p.purchase_currency = String::new();
        assert!(matches!(
            restore(&p, &CheckoutSession::new("US")),
            Err(ServiceError::ValidationError(_))
        ));
    }

    #[test]
    fn missing_billing_country_aborts() {
        let mut p = payload(vec![line(OrderLineType::Physical, "SKU-100", 1)]);
        if let Some(billing) = &mut p.billing_address {
            billing.country = None;
        }
        assert!(matches!(
            restore(&p, &CheckoutSession::new("US")),
            Err(ServiceError::ValidationError(_))
        ));
    }

    #[test]
    fn missing_email_tolerated_only_mid_address_entry() {
        let mut p = payload(vec![line(OrderLineType::Physical, "SKU-100", 1)]);
        if let Some(billing) = &mut p.billing_address {
            billing.email = None;
        }
        assert!(restore(&p, &CheckoutSession::new("US")).is_err());

        let mut session = CheckoutSession::new("US");
        session.shipping_option_selected = true;
        assert!(restore(&p, &session).is_ok());
    }

    #[test]
    fn selected_shipping_option_wins_over_shipping_fee_line() {
        let mut p = payload(vec![
            line(OrderLineType::Physical, "SKU-100", 1),
            line(OrderLineType::ShippingFee, "EXPRESS", 1),
        ]);
        p.selected_shipping_option = Some(RemoteShippingOption {
            id: "GROUND".into(),
            name: "Ground".into(),
            description: None,
            price: 500,
            tax_amount: 0,
            tax_rate: 0,
            preselected: true,
        });
        let mut session = CheckoutSession::new("US");
        session.shipping_option_selected = true;

        // EXPRESS is unknown to the pricing engine; it must not even be
        // looked up once an option is selected.
        let basket = restore(&p, &session).unwrap();
        assert_eq!(
            basket
                .default_shipment()
                .shipping_method
                .as_ref()
                .map(|m| m.id.as_str()),
            Some("GROUND")
        );
    }

    #[test]
    fn bonus_tagged_lines_are_not_recreated() {
        let mut bonus = line(OrderLineType::Physical, "SKU-100", 1);
        bonus.merchant_data = MerchantDataPayload::BonusProduct.encode().unwrap();
        let p = payload(vec![line(OrderLineType::Physical, "SKU-100", 1), bonus]);
        let basket = restore(&p, &CheckoutSession::new("US")).unwrap();
        assert_eq!(basket.product_items.len(), 1);
    }

    #[test]
    fn coupon_replay_is_idempotent_but_unknown_coupons_abort() {
        let mut coupon = line(OrderLineType::Discount, "promo_10_off", 1);
        coupon.merchant_data = MerchantDataPayload::CouponRef {
            code: "SAVE10".into(),
        }
        .encode()
        .unwrap();
        // The same coupon echoed twice must restore cleanly.
        let p = payload(vec![
            line(OrderLineType::Physical, "SKU-100", 1),
            coupon.clone(),
            coupon.clone(),
        ]);
        let basket = restore(&p, &CheckoutSession::new("US")).unwrap();
        assert_eq!(basket.coupon_items.len(), 1);

        let mut unknown = coupon;
        unknown.merchant_data = MerchantDataPayload::CouponRef {
            code: "BOGUS".into(),
        }
        .encode()
        .unwrap();
        let p = payload(vec![line(OrderLineType::Physical, "SKU-100", 1), unknown]);
        assert!(matches!(
            restore(&p, &CheckoutSession::new("US")),
            Err(ServiceError::CouponReplay { .. })
        ));
    }

    #[test]
    fn store_credit_redemption_is_capped_at_order_balance() {
        // Product totals 50 + 5 tax = 55; certificates are 30 + 40.
        let catalog = StaticProductCatalog::new(vec![ProductRecord {
            product_id: "SKU-100".into(),
            name: "Desk lamp".into(),
            price: dec!(50.00),
            tax_rate: dec!(0.10),
            options: Vec::new(),
        }]);
        let pricing = pricing();
        let vault = vault();
        let payments = PaymentProcessorRegistry::new();
        let restorer = BasketRestorer::new(&catalog, &pricing, &vault, &payments);

        let p = payload(vec![
            line(OrderLineType::Physical, "SKU-100", 1),
            line(OrderLineType::StoreCredit, "GC30", 1),
            line(OrderLineType::StoreCredit, "GC40", 1),
        ]);
        let mut basket = Basket::new();
        restorer
            .restore(&mut basket, &p, &CheckoutSession::new("US"))
            .unwrap();

        assert_eq!(basket.totals.total, dec!(55.00));
        let amounts: Vec<_> = basket
            .payment_instruments
            .iter()
            .filter(|pi| pi.is_gift_certificate())
            .map(|pi| pi.amount)
            .collect();
        assert_eq!(amounts, vec![dec!(30.00), dec!(25.00)]);
        assert_eq!(basket.gift_certificate_coverage(), dec!(55.00));
        assert_eq!(basket.open_amount(), dec!(0));
    }

    #[test]
    fn unknown_store_credit_code_aborts() {
        let p = payload(vec![
            line(OrderLineType::Physical, "SKU-100", 1),
            line(OrderLineType::StoreCredit, "GC-MISSING", 1),
        ]);
        assert!(matches!(
            restore(&p, &CheckoutSession::new("US")),
            Err(ServiceError::ValidationError(_))
        ));
    }

    #[test]
    fn round_trips_a_translated_basket() {
        let catalog = catalog();
        let pricing = pricing();
        let vault = vault();
        let payments = PaymentProcessorRegistry::new();
        let restorer = BasketRestorer::new(&catalog, &pricing, &vault, &payments);

        let mut original = Basket::new();
        original.currency = Some("USD".into());
        original.customer_email = Some("jane@example.com".into());
        original.billing_address = Some(super::local_address(&address(None)).unwrap());
        original.default_shipment_mut().shipping_address =
            Some(super::local_address(&address(None)).unwrap());
        original.default_shipment_mut().shipping_method = pricing.shipping_method("GROUND");
        original.product_items.push(ProductLineItem {
            product_id: "SKU-100".into(),
            name: "Desk lamp".into(),
            quantity: 2,
            base_price: dec!(50.00),
            tax_rate: dec!(0.10),
            option_items: vec![OptionItem {
                option_id: "giftwrap".into(),
                value_id: "standard".into(),
                name: "Gift wrap".into(),
                price: dec!(2.50),
            }],
            price_adjustments: Vec::new(),
            gift_message: None,
            bonus: false,
        });
        pricing.recalculate(&mut original).unwrap();

        let config = test_config();
        let locale = config.locale_for("US").unwrap();
        let payload = crate::services::translator::OrderPayloadBuilder::new(locale)
            .build(&original, &CheckoutSession::new("US"))
            .unwrap();

        let mut restored = Basket::new();
        restorer
            .restore(&mut restored, &payload, &CheckoutSession::new("US"))
            .unwrap();
        assert_eq!(restored.totals.total, original.totals.total);
        assert_eq!(
            crate::money::to_minor_units(restored.open_amount()),
            payload.order_amount
        );
    }
}
