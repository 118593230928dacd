//! Order reconciliation state machine.
//!
//! Turns a remote order payload into a local order and resolves its payment
//! and fraud state. Replayed callbacks for the same remote order are made
//! safe by the status short-circuit before any mutation, together with the
//! order store's creation uniqueness.

use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use crate::config::LocaleConfig;
use crate::errors::{AuthFailure, ServiceError};
use crate::events::{Event, EventSender};
use crate::models::basket::Basket;
use crate::models::order::{
    ConfirmationStatus, ExportStatus, LocalOrder, OrderStatus, StoredFraudStatus,
};
use crate::models::remote_order::RemoteOrderPayload;
use crate::models::CheckoutSession;
use crate::money::to_minor_units;
use crate::services::payments::{AuthContext, AuthOutcome, PaymentProcessorRegistry};
use crate::services::provider_api::ProviderOrderService;
use crate::services::restorer::BasketRestorer;
use crate::stores::{GiftCertificateVault, OrderStore, PricingEngine, ProductCatalog};

#[derive(Debug)]
pub enum PlaceOrderOutcome {
    /// Authorized and handed to fulfillment.
    Submitted(LocalOrder),
    /// In fraud review; stays `Created` until a later notification decides.
    Pending(LocalOrder),
    /// Replayed callback for an order already beyond `Created`.
    AlreadyProcessed(LocalOrder),
}

impl PlaceOrderOutcome {
    pub fn order(&self) -> &LocalOrder {
        match self {
            Self::Submitted(o) | Self::Pending(o) | Self::AlreadyProcessed(o) => o,
        }
    }
}

pub struct ReconciliationEngine {
    store: Arc<dyn OrderStore>,
    catalog: Arc<dyn ProductCatalog>,
    pricing: Arc<dyn PricingEngine>,
    vault: Arc<dyn GiftCertificateVault>,
    payments: Arc<PaymentProcessorRegistry>,
    provider: Arc<ProviderOrderService>,
    events: EventSender,
}

impl ReconciliationEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn OrderStore>,
        catalog: Arc<dyn ProductCatalog>,
        pricing: Arc<dyn PricingEngine>,
        vault: Arc<dyn GiftCertificateVault>,
        payments: Arc<PaymentProcessorRegistry>,
        provider: Arc<ProviderOrderService>,
        events: EventSender,
    ) -> Self {
        Self {
            store,
            catalog,
            pricing,
            vault,
            payments,
            provider,
            events,
        }
    }

    /// Reconciles a remote order onto a local one: creates it if needed,
    /// authorizes every payment instrument, and submits or holds the order
    /// according to the aggregated outcome.
    #[instrument(skip_all, fields(order_id = ?payload.order_id, is_pending = is_pending_order))]
    pub async fn place_order(
        &self,
        payload: &RemoteOrderPayload,
        locale: &LocaleConfig,
        session: &mut CheckoutSession,
        is_pending_order: bool,
    ) -> Result<PlaceOrderOutcome, ServiceError> {
        let mut order = match self.find_order(payload).await {
            Some(order) if order.is_past_created() => {
                info!(order_no = %order.order_no, status = %order.status, "Replayed callback, order already processed");
                return Ok(PlaceOrderOutcome::AlreadyProcessed(order));
            }
            Some(order) => order,
            None => self.create_order(payload, locale, session).await?,
        };

        if order.open_amount() > rust_decimal::Decimal::ZERO
            && order.payment_instruments.is_empty()
        {
            return self
                .fail_order(order, session, AuthFailure::MissingPaymentInfo)
                .await;
        }

        let outcomes = self
            .authorize_instruments(&mut order, payload, locale, is_pending_order)
            .await;

        if outcomes
            .iter()
            .any(|o| matches!(o, AuthOutcome::Error(_) | AuthOutcome::NotSupported))
        {
            return self.fail_order(order, session, AuthFailure::Technical).await;
        }
        if outcomes.contains(&AuthOutcome::Declined) {
            return self.fail_order(order, session, AuthFailure::Declined).await;
        }
        if outcomes.contains(&AuthOutcome::Pending) {
            self.store.save(&order).await?;
            if locale.acknowledge_pending_orders {
                if let Some(id) = &order.external_order_no {
                    self.provider.acknowledge_order(id, locale).await;
                }
            }
            info!(order_no = %order.order_no, "Order held in fraud review");
            return Ok(PlaceOrderOutcome::Pending(order));
        }

        self.store.save(&order).await?;
        let submitted = self.store.submit(&order.order_no).await?;
        self.events
            .send_or_log(Event::OrderSubmitted {
                order_no: submitted.order_no.clone(),
            })
            .await;
        if let Some(email) = &submitted.customer_email {
            self.events
                .send_or_log(Event::ConfirmationEmailRequested {
                    order_no: submitted.order_no.clone(),
                    email: email.clone(),
                })
                .await;
        }
        if let Some(id) = &submitted.external_order_no {
            self.provider.acknowledge_order(id, locale).await;
        }
        info!(order_no = %submitted.order_no, "Order submitted");
        Ok(PlaceOrderOutcome::Submitted(submitted))
    }

    /// Looks the order up by its registered local number first, then by the
    /// provider order id. Must run before any mutation.
    async fn find_order(&self, payload: &RemoteOrderPayload) -> Option<LocalOrder> {
        if let Some(order_no) = payload.merchant_reference1.as_deref() {
            if let Some(order) = self.store.find_by_order_no(order_no).await {
                return Some(order);
            }
        }
        if let Some(order_id) = payload.order_id.as_deref() {
            return self.store.find_by_external_order_no(order_id).await;
        }
        None
    }

    /// Restores a scratch basket from the payload, enforces the
    /// total-equality gate and persists a fresh `Created` order.
    async fn create_order(
        &self,
        payload: &RemoteOrderPayload,
        locale: &LocaleConfig,
        session: &CheckoutSession,
    ) -> Result<LocalOrder, ServiceError> {
        let restorer = BasketRestorer::new(
            self.catalog.as_ref(),
            self.pricing.as_ref(),
            self.vault.as_ref(),
            &self.payments,
        );
        let mut basket = Basket::new();
        restorer.restore(&mut basket, payload, session)?;

        let local = to_minor_units(basket.open_amount());
        if payload.order_amount != local {
            warn!(
                remote = payload.order_amount,
                local, "Refusing order creation on total mismatch"
            );
            return Err(ServiceError::TotalMismatch {
                remote: payload.order_amount,
                local,
            });
        }

        let had_reference = payload.merchant_reference1.is_some();
        let order_no = match payload.merchant_reference1.clone() {
            Some(no) => no,
            None => self.store.next_order_no().await,
        };
        let order = LocalOrder::from_basket(order_no, payload.order_id.clone(), &basket)?;
        let order = self.store.create(order).await?;

        if let Some(order_id) = &order.external_order_no {
            if !had_reference {
                // Failure to register the number is recoverable: lookup by
                // provider order id still correlates the records.
                let registered = self
                    .provider
                    .update_merchant_references(order_id, &order.order_no, locale)
                    .await;
                if !registered {
                    warn!(order_no = %order.order_no, "Could not register order number with provider");
                }
            }
            self.events
                .send_or_log(Event::OrderCreated {
                    order_no: order.order_no.clone(),
                    remote_order_id: order_id.clone(),
                })
                .await;
        }
        Ok(order)
    }

    async fn authorize_instruments(
        &self,
        order: &mut LocalOrder,
        payload: &RemoteOrderPayload,
        locale: &LocaleConfig,
        is_pending_order: bool,
    ) -> Vec<AuthOutcome> {
        let order_no = order.order_no.clone();
        let methods: Vec<String> = order
            .payment_instruments
            .iter()
            .map(|pi| pi.method.clone())
            .collect();

        let mut outcomes = Vec::with_capacity(methods.len());
        for method in methods {
            match self.payments.processor(&method) {
                None => {
                    error!(%method, "No payment processor registered");
                    outcomes.push(AuthOutcome::Error(format!("unknown payment method {method}")));
                }
                Some(processor) if !processor.has_remote_authorization() => {
                    // Settled locally; the local order number is the
                    // transaction id.
                    for instrument in order
                        .payment_instruments
                        .iter_mut()
                        .filter(|pi| pi.method == method)
                    {
                        instrument.transaction_id = Some(order_no.clone());
                    }
                    outcomes.push(AuthOutcome::Approved);
                }
                Some(processor) => {
                    let ctx = AuthContext {
                        payload,
                        locale,
                        is_pending_order,
                    };
                    outcomes.push(processor.authorize(order, &ctx).await);
                }
            }
        }
        outcomes
    }

    /// Fails the order, unlinks it from the checkout session and surfaces a
    /// typed authorization error.
    async fn fail_order(
        &self,
        order: LocalOrder,
        session: &mut CheckoutSession,
        kind: AuthFailure,
    ) -> Result<PlaceOrderOutcome, ServiceError> {
        self.store.save(&order).await?;
        let failed = self.store.fail(&order.order_no).await?;
        session.remote_order_id = None;
        self.events
            .send_or_log(Event::OrderFailed {
                order_no: failed.order_no.clone(),
                reason: kind.to_string(),
            })
            .await;
        warn!(order_no = %failed.order_no, %kind, "Order failed during authorization");
        Err(ServiceError::AuthorizationFailed(kind))
    }

    /// Handles a fraud-stop notification, routed independently of
    /// `place_order`.
    #[instrument(skip(self))]
    pub async fn handle_fraud_stopped(&self, remote_order_id: &str) -> Result<(), ServiceError> {
        let mut order = self
            .store
            .find_by_external_order_no(remote_order_id)
            .await
            .ok_or_else(|| {
                ServiceError::NotFound(format!("no order for remote id {remote_order_id}"))
            })?;

        order.fraud_status = Some(StoredFraudStatus::Stopped);
        order.add_note("Fraud", "Stopped by provider fraud review");
        self.store.save(&order).await?;

        if order.status == OrderStatus::Created {
            self.store.fail(&order.order_no).await?;
            self.events
                .send_or_log(Event::FraudStopped {
                    order_no: order.order_no.clone(),
                })
                .await;
            return Ok(());
        }

        let confirmed = order.confirmation_status == ConfirmationStatus::Confirmed;
        if confirmed && order.export_status == ExportStatus::Ready && !order.is_paid() {
            self.store.cancel(&order.order_no).await?;
            self.events
                .send_or_log(Event::OrderCancelled {
                    order_no: order.order_no.clone(),
                })
                .await;
            return Ok(());
        }
        if confirmed && (order.export_status == ExportStatus::Exported || order.is_paid()) {
            // Already downstream; auto-cancelling here would desync
            // fulfillment. Operators act on the alert.
            error!(
                order_no = %order.order_no,
                "Fraud stop on an exported or paid order, manual intervention required"
            );
            return Ok(());
        }
        warn!(order_no = %order.order_no, status = %order.status, "Fraud stop on order in unexpected state");
        Ok(())
    }
}
