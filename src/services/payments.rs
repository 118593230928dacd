//! Payment processors and their registry.
//!
//! Processors are dispatched by payment-method id. The provider's own
//! processor is one implementation among many; nothing outside it knows
//! about fraud statuses, capture, or VCN settlement.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::{error, info, instrument, warn};

use crate::config::LocaleConfig;
use crate::errors::ServiceError;
use crate::models::basket::{Basket, PaymentInstrument, PAYMENT_METHOD_FLEXPAY};
use crate::models::order::{LocalOrder, PaymentStatus, StoredFraudStatus};
use crate::models::remote_order::{FraudStatus, RemoteOrderPayload};
use crate::money::to_minor_units;
use crate::services::provider_api::{ProviderOrderService, SealedCardData};

/// Result of a single instrument authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Approved,
    /// In review; the order stays unsubmitted until a later notification.
    Pending,
    Declined,
    NotSupported,
    Error(String),
}

/// Everything an authorization decision may depend on.
pub struct AuthContext<'a> {
    pub payload: &'a RemoteOrderPayload,
    pub locale: &'a LocaleConfig,
    pub is_pending_order: bool,
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Payment-method id this processor is registered under.
    fn method_id(&self) -> &str;

    /// Processors without a remote authorization step get their transaction
    /// id stamped with the local order number instead of being authorized.
    fn has_remote_authorization(&self) -> bool {
        true
    }

    /// Attaches or replaces this processor's payment instrument on the
    /// basket. Runs during basket restoration, before the final
    /// recalculation.
    fn handle(&self, basket: &mut Basket) -> Result<(), ServiceError>;

    async fn authorize(&self, order: &mut LocalOrder, ctx: &AuthContext<'_>) -> AuthOutcome;
}

#[derive(Default)]
pub struct PaymentProcessorRegistry {
    processors: HashMap<String, Arc<dyn PaymentProcessor>>,
}

impl PaymentProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, processor: Arc<dyn PaymentProcessor>) {
        self.processors
            .insert(processor.method_id().to_string(), processor);
    }

    pub fn processor(&self, method_id: &str) -> Option<&Arc<dyn PaymentProcessor>> {
        self.processors.get(method_id)
    }

    /// Runs every registered processor's handle hook against the basket.
    pub fn handle_all(&self, basket: &mut Basket) -> Result<(), ServiceError> {
        for processor in self.processors.values() {
            processor.handle(basket)?;
        }
        Ok(())
    }
}

/// Store gift certificates: settled locally, no remote authorization.
pub struct GiftCertificateProcessor;

#[async_trait]
impl PaymentProcessor for GiftCertificateProcessor {
    fn method_id(&self) -> &str {
        crate::models::basket::PAYMENT_METHOD_GIFT_CERTIFICATE
    }

    fn has_remote_authorization(&self) -> bool {
        false
    }

    fn handle(&self, _basket: &mut Basket) -> Result<(), ServiceError> {
        // Gift-certificate instruments are created by the restorer from
        // store-credit lines; nothing to attach here.
        Ok(())
    }

    async fn authorize(&self, _order: &mut LocalOrder, _ctx: &AuthContext<'_>) -> AuthOutcome {
        AuthOutcome::Approved
    }
}

/// Decrypts provider-issued virtual-card data with a site-held key. The
/// crate ships no cipher; key custody is a deployment concern.
pub trait VcnDecryptor: Send + Sync {
    fn decrypt(&self, sealed: &SealedCardData) -> Result<VcnCardData, ServiceError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VcnCardData {
    pub pan: String,
    pub csc: String,
    pub expiration_month: String,
    pub expiration_year: String,
}

/// Sandbox decryptor: the provider's test environment returns card fields
/// as base64-encoded plaintext.
pub struct SandboxVcnDecryptor;

impl SandboxVcnDecryptor {
    fn field(&self, name: &str, value: &str) -> Result<String, ServiceError> {
        let bytes = BASE64.decode(value).map_err(|e| {
            ServiceError::ValidationError(format!("undecodable VCN field {name}: {e}"))
        })?;
        String::from_utf8(bytes).map_err(|e| {
            ServiceError::ValidationError(format!("non-UTF8 VCN field {name}: {e}"))
        })
    }
}

impl VcnDecryptor for SandboxVcnDecryptor {
    fn decrypt(&self, sealed: &SealedCardData) -> Result<VcnCardData, ServiceError> {
        Ok(VcnCardData {
            pan: self.field("pan", &sealed.pan)?,
            csc: self.field("csc", &sealed.csc)?,
            expiration_month: self.field("expiration_month", &sealed.expiration_month)?,
            expiration_year: self.field("expiration_year", &sealed.expiration_year)?,
        })
    }
}

/// The provider's own processor. Owns the fraud-status branch, direct
/// capture and VCN settlement.
pub struct FlexpayProcessor {
    provider: Arc<ProviderOrderService>,
    decryptor: Option<Arc<dyn VcnDecryptor>>,
    vcn_key_id: Option<String>,
}

impl FlexpayProcessor {
    pub fn new(
        provider: Arc<ProviderOrderService>,
        decryptor: Option<Arc<dyn VcnDecryptor>>,
        vcn_key_id: Option<String>,
    ) -> Self {
        Self {
            provider,
            decryptor,
            vcn_key_id,
        }
    }

    /// Capture failures are logged but never fail the authorization; only
    /// the authorization result gates order submission.
    async fn capture(&self, order: &mut LocalOrder, locale: &LocaleConfig) {
        let Some(order_id) = order.external_order_no.clone() else {
            warn!(order_no = %order.order_no, "Direct capture skipped: no remote order id");
            return;
        };
        let amount = to_minor_units(order.open_amount());
        if self.provider.capture_order(&order_id, amount, locale).await {
            order.payment_status = PaymentStatus::Paid;
            order.add_note("Payment", format!("Captured {amount} minor units"));
            info!(order_no = %order.order_no, amount, "Captured payment");
        } else {
            warn!(order_no = %order.order_no, "Direct capture failed, order left unpaid");
        }
    }

    /// Settlement failures are logged; the order proceeds without card data
    /// and downstream handoff surfaces the gap.
    async fn settle_vcn(&self, order: &mut LocalOrder, locale: &LocaleConfig) {
        let Some(order_id) = order.external_order_no.clone() else {
            warn!(order_no = %order.order_no, "VCN settlement skipped: no remote order id");
            return;
        };
        let (Some(key_id), Some(decryptor)) = (self.vcn_key_id.as_deref(), &self.decryptor)
        else {
            warn!(order_no = %order.order_no, "VCN settlement skipped: key or decryptor not configured");
            return;
        };
        let Some(settlement) = self
            .provider
            .create_vcn_settlement(&order_id, key_id, locale)
            .await
        else {
            return;
        };
        let Some(sealed) = settlement.cards.first() else {
            warn!(order_no = %order.order_no, "VCN settlement carried no cards");
            return;
        };
        match decryptor.decrypt(sealed) {
            Ok(card) => {
                order.custom.vcn_pan = Some(card.pan);
                order.custom.vcn_csc = Some(card.csc);
                order.custom.vcn_expiration_month = Some(card.expiration_month);
                order.custom.vcn_expiration_year = Some(card.expiration_year);
                order.add_note("Payment", format!("VCN settlement {}", settlement.settlement_id));
            }
            Err(e) => warn!(order_no = %order.order_no, "VCN decryption failed: {e}"),
        }
    }
}

#[async_trait]
impl PaymentProcessor for FlexpayProcessor {
    fn method_id(&self) -> &str {
        PAYMENT_METHOD_FLEXPAY
    }

    /// Replaces the provider instrument with one covering the open amount.
    fn handle(&self, basket: &mut Basket) -> Result<(), ServiceError> {
        basket
            .payment_instruments
            .retain(|pi| pi.method != PAYMENT_METHOD_FLEXPAY);
        let open = basket.open_amount();
        if open > rust_decimal::Decimal::ZERO {
            basket.payment_instruments.push(PaymentInstrument {
                method: PAYMENT_METHOD_FLEXPAY.to_string(),
                amount: open,
                gift_certificate_code: None,
                transaction_id: None,
            });
        }
        Ok(())
    }

    #[instrument(skip_all, fields(order_no = %order.order_no, is_pending = ctx.is_pending_order))]
    async fn authorize(&self, order: &mut LocalOrder, ctx: &AuthContext<'_>) -> AuthOutcome {
        let Some(status) = ctx.payload.fraud_status.clone() else {
            error!("Remote order carries no fraud status");
            return AuthOutcome::Error("missing fraud status".into());
        };

        match status {
            FraudStatus::Accepted => {
                order.fraud_status = Some(if ctx.is_pending_order {
                    StoredFraudStatus::AcceptedAfterReview
                } else {
                    StoredFraudStatus::Accepted
                });
                for instrument in &mut order.payment_instruments {
                    if instrument.method == PAYMENT_METHOD_FLEXPAY {
                        instrument.transaction_id = order.external_order_no.clone();
                    }
                }
                if ctx.locale.vcn_enabled {
                    self.settle_vcn(order, ctx.locale).await;
                } else if ctx.locale.direct_capture && !order.is_paid() {
                    self.capture(order, ctx.locale).await;
                }
                AuthOutcome::Approved
            }
            FraudStatus::Pending => {
                order.fraud_status = Some(StoredFraudStatus::Pending);
                AuthOutcome::Pending
            }
            FraudStatus::Rejected => {
                order.fraud_status = Some(if ctx.is_pending_order {
                    StoredFraudStatus::RejectedAfterReview
                } else {
                    StoredFraudStatus::Rejected
                });
                AuthOutcome::Declined
            }
            FraudStatus::Stopped => {
                order.fraud_status = Some(StoredFraudStatus::Stopped);
                AuthOutcome::Declined
            }
            FraudStatus::Unknown(raw) => {
                // No decision: the caller must treat this as an error
                // condition, never as pending.
                let err = ServiceError::FraudAmbiguous(raw);
                error!("{err}");
                AuthOutcome::Error(err.to_string())
            }
        }
    }
}
