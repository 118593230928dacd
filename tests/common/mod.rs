//! Shared fixtures for the integration suite.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use http::Method;
use rust_decimal_macros::dec;
use serde_json::Value;
use tokio::sync::mpsc;

use flexpay_checkout::config::{
    ApiCredential, AppConfig, LocaleConfig, ProviderConfig, TaxDisplayMode,
};
use flexpay_checkout::errors::ServiceError;
use flexpay_checkout::events::{Event, EventSender};
use flexpay_checkout::models::basket::ShippingMethodRecord;
use flexpay_checkout::models::remote_order::{
    FraudStatus, OrderLineType, RemoteAddress, RemoteOrderLine, RemoteOrderPayload,
};
use flexpay_checkout::services::payments::{
    FlexpayProcessor, GiftCertificateProcessor, PaymentProcessorRegistry,
};
use flexpay_checkout::services::provider_api::{ProviderOrderService, TransportClient};
use flexpay_checkout::services::reconciliation::ReconciliationEngine;
use flexpay_checkout::stores::{
    CouponRule, GiftCertificateVault, InMemoryGiftCertificateVault, InMemoryOrderStore,
    PricingEngine, ProductCatalog, ProductOptionRecord, ProductRecord, SimplePricingEngine,
    StaticProductCatalog,
};
use flexpay_checkout::AppState;

/// Transport double: records every call, optionally fails everything, and
/// serves a scripted payload to GET requests.
pub struct ScriptedTransport {
    pub calls: Mutex<Vec<String>>,
    pub order_response: Mutex<Option<Value>>,
    pub fail: AtomicBool,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            order_response: Mutex::new(None),
            fail: AtomicBool::new(false),
        })
    }

    pub fn serve_order(&self, payload: &RemoteOrderPayload) {
        *self.order_response.lock().unwrap() = Some(serde_json::to_value(payload).unwrap());
    }

    pub fn calls_matching(&self, fragment: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.contains(fragment))
            .count()
    }
}

#[async_trait]
impl TransportClient for ScriptedTransport {
    async fn call(
        &self,
        path: &str,
        method: Method,
        _credential_id: &str,
        _body: Option<&Value>,
    ) -> Result<Value, ServiceError> {
        self.calls.lock().unwrap().push(format!("{method} {path}"));
        if self.fail.load(Ordering::SeqCst) {
            return Err(ServiceError::RemoteCallError("scripted failure".into()));
        }
        if method == Method::GET {
            if let Some(order) = self.order_response.lock().unwrap().clone() {
                return Ok(order);
            }
        }
        Ok(Value::Null)
    }
}

pub fn us_locale() -> LocaleConfig {
    LocaleConfig {
        country: "US".into(),
        credential_id: "cred_us".into(),
        locale: "en-US".into(),
        tax_mode: TaxDisplayMode::NetPrices,
        direct_capture: false,
        vcn_enabled: false,
        acknowledge_pending_orders: false,
    }
}

pub fn app_config(push_secret: Option<&str>) -> AppConfig {
    AppConfig {
        host: "127.0.0.1".into(),
        port: 8080,
        environment: "test".into(),
        log_level: "debug".into(),
        log_json: false,
        provider: ProviderConfig {
            base_url: "https://api.flexpay.test".into(),
            push_secret: push_secret.map(String::from),
            vcn_key_id: None,
            credentials: vec![ApiCredential {
                id: "cred_us".into(),
                username: "merchant".into(),
                password: "secret".into(),
            }],
        },
        locales: vec![us_locale()],
    }
}

pub fn catalog_products() -> Vec<ProductRecord> {
    vec![
        ProductRecord {
            product_id: "SKU-100".into(),
            name: "Desk lamp".into(),
            price: dec!(100.00),
            tax_rate: dec!(0),
            options: Vec::new(),
        },
        ProductRecord {
            product_id: "SKU-200".into(),
            name: "Office chair".into(),
            price: dec!(50.00),
            tax_rate: dec!(0.10),
            options: vec![ProductOptionRecord {
                option_id: "assembly".into(),
                value_id: "full".into(),
                name: "Assembly service".into(),
                price: dec!(15.00),
            }],
        },
        ProductRecord {
            product_id: "SKU-51".into(),
            name: "Bookend".into(),
            price: dec!(51.00),
            tax_rate: dec!(0),
            options: Vec::new(),
        },
    ]
}

pub fn pricing_engine() -> SimplePricingEngine {
    SimplePricingEngine::new(
        TaxDisplayMode::NetPrices,
        vec![ShippingMethodRecord {
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

pub struct TestHarness {
    pub state: Arc<AppState>,
    pub store: Arc<InMemoryOrderStore>,
    pub transport: Arc<ScriptedTransport>,
    pub events: mpsc::Receiver<Event>,
}

pub fn harness(push_secret: Option<&str>) -> TestHarness {
    let transport = ScriptedTransport::new();
    let (events, event_rx) = EventSender::channel(64);
    let provider = Arc::new(ProviderOrderService::new(transport.clone(), events.clone()));

    let mut registry = PaymentProcessorRegistry::new();
    registry.register(Arc::new(FlexpayProcessor::new(provider.clone(), None, None)));
    registry.register(Arc::new(GiftCertificateProcessor));
    let payments = Arc::new(registry);

    let store = Arc::new(InMemoryOrderStore::new());
    let catalog: Arc<dyn ProductCatalog> =
        Arc::new(StaticProductCatalog::new(catalog_products()));
    let pricing: Arc<dyn PricingEngine> = Arc::new(pricing_engine());
    let vault: Arc<dyn GiftCertificateVault> = Arc::new(InMemoryGiftCertificateVault::new(vec![
        ("GC30".to_string(), dec!(30.00)),
        ("GC40".to_string(), dec!(40.00)),
    ]));

    let engine = Arc::new(ReconciliationEngine::new(
        store.clone(),
        catalog.clone(),
        pricing.clone(),
        vault.clone(),
        payments.clone(),
        provider.clone(),
        events,
    ));

    let state = Arc::new(AppState {
        config: app_config(push_secret),
        engine,
        provider,
        catalog,
        pricing,
        vault,
        payments,
    });

    TestHarness {
        state,
        store,
        transport,
        events: event_rx,
    }
}

pub fn remote_address() -> RemoteAddress {
    RemoteAddress {
        given_name: Some("Jane".into()),
        family_name: Some("Doe".into()),
        street_address: Some("1 Main St".into()),
        postal_code: Some("62704".into()),
        city: Some("Springfield".into()),
        region: Some("IL".into()),
        country: Some("US".into()),
        email: Some("jane@example.com".into()),
        ..Default::default()
    }
}

pub fn physical_line(reference: &str, quantity: i64, unit_price: i64) -> RemoteOrderLine {
    RemoteOrderLine {
        line_type: OrderLineType::Physical,
        name: reference.to_string(),
        reference: reference.to_string(),
        quantity,
        unit_price,
        tax_rate: 0,
        total_amount: unit_price * quantity,
        total_tax_amount: 0,
        merchant_data: None,
    }
}

/// A completed-order payload as the provider would push it back.
pub fn completed_payload(
    order_id: &str,
    lines: Vec<RemoteOrderLine>,
    order_amount: i64,
    fraud: FraudStatus,
) -> RemoteOrderPayload {
    RemoteOrderPayload {
        order_id: Some(order_id.to_string()),
        purchase_country: "US".into(),
        purchase_currency: "USD".into(),
        billing_address: Some(remote_address()),
        shipping_address: Some(remote_address()),
        order_lines: lines,
        order_amount,
        order_tax_amount: 0,
        fraud_status: Some(fraud),
        ..Default::default()
    }
}
