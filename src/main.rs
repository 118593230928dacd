use std::sync::Arc;

use anyhow::Context;
use rust_decimal::Decimal;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use flexpay_checkout::config::{load_config, AppConfig, TaxDisplayMode};
use flexpay_checkout::events::EventSender;
use flexpay_checkout::services::payments::{
    FlexpayProcessor, GiftCertificateProcessor, PaymentProcessorRegistry, SandboxVcnDecryptor,
};
use flexpay_checkout::services::provider_api::{HttpTransport, ProviderOrderService};
use flexpay_checkout::services::reconciliation::ReconciliationEngine;
use flexpay_checkout::stores::{
    CouponRule, GiftCertificateVault, InMemoryGiftCertificateVault, InMemoryOrderStore,
    OrderStore, PricingEngine, ProductCatalog, ProductOptionRecord, ProductRecord,
    SimplePricingEngine, StaticProductCatalog,
};
use flexpay_checkout::models::basket::ShippingMethodRecord;
use flexpay_checkout::{app_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config().context("loading configuration")?;
    init_tracing(&config);
    info!(environment = %config.environment, "Starting flexpay-checkout");

    let (events, mut event_rx) = EventSender::channel(256);
    // Dev event consumer; deployments hang mail/export dispatch off this
    // receiver instead.
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            info!(?event, "Domain event");
        }
    });

    let transport = Arc::new(HttpTransport::new(config.provider.clone()));
    let provider = Arc::new(ProviderOrderService::new(transport, events.clone()));

    let mut registry = PaymentProcessorRegistry::new();
    registry.register(Arc::new(FlexpayProcessor::new(
        provider.clone(),
        Some(Arc::new(SandboxVcnDecryptor)),
        config.provider.vcn_key_id.clone(),
    )));
    registry.register(Arc::new(GiftCertificateProcessor));
    let payments = Arc::new(registry);

    // In-memory storefront collaborators for development; production wiring
    // plugs the platform's own implementations into these seams.
    let tax_mode = config
        .locales
        .first()
        .map(|l| l.tax_mode)
        .unwrap_or(TaxDisplayMode::GrossPrices);
    let catalog: Arc<dyn ProductCatalog> = Arc::new(StaticProductCatalog::new(demo_products()));
    let pricing: Arc<dyn PricingEngine> = Arc::new(SimplePricingEngine::new(
        tax_mode,
        demo_shipping_methods(),
        demo_coupons(),
    ));
    let vault: Arc<dyn GiftCertificateVault> =
        Arc::new(InMemoryGiftCertificateVault::new(Vec::new()));
    let store: Arc<dyn OrderStore> = Arc::new(InMemoryOrderStore::new());

    let engine = Arc::new(ReconciliationEngine::new(
        store,
        catalog.clone(),
        pricing.clone(),
        vault.clone(),
        payments.clone(),
        provider.clone(),
        events,
    ));

    let state = Arc::new(AppState {
        config,
        engine,
        provider,
        catalog,
        pricing,
        vault,
        payments,
    });

    let addr = state.config.server_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("Listening on {addr}");
    axum::serve(listener, app_router(state))
        .await
        .context("server error")?;
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    if config.log_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn demo_products() -> Vec<ProductRecord> {
    vec![
        ProductRecord {
            product_id: "SKU-100".into(),
            name: "Desk lamp".into(),
            price: Decimal::new(5000, 2),
            tax_rate: Decimal::new(10, 2),
            options: vec![ProductOptionRecord {
                option_id: "giftwrap".into(),
                value_id: "standard".into(),
                name: "Gift wrap".into(),
                price: Decimal::new(250, 2),
            }],
        },
        ProductRecord {
            product_id: "SKU-200".into(),
            name: "Office chair".into(),
            price: Decimal::new(24900, 2),
            tax_rate: Decimal::new(10, 2),
            options: Vec::new(),
        },
    ]
}

fn demo_shipping_methods() -> Vec<ShippingMethodRecord> {
    vec![
        ShippingMethodRecord {
            id: "GROUND".into(),
            name: "Ground".into(),
            price: Decimal::new(500, 2),
            tax_rate: Decimal::ZERO,
        },
        ShippingMethodRecord {
            id: "EXPRESS".into(),
            name: "Express".into(),
            price: Decimal::new(2000, 2),
            tax_rate: Decimal::ZERO,
        },
    ]
}

fn demo_coupons() -> Vec<CouponRule> {
    vec![CouponRule {
        code: "SAVE10".into(),
        promotion_id: "promo_10_off".into(),
        amount: Decimal::new(-1000, 2),
    }]
}
