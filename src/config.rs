use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use tracing::info;
use validator::Validate;

const DEFAULT_ENV: &str = "development";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

/// How product prices are displayed (and therefore translated) for a locale.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxDisplayMode {
    /// Prices include tax; per-line tax rates are sent in basis points.
    GrossPrices,
    /// Prices exclude tax; lines carry a zero rate and a synthetic
    /// `sales_tax` line carries the total.
    NetPrices,
}

/// Per-country configuration record. Read-only to the core.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct LocaleConfig {
    /// ISO country code this record applies to.
    #[validate(length(equal = 2))]
    pub country: String,
    /// Credential id the transport uses for this locale's API calls.
    pub credential_id: String,
    /// Provider locale string, e.g. `en-US`.
    pub locale: String,
    #[serde(default = "default_tax_mode")]
    pub tax_mode: TaxDisplayMode,
    /// Capture the authorized amount immediately after approval.
    #[serde(default)]
    pub direct_capture: bool,
    /// Request a virtual-card-number settlement after approval.
    #[serde(default)]
    pub vcn_enabled: bool,
    /// Whether pending (in-review) orders are acknowledged to the provider.
    /// Provider guidance is ambiguous here, so it is policy, not hardcoded.
    #[serde(default)]
    pub acknowledge_pending_orders: bool,
}

fn default_tax_mode() -> TaxDisplayMode {
    TaxDisplayMode::GrossPrices
}

#[derive(Clone, Debug, Deserialize)]
pub struct ApiCredential {
    pub id: String,
    pub username: String,
    pub password: String,
}

#[derive(Clone, Debug, Deserialize, Validate)]
pub struct ProviderConfig {
    /// Base URL of the provider API.
    #[validate(url)]
    pub base_url: String,
    /// Shared secret for callback signature verification; unsigned callbacks
    /// are accepted when unset (e.g. in development).
    #[serde(default)]
    pub push_secret: Option<String>,
    /// Key id sent with VCN settlement requests.
    #[serde(default)]
    pub vcn_key_id: Option<String>,
    #[serde(default)]
    pub credentials: Vec<ApiCredential>,
}

#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,
    #[validate]
    pub provider: ProviderConfig,
    #[validate]
    pub locales: Vec<LocaleConfig>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl AppConfig {
    pub fn locale_for(&self, country: &str) -> Option<&LocaleConfig> {
        self.locales
            .iter()
            .find(|l| l.country.eq_ignore_ascii_case(country))
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Loads configuration from `config/default.toml`, an environment-specific
/// overlay, and `FLEXPAY__`-prefixed environment variables, in that order.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let run_env = env::var("RUN_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    let config = Config::builder()
        .add_source(File::with_name(&format!("{CONFIG_DIR}/default")).required(false))
        .add_source(File::with_name(&format!("{CONFIG_DIR}/{run_env}")).required(false))
        .add_source(Environment::with_prefix("FLEXPAY").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;
    app_config
        .validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {e}")))?;
    Ok(app_config)
}

/// Fixture used across the crate's unit tests.
#[cfg(test)]
pub(crate) fn test_config() -> AppConfig {
    AppConfig {
        host: "127.0.0.1".into(),
        port: DEFAULT_PORT,
        environment: "test".into(),
        log_level: "debug".into(),
        log_json: false,
        provider: ProviderConfig {
            base_url: "https://api.flexpay.test".into(),
            push_secret: None,
            vcn_key_id: None,
            credentials: vec![ApiCredential {
                id: "cred_us".into(),
                username: "merchant".into(),
                password: "secret".into(),
            }],
        },
        locales: vec![
            LocaleConfig {
                country: "US".into(),
                credential_id: "cred_us".into(),
                locale: "en-US".into(),
                tax_mode: TaxDisplayMode::NetPrices,
                direct_capture: false,
                vcn_enabled: false,
                acknowledge_pending_orders: false,
            },
            LocaleConfig {
                country: "DE".into(),
                credential_id: "cred_de".into(),
                locale: "de-DE".into(),
                tax_mode: TaxDisplayMode::GrossPrices,
                direct_capture: true,
                vcn_enabled: false,
                acknowledge_pending_orders: true,
            },
        ],
    }
}
