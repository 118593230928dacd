//! Outbound provider API orchestration.
//!
//! Every operation catches transport failures at this boundary, logs them,
//! emits a [`Event::RemoteCallFailed`] and degrades to `None`/`false`.
//! Callers must treat those sentinels as "remote operation failed, remote
//! state unchanged"; transport errors never propagate past this module.

use std::sync::Arc;

use async_trait::async_trait;
use http::Method;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, instrument, warn};

use crate::config::{LocaleConfig, ProviderConfig};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::models::remote_order::RemoteOrderPayload;

/// Single-call HTTP transport seam. No retries here; retry policy, if any,
/// belongs to the implementation behind this trait.
#[async_trait]
pub trait TransportClient: Send + Sync {
    async fn call(
        &self,
        path: &str,
        method: Method,
        credential_id: &str,
        body: Option<&Value>,
    ) -> Result<Value, ServiceError>;
}

/// reqwest-backed transport using per-locale basic-auth credentials.
pub struct HttpTransport {
    client: reqwest::Client,
    config: ProviderConfig,
}

impl HttpTransport {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl TransportClient for HttpTransport {
    async fn call(
        &self,
        path: &str,
        method: Method,
        credential_id: &str,
        body: Option<&Value>,
    ) -> Result<Value, ServiceError> {
        let credential = self
            .config
            .credentials
            .iter()
            .find(|c| c.id == credential_id)
            .ok_or_else(|| {
                ServiceError::RemoteCallError(format!("unknown credential id {credential_id}"))
            })?;
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);

        let mut request = self
            .client
            .request(method, &url)
            .basic_auth(&credential.username, Some(&credential.password));
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ServiceError::RemoteCallError(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ServiceError::RemoteCallError(e.to_string()))?;
        if !status.is_success() {
            return Err(ServiceError::RemoteCallError(format!("{status}: {text}")));
        }
        if status == StatusCode::NO_CONTENT || text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| ServiceError::RemoteCallError(format!("unparseable response: {e}")))
    }
}

/// Encrypted card fields returned by a VCN settlement. Ciphertext is
/// base64-encoded; decryption is a site concern behind
/// [`VcnDecryptor`](crate::services::payments::VcnDecryptor).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedCardData {
    pub pan: String,
    pub csc: String,
    pub expiration_month: String,
    pub expiration_year: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VcnSettlementResponse {
    pub settlement_id: String,
    pub cards: Vec<SealedCardData>,
}

#[derive(Serialize)]
struct CaptureRequest {
    captured_amount: i64,
}

#[derive(Serialize)]
struct MerchantReferencesRequest<'a> {
    merchant_reference1: &'a str,
}

#[derive(Serialize)]
struct VcnSettlementRequest<'a> {
    order_id: &'a str,
    key_id: &'a str,
}

/// Thin orchestration over the provider's order endpoints.
pub struct ProviderOrderService {
    transport: Arc<dyn TransportClient>,
    events: EventSender,
}

impl ProviderOrderService {
    pub fn new(transport: Arc<dyn TransportClient>, events: EventSender) -> Self {
        Self { transport, events }
    }

    #[instrument(skip(self, payload, locale), fields(country = %locale.country))]
    pub async fn create_order(
        &self,
        payload: &RemoteOrderPayload,
        locale: &LocaleConfig,
    ) -> Option<RemoteOrderPayload> {
        let body = self.encode("create_order", payload)?;
        let value = self
            .call_degraded("create_order", "/checkout/v1/orders", Method::POST, locale, Some(&body))
            .await?;
        self.parse_order("create_order", value)
    }

    #[instrument(skip(self, payload, locale), fields(order_id))]
    pub async fn update_order(
        &self,
        order_id: &str,
        payload: &RemoteOrderPayload,
        locale: &LocaleConfig,
    ) -> Option<RemoteOrderPayload> {
        let body = self.encode("update_order", payload)?;
        let path = format!("/checkout/v1/orders/{order_id}");
        let value = self
            .call_degraded("update_order", &path, Method::POST, locale, Some(&body))
            .await?;
        self.parse_order("update_order", value)
    }

    /// Fetches an order. Completed orders live behind the order-management
    /// surface and carry the final `fraud_status`.
    #[instrument(skip(self, locale), fields(order_id, completed))]
    pub async fn get_order(
        &self,
        order_id: &str,
        completed: bool,
        locale: &LocaleConfig,
    ) -> Option<RemoteOrderPayload> {
        let path = if completed {
            format!("/ordermanagement/v1/orders/{order_id}")
        } else {
            format!("/checkout/v1/orders/{order_id}")
        };
        let value = self
            .call_degraded("get_order", &path, Method::GET, locale, None)
            .await?;
        self.parse_order("get_order", value)
    }

    #[instrument(skip(self, locale), fields(order_id))]
    pub async fn cancel_order(&self, order_id: &str, locale: &LocaleConfig) -> bool {
        let path = format!("/ordermanagement/v1/orders/{order_id}/cancel");
        self.call_degraded("cancel_order", &path, Method::POST, locale, None)
            .await
            .is_some()
    }

    #[instrument(skip(self, locale), fields(order_id))]
    pub async fn acknowledge_order(&self, order_id: &str, locale: &LocaleConfig) -> bool {
        let path = format!("/ordermanagement/v1/orders/{order_id}/acknowledge");
        self.call_degraded("acknowledge_order", &path, Method::POST, locale, None)
            .await
            .is_some()
    }

    #[instrument(skip(self, locale), fields(order_id, amount))]
    pub async fn capture_order(
        &self,
        order_id: &str,
        amount: i64,
        locale: &LocaleConfig,
    ) -> bool {
        let body = match serde_json::to_value(CaptureRequest {
            captured_amount: amount,
        }) {
            Ok(v) => v,
            Err(e) => {
                error!(operation = "capture_order", "Request encoding failed: {e}");
                return false;
            }
        };
        let path = format!("/ordermanagement/v1/orders/{order_id}/captures");
        self.call_degraded("capture_order", &path, Method::POST, locale, Some(&body))
            .await
            .is_some()
    }

    /// Registers the local order number back onto the remote order.
    #[instrument(skip(self, locale), fields(order_id, order_no))]
    pub async fn update_merchant_references(
        &self,
        order_id: &str,
        order_no: &str,
        locale: &LocaleConfig,
    ) -> bool {
        let body = match serde_json::to_value(MerchantReferencesRequest {
            merchant_reference1: order_no,
        }) {
            Ok(v) => v,
            Err(e) => {
                error!(operation = "update_merchant_references", "Request encoding failed: {e}");
                return false;
            }
        };
        let path = format!("/ordermanagement/v1/orders/{order_id}/merchant-references");
        self.call_degraded(
            "update_merchant_references",
            &path,
            Method::PATCH,
            locale,
            Some(&body),
        )
        .await
        .is_some()
    }

    #[instrument(skip(self, locale), fields(order_id))]
    pub async fn create_vcn_settlement(
        &self,
        order_id: &str,
        key_id: &str,
        locale: &LocaleConfig,
    ) -> Option<VcnSettlementResponse> {
        let body = match serde_json::to_value(VcnSettlementRequest { order_id, key_id }) {
            Ok(v) => v,
            Err(e) => {
                error!(operation = "create_vcn_settlement", "Request encoding failed: {e}");
                return None;
            }
        };
        let value = self
            .call_degraded(
                "create_vcn_settlement",
                "/merchantcard/v1/settlements",
                Method::POST,
                locale,
                Some(&body),
            )
            .await?;
        match serde_json::from_value(value) {
            Ok(settlement) => Some(settlement),
            Err(e) => {
                error!(operation = "create_vcn_settlement", "Unparseable settlement: {e}");
                None
            }
        }
    }

    fn encode(&self, operation: &str, payload: &RemoteOrderPayload) -> Option<Value> {
        match serde_json::to_value(payload) {
            Ok(v) => Some(v),
            Err(e) => {
                error!(operation, "Request encoding failed: {e}");
                None
            }
        }
    }

    async fn call_degraded(
        &self,
        operation: &str,
        path: &str,
        method: Method,
        locale: &LocaleConfig,
        body: Option<&Value>,
    ) -> Option<Value> {
        match self
            .transport
            .call(path, method, &locale.credential_id, body)
            .await
        {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(operation, path, "Remote call failed: {e}");
                self.events
                    .send_or_log(Event::RemoteCallFailed {
                        operation: operation.to_string(),
                        detail: e.to_string(),
                    })
                    .await;
                None
            }
        }
    }

    fn parse_order(&self, operation: &str, value: Value) -> Option<RemoteOrderPayload> {
        match serde_json::from_value(value) {
            Ok(payload) => Some(payload),
            Err(e) => {
                error!(operation, "Unparseable order response: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use std::sync::Mutex;

    struct FailingTransport;

    #[async_trait]
    impl TransportClient for FailingTransport {
        async fn call(
            &self,
            _path: &str,
            _method: Method,
            _credential_id: &str,
            _body: Option<&Value>,
        ) -> Result<Value, ServiceError> {
            Err(ServiceError::RemoteCallError("connection refused".into()))
        }
    }

    struct RecordingTransport {
        calls: Mutex<Vec<(String, String)>>,
        bodies: Mutex<Vec<Option<Value>>>,
        response: Value,
    }

    impl RecordingTransport {
        fn replying(response: Value) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                bodies: Mutex::new(Vec::new()),
                response,
            }
        }
    }

    #[async_trait]
    impl TransportClient for RecordingTransport {
        async fn call(
            &self,
            path: &str,
            method: Method,
            _credential_id: &str,
            body: Option<&Value>,
        ) -> Result<Value, ServiceError> {
            self.calls
                .lock()
                .unwrap()
                .push((method.to_string(), path.to_string()));
            self.bodies.lock().unwrap().push(body.cloned());
            Ok(self.response.clone())
        }
    }

    fn locale() -> crate::config::LocaleConfig {
        test_config().locale_for("US").unwrap().clone()
    }

    #[tokio::test]
    async fn transport_failure_degrades_to_none_and_false() {
        let (events, mut rx) = EventSender::channel(8);
        let service = ProviderOrderService::new(Arc::new(FailingTransport), events);

        assert!(service.get_order("fp_1", true, &locale()).await.is_none());
        assert!(!service.cancel_order("fp_1", &locale()).await);
        assert!(!service.acknowledge_order("fp_1", &locale()).await);
        assert!(!service.capture_order("fp_1", 10_000, &locale()).await);

        match rx.recv().await {
            Some(Event::RemoteCallFailed { operation, .. }) => {
                assert_eq!(operation, "get_order")
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn completed_orders_use_order_management_path() {
        let transport = Arc::new(RecordingTransport::replying(
            serde_json::to_value(RemoteOrderPayload {
                order_id: Some("fp_9".into()),
                purchase_country: "US".into(),
                purchase_currency: "USD".into(),
                ..Default::default()
            })
            .unwrap(),
        ));
        let (events, _rx) = EventSender::channel(8);
        let service = ProviderOrderService::new(transport.clone(), events);

        let order = service.get_order("fp_9", true, &locale()).await.unwrap();
        assert_eq!(order.order_id.as_deref(), Some("fp_9"));
        service.get_order("fp_9", false, &locale()).await;

        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls[0].1, "/ordermanagement/v1/orders/fp_9");
        assert_eq!(calls[1].1, "/checkout/v1/orders/fp_9");
    }

    #[tokio::test]
    async fn create_and_update_post_encoded_payload_and_parse_response() {
        let transport = Arc::new(RecordingTransport::replying(
            serde_json::to_value(RemoteOrderPayload {
                order_id: Some("fp_3".into()),
                purchase_country: "US".into(),
                purchase_currency: "USD".into(),
                order_amount: 10_000,
                html_snippet: Some("<div id=\"flexpay-checkout\"></div>".into()),
                ..Default::default()
            })
            .unwrap(),
        ));
        let (events, _rx) = EventSender::channel(8);
        let service = ProviderOrderService::new(transport.clone(), events);

        let draft = RemoteOrderPayload {
            purchase_country: "US".into(),
            purchase_currency: "USD".into(),
            order_amount: 10_000,
            ..Default::default()
        };

        let created = service.create_order(&draft, &locale()).await.unwrap();
        assert_eq!(created.order_id.as_deref(), Some("fp_3"));
        assert!(created.html_snippet.is_some());

        let updated = service.update_order("fp_3", &draft, &locale()).await.unwrap();
        assert_eq!(updated.order_amount, 10_000);

        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls[0], ("POST".to_string(), "/checkout/v1/orders".to_string()));
        assert_eq!(
            calls[1],
            ("POST".to_string(), "/checkout/v1/orders/fp_3".to_string())
        );

        let bodies = transport.bodies.lock().unwrap();
        for body in bodies.iter() {
            let body = body.as_ref().unwrap();
            assert_eq!(body["order_amount"], 10_000);
            assert_eq!(body["purchase_country"], "US");
            // Drafts never carry an id; the provider assigns it.
            assert!(body.get("order_id").is_none());
        }
    }

    #[tokio::test]
    async fn unparseable_order_response_degrades_to_none() {
        let transport = Arc::new(RecordingTransport::replying(serde_json::json!({
            "order_lines": "not-a-list"
        })));
        let (events, _rx) = EventSender::channel(8);
        let service = ProviderOrderService::new(transport, events);
        assert!(service.get_order("fp_2", false, &locale()).await.is_none());
    }
}
