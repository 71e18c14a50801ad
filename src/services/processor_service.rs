// src/services/processor_service.rs
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use nanoid::nanoid;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing;

use crate::errors::SparrowError as AppError;

#[derive(Debug, Clone)]
pub struct CheckoutSessionRequest {
    pub payment_id: String,
    pub trip_id: String,
    pub amount: i64,
    pub currency: String,
    pub description: String,
    pub customer_id: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorSession {
    pub id: String,
    pub url: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct PaymentIntentParams {
    pub payment_id: String,
    pub amount: i64,
    pub currency: String,
    pub description: String,
    pub customer_id: Option<String>,
    pub payment_method_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProcessorIntent {
    pub id: String,
    pub status: String,
    pub client_secret: Option<String>,
}

impl ProcessorIntent {
    pub fn is_succeeded(&self) -> bool {
        self.status == "succeeded"
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status.as_str(), "canceled" | "requires_payment_method")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentMethodSummary {
    pub id: String,
    pub brand: Option<String>,
    pub last4: Option<String>,
    pub exp_month: Option<u32>,
    pub exp_year: Option<u32>,
}

/// A webhook delivery, already signature-checked.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: ProcessorEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorEventData {
    pub object: serde_json::Value,
}

impl ProcessorEvent {
    pub fn object_str(&self, field: &str) -> Option<&str> {
        self.data.object.get(field).and_then(|v| v.as_str())
    }

    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.data
            .object
            .get("metadata")
            .and_then(|m| m.get(key))
            .and_then(|v| v.as_str())
    }
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn create_checkout_session(&self, request: &CheckoutSessionRequest) -> Result<ProcessorSession, AppError>;
    async fn create_payment_intent(&self, params: &PaymentIntentParams) -> Result<ProcessorIntent, AppError>;
    async fn confirm_payment_intent(&self, intent_id: &str) -> Result<ProcessorIntent, AppError>;
    async fn retrieve_payment_intent(&self, intent_id: &str) -> Result<ProcessorIntent, AppError>;
    async fn create_customer(&self, rider_id: &str, email: &str, name: &str) -> Result<String, AppError>;
    async fn attach_payment_method(&self, customer_id: &str, payment_method_id: &str) -> Result<PaymentMethodSummary, AppError>;
    async fn list_payment_methods(&self, customer_id: &str) -> Result<Vec<PaymentMethodSummary>, AppError>;
    async fn detach_payment_method(&self, payment_method_id: &str) -> Result<(), AppError>;
}

// ------------------------------
// Stripe
// ------------------------------

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub api_base: String,
}

pub struct StripeProcessor {
    config: StripeConfig,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct StripeSession {
    id: String,
    url: Option<String>,
    expires_at: Option<i64>,
}

#[derive(Deserialize)]
struct StripeCustomer {
    id: String,
}

#[derive(Deserialize)]
struct StripeCard {
    brand: Option<String>,
    last4: Option<String>,
    exp_month: Option<u32>,
    exp_year: Option<u32>,
}

#[derive(Deserialize)]
struct StripePaymentMethod {
    id: String,
    card: Option<StripeCard>,
}

impl From<StripePaymentMethod> for PaymentMethodSummary {
    fn from(pm: StripePaymentMethod) -> Self {
        let card = pm.card;
        Self {
            id: pm.id,
            brand: card.as_ref().and_then(|c| c.brand.clone()),
            last4: card.as_ref().and_then(|c| c.last4.clone()),
            exp_month: card.as_ref().and_then(|c| c.exp_month),
            exp_year: card.as_ref().and_then(|c| c.exp_year),
        }
    }
}

#[derive(Deserialize)]
struct StripeList<T> {
    data: Vec<T>,
}

#[derive(Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
}

impl StripeProcessor {
    pub fn new(config: StripeConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_base.trim_end_matches('/'), path)
    }

    async fn send<T: for<'de> Deserialize<'de>>(&self, request: reqwest::RequestBuilder) -> Result<T, AppError> {
        let response = request
            .bearer_auth(&self.config.secret_key)
            .send()
            .await
            .map_err(|e| AppError::ProcessorRequest(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<StripeErrorBody>().await {
                Ok(body) => body.error.message.unwrap_or_else(|| "Unknown processor error".to_string()),
                Err(_) => "Unreadable processor error".to_string(),
            };
            tracing::error!("Stripe request failed ({}): {}", status, message);
            return Err(AppError::ProcessorRejected {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| AppError::ProcessorRequest(format!("Unexpected processor response: {}", e)))
    }

    async fn post_form<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        form: &[(String, String)],
        idempotency_key: Option<&str>,
    ) -> Result<T, AppError> {
        let mut request = self.client.post(self.url(path)).form(form);
        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }
        self.send(request).await
    }
}

fn field(key: &str, value: impl ToString) -> (String, String) {
    (key.to_string(), value.to_string())
}

#[async_trait]
impl PaymentProcessor for StripeProcessor {
    async fn create_checkout_session(&self, request: &CheckoutSessionRequest) -> Result<ProcessorSession, AppError> {
        tracing::info!("Creating Stripe checkout session for payment {}", request.payment_id);

        let mut form = vec![
            field("mode", "payment"),
            field("line_items[0][quantity]", 1),
            field("line_items[0][price_data][currency]", &request.currency),
            field("line_items[0][price_data][unit_amount]", request.amount),
            field("line_items[0][price_data][product_data][name]", &request.description),
            field("success_url", &request.success_url),
            field("cancel_url", &request.cancel_url),
            field("client_reference_id", &request.payment_id),
            field("expires_at", request.expires_at.timestamp()),
            field("metadata[paymentId]", &request.payment_id),
            field("metadata[tripId]", &request.trip_id),
            field("payment_intent_data[metadata][paymentId]", &request.payment_id),
        ];
        if let Some(customer) = &request.customer_id {
            form.push(field("customer", customer));
        }

        let session: StripeSession = self
            .post_form("checkout/sessions", &form, Some(&request.payment_id))
            .await?;

        Ok(ProcessorSession {
            url: session.url.unwrap_or_default(),
            expires_at: session
                .expires_at
                .and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
            id: session.id,
        })
    }

    async fn create_payment_intent(&self, params: &PaymentIntentParams) -> Result<ProcessorIntent, AppError> {
        tracing::info!("Creating Stripe payment intent for payment {}", params.payment_id);

        let mut form = vec![
            field("amount", params.amount),
            field("currency", &params.currency),
            field("payment_method", &params.payment_method_id),
            field("confirm", true),
            field("description", &params.description),
            field("metadata[paymentId]", &params.payment_id),
            field("automatic_payment_methods[enabled]", true),
            field("automatic_payment_methods[allow_redirects]", "never"),
        ];
        if let Some(customer) = &params.customer_id {
            form.push(field("customer", customer));
        }

        self.post_form("payment_intents", &form, Some(&params.payment_id)).await
    }

    async fn confirm_payment_intent(&self, intent_id: &str) -> Result<ProcessorIntent, AppError> {
        self.post_form(&format!("payment_intents/{}/confirm", intent_id), &[], None)
            .await
    }

    async fn retrieve_payment_intent(&self, intent_id: &str) -> Result<ProcessorIntent, AppError> {
        let request = self.client.get(self.url(&format!("payment_intents/{}", intent_id)));
        self.send(request).await
    }

    async fn create_customer(&self, rider_id: &str, email: &str, name: &str) -> Result<String, AppError> {
        let form = vec![
            field("email", email),
            field("name", name),
            field("metadata[riderId]", rider_id),
        ];
        let idempotency_key = format!("customer-{}", rider_id);
        let customer: StripeCustomer = self
            .post_form("customers", &form, Some(&idempotency_key))
            .await?;
        Ok(customer.id)
    }

    async fn attach_payment_method(&self, customer_id: &str, payment_method_id: &str) -> Result<PaymentMethodSummary, AppError> {
        let form = vec![field("customer", customer_id)];
        let pm: StripePaymentMethod = self
            .post_form(&format!("payment_methods/{}/attach", payment_method_id), &form, None)
            .await?;
        Ok(pm.into())
    }

    async fn list_payment_methods(&self, customer_id: &str) -> Result<Vec<PaymentMethodSummary>, AppError> {
        let request = self
            .client
            .get(self.url(&format!("customers/{}/payment_methods", customer_id)))
            .query(&[("type", "card")]);
        let list: StripeList<StripePaymentMethod> = self.send(request).await?;
        Ok(list.data.into_iter().map(PaymentMethodSummary::from).collect())
    }

    async fn detach_payment_method(&self, payment_method_id: &str) -> Result<(), AppError> {
        let _: StripePaymentMethod = self
            .post_form(&format!("payment_methods/{}/detach", payment_method_id), &[], None)
            .await?;
        Ok(())
    }
}

// ------------------------------
// Mock processor for development and testing
// ------------------------------

#[derive(Debug)]
pub struct MockPaymentProcessor {
    fail: AtomicBool,
    intent_status: Mutex<String>,
    methods: Mutex<HashMap<String, Vec<PaymentMethodSummary>>>,
}

impl Default for MockPaymentProcessor {
    fn default() -> Self {
        Self {
            fail: AtomicBool::new(false),
            intent_status: Mutex::new("succeeded".to_string()),
            methods: Mutex::new(HashMap::new()),
        }
    }
}

impl MockPaymentProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every later call fails as an unreachable processor would.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Status reported by intent creation and confirmation.
    pub fn set_intent_status(&self, status: &str) {
        if let Ok(mut current) = self.intent_status.lock() {
            *current = status.to_string();
        }
    }

    fn check(&self) -> Result<(), AppError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::ProcessorRequest("mock processor unavailable".to_string()));
        }
        Ok(())
    }

    fn intent(&self, id: String) -> ProcessorIntent {
        let status = self
            .intent_status
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|_| "succeeded".to_string());
        ProcessorIntent {
            client_secret: Some(format!("{}_secret_{}", id, nanoid!(12))),
            id,
            status,
        }
    }

    fn lock_methods(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<PaymentMethodSummary>>>, AppError> {
        self.methods
            .lock()
            .map_err(|_| AppError::internal_error("mock processor state poisoned"))
    }
}

#[async_trait]
impl PaymentProcessor for MockPaymentProcessor {
    async fn create_checkout_session(&self, request: &CheckoutSessionRequest) -> Result<ProcessorSession, AppError> {
        self.check()?;
        let id = format!("cs_test_{}", nanoid!(24));
        tracing::info!("[MOCK] Checkout session {} for payment {}", id, request.payment_id);
        Ok(ProcessorSession {
            url: format!("https://checkout.stripe.test/pay/{}", id),
            expires_at: Some(request.expires_at),
            id,
        })
    }

    async fn create_payment_intent(&self, params: &PaymentIntentParams) -> Result<ProcessorIntent, AppError> {
        self.check()?;
        tracing::info!("[MOCK] Payment intent for payment {}", params.payment_id);
        Ok(self.intent(format!("pi_test_{}", nanoid!(24))))
    }

    async fn confirm_payment_intent(&self, intent_id: &str) -> Result<ProcessorIntent, AppError> {
        self.check()?;
        Ok(self.intent(intent_id.to_string()))
    }

    async fn retrieve_payment_intent(&self, intent_id: &str) -> Result<ProcessorIntent, AppError> {
        self.check()?;
        Ok(self.intent(intent_id.to_string()))
    }

    async fn create_customer(&self, rider_id: &str, _email: &str, _name: &str) -> Result<String, AppError> {
        self.check()?;
        tracing::info!("[MOCK] Customer for rider {}", rider_id);
        Ok(format!("cus_test_{}", nanoid!(14)))
    }

    async fn attach_payment_method(&self, customer_id: &str, payment_method_id: &str) -> Result<PaymentMethodSummary, AppError> {
        self.check()?;
        let summary = PaymentMethodSummary {
            id: payment_method_id.to_string(),
            brand: Some("visa".to_string()),
            last4: Some("4242".to_string()),
            exp_month: Some(12),
            exp_year: Some(2030),
        };
        self.lock_methods()?
            .entry(customer_id.to_string())
            .or_default()
            .push(summary.clone());
        Ok(summary)
    }

    async fn list_payment_methods(&self, customer_id: &str) -> Result<Vec<PaymentMethodSummary>, AppError> {
        self.check()?;
        Ok(self.lock_methods()?.get(customer_id).cloned().unwrap_or_default())
    }

    async fn detach_payment_method(&self, payment_method_id: &str) -> Result<(), AppError> {
        self.check()?;
        for methods in self.lock_methods()?.values_mut() {
            methods.retain(|m| m.id != payment_method_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_parsing() {
        let body = serde_json::json!({
            "id": "evt_123",
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": "cs_test_1",
                "payment_intent": "pi_1",
                "metadata": { "paymentId": "pay-251019-a1b2c3d4" }
            }}
        });
        let event: ProcessorEvent = serde_json::from_value(body).unwrap();
        assert_eq!(event.event_type, "checkout.session.completed");
        assert_eq!(event.object_str("payment_intent"), Some("pi_1"));
        assert_eq!(event.metadata("paymentId"), Some("pay-251019-a1b2c3d4"));
        assert_eq!(event.metadata("tripId"), None);
    }

    #[tokio::test]
    async fn test_mock_payment_methods() {
        let processor = MockPaymentProcessor::new();
        processor.attach_payment_method("cus_1", "pm_1").await.unwrap();
        processor.attach_payment_method("cus_1", "pm_2").await.unwrap();
        processor.detach_payment_method("pm_1").await.unwrap();

        let methods = processor.list_payment_methods("cus_1").await.unwrap();
        assert_eq!(methods.len(), 1);
        assert_eq!(methods[0].id, "pm_2");
    }

    #[tokio::test]
    async fn test_mock_failure_is_upstream_error() {
        let processor = MockPaymentProcessor::new();
        processor.set_failing(true);
        let err = processor.confirm_payment_intent("pi_1").await.unwrap_err();
        assert_eq!(err.kind(), "upstream_error");
    }

    #[test]
    fn test_intent_status_helpers() {
        let intent = ProcessorIntent { id: "pi_1".into(), status: "succeeded".into(), client_secret: None };
        assert!(intent.is_succeeded());
        let declined = ProcessorIntent { status: "requires_payment_method".into(), ..intent };
        assert!(declined.is_failed());
    }
}
