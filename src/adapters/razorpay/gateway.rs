//! Razorpay payment gateway adapter.
//!
//! Implements the `PaymentGateway` trait against the Razorpay Orders API.
//! Only order creation talks to Razorpay; payment confirmation is proven
//! by the HMAC signature the client carries back, so verification never
//! makes a network call.
//!
//! # Security
//!
//! - Key secret handled via `secrecy::SecretString`, never logged
//! - Basic auth over HTTPS with the merchant key pair

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::foundation::OrderId;
use crate::ports::{CreateOrderRequest, GatewayError, GatewayOrder, PaymentGateway};

/// Request timeout for gateway calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Razorpay API configuration.
#[derive(Clone)]
pub struct RazorpayConfig {
    /// Public merchant key id (rzp_live_... or rzp_test_...). Safe to
    /// hand to clients; they need it to open the checkout.
    key_id: String,

    /// Merchant key secret, used for signing and API auth.
    key_secret: SecretString,

    /// Base URL for the Razorpay API.
    api_base_url: String,
}

impl RazorpayConfig {
    /// Create a new Razorpay configuration.
    pub fn new(key_id: impl Into<String>, key_secret: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            key_secret: SecretString::new(key_secret.into()),
            api_base_url: "https://api.razorpay.com".to_string(),
        }
    }

    /// Set a custom API base URL (for testing).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    /// Public merchant key id.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Merchant key secret, for constructing the signature verifier.
    pub fn key_secret(&self) -> SecretString {
        self.key_secret.clone()
    }
}

/// Razorpay gateway adapter.
pub struct RazorpayGateway {
    config: RazorpayConfig,
    http_client: reqwest::Client,
}

impl RazorpayGateway {
    /// Create a new Razorpay adapter with the given configuration.
    pub fn new(config: RazorpayConfig) -> Result<Self, GatewayError> {
        let http_client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;
        Ok(Self {
            config,
            http_client,
        })
    }
}

#[derive(Debug, Serialize)]
struct OrderBody<'a> {
    amount: i64,
    currency: &'a str,
    receipt: &'a str,
    notes: &'a std::collections::HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    amount: i64,
    currency: String,
    receipt: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: Option<String>,
    description: Option<String>,
    field: Option<String>,
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    async fn create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<GatewayOrder, GatewayError> {
        let url = format!("{}/v1/orders", self.config.api_base_url);

        let body = OrderBody {
            amount: request.amount_minor_units,
            currency: request.currency.as_str(),
            receipt: &request.receipt,
            notes: &request.notes,
        };

        let response = self
            .http_client
            .post(&url)
            .basic_auth(
                &self.config.key_id,
                Some(self.config.key_secret.expose_secret()),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!(
                status = status.as_u16(),
                error = %error_text,
                "Razorpay create_order failed"
            );

            if status.is_server_error() {
                return Err(GatewayError::Unavailable(format!(
                    "gateway returned {}",
                    status
                )));
            }

            let description = serde_json::from_str::<ApiErrorResponse>(&error_text)
                .ok()
                .map(|e| {
                    let field = e.error.field.unwrap_or_default();
                    let code = e.error.code.unwrap_or_default();
                    let description = e.error.description.unwrap_or_default();
                    if field == "amount" || description.to_lowercase().contains("amount") {
                        return (true, description);
                    }
                    (false, format!("{}: {}", code, description))
                });

            return match description {
                Some((true, description)) => Err(GatewayError::InvalidAmount(description)),
                Some((false, description)) => Err(GatewayError::Rejected(description)),
                None => Err(GatewayError::Rejected(format!(
                    "gateway returned {}",
                    status
                ))),
            };
        }

        let order: OrderResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Rejected(format!("unparseable gateway response: {}", e)))?;

        let order_id = OrderId::new(order.id)
            .map_err(|e| GatewayError::Rejected(format!("bad order id from gateway: {}", e)))?;
        let currency = crate::domain::entitlement::Currency::parse(&order.currency)
            .map_err(|e| GatewayError::Rejected(format!("bad currency from gateway: {}", e)))?;

        tracing::debug!(order_id = %order_id, amount = order.amount, "gateway order created");

        Ok(GatewayOrder {
            order_id,
            amount_minor_units: order.amount,
            currency,
            receipt: order.receipt.unwrap_or(request.receipt),
        })
    }

    fn key_id(&self) -> &str {
        &self.config.key_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_exposes_public_key_id_only() {
        let config = RazorpayConfig::new("rzp_test_abc123", "super_secret");
        assert_eq!(config.key_id(), "rzp_test_abc123");
        // Secret stays wrapped; Debug/Display never print it.
        let secret = config.key_secret();
        assert_eq!(secret.expose_secret(), "super_secret");
    }

    #[test]
    fn error_body_classifies_amount_errors() {
        let body = r#"{"error":{"code":"BAD_REQUEST_ERROR","description":"amount must be at least INR 1.00","field":"amount"}}"#;
        let parsed: ApiErrorResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.error.field.as_deref(), Some("amount"));
    }

    #[test]
    fn order_response_parses_gateway_shape() {
        let body = r#"{"id":"order_MkQ1","entity":"order","amount":29900,"currency":"INR","receipt":"rcpt_user-1_1700000000","status":"created"}"#;
        let parsed: OrderResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.id, "order_MkQ1");
        assert_eq!(parsed.amount, 29_900);
        assert_eq!(parsed.receipt.as_deref(), Some("rcpt_user-1_1700000000"));
    }
}
