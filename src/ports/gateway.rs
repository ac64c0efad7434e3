//! Payment gateway port for external order creation.
//!
//! Defines the contract for the payment provider integration. The flow is
//! client-confirmed: the backend mints an order here, the mobile client
//! collects payment against it out of band, and the client then presents
//! the gateway's payment reference and signature back to us for
//! verification. The gateway is never called during verification.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::entitlement::Currency;
use crate::domain::foundation::OrderId;

/// Port for the payment gateway integration.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates an order at the gateway for the client to pay against.
    async fn create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<GatewayOrder, GatewayError>;

    /// Public merchant key id the client needs to open the checkout.
    fn key_id(&self) -> &str;
}

/// Request to create a gateway order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    /// Amount in the currency's minor units.
    pub amount_minor_units: i64,

    /// Order currency.
    pub currency: Currency,

    /// Merchant receipt string, unique per call, at most 40 characters.
    pub receipt: String,

    /// Opaque key/value metadata echoed back by the gateway.
    pub notes: HashMap<String, String>,
}

/// Order minted at the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayOrder {
    /// Gateway-issued order id.
    pub order_id: OrderId,

    /// Amount the gateway registered, in minor units.
    pub amount_minor_units: i64,

    /// Order currency as the gateway echoed it.
    pub currency: Currency,

    /// Receipt string the gateway echoed.
    pub receipt: String,
}

/// Errors from the payment gateway.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Could not reach the gateway, or it answered with a server error.
    /// The caller may retry.
    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    /// The gateway rejected the amount.
    #[error("gateway rejected amount: {0}")]
    InvalidAmount(String),

    /// The gateway rejected the request for another reason.
    #[error("gateway rejected request: {0}")]
    Rejected(String),
}

impl GatewayError {
    /// True if the same request may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Unavailable(_))
    }
}
