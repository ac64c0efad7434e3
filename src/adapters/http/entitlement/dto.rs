//! HTTP DTOs (Data Transfer Objects) for entitlement endpoints.
//!
//! These types define the JSON request/response structure for the
//! entitlement API. They serve as the boundary between HTTP and the
//! application layer. Amounts never appear in requests; the plan catalog
//! owns them.

use serde::{Deserialize, Serialize};

use crate::domain::entitlement::{Entitlement, EntitlementKind, EntitlementStatus};

// ════════════════════════════════════════════════════════════════════════════════
// Request DTOs
// ════════════════════════════════════════════════════════════════════════════════

/// Request to create a payment order for a plan.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrderRequest {
    /// Catalog plan id (e.g. "premium-monthly").
    pub plan_id: String,
}

/// Request to verify a completed checkout.
#[derive(Debug, Clone, Deserialize)]
pub struct VerifyPaymentRequest {
    /// Gateway order id returned at order creation.
    pub order_id: String,
    /// Gateway payment id from the checkout result.
    pub payment_reference: String,
    /// Hex HMAC signature over `orderId|paymentReference`.
    pub signature: String,
}

/// Request to cancel an entitlement.
#[derive(Debug, Clone, Deserialize)]
pub struct CancelRequest {
    /// Which entitlement kind to cancel.
    #[serde(default = "default_kind")]
    pub kind: EntitlementKind,
}

/// Query parameters for the status endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusQuery {
    #[serde(default = "default_kind")]
    pub kind: EntitlementKind,
}

fn default_kind() -> EntitlementKind {
    EntitlementKind::Subscription
}

// ════════════════════════════════════════════════════════════════════════════════
// Response DTOs
// ════════════════════════════════════════════════════════════════════════════════

/// Response for a created payment order - everything the checkout SDK needs.
#[derive(Debug, Clone, Serialize)]
pub struct CreateOrderResponse {
    pub order_id: String,
    /// Amount in major units (e.g. rupees), for display.
    pub amount: i64,
    /// Amount in minor units (e.g. paise), what the gateway charges.
    pub amount_minor_units: i64,
    pub currency: String,
    /// Public merchant key id.
    pub key_id: String,
}

/// Entitlement view for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct EntitlementView {
    pub id: String,
    pub kind: EntitlementKind,
    pub plan_id: String,
    pub status: EntitlementStatus,
    /// Window start (ISO 8601).
    pub start_date: String,
    /// Window end, exclusive (ISO 8601).
    pub end_date: String,
    /// False once the user has cancelled.
    pub auto_renew: bool,
}

impl From<Entitlement> for EntitlementView {
    fn from(e: Entitlement) -> Self {
        Self {
            id: e.id.to_string(),
            kind: e.kind,
            plan_id: e.plan_id.as_str().to_string(),
            status: e.status,
            start_date: e.start_date.to_string(),
            end_date: e.end_date.to_string(),
            auto_renew: e.auto_renew,
        }
    }
}

/// Response for a verified payment.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyPaymentResponse {
    pub entitlement: EntitlementView,
    /// True when the payment extended an existing window.
    pub is_renewal: bool,
}

/// Response for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub entitled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entitlement: Option<EntitlementView>,
}

/// Response for a cancelled entitlement.
#[derive(Debug, Clone, Serialize)]
pub struct CancelResponse {
    pub entitlement: EntitlementView,
    /// Access continues until this instant (ISO 8601).
    pub access_until: String,
}

/// Standard error response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub error_code: String,
    /// Human-readable error message.
    pub message: String,
    /// Whether retrying the same request may succeed.
    pub retryable: bool,
}

impl ErrorResponse {
    /// Create a new error response.
    pub fn new(error_code: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            error_code: error_code.into(),
            message: message.into(),
            retryable,
        }
    }
}
