//! Entitlement-specific error types.
//!
//! Errors for order creation, payment verification, and entitlement
//! lifecycle operations.
//!
//! # HTTP Status Mapping
//!
//! | Error | HTTP Status |
//! |-------|-------------|
//! | InvalidAmount | 400 |
//! | UnknownPlan | 400 |
//! | InvalidSignature | 400 |
//! | DuplicatePayment | 400 |
//! | ValidationFailed | 400 |
//! | IntentNotFound | 404 |
//! | EntitlementNotFound | 404 |
//! | InvalidState | 409 |
//! | PersistenceConflict | 409 |
//! | GatewayUnavailable | 503 |
//! | Infrastructure | 500 |

use crate::domain::foundation::{OrderId, UserId, ValidationError};

/// Entitlement-specific errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntitlementError {
    /// Order amount rejected before reaching the gateway.
    InvalidAmount { amount_minor_units: i64, reason: String },

    /// No plan with the requested id exists.
    UnknownPlan(String),

    /// The gateway could not be reached or answered with a server error.
    /// The client may retry.
    GatewayUnavailable { reason: String },

    /// No pending intent matches the order id for this user.
    IntentNotFound(OrderId),

    /// Signature verification failed.
    InvalidSignature(OrderId),

    /// The payment reference was already consumed by another intent.
    DuplicatePayment(String),

    /// No entitlement exists for this user and kind.
    EntitlementNotFound(UserId),

    /// Concurrent writes kept winning; all retries were used up.
    PersistenceConflict,

    /// Invalid state for the requested operation.
    InvalidState { current: String, attempted: String },

    /// Validation failed.
    ValidationFailed { field: String, message: String },

    /// Infrastructure error.
    Infrastructure(String),
}

impl EntitlementError {
    pub fn invalid_amount(amount_minor_units: i64, reason: impl Into<String>) -> Self {
        EntitlementError::InvalidAmount {
            amount_minor_units,
            reason: reason.into(),
        }
    }

    pub fn unknown_plan(plan_id: impl Into<String>) -> Self {
        EntitlementError::UnknownPlan(plan_id.into())
    }

    pub fn gateway_unavailable(reason: impl Into<String>) -> Self {
        EntitlementError::GatewayUnavailable {
            reason: reason.into(),
        }
    }

    pub fn intent_not_found(order_id: OrderId) -> Self {
        EntitlementError::IntentNotFound(order_id)
    }

    pub fn invalid_signature(order_id: OrderId) -> Self {
        EntitlementError::InvalidSignature(order_id)
    }

    pub fn duplicate_payment(reference: impl Into<String>) -> Self {
        EntitlementError::DuplicatePayment(reference.into())
    }

    pub fn entitlement_not_found(user_id: UserId) -> Self {
        EntitlementError::EntitlementNotFound(user_id)
    }

    pub fn invalid_state(current: impl Into<String>, attempted: impl Into<String>) -> Self {
        EntitlementError::InvalidState {
            current: current.into(),
            attempted: attempted.into(),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        EntitlementError::ValidationFailed {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn infrastructure(message: impl Into<String>) -> Self {
        EntitlementError::Infrastructure(message.into())
    }

    /// Returns the stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            EntitlementError::InvalidAmount { .. } => "INVALID_AMOUNT",
            EntitlementError::UnknownPlan(_) => "UNKNOWN_PLAN",
            EntitlementError::GatewayUnavailable { .. } => "GATEWAY_UNAVAILABLE",
            EntitlementError::IntentNotFound(_) => "INTENT_NOT_FOUND",
            EntitlementError::InvalidSignature(_) => "INVALID_SIGNATURE",
            EntitlementError::DuplicatePayment(_) => "DUPLICATE_PAYMENT",
            EntitlementError::EntitlementNotFound(_) => "ENTITLEMENT_NOT_FOUND",
            EntitlementError::PersistenceConflict => "PERSISTENCE_CONFLICT",
            EntitlementError::InvalidState { .. } => "INVALID_STATE",
            EntitlementError::ValidationFailed { .. } => "VALIDATION_ERROR",
            EntitlementError::Infrastructure(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns a user-friendly error message.
    pub fn message(&self) -> String {
        match self {
            EntitlementError::InvalidAmount {
                amount_minor_units,
                reason,
            } => format!("Invalid amount {}: {}", amount_minor_units, reason),
            EntitlementError::UnknownPlan(plan_id) => format!("Unknown plan: {}", plan_id),
            EntitlementError::GatewayUnavailable { reason } => {
                format!("Payment gateway unavailable: {}", reason)
            }
            EntitlementError::IntentNotFound(order_id) => {
                format!("No pending payment found for order {}", order_id)
            }
            EntitlementError::InvalidSignature(order_id) => {
                format!("Payment signature verification failed for order {}", order_id)
            }
            EntitlementError::DuplicatePayment(reference) => {
                format!("Payment {} was already used", reference)
            }
            EntitlementError::EntitlementNotFound(user_id) => {
                format!("No entitlement found for user {}", user_id)
            }
            EntitlementError::PersistenceConflict => {
                "The record was modified concurrently, please retry".to_string()
            }
            EntitlementError::InvalidState { current, attempted } => {
                format!("Cannot {} in {} state", attempted, current)
            }
            EntitlementError::ValidationFailed { field, message } => {
                format!("Validation failed for '{}': {}", field, message)
            }
            EntitlementError::Infrastructure(msg) => format!("Error: {}", msg),
        }
    }

    /// Returns true if the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EntitlementError::GatewayUnavailable { .. }
                | EntitlementError::PersistenceConflict
                | EntitlementError::Infrastructure(_)
        )
    }
}

impl std::fmt::Display for EntitlementError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for EntitlementError {}

impl From<ValidationError> for EntitlementError {
    fn from(err: ValidationError) -> Self {
        EntitlementError::ValidationFailed {
            field: err.field().to_string(),
            message: err.to_string(),
        }
    }
}
