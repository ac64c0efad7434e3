//! Entitlement domain module.
//!
//! Handles the payment-gated entitlement lifecycle: order intents,
//! signature verification, subscription/unlock state, and the audit trail.
//!
//! # Module Structure
//!
//! - `plan` - Plan catalog, billing periods, entitlement kinds
//! - `intent` - PaymentIntent aggregate and its state machine
//! - `entitlement` - Entitlement aggregate and its state machine
//! - `signature` - Gateway payment signature verification (HMAC-SHA256)
//! - `audit` - Append-only audit events for state transitions
//! - `errors` - EntitlementError taxonomy

mod audit;
mod entitlement;
mod errors;
mod intent;
mod plan;
mod signature;

pub use audit::{AuditEvent, AuditPayload};
pub use entitlement::{Entitlement, EntitlementStatus};
pub use errors::EntitlementError;
pub use intent::{IntentStatus, PaymentIntent};
pub use plan::{
    plan_catalog, Currency, EntitlementKind, Plan, PlanId, PlanPeriod, SUPPORTED_CURRENCIES,
};
pub use signature::{compute_payment_signature, PaymentSignatureVerifier};
