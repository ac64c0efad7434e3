//! Domain layer containing business logic and domain types.
//!
//! # Module Organization
//!
//! - `foundation` - Shared domain primitives (value objects, IDs, errors)
//! - `entitlement` - Payment intents, entitlements, plans, signature
//!   verification, and the audit trail

pub mod entitlement;
pub mod foundation;
