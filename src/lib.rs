//! Utsav Entitlements - Payment-gated entitlement service.
//!
//! Verifies payment-gateway callbacks, converts them into subscription and
//! profile-unlock entitlement state, and keeps that state consistent with
//! wall-clock expiry.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
