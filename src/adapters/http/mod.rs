//! HTTP adapter - axum REST surface.

pub mod entitlement;
