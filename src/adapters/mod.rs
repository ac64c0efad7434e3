//! Adapters - concrete implementations of the ports.
//!
//! - `http`: axum REST surface
//! - `memory`: in-memory store for tests and local development
//! - `postgres`: production store backed by sqlx
//! - `razorpay`: payment gateway client

pub mod http;
pub mod memory;
pub mod postgres;
pub mod razorpay;
