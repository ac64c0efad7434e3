//! Razorpay payment gateway adapter.

pub mod gateway;

pub use gateway::{RazorpayConfig, RazorpayGateway};
