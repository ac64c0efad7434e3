//! Axum router configuration for entitlement endpoints.

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::{
    cancel_entitlement, create_order, get_status, verify_payment, EntitlementAppState,
};

/// Create the entitlement API router.
///
/// # Routes (all require authentication)
///
/// - `POST /orders` - Create a payment order for a plan
/// - `POST /verify` - Verify a completed checkout
/// - `GET /status` - Check the current entitlement
/// - `POST /cancel` - Cancel an entitlement
pub fn entitlement_routes() -> Router<EntitlementAppState> {
    Router::new()
        .route("/orders", post(create_order))
        .route("/verify", post(verify_payment))
        .route("/status", get(get_status))
        .route("/cancel", post(cancel_entitlement))
}

/// Create the complete entitlement module router, suitable for mounting
/// at `/api`.
pub fn entitlement_router() -> Router<EntitlementAppState> {
    Router::new().nest("/entitlement", entitlement_routes())
}
