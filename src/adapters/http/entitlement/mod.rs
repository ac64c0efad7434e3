//! HTTP surface for the entitlement endpoints.

pub mod dto;
pub mod handlers;
pub mod routes;

pub use handlers::{AuthenticatedUser, EntitlementAppState};
pub use routes::entitlement_router;
