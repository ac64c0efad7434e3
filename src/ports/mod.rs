//! Ports - interfaces between the application core and the outside world.
//!
//! Handlers depend on these traits; adapters implement them. The store
//! port owns transactional persistence, the gateway port owns order
//! creation at the payment provider.

pub mod gateway;
pub mod store;

pub use gateway::{CreateOrderRequest, GatewayError, GatewayOrder, PaymentGateway};
pub use store::{EntitlementStore, Settlement, StoreError};
