//! In-memory adapters for testing and local development.

pub mod store;

pub use store::InMemoryEntitlementStore;
