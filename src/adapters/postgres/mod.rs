//! PostgreSQL adapters.

pub mod store;

pub use store::PostgresEntitlementStore;
