//! Command handlers for the entitlement flows.
//!
//! Each handler owns one use case and depends only on the ports. The
//! handlers build the audit events for every state change and hand them
//! to the store so they persist in the same transaction.

mod cancel_entitlement;
mod check_entitlement;
mod create_order;
mod sweep_expiry;
mod verify_payment;

pub use cancel_entitlement::{CancelEntitlementCommand, CancelEntitlementHandler};
pub use check_entitlement::{CheckEntitlementCommand, CheckEntitlementHandler, EntitlementStatusView};
pub use create_order::{CreateOrderCommand, CreateOrderHandler, CreateOrderResult};
pub use sweep_expiry::{SweepExpiryHandler, SweepReport};
pub use verify_payment::{VerifyPaymentCommand, VerifyPaymentHandler, VerifyPaymentResult};

#[cfg(test)]
pub(crate) mod testing {
    //! Shared mocks for handler tests.

    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::domain::foundation::OrderId;
    use crate::ports::{CreateOrderRequest, GatewayError, GatewayOrder, PaymentGateway};

    /// Gateway mock that mints sequential order ids, with optional
    /// injected failure.
    pub struct MockGateway {
        counter: AtomicU64,
        fail_with: Mutex<Option<GatewayError>>,
    }

    impl MockGateway {
        pub fn new() -> Self {
            Self {
                counter: AtomicU64::new(0),
                fail_with: Mutex::new(None),
            }
        }

        pub fn fail_with(&self, error: GatewayError) {
            *self.fail_with.lock().expect("MockGateway lock poisoned") = Some(error);
        }

        pub fn orders_created(&self) -> u64 {
            self.counter.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PaymentGateway for MockGateway {
        async fn create_order(
            &self,
            request: CreateOrderRequest,
        ) -> Result<GatewayOrder, GatewayError> {
            if let Some(error) = self
                .fail_with
                .lock()
                .expect("MockGateway lock poisoned")
                .clone()
            {
                return Err(error);
            }
            let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(GatewayOrder {
                order_id: OrderId::new(format!("order_mock_{}", n))
                    .expect("mock order id is non-empty"),
                amount_minor_units: request.amount_minor_units,
                currency: request.currency,
                receipt: request.receipt,
            })
        }

        fn key_id(&self) -> &str {
            "rzp_test_mock_key"
        }
    }
}
