//! CreateOrderHandler - mints a gateway order and records a pending intent.

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::entitlement::{
    plan_catalog, AuditEvent, AuditPayload, Currency, EntitlementError, PaymentIntent,
};
use crate::domain::foundation::{Timestamp, UserId};
use crate::ports::{CreateOrderRequest, EntitlementStore, GatewayError, PaymentGateway};

/// The gateway caps receipts at 40 characters.
const MAX_RECEIPT_LEN: usize = 40;

/// Command to create a payment order for a plan.
#[derive(Debug, Clone)]
pub struct CreateOrderCommand {
    /// Authenticated user creating the order.
    pub user_id: UserId,
    /// Plan id from the catalog.
    pub plan_id: String,
}

/// Everything the mobile client needs to open the checkout.
#[derive(Debug, Clone)]
pub struct CreateOrderResult {
    pub order_id: String,
    pub amount_minor_units: i64,
    pub currency: Currency,
    /// Public merchant key id for the checkout SDK.
    pub key_id: String,
}

/// Handler for creating payment orders.
///
/// Amounts come from the server-side plan catalog only; a client never
/// supplies one. The pending intent and its creation audit event land in
/// one transaction after the gateway accepted the order.
pub struct CreateOrderHandler {
    store: Arc<dyn EntitlementStore>,
    gateway: Arc<dyn PaymentGateway>,
    /// Seconds a pending intent stays claimable.
    intent_ttl_secs: u64,
}

impl CreateOrderHandler {
    pub fn new(
        store: Arc<dyn EntitlementStore>,
        gateway: Arc<dyn PaymentGateway>,
        intent_ttl_secs: u64,
    ) -> Self {
        Self {
            store,
            gateway,
            intent_ttl_secs,
        }
    }

    pub async fn handle(
        &self,
        cmd: CreateOrderCommand,
    ) -> Result<CreateOrderResult, EntitlementError> {
        let plan = plan_catalog(&cmd.plan_id)
            .ok_or_else(|| EntitlementError::unknown_plan(cmd.plan_id.clone()))?;

        if plan.amount_minor_units <= 0 {
            return Err(EntitlementError::invalid_amount(
                plan.amount_minor_units,
                "amount must be positive",
            ));
        }

        let now = Timestamp::now();
        self.expire_stale_intents(&cmd.user_id, now).await;

        let receipt = build_receipt(&cmd.user_id, now);

        let mut notes = HashMap::new();
        notes.insert("user_id".to_string(), cmd.user_id.as_str().to_string());
        notes.insert("plan_id".to_string(), plan.id.as_str().to_string());

        let order = self
            .gateway
            .create_order(CreateOrderRequest {
                amount_minor_units: plan.amount_minor_units,
                currency: plan.currency,
                receipt: receipt.clone(),
                notes,
            })
            .await
            .map_err(|e| match e {
                GatewayError::Unavailable(reason) => {
                    EntitlementError::gateway_unavailable(reason)
                }
                GatewayError::InvalidAmount(reason) => {
                    EntitlementError::invalid_amount(plan.amount_minor_units, reason)
                }
                GatewayError::Rejected(reason) => EntitlementError::infrastructure(format!(
                    "gateway rejected order: {}",
                    reason
                )),
            })?;

        let intent = PaymentIntent::create(
            order.order_id,
            cmd.user_id.clone(),
            plan,
            receipt,
            now,
            self.intent_ttl_secs,
        );

        let audit = AuditEvent::record(
            cmd.user_id,
            AuditPayload::IntentCreated {
                order_id: intent.order_id.clone(),
                plan_id: intent.plan_id.clone(),
                amount_minor_units: intent.amount_minor_units,
                currency: intent.currency.as_str().to_string(),
            },
            now,
        );

        self.store
            .insert_intent(&intent, &audit)
            .await
            .map_err(|e| EntitlementError::infrastructure(e.to_string()))?;

        tracing::info!(
            order_id = %intent.order_id,
            plan_id = %intent.plan_id.as_str(),
            amount = intent.amount_minor_units,
            "payment order created"
        );

        Ok(CreateOrderResult {
            order_id: intent.order_id.as_str().to_string(),
            amount_minor_units: intent.amount_minor_units,
            currency: intent.currency,
            key_id: self.gateway.key_id().to_string(),
        })
    }

    /// Flips the user's lapsed PENDING intents from abandoned checkouts.
    ///
    /// Best effort: an expiry failure must not block a new purchase, the
    /// periodic sweep will catch anything missed here.
    async fn expire_stale_intents(&self, user_id: &UserId, now: Timestamp) {
        let stale = match self
            .store
            .find_stale_pending_intents(now, Some(user_id))
            .await
        {
            Ok(stale) => stale,
            Err(e) => {
                tracing::warn!(error = %e, "stale intent lookup failed");
                return;
            }
        };

        for intent in stale {
            let mut expired = intent.clone();
            if expired.expire().is_err() {
                continue;
            }
            let audit = AuditEvent::record(
                user_id.clone(),
                AuditPayload::IntentExpired {
                    order_id: intent.order_id.clone(),
                },
                now,
            );
            if let Err(e) = self.store.mark_intent_expired(&expired, &audit).await {
                tracing::warn!(
                    order_id = %intent.order_id,
                    error = %e,
                    "stale intent expiry failed"
                );
            }
        }
    }
}

/// Builds a per-call receipt string within the gateway's length cap.
fn build_receipt(user_id: &UserId, now: Timestamp) -> String {
    let user_part: String = user_id.as_str().chars().take(12).collect();
    let receipt = format!("rcpt_{}_{}", user_part, now.as_unix_secs());
    receipt.chars().take(MAX_RECEIPT_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryEntitlementStore;
    use crate::application::handlers::testing::MockGateway;
    use crate::domain::entitlement::IntentStatus;
    use crate::domain::foundation::OrderId;

    fn handler() -> (
        Arc<InMemoryEntitlementStore>,
        Arc<MockGateway>,
        CreateOrderHandler,
    ) {
        let store = Arc::new(InMemoryEntitlementStore::new());
        let gateway = Arc::new(MockGateway::new());
        let handler = CreateOrderHandler::new(store.clone(), gateway.clone(), 1_800);
        (store, gateway, handler)
    }

    fn cmd(plan_id: &str) -> CreateOrderCommand {
        CreateOrderCommand {
            user_id: UserId::new("user-1").unwrap(),
            plan_id: plan_id.to_string(),
        }
    }

    #[tokio::test]
    async fn creates_pending_intent_with_catalog_amount() {
        let (store, _, handler) = handler();

        let result = handler.handle(cmd("premium-monthly")).await.unwrap();

        assert_eq!(result.amount_minor_units, 29_900);
        assert_eq!(result.currency.as_str(), "INR");
        assert_eq!(result.key_id, "rzp_test_mock_key");

        let intent = store
            .find_intent(&OrderId::new(result.order_id).unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(intent.status, IntentStatus::Pending);
        assert_eq!(intent.amount_minor_units, 29_900);
        assert_eq!(store.audit_count("intent.created"), 1);
    }

    #[tokio::test]
    async fn unknown_plan_is_rejected_before_the_gateway() {
        let (store, gateway, handler) = handler();

        let result = handler.handle(cmd("gold-weekly")).await;

        assert!(matches!(result, Err(EntitlementError::UnknownPlan(_))));
        assert_eq!(gateway.orders_created(), 0);
        assert_eq!(store.audit_count("intent.created"), 0);
    }

    #[tokio::test]
    async fn gateway_outage_maps_to_retryable_error() {
        let (store, gateway, handler) = handler();
        gateway.fail_with(GatewayError::Unavailable("connect timeout".to_string()));

        let err = handler.handle(cmd("premium-monthly")).await.unwrap_err();

        assert!(matches!(err, EntitlementError::GatewayUnavailable { .. }));
        assert!(err.is_retryable());
        assert_eq!(store.audit_count("intent.created"), 0);
    }

    #[tokio::test]
    async fn gateway_amount_rejection_maps_to_invalid_amount() {
        let (_, gateway, handler) = handler();
        gateway.fail_with(GatewayError::InvalidAmount("below minimum".to_string()));

        let err = handler.handle(cmd("premium-monthly")).await.unwrap_err();

        assert_eq!(err.code(), "INVALID_AMOUNT");
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn stale_pending_intents_are_expired_before_minting() {
        let (store, _, handler) = handler();
        let plan = plan_catalog("premium-monthly").unwrap();
        let old_intent = PaymentIntent::create(
            OrderId::new("order_abandoned").unwrap(),
            UserId::new("user-1").unwrap(),
            plan,
            "rcpt_user-1_1".to_string(),
            Timestamp::now().minus_days(2),
            1_800,
        );
        let audit = AuditEvent::record(
            old_intent.user_id.clone(),
            AuditPayload::IntentCreated {
                order_id: old_intent.order_id.clone(),
                plan_id: old_intent.plan_id.clone(),
                amount_minor_units: old_intent.amount_minor_units,
                currency: old_intent.currency.as_str().to_string(),
            },
            old_intent.created_at,
        );
        store.insert_intent(&old_intent, &audit).await.unwrap();

        handler.handle(cmd("premium-monthly")).await.unwrap();

        let abandoned = store
            .find_intent(&OrderId::new("order_abandoned").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(abandoned.status, IntentStatus::Expired);
        assert_eq!(store.audit_count("intent.expired"), 1);
    }

    #[tokio::test]
    async fn store_failure_surfaces_as_infrastructure() {
        let (store, _, handler) = handler();
        store.set_fail_writes(true);

        let err = handler.handle(cmd("premium-monthly")).await.unwrap_err();
        assert!(matches!(err, EntitlementError::Infrastructure(_)));
    }

    #[tokio::test]
    async fn receipt_respects_gateway_length_cap() {
        let user = UserId::new("user-with-a-really-long-external-identifier").unwrap();
        let receipt = build_receipt(&user, Timestamp::from_unix_secs(1_700_000_000));
        assert!(receipt.len() <= MAX_RECEIPT_LEN);
        assert!(receipt.starts_with("rcpt_user-with-a-"));
    }
}
