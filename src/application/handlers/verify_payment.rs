//! VerifyPaymentHandler - turns a client-confirmed payment into entitlement state.
//!
//! The client returns from checkout holding the gateway's payment
//! reference and an HMAC signature over `orderId|paymentReference`. This
//! handler verifies the signature, then atomically settles: the intent
//! flips VERIFIED, the entitlement is created or extended, and the audit
//! events land in the same transaction.
//!
//! Replays of an already verified order return the settled state without
//! side effects. Concurrent settles of the same user are serialized by
//! optimistic version checks with a bounded retry loop.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::entitlement::{
    plan_catalog, AuditEvent, AuditPayload, Entitlement, EntitlementError, IntentStatus,
    PaymentIntent, PaymentSignatureVerifier, Plan,
};
use crate::domain::foundation::{OrderId, PaymentReference, Timestamp, UserId};
use crate::ports::{EntitlementStore, Settlement, StoreError};

/// Attempts before a lost optimistic race surfaces as PersistenceConflict.
const MAX_SETTLE_ATTEMPTS: u32 = 3;

/// Base backoff between settle attempts.
const SETTLE_BACKOFF: Duration = Duration::from_millis(25);

/// Command to verify a completed checkout.
#[derive(Debug, Clone)]
pub struct VerifyPaymentCommand {
    /// Authenticated user presenting the payment.
    pub user_id: UserId,
    /// Gateway order id from checkout.
    pub order_id: String,
    /// Gateway payment id from checkout.
    pub payment_reference: String,
    /// Hex HMAC signature over `orderId|paymentReference`.
    pub signature: String,
}

/// Result of a successful (or idempotently replayed) verification.
#[derive(Debug, Clone)]
pub struct VerifyPaymentResult {
    pub entitlement: Entitlement,
    /// True when the payment extended an existing window rather than
    /// opening a new one.
    pub is_renewal: bool,
}

/// Handler for payment verification.
pub struct VerifyPaymentHandler {
    store: Arc<dyn EntitlementStore>,
    verifier: Arc<PaymentSignatureVerifier>,
}

impl VerifyPaymentHandler {
    pub fn new(store: Arc<dyn EntitlementStore>, verifier: Arc<PaymentSignatureVerifier>) -> Self {
        Self { store, verifier }
    }

    pub async fn handle(
        &self,
        cmd: VerifyPaymentCommand,
    ) -> Result<VerifyPaymentResult, EntitlementError> {
        let order_id = OrderId::new(cmd.order_id)?;
        let reference = PaymentReference::new(cmd.payment_reference)?;
        let now = Timestamp::now();

        let intent = self
            .store
            .find_intent(&order_id)
            .await
            .map_err(store_error)?
            .filter(|i| i.user_id == cmd.user_id)
            .ok_or_else(|| EntitlementError::intent_not_found(order_id.clone()))?;

        match intent.status {
            IntentStatus::Pending => {}
            IntentStatus::Verified => return self.replay(&intent, &reference).await,
            IntentStatus::Failed => {
                return Err(EntitlementError::invalid_state("failed", "verify"));
            }
            IntentStatus::Expired => {
                return Err(EntitlementError::intent_not_found(order_id));
            }
        }

        if intent.is_stale(now) {
            self.expire_intent(&intent, now).await?;
            return Err(EntitlementError::intent_not_found(order_id));
        }

        // Fast reject before touching crypto: a reference consumed by any
        // other order can never settle again.
        if self
            .store
            .reference_in_use(reference.as_str())
            .await
            .map_err(store_error)?
        {
            return Err(EntitlementError::duplicate_payment(
                reference.as_str().to_string(),
            ));
        }

        if !self.verifier.verify(&order_id, &reference, &cmd.signature) {
            self.record_signature_failure(&intent, cmd.signature, now)
                .await?;
            return Err(EntitlementError::invalid_signature(order_id));
        }

        let plan = plan_catalog(intent.plan_id.as_str())
            .ok_or_else(|| EntitlementError::unknown_plan(intent.plan_id.as_str()))?;

        let mut verified = intent.clone();
        verified.verify(reference.clone(), cmd.signature, now)?;

        self.settle(verified, plan, now).await
    }

    /// Settles a verified payment, retrying lost optimistic races.
    async fn settle(
        &self,
        verified: PaymentIntent,
        plan: &Plan,
        now: Timestamp,
    ) -> Result<VerifyPaymentResult, EntitlementError> {
        let reference = verified
            .payment_reference
            .clone()
            .ok_or_else(|| EntitlementError::infrastructure("settling intent has no reference"))?;

        for attempt in 1..=MAX_SETTLE_ATTEMPTS {
            let active = self
                .store
                .find_active_entitlement(&verified.user_id, verified.kind)
                .await
                .map_err(store_error)?;

            let (settlement, is_renewal) = build_settlement(&verified, plan, active, now)?;

            match self.store.settle_payment(&settlement).await {
                Ok(()) => {
                    tracing::info!(
                        order_id = %verified.order_id,
                        entitlement_id = %settlement.entitlement.id,
                        is_renewal,
                        "payment verified and settled"
                    );
                    return Ok(VerifyPaymentResult {
                        entitlement: settlement.entitlement,
                        is_renewal,
                    });
                }
                Err(StoreError::DuplicateReference) => {
                    return Err(EntitlementError::duplicate_payment(
                        reference.as_str().to_string(),
                    ));
                }
                Err(StoreError::VersionConflict) => {
                    // Either the entitlement moved under us or another
                    // worker settled this very order. Re-read to tell
                    // them apart.
                    let current = self
                        .store
                        .find_intent(&verified.order_id)
                        .await
                        .map_err(store_error)?;
                    if let Some(current) = current {
                        if current.status == IntentStatus::Verified {
                            return self.replay(&current, &reference).await;
                        }
                    }
                    tracing::debug!(
                        order_id = %verified.order_id,
                        attempt,
                        "settle lost optimistic race, retrying"
                    );
                    tokio::time::sleep(SETTLE_BACKOFF * attempt).await;
                }
                Err(StoreError::Backend(msg)) => {
                    return Err(EntitlementError::infrastructure(msg));
                }
            }
        }

        Err(EntitlementError::PersistenceConflict)
    }

    /// Serves an already settled order without side effects.
    async fn replay(
        &self,
        intent: &PaymentIntent,
        reference: &PaymentReference,
    ) -> Result<VerifyPaymentResult, EntitlementError> {
        let settled_reference = intent
            .payment_reference
            .as_ref()
            .ok_or_else(|| EntitlementError::infrastructure("verified intent has no reference"))?;
        if settled_reference != reference {
            // The order settled under a different payment; this call is
            // not a replay.
            return Err(EntitlementError::invalid_state("verified", "verify"));
        }

        let entitlement = self
            .store
            .find_current_entitlement(&intent.user_id, intent.kind)
            .await
            .map_err(store_error)?
            .ok_or_else(|| {
                EntitlementError::infrastructure("verified intent has no entitlement")
            })?;

        let verified_at = intent
            .verified_at
            .ok_or_else(|| EntitlementError::infrastructure("verified intent has no timestamp"))?;
        let is_renewal = entitlement.start_date.is_before(&verified_at);

        tracing::info!(
            order_id = %intent.order_id,
            entitlement_id = %entitlement.id,
            "verified order replayed idempotently"
        );

        Ok(VerifyPaymentResult {
            entitlement,
            is_renewal,
        })
    }

    async fn expire_intent(
        &self,
        intent: &PaymentIntent,
        now: Timestamp,
    ) -> Result<(), EntitlementError> {
        let mut expired = intent.clone();
        expired.expire()?;
        let audit = AuditEvent::record(
            intent.user_id.clone(),
            AuditPayload::IntentExpired {
                order_id: intent.order_id.clone(),
            },
            now,
        );
        self.store
            .mark_intent_expired(&expired, &audit)
            .await
            .map_err(store_error)?;
        tracing::info!(order_id = %intent.order_id, "stale intent expired on verify");
        Ok(())
    }

    async fn record_signature_failure(
        &self,
        intent: &PaymentIntent,
        rejected_signature: String,
        now: Timestamp,
    ) -> Result<(), EntitlementError> {
        let mut failed = intent.clone();
        failed.fail(rejected_signature)?;
        let audit = AuditEvent::record(
            intent.user_id.clone(),
            AuditPayload::VerificationFailed {
                order_id: intent.order_id.clone(),
                reason: "signature mismatch".to_string(),
            },
            now,
        );
        self.store
            .mark_intent_failed(&failed, &audit)
            .await
            .map_err(store_error)?;
        tracing::warn!(
            order_id = %intent.order_id,
            user_id = %intent.user_id,
            "payment signature verification failed"
        );
        Ok(())
    }
}

/// Decides whether the payment opens a new window, extends a live one, or
/// replaces a lapsed one, and assembles the atomic settlement.
fn build_settlement(
    verified: &PaymentIntent,
    plan: &Plan,
    active: Option<Entitlement>,
    now: Timestamp,
) -> Result<(Settlement, bool), EntitlementError> {
    let reference = verified
        .payment_reference
        .clone()
        .ok_or_else(|| EntitlementError::infrastructure("settling intent has no reference"))?;

    let payment_audit = AuditEvent::record(
        verified.user_id.clone(),
        AuditPayload::PaymentVerified {
            order_id: verified.order_id.clone(),
            payment_reference: reference,
        },
        now,
    );

    match active {
        Some(mut current) if !current.is_stale(now) => {
            // Live window: extend from its current end, never from now.
            let expected_version = current.version;
            current.extend(plan, verified.payment_reference.clone(), now)?;
            let audit = AuditEvent::record(
                verified.user_id.clone(),
                AuditPayload::EntitlementExtended {
                    entitlement_id: current.id,
                    plan_id: current.plan_id.clone(),
                    end_date: current.end_date,
                },
                now,
            );
            Ok((
                Settlement {
                    intent: verified.clone(),
                    entitlement: current,
                    expected_version: Some(expected_version),
                    expire_first: None,
                    audits: vec![payment_audit, audit],
                },
                true,
            ))
        }
        Some(mut stale) => {
            // Lapsed window the sweep has not reached yet: flip it
            // EXPIRED and open a fresh one from now.
            let stale_version = stale.version;
            stale.expire(now)?;
            let expired_audit = AuditEvent::record(
                verified.user_id.clone(),
                AuditPayload::EntitlementExpired {
                    entitlement_id: stale.id,
                },
                now,
            );
            let entitlement = Entitlement::from_payment(verified, plan, now);
            let created_audit = AuditEvent::record(
                verified.user_id.clone(),
                AuditPayload::EntitlementCreated {
                    entitlement_id: entitlement.id,
                    plan_id: entitlement.plan_id.clone(),
                    end_date: entitlement.end_date,
                },
                now,
            );
            Ok((
                Settlement {
                    intent: verified.clone(),
                    entitlement,
                    expected_version: None,
                    expire_first: Some((stale, stale_version)),
                    audits: vec![payment_audit, expired_audit, created_audit],
                },
                false,
            ))
        }
        None => {
            let entitlement = Entitlement::from_payment(verified, plan, now);
            let audit = AuditEvent::record(
                verified.user_id.clone(),
                AuditPayload::EntitlementCreated {
                    entitlement_id: entitlement.id,
                    plan_id: entitlement.plan_id.clone(),
                    end_date: entitlement.end_date,
                },
                now,
            );
            Ok((
                Settlement {
                    intent: verified.clone(),
                    entitlement,
                    expected_version: None,
                    expire_first: None,
                    audits: vec![payment_audit, audit],
                },
                false,
            ))
        }
    }
}

fn store_error(e: StoreError) -> EntitlementError {
    EntitlementError::infrastructure(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryEntitlementStore;
    use crate::domain::entitlement::{compute_payment_signature, EntitlementStatus};
    use secrecy::SecretString;

    const TEST_SECRET: &str = "rzp_secret_handler_tests";

    fn handler() -> (Arc<InMemoryEntitlementStore>, VerifyPaymentHandler) {
        let store = Arc::new(InMemoryEntitlementStore::new());
        let verifier = Arc::new(PaymentSignatureVerifier::new(SecretString::new(
            TEST_SECRET.to_string(),
        )));
        let handler = VerifyPaymentHandler::new(store.clone(), verifier);
        (store, handler)
    }

    fn user() -> UserId {
        UserId::new("user-1").unwrap()
    }

    async fn seed_intent(store: &InMemoryEntitlementStore, order: &str, plan_id: &str) {
        let plan = plan_catalog(plan_id).unwrap();
        let intent = PaymentIntent::create(
            OrderId::new(order).unwrap(),
            user(),
            plan,
            format!("rcpt_{}", order),
            Timestamp::now(),
            1_800,
        );
        let audit = AuditEvent::record(
            user(),
            AuditPayload::IntentCreated {
                order_id: intent.order_id.clone(),
                plan_id: intent.plan_id.clone(),
                amount_minor_units: intent.amount_minor_units,
                currency: intent.currency.as_str().to_string(),
            },
            intent.created_at,
        );
        store.insert_intent(&intent, &audit).await.unwrap();
    }

    fn sign(order: &str, reference: &str) -> String {
        hex::encode(compute_payment_signature(
            TEST_SECRET,
            &OrderId::new(order).unwrap(),
            &PaymentReference::new(reference).unwrap(),
        ))
    }

    fn cmd(order: &str, reference: &str) -> VerifyPaymentCommand {
        VerifyPaymentCommand {
            user_id: user(),
            order_id: order.to_string(),
            payment_reference: reference.to_string(),
            signature: sign(order, reference),
        }
    }

    #[tokio::test]
    async fn first_payment_opens_entitlement_window() {
        let (store, handler) = handler();
        seed_intent(&store, "order_1", "premium-monthly").await;

        let result = handler.handle(cmd("order_1", "pay_1")).await.unwrap();

        assert!(!result.is_renewal);
        assert_eq!(result.entitlement.status, EntitlementStatus::Active);
        assert_eq!(
            result.entitlement.end_date,
            result.entitlement.start_date.plus_months(1)
        );
        assert_eq!(store.audit_count("payment.verified"), 1);
        assert_eq!(store.audit_count("entitlement.created"), 1);
    }

    #[tokio::test]
    async fn renewal_extends_from_previous_end_date() {
        let (store, handler) = handler();
        seed_intent(&store, "order_1", "premium-monthly").await;
        let first = handler.handle(cmd("order_1", "pay_1")).await.unwrap();
        let first_end = first.entitlement.end_date;

        seed_intent(&store, "order_2", "premium-monthly").await;
        let second = handler.handle(cmd("order_2", "pay_2")).await.unwrap();

        assert!(second.is_renewal);
        assert_eq!(second.entitlement.id, first.entitlement.id);
        assert_eq!(second.entitlement.end_date, first_end.plus_months(1));
        assert_eq!(second.entitlement.start_date, first.entitlement.start_date);
        assert_eq!(store.entitlement_count(), 1);
        assert_eq!(store.audit_count("entitlement.extended"), 1);
    }

    #[tokio::test]
    async fn replay_of_verified_order_is_idempotent() {
        let (store, handler) = handler();
        seed_intent(&store, "order_1", "premium-monthly").await;
        let first = handler.handle(cmd("order_1", "pay_1")).await.unwrap();

        let replay = handler.handle(cmd("order_1", "pay_1")).await.unwrap();

        assert_eq!(replay.entitlement.end_date, first.entitlement.end_date);
        assert!(!replay.is_renewal);
        // No second settlement was recorded.
        assert_eq!(store.audit_count("payment.verified"), 1);
        assert_eq!(store.audit_count("entitlement.created"), 1);
        assert_eq!(store.entitlement_count(), 1);
    }

    #[tokio::test]
    async fn reused_reference_on_another_order_is_rejected() {
        let (store, handler) = handler();
        seed_intent(&store, "order_1", "premium-monthly").await;
        seed_intent(&store, "order_2", "premium-monthly").await;
        handler.handle(cmd("order_1", "pay_shared")).await.unwrap();

        let err = handler
            .handle(cmd("order_2", "pay_shared"))
            .await
            .unwrap_err();

        assert_eq!(err.code(), "DUPLICATE_PAYMENT");
        assert_eq!(store.entitlement_count(), 1);
    }

    #[tokio::test]
    async fn bad_signature_fails_intent_and_grants_nothing() {
        let (store, handler) = handler();
        seed_intent(&store, "order_1", "premium-monthly").await;

        let mut command = cmd("order_1", "pay_1");
        command.signature = sign("order_1", "pay_other");
        let err = handler.handle(command).await.unwrap_err();

        assert_eq!(err.code(), "INVALID_SIGNATURE");
        let intent = store
            .find_intent(&OrderId::new("order_1").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(intent.status, IntentStatus::Failed);
        assert_eq!(store.audit_count("verification.failed"), 1);
        assert_eq!(store.entitlement_count(), 0);
    }

    #[tokio::test]
    async fn failed_intent_cannot_be_verified_later() {
        let (store, handler) = handler();
        seed_intent(&store, "order_1", "premium-monthly").await;
        let mut command = cmd("order_1", "pay_1");
        command.signature = "00".repeat(32);
        handler.handle(command).await.unwrap_err();

        let err = handler.handle(cmd("order_1", "pay_1")).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE");
    }

    #[tokio::test]
    async fn unknown_order_is_not_found() {
        let (_, handler) = handler();
        let err = handler.handle(cmd("order_ghost", "pay_1")).await.unwrap_err();
        assert_eq!(err.code(), "INTENT_NOT_FOUND");
    }

    #[tokio::test]
    async fn another_users_order_is_not_found() {
        let (store, handler) = handler();
        seed_intent(&store, "order_1", "premium-monthly").await;

        let mut command = cmd("order_1", "pay_1");
        command.user_id = UserId::new("user-2").unwrap();
        let err = handler.handle(command).await.unwrap_err();

        assert_eq!(err.code(), "INTENT_NOT_FOUND");
    }

    #[tokio::test]
    async fn stale_intent_expires_lazily_on_verify() {
        let (store, handler) = handler();
        let plan = plan_catalog("premium-monthly").unwrap();
        let intent = PaymentIntent::create(
            OrderId::new("order_old").unwrap(),
            user(),
            plan,
            "rcpt_order_old".to_string(),
            Timestamp::now().minus_days(1),
            1_800,
        );
        let audit = AuditEvent::record(
            user(),
            AuditPayload::IntentCreated {
                order_id: intent.order_id.clone(),
                plan_id: intent.plan_id.clone(),
                amount_minor_units: intent.amount_minor_units,
                currency: intent.currency.as_str().to_string(),
            },
            intent.created_at,
        );
        store.insert_intent(&intent, &audit).await.unwrap();

        let err = handler.handle(cmd("order_old", "pay_1")).await.unwrap_err();

        assert_eq!(err.code(), "INTENT_NOT_FOUND");
        let stored = store
            .find_intent(&OrderId::new("order_old").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, IntentStatus::Expired);
        assert_eq!(store.audit_count("intent.expired"), 1);
    }

    #[tokio::test]
    async fn payment_after_lapse_opens_fresh_window() {
        let (store, handler) = handler();

        // A window that lapsed before the sweep reached it.
        seed_intent(&store, "order_1", "premium-monthly").await;
        let first = handler.handle(cmd("order_1", "pay_1")).await.unwrap();
        let mut lapsed = first.entitlement.clone();
        lapsed.end_date = Timestamp::now().minus_days(5);
        lapsed.version = 1;
        store.insert_entitlement(lapsed.clone());

        seed_intent(&store, "order_2", "premium-monthly").await;
        let second = handler.handle(cmd("order_2", "pay_2")).await.unwrap();

        assert!(!second.is_renewal);
        assert_ne!(second.entitlement.id, lapsed.id);
        assert_eq!(
            second.entitlement.end_date,
            second.entitlement.start_date.plus_months(1)
        );
        assert_eq!(store.audit_count("entitlement.expired"), 1);
        assert_eq!(store.audit_count("entitlement.created"), 2);
    }

    #[tokio::test]
    async fn concurrent_verifies_settle_every_payment_exactly_once() {
        let (store, handler) = handler();
        let handler = Arc::new(handler);

        const WORKERS: usize = 8;
        for i in 0..WORKERS {
            seed_intent(&store, &format!("order_{}", i), "premium-monthly").await;
        }

        let tasks: Vec<_> = (0..WORKERS)
            .map(|i| {
                let handler = handler.clone();
                tokio::spawn(async move {
                    handler
                        .handle(cmd(&format!("order_{}", i), &format!("pay_{}", i)))
                        .await
                })
            })
            .collect();

        let settled = futures::future::join_all(tasks)
            .await
            .into_iter()
            .filter(|outcome| outcome.as_ref().map(|r| r.is_ok()).unwrap_or(false))
            .count();

        // Bounded retries may still lose under this much contention, but
        // every settle that succeeded must be reflected exactly once.
        assert!(settled >= 1);
        assert_eq!(store.entitlement_count(), 1);
        assert_eq!(store.audit_count("payment.verified"), settled);
        let entitlement = store
            .find_active_entitlement(&user(), crate::domain::entitlement::EntitlementKind::Subscription)
            .await
            .unwrap()
            .unwrap();
        let mut expected_end = entitlement.start_date;
        for _ in 0..settled {
            expected_end = expected_end.plus_months(1);
        }
        assert_eq!(entitlement.end_date, expected_end);
    }

    #[tokio::test]
    async fn audit_write_failure_fails_the_settlement() {
        let (store, handler) = handler();
        seed_intent(&store, "order_1", "premium-monthly").await;
        store.set_fail_writes(true);

        let err = handler.handle(cmd("order_1", "pay_1")).await.unwrap_err();

        assert!(matches!(err, EntitlementError::Infrastructure(_)));
        assert_eq!(store.entitlement_count(), 0);
    }
}
