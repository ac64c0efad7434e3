//! In-memory entitlement store for testing.
//!
//! Deterministic store with the same transactional semantics as the
//! Postgres adapter: a single lock makes every mutating call atomic, the
//! payment reference uniqueness check runs inside the settle, and version
//! checks mirror the optimistic update guards.
//!
//! # Security Note
//!
//! This adapter is for **testing only** and should not be used in
//! production. It uses `.expect()` on lock operations which will panic if
//! the lock is poisoned. Production code should use the Postgres adapter.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::entitlement::{
    AuditEvent, Entitlement, EntitlementKind, EntitlementStatus, IntentStatus, PaymentIntent,
};
use crate::domain::foundation::{OrderId, Timestamp, UserId};
use crate::ports::{EntitlementStore, Settlement, StoreError};

#[derive(Default)]
struct Inner {
    intents: HashMap<String, PaymentIntent>,
    entitlements: HashMap<Uuid, Entitlement>,
    audits: Vec<AuditEvent>,
    fail_writes: bool,
}

/// In-memory entitlement store.
///
/// # Panics
///
/// Methods may panic if the internal lock is poisoned. This is acceptable
/// for test code but this adapter should NOT be used in production.
pub struct InMemoryEntitlementStore {
    inner: Mutex<Inner>,
}

impl InMemoryEntitlementStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    // === Test Helpers ===

    /// Makes every subsequent write fail with a backend error, to
    /// exercise failure paths.
    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Seeds an entitlement directly, bypassing the payment flow.
    pub fn insert_entitlement(&self, entitlement: Entitlement) {
        self.lock()
            .entitlements
            .insert(*entitlement.id.as_uuid(), entitlement);
    }

    /// Returns all recorded audit events in insertion order.
    pub fn audit_events(&self) -> Vec<AuditEvent> {
        self.lock().audits.clone()
    }

    /// Returns count of recorded audit events of a given type.
    pub fn audit_count(&self, event_type: &str) -> usize {
        self.lock()
            .audits
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }

    /// Returns count of stored entitlements across all states.
    pub fn entitlement_count(&self) -> usize {
        self.lock().entitlements.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .expect("InMemoryEntitlementStore: lock poisoned")
    }
}

impl Default for InMemoryEntitlementStore {
    fn default() -> Self {
        Self::new()
    }
}

fn check_writable(inner: &Inner) -> Result<(), StoreError> {
    if inner.fail_writes {
        return Err(StoreError::Backend("injected write failure".to_string()));
    }
    Ok(())
}

fn reference_taken(inner: &Inner, reference: &str, except_order: &OrderId) -> bool {
    inner.intents.values().any(|i| {
        i.order_id != *except_order
            && i.payment_reference
                .as_ref()
                .is_some_and(|r| r.as_str() == reference)
    })
}

#[async_trait]
impl EntitlementStore for InMemoryEntitlementStore {
    async fn insert_intent(
        &self,
        intent: &PaymentIntent,
        audit: &AuditEvent,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        check_writable(&inner)?;
        inner
            .intents
            .insert(intent.order_id.as_str().to_string(), intent.clone());
        inner.audits.push(audit.clone());
        Ok(())
    }

    async fn find_intent(&self, order_id: &OrderId) -> Result<Option<PaymentIntent>, StoreError> {
        Ok(self.lock().intents.get(order_id.as_str()).cloned())
    }

    async fn reference_in_use(&self, reference: &str) -> Result<bool, StoreError> {
        Ok(self.lock().intents.values().any(|i| {
            i.payment_reference
                .as_ref()
                .is_some_and(|r| r.as_str() == reference)
        }))
    }

    async fn mark_intent_failed(
        &self,
        intent: &PaymentIntent,
        audit: &AuditEvent,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        check_writable(&inner)?;
        let stored = inner
            .intents
            .get(intent.order_id.as_str())
            .ok_or_else(|| StoreError::Backend("intent vanished".to_string()))?;
        // Lost the race to another writer, nothing to record.
        if stored.status != IntentStatus::Pending {
            return Ok(());
        }
        inner
            .intents
            .insert(intent.order_id.as_str().to_string(), intent.clone());
        inner.audits.push(audit.clone());
        Ok(())
    }

    async fn mark_intent_expired(
        &self,
        intent: &PaymentIntent,
        audit: &AuditEvent,
    ) -> Result<(), StoreError> {
        self.mark_intent_failed(intent, audit).await
    }

    async fn settle_payment(&self, settlement: &Settlement) -> Result<(), StoreError> {
        let mut inner = self.lock();
        check_writable(&inner)?;

        let reference = settlement
            .intent
            .payment_reference
            .as_ref()
            .ok_or_else(|| StoreError::Backend("settlement intent has no reference".to_string()))?;
        if reference_taken(&inner, reference.as_str(), &settlement.intent.order_id) {
            return Err(StoreError::DuplicateReference);
        }

        // Same race guard the database enforces: a verified intent stays
        // verified, and a settle against it must not run twice.
        if let Some(stored) = inner.intents.get(settlement.intent.order_id.as_str()) {
            if stored.status != IntentStatus::Pending {
                return Err(StoreError::VersionConflict);
            }
        }

        if let Some((expired, expected)) = &settlement.expire_first {
            let stored = inner
                .entitlements
                .get(expired.id.as_uuid())
                .ok_or(StoreError::VersionConflict)?;
            if stored.version != *expected {
                return Err(StoreError::VersionConflict);
            }
        }

        match settlement.expected_version {
            Some(expected) => {
                let stored = inner
                    .entitlements
                    .get(settlement.entitlement.id.as_uuid())
                    .ok_or(StoreError::VersionConflict)?;
                if stored.version != expected {
                    return Err(StoreError::VersionConflict);
                }
            }
            None => {
                // Mirrors the partial unique index: one ACTIVE row per
                // user and kind.
                let duplicate_active = inner.entitlements.values().any(|e| {
                    e.id != settlement.entitlement.id
                        && e.user_id == settlement.entitlement.user_id
                        && e.kind == settlement.entitlement.kind
                        && e.status == EntitlementStatus::Active
                        && settlement
                            .expire_first
                            .as_ref()
                            .map_or(true, |(expired, _)| expired.id != e.id)
                });
                if duplicate_active {
                    return Err(StoreError::VersionConflict);
                }
            }
        }

        // All checks passed, apply the whole settlement.
        if let Some((expired, expected)) = &settlement.expire_first {
            let mut row = expired.clone();
            row.version = expected + 1;
            inner.entitlements.insert(*row.id.as_uuid(), row);
        }
        let mut row = settlement.entitlement.clone();
        row.version = settlement.expected_version.map_or(1, |v| v + 1);
        inner.entitlements.insert(*row.id.as_uuid(), row);
        inner.intents.insert(
            settlement.intent.order_id.as_str().to_string(),
            settlement.intent.clone(),
        );
        inner.audits.extend(settlement.audits.iter().cloned());
        Ok(())
    }

    async fn find_active_entitlement(
        &self,
        user_id: &UserId,
        kind: EntitlementKind,
    ) -> Result<Option<Entitlement>, StoreError> {
        Ok(self
            .lock()
            .entitlements
            .values()
            .find(|e| {
                e.user_id == *user_id && e.kind == kind && e.status == EntitlementStatus::Active
            })
            .cloned())
    }

    async fn find_current_entitlement(
        &self,
        user_id: &UserId,
        kind: EntitlementKind,
    ) -> Result<Option<Entitlement>, StoreError> {
        Ok(self
            .lock()
            .entitlements
            .values()
            .filter(|e| {
                e.user_id == *user_id
                    && e.kind == kind
                    && matches!(
                        e.status,
                        EntitlementStatus::Active | EntitlementStatus::Cancelled
                    )
            })
            .max_by_key(|e| e.end_date.as_unix_secs())
            .cloned())
    }

    async fn update_entitlement(
        &self,
        entitlement: &Entitlement,
        expected_version: u32,
        audit: &AuditEvent,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        check_writable(&inner)?;
        let stored = inner
            .entitlements
            .get(entitlement.id.as_uuid())
            .ok_or(StoreError::VersionConflict)?;
        if stored.version != expected_version {
            return Err(StoreError::VersionConflict);
        }
        let mut row = entitlement.clone();
        row.version = expected_version + 1;
        inner.entitlements.insert(*row.id.as_uuid(), row);
        inner.audits.push(audit.clone());
        Ok(())
    }

    async fn find_stale_pending_intents(
        &self,
        now: Timestamp,
        user_id: Option<&UserId>,
    ) -> Result<Vec<PaymentIntent>, StoreError> {
        Ok(self
            .lock()
            .intents
            .values()
            .filter(|i| i.is_stale(now) && user_id.map_or(true, |u| i.user_id == *u))
            .cloned()
            .collect())
    }

    async fn find_stale_entitlements(
        &self,
        now: Timestamp,
    ) -> Result<Vec<Entitlement>, StoreError> {
        Ok(self
            .lock()
            .entitlements
            .values()
            .filter(|e| e.is_stale(now))
            .cloned()
            .collect())
    }

    async fn audit_trail(&self, user_id: &UserId) -> Result<Vec<AuditEvent>, StoreError> {
        Ok(self
            .lock()
            .audits
            .iter()
            .filter(|e| e.user_id == *user_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entitlement::{plan_catalog, AuditPayload};
    use crate::domain::foundation::PaymentReference;

    fn user() -> UserId {
        UserId::new("user-1").unwrap()
    }

    fn pending_intent(order: &str) -> PaymentIntent {
        PaymentIntent::create(
            OrderId::new(order).unwrap(),
            user(),
            plan_catalog("premium-monthly").unwrap(),
            format!("rcpt_{}", order),
            Timestamp::from_unix_secs(1_700_000_000),
            1_800,
        )
    }

    fn verified_intent(order: &str, reference: &str) -> PaymentIntent {
        let mut intent = pending_intent(order);
        intent
            .verify(
                PaymentReference::new(reference).unwrap(),
                "cafe".to_string(),
                Timestamp::from_unix_secs(1_700_000_100),
            )
            .unwrap();
        intent
    }

    fn creation_audit(intent: &PaymentIntent) -> AuditEvent {
        AuditEvent::record(
            intent.user_id.clone(),
            AuditPayload::IntentCreated {
                order_id: intent.order_id.clone(),
                plan_id: intent.plan_id.clone(),
                amount_minor_units: intent.amount_minor_units,
                currency: intent.currency.as_str().to_string(),
            },
            intent.created_at,
        )
    }

    fn settlement_for(intent: PaymentIntent) -> Settlement {
        let plan = plan_catalog("premium-monthly").unwrap();
        let now = intent.verified_at.unwrap_or_else(Timestamp::now);
        let entitlement = Entitlement::from_payment(&intent, plan, now);
        let audits = vec![AuditEvent::record(
            intent.user_id.clone(),
            AuditPayload::EntitlementCreated {
                entitlement_id: entitlement.id,
                plan_id: entitlement.plan_id.clone(),
                end_date: entitlement.end_date,
            },
            now,
        )];
        Settlement {
            intent,
            entitlement,
            expected_version: None,
            expire_first: None,
            audits,
        }
    }

    #[tokio::test]
    async fn insert_and_find_intent() {
        let store = InMemoryEntitlementStore::new();
        let intent = pending_intent("order_1");
        store
            .insert_intent(&intent, &creation_audit(&intent))
            .await
            .unwrap();

        let found = store.find_intent(&intent.order_id).await.unwrap().unwrap();
        assert_eq!(found, intent);
        assert_eq!(store.audit_count("intent.created"), 1);
    }

    #[tokio::test]
    async fn settle_rejects_reused_reference() {
        let store = InMemoryEntitlementStore::new();
        let first = pending_intent("order_1");
        let second = pending_intent("order_2");
        store
            .insert_intent(&first, &creation_audit(&first))
            .await
            .unwrap();
        store
            .insert_intent(&second, &creation_audit(&second))
            .await
            .unwrap();

        store
            .settle_payment(&settlement_for(verified_intent("order_1", "pay_shared")))
            .await
            .unwrap();

        let result = store
            .settle_payment(&settlement_for(verified_intent("order_2", "pay_shared")))
            .await;
        assert_eq!(result, Err(StoreError::DuplicateReference));
        assert_eq!(store.entitlement_count(), 1);
    }

    #[tokio::test]
    async fn settle_against_already_verified_intent_conflicts() {
        let store = InMemoryEntitlementStore::new();
        let intent = pending_intent("order_1");
        store
            .insert_intent(&intent, &creation_audit(&intent))
            .await
            .unwrap();

        store
            .settle_payment(&settlement_for(verified_intent("order_1", "pay_1")))
            .await
            .unwrap();

        let result = store
            .settle_payment(&settlement_for(verified_intent("order_1", "pay_other")))
            .await;
        assert_eq!(result, Err(StoreError::VersionConflict));
    }

    #[tokio::test]
    async fn settle_with_stale_version_conflicts() {
        let store = InMemoryEntitlementStore::new();
        let intent = pending_intent("order_1");
        store
            .insert_intent(&intent, &creation_audit(&intent))
            .await
            .unwrap();
        store
            .settle_payment(&settlement_for(verified_intent("order_1", "pay_1")))
            .await
            .unwrap();

        let stored = store
            .find_active_entitlement(&user(), EntitlementKind::Subscription)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.version, 1);

        // Second settle read version 1, but a racing writer bumped it.
        let racing = pending_intent("order_2");
        store
            .insert_intent(&racing, &creation_audit(&racing))
            .await
            .unwrap();
        let mut settlement = settlement_for(verified_intent("order_2", "pay_2"));
        settlement.entitlement = stored.clone();
        settlement.expected_version = Some(1);

        store
            .update_entitlement(
                &stored,
                1,
                &AuditEvent::record(
                    user(),
                    AuditPayload::EntitlementCancelled {
                        entitlement_id: stored.id,
                    },
                    Timestamp::now(),
                ),
            )
            .await
            .unwrap();

        let result = store.settle_payment(&settlement).await;
        assert_eq!(result, Err(StoreError::VersionConflict));
    }

    #[tokio::test]
    async fn second_active_row_for_same_user_and_kind_is_rejected() {
        let store = InMemoryEntitlementStore::new();
        let first = pending_intent("order_1");
        let second = pending_intent("order_2");
        store
            .insert_intent(&first, &creation_audit(&first))
            .await
            .unwrap();
        store
            .insert_intent(&second, &creation_audit(&second))
            .await
            .unwrap();

        store
            .settle_payment(&settlement_for(verified_intent("order_1", "pay_1")))
            .await
            .unwrap();
        let result = store
            .settle_payment(&settlement_for(verified_intent("order_2", "pay_2")))
            .await;
        assert_eq!(result, Err(StoreError::VersionConflict));
    }

    #[tokio::test]
    async fn mark_failed_is_noop_when_already_settled() {
        let store = InMemoryEntitlementStore::new();
        let intent = pending_intent("order_1");
        store
            .insert_intent(&intent, &creation_audit(&intent))
            .await
            .unwrap();
        store
            .settle_payment(&settlement_for(verified_intent("order_1", "pay_1")))
            .await
            .unwrap();

        let mut failed = pending_intent("order_1");
        failed.fail("bogus".to_string()).unwrap();
        let audit = AuditEvent::record(
            user(),
            AuditPayload::VerificationFailed {
                order_id: failed.order_id.clone(),
                reason: "signature mismatch".to_string(),
            },
            Timestamp::now(),
        );
        store.mark_intent_failed(&failed, &audit).await.unwrap();

        // The settled intent is untouched and no failure audit landed.
        let stored = store.find_intent(&intent.order_id).await.unwrap().unwrap();
        assert_eq!(stored.status, IntentStatus::Verified);
        assert_eq!(store.audit_count("verification.failed"), 0);
    }

    #[tokio::test]
    async fn injected_failure_keeps_store_unchanged() {
        let store = InMemoryEntitlementStore::new();
        let intent = pending_intent("order_1");
        store
            .insert_intent(&intent, &creation_audit(&intent))
            .await
            .unwrap();

        store.set_fail_writes(true);
        let result = store
            .settle_payment(&settlement_for(verified_intent("order_1", "pay_1")))
            .await;
        assert!(matches!(result, Err(StoreError::Backend(_))));
        assert_eq!(store.entitlement_count(), 0);
        assert_eq!(store.audit_count("entitlement.created"), 0);
    }

    #[tokio::test]
    async fn stale_scans_pick_up_lapsed_rows() {
        let store = InMemoryEntitlementStore::new();
        let intent = pending_intent("order_1");
        store
            .insert_intent(&intent, &creation_audit(&intent))
            .await
            .unwrap();
        store
            .settle_payment(&settlement_for(verified_intent("order_2", "pay_1")))
            .await
            .unwrap();

        let far_future = Timestamp::from_unix_secs(1_900_000_000);
        let stale_intents = store
            .find_stale_pending_intents(far_future, None)
            .await
            .unwrap();
        assert_eq!(stale_intents.len(), 1);
        assert_eq!(stale_intents[0].order_id, intent.order_id);

        let stale_entitlements = store.find_stale_entitlements(far_future).await.unwrap();
        assert_eq!(stale_entitlements.len(), 1);

        let none_yet = store
            .find_stale_pending_intents(Timestamp::from_unix_secs(1_700_000_100), None)
            .await
            .unwrap();
        assert!(none_yet.is_empty());
    }
}
