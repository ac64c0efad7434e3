//! Entitlement store port for transactional persistence.
//!
//! One port owns intents, entitlements, and the audit trail because the
//! core guarantee is transactional: a state change and its audit event
//! land together or not at all. Every mutating method takes the audit
//! events to persist in the same transaction; an audit write failure
//! fails the whole operation.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::entitlement::{
    AuditEvent, Entitlement, EntitlementKind, PaymentIntent,
};
use crate::domain::foundation::{OrderId, Timestamp, UserId};

/// Atomic unit written when a payment verifies: the intent flips to
/// VERIFIED, the entitlement is created or extended, and the audit
/// events for both land in one transaction.
#[derive(Debug, Clone)]
pub struct Settlement {
    /// The intent in its VERIFIED state.
    pub intent: PaymentIntent,

    /// The entitlement to upsert, already mutated to its target state.
    pub entitlement: Entitlement,

    /// Version the caller read before mutating. `None` inserts a new
    /// row; `Some(v)` updates only if the stored version is still `v`.
    pub expected_version: Option<u32>,

    /// A stale entitlement to flip EXPIRED first, when the settlement
    /// replaces a lapsed window rather than extending a live one.
    pub expire_first: Option<(Entitlement, u32)>,

    /// Audit events recorded in the same transaction.
    pub audits: Vec<AuditEvent>,
}

/// Errors from the entitlement store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The payment reference is already attached to another intent.
    #[error("payment reference already consumed")]
    DuplicateReference,

    /// The optimistic version check failed; another writer got there
    /// first. The caller should re-read and retry.
    #[error("version conflict, record was modified concurrently")]
    VersionConflict,

    /// Backend failure (connection, constraint, serialization).
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Port for transactional entitlement persistence.
#[async_trait]
pub trait EntitlementStore: Send + Sync {
    /// Persists a freshly created PENDING intent with its creation
    /// audit event.
    async fn insert_intent(
        &self,
        intent: &PaymentIntent,
        audit: &AuditEvent,
    ) -> Result<(), StoreError>;

    /// Looks up an intent by gateway order id.
    async fn find_intent(&self, order_id: &OrderId) -> Result<Option<PaymentIntent>, StoreError>;

    /// True if any intent already holds this payment reference.
    async fn reference_in_use(&self, reference: &str) -> Result<bool, StoreError>;

    /// Flips a PENDING intent to FAILED, recording the audit event.
    ///
    /// Compare-and-set on the pending status: if another writer already
    /// moved the intent out of PENDING this is a no-op success, so two
    /// racing failure paths cannot double-record.
    async fn mark_intent_failed(
        &self,
        intent: &PaymentIntent,
        audit: &AuditEvent,
    ) -> Result<(), StoreError>;

    /// Flips a PENDING intent to EXPIRED, recording the audit event.
    /// Same compare-and-set semantics as [`mark_intent_failed`].
    ///
    /// [`mark_intent_failed`]: EntitlementStore::mark_intent_failed
    async fn mark_intent_expired(
        &self,
        intent: &PaymentIntent,
        audit: &AuditEvent,
    ) -> Result<(), StoreError>;

    /// Atomically settles a verified payment.
    ///
    /// # Errors
    ///
    /// - [`StoreError::DuplicateReference`] if the payment reference is
    ///   already attached to another intent
    /// - [`StoreError::VersionConflict`] if the entitlement moved since
    ///   the caller read it
    async fn settle_payment(&self, settlement: &Settlement) -> Result<(), StoreError>;

    /// Finds the ACTIVE entitlement for a user and kind, if any.
    /// At most one exists.
    async fn find_active_entitlement(
        &self,
        user_id: &UserId,
        kind: EntitlementKind,
    ) -> Result<Option<Entitlement>, StoreError>;

    /// Finds the entitlement that currently governs access for a user
    /// and kind: the ACTIVE or CANCELLED row with the latest end date.
    async fn find_current_entitlement(
        &self,
        user_id: &UserId,
        kind: EntitlementKind,
    ) -> Result<Option<Entitlement>, StoreError>;

    /// Persists a mutated entitlement guarded by the version the caller
    /// read, with its audit event.
    async fn update_entitlement(
        &self,
        entitlement: &Entitlement,
        expected_version: u32,
        audit: &AuditEvent,
    ) -> Result<(), StoreError>;

    /// Lists PENDING intents whose TTL lapsed before `now`, optionally
    /// scoped to one user.
    async fn find_stale_pending_intents(
        &self,
        now: Timestamp,
        user_id: Option<&UserId>,
    ) -> Result<Vec<PaymentIntent>, StoreError>;

    /// Lists ACTIVE or CANCELLED entitlements whose window lapsed
    /// before `now`.
    async fn find_stale_entitlements(&self, now: Timestamp) -> Result<Vec<Entitlement>, StoreError>;

    /// Returns the audit trail for a user, oldest first.
    async fn audit_trail(&self, user_id: &UserId) -> Result<Vec<AuditEvent>, StoreError>;
}
