//! SweepExpiryHandler - hourly pass that flips lapsed rows to EXPIRED.
//!
//! Lazy expiry on the read paths already keeps answers correct; the sweep
//! exists so rows nobody reads still converge and reporting queries see
//! honest status columns. Each row is flipped independently, so one bad
//! row never stalls the rest of the pass.

use std::sync::Arc;

use crate::domain::entitlement::{AuditEvent, AuditPayload, EntitlementError};
use crate::domain::foundation::Timestamp;
use crate::ports::{EntitlementStore, StoreError};

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub intents_expired: usize,
    pub entitlements_expired: usize,
    /// Rows skipped because a concurrent writer moved them first.
    pub skipped: usize,
}

/// Handler for the periodic expiry sweep.
pub struct SweepExpiryHandler {
    store: Arc<dyn EntitlementStore>,
}

impl SweepExpiryHandler {
    pub fn new(store: Arc<dyn EntitlementStore>) -> Self {
        Self { store }
    }

    pub async fn run(&self) -> Result<SweepReport, EntitlementError> {
        let now = Timestamp::now();
        let mut report = SweepReport::default();

        let stale_intents = self
            .store
            .find_stale_pending_intents(now, None)
            .await
            .map_err(|e| EntitlementError::infrastructure(e.to_string()))?;

        for intent in stale_intents {
            let mut expired = intent.clone();
            if expired.expire().is_err() {
                report.skipped += 1;
                continue;
            }
            let audit = AuditEvent::record(
                intent.user_id.clone(),
                AuditPayload::IntentExpired {
                    order_id: intent.order_id.clone(),
                },
                now,
            );
            match self.store.mark_intent_expired(&expired, &audit).await {
                Ok(()) => report.intents_expired += 1,
                Err(StoreError::VersionConflict) => report.skipped += 1,
                Err(e) => {
                    tracing::error!(
                        order_id = %intent.order_id,
                        error = %e,
                        "sweep failed to expire intent"
                    );
                    report.skipped += 1;
                }
            }
        }

        let stale_entitlements = self
            .store
            .find_stale_entitlements(now)
            .await
            .map_err(|e| EntitlementError::infrastructure(e.to_string()))?;

        for entitlement in stale_entitlements {
            let mut expired = entitlement.clone();
            if expired.expire(now).is_err() {
                report.skipped += 1;
                continue;
            }
            let audit = AuditEvent::record(
                entitlement.user_id.clone(),
                AuditPayload::EntitlementExpired {
                    entitlement_id: entitlement.id,
                },
                now,
            );
            match self
                .store
                .update_entitlement(&expired, entitlement.version, &audit)
                .await
            {
                Ok(()) => report.entitlements_expired += 1,
                Err(StoreError::VersionConflict) => report.skipped += 1,
                Err(e) => {
                    tracing::error!(
                        entitlement_id = %entitlement.id,
                        error = %e,
                        "sweep failed to expire entitlement"
                    );
                    report.skipped += 1;
                }
            }
        }

        tracing::info!(
            intents_expired = report.intents_expired,
            entitlements_expired = report.entitlements_expired,
            skipped = report.skipped,
            "expiry sweep finished"
        );

        Ok(report)
    }
}
