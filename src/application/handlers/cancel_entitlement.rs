//! CancelEntitlementHandler - stops renewal while keeping paid access.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::entitlement::{
    AuditEvent, AuditPayload, Entitlement, EntitlementError, EntitlementKind,
};
use crate::domain::foundation::{Timestamp, UserId};
use crate::ports::{EntitlementStore, StoreError};

const MAX_UPDATE_ATTEMPTS: u32 = 3;
const UPDATE_BACKOFF: Duration = Duration::from_millis(25);

/// Command to cancel an active entitlement.
#[derive(Debug, Clone)]
pub struct CancelEntitlementCommand {
    pub user_id: UserId,
    pub kind: EntitlementKind,
}

/// Handler for entitlement cancellation.
///
/// Cancellation is local bookkeeping only: the payment flow is
/// client-confirmed per order, so there is no gateway subscription to
/// tear down. The entitlement keeps its end date and access runs out
/// naturally.
pub struct CancelEntitlementHandler {
    store: Arc<dyn EntitlementStore>,
}

impl CancelEntitlementHandler {
    pub fn new(store: Arc<dyn EntitlementStore>) -> Self {
        Self { store }
    }

    pub async fn handle(
        &self,
        cmd: CancelEntitlementCommand,
    ) -> Result<Entitlement, EntitlementError> {
        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let now = Timestamp::now();
            let current = self
                .store
                .find_current_entitlement(&cmd.user_id, cmd.kind)
                .await
                .map_err(|e| EntitlementError::infrastructure(e.to_string()))?
                .ok_or_else(|| EntitlementError::entitlement_not_found(cmd.user_id.clone()))?;

            if current.is_stale(now) {
                // Lapsed but not yet swept; nothing left to cancel.
                return Err(EntitlementError::entitlement_not_found(cmd.user_id.clone()));
            }

            let mut cancelled = current.clone();
            cancelled.cancel(now).map_err(|_| {
                EntitlementError::invalid_state(current.status.as_str(), "cancel")
            })?;

            let audit = AuditEvent::record(
                cmd.user_id.clone(),
                AuditPayload::EntitlementCancelled {
                    entitlement_id: cancelled.id,
                },
                now,
            );

            match self
                .store
                .update_entitlement(&cancelled, current.version, &audit)
                .await
            {
                Ok(()) => {
                    tracing::info!(
                        entitlement_id = %cancelled.id,
                        user_id = %cmd.user_id,
                        end_date = %cancelled.end_date,
                        "entitlement cancelled, access retained until end of period"
                    );
                    return Ok(cancelled);
                }
                Err(StoreError::VersionConflict) => {
                    tracing::debug!(
                        entitlement_id = %current.id,
                        attempt,
                        "cancel lost optimistic race, retrying"
                    );
                    tokio::time::sleep(UPDATE_BACKOFF * attempt).await;
                }
                Err(e) => return Err(EntitlementError::infrastructure(e.to_string())),
            }
        }

        Err(EntitlementError::PersistenceConflict)
    }
}
