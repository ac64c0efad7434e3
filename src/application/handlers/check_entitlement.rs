//! CheckEntitlementHandler - the single source of truth for access checks.
//!
//! Every read answers from `end_date`, so a stale status column can never
//! grant lapsed access. When a read notices a lapsed row it flips the
//! status on the way out; losing that write to a concurrent writer is
//! harmless because the answer never depended on it.

use std::sync::Arc;

use crate::domain::entitlement::{
    AuditEvent, AuditPayload, Entitlement, EntitlementError, EntitlementKind,
};
use crate::domain::foundation::{Timestamp, UserId};
use crate::ports::{EntitlementStore, StoreError};

/// Command to check a user's entitlement.
#[derive(Debug, Clone)]
pub struct CheckEntitlementCommand {
    pub user_id: UserId,
    pub kind: EntitlementKind,
}

/// Point-in-time view of a user's entitlement.
#[derive(Debug, Clone)]
pub struct EntitlementStatusView {
    /// Whether the user holds access right now.
    pub entitled: bool,
    /// The governing entitlement, if one exists in any state.
    pub entitlement: Option<Entitlement>,
}

/// Handler for entitlement status checks.
pub struct CheckEntitlementHandler {
    store: Arc<dyn EntitlementStore>,
}

impl CheckEntitlementHandler {
    pub fn new(store: Arc<dyn EntitlementStore>) -> Self {
        Self { store }
    }

    pub async fn handle(
        &self,
        cmd: CheckEntitlementCommand,
    ) -> Result<EntitlementStatusView, EntitlementError> {
        let now = Timestamp::now();
        let current = self
            .store
            .find_current_entitlement(&cmd.user_id, cmd.kind)
            .await
            .map_err(|e| EntitlementError::infrastructure(e.to_string()))?;

        let Some(current) = current else {
            return Ok(EntitlementStatusView {
                entitled: false,
                entitlement: None,
            });
        };

        if current.is_stale(now) {
            let flipped = self.expire_lazily(current, now).await?;
            return Ok(EntitlementStatusView {
                entitled: false,
                entitlement: Some(flipped),
            });
        }

        Ok(EntitlementStatusView {
            entitled: current.is_entitled(now),
            entitlement: Some(current),
        })
    }

    /// Flips a lapsed row to EXPIRED. Best effort: a lost version race
    /// means another writer got there first, which is fine.
    async fn expire_lazily(
        &self,
        current: Entitlement,
        now: Timestamp,
    ) -> Result<Entitlement, EntitlementError> {
        let mut expired = current.clone();
        expired.expire(now)?;
        let audit = AuditEvent::record(
            current.user_id.clone(),
            AuditPayload::EntitlementExpired {
                entitlement_id: current.id,
            },
            now,
        );

        match self
            .store
            .update_entitlement(&expired, current.version, &audit)
            .await
        {
            Ok(()) => {
                tracing::info!(
                    entitlement_id = %expired.id,
                    "lapsed entitlement expired on status read"
                );
                Ok(expired)
            }
            Err(StoreError::VersionConflict) => Ok(expired),
            Err(e) => Err(EntitlementError::infrastructure(e.to_string())),
        }
    }
}
