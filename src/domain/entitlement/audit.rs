//! Append-only audit trail events.
//!
//! Every state-changing operation records an audit event inside the same
//! transaction as the state change, so the trail can never disagree with
//! the stored state. Events are never updated or deleted.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{
    AuditEventId, EntitlementId, OrderId, PaymentReference, Timestamp, UserId,
};

use super::plan::PlanId;

/// What happened, with the identifiers needed to reconstruct it later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditPayload {
    IntentCreated {
        order_id: OrderId,
        plan_id: PlanId,
        amount_minor_units: i64,
        currency: String,
    },
    PaymentVerified {
        order_id: OrderId,
        payment_reference: PaymentReference,
    },
    VerificationFailed {
        order_id: OrderId,
        reason: String,
    },
    IntentExpired {
        order_id: OrderId,
    },
    EntitlementCreated {
        entitlement_id: EntitlementId,
        plan_id: PlanId,
        end_date: Timestamp,
    },
    EntitlementExtended {
        entitlement_id: EntitlementId,
        plan_id: PlanId,
        end_date: Timestamp,
    },
    EntitlementCancelled {
        entitlement_id: EntitlementId,
    },
    EntitlementExpired {
        entitlement_id: EntitlementId,
    },
}

impl AuditPayload {
    /// Stable event type string, used for storage and log correlation.
    pub fn event_type(&self) -> &'static str {
        match self {
            AuditPayload::IntentCreated { .. } => "intent.created",
            AuditPayload::PaymentVerified { .. } => "payment.verified",
            AuditPayload::VerificationFailed { .. } => "verification.failed",
            AuditPayload::IntentExpired { .. } => "intent.expired",
            AuditPayload::EntitlementCreated { .. } => "entitlement.created",
            AuditPayload::EntitlementExtended { .. } => "entitlement.extended",
            AuditPayload::EntitlementCancelled { .. } => "entitlement.cancelled",
            AuditPayload::EntitlementExpired { .. } => "entitlement.expired",
        }
    }
}

/// One immutable audit trail entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: AuditEventId,
    pub user_id: UserId,
    pub payload: AuditPayload,
    pub recorded_at: Timestamp,
}

impl AuditEvent {
    /// Records a new event for the given user at the given instant.
    pub fn record(user_id: UserId, payload: AuditPayload, now: Timestamp) -> Self {
        Self {
            id: AuditEventId::new(),
            user_id,
            payload,
            recorded_at: now,
        }
    }

    /// Stable event type string of the payload.
    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }
}
