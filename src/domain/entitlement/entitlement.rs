//! Entitlement aggregate entity.
//!
//! An entitlement is a user's right to a feature kind for a bounded time
//! window. At most one ACTIVE entitlement exists per (user, kind); a
//! renewal payment extends the existing window from its current end date
//! rather than creating a second row.
//!
//! # Invariants
//!
//! - renewal extends `end_date` by the plan period from the PREVIOUS end
//!   date, never from "now", so early renewal loses no paid time
//! - a cancelled entitlement keeps its `end_date`; access continues until
//!   the window lapses
//! - expiry is detected lazily from `end_date`; the status column may lag
//!   behind until the next read or sweep flips it

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{
    EntitlementId, PaymentReference, StateMachine, Timestamp, UserId, ValidationError,
};

use super::intent::PaymentIntent;
use super::plan::{EntitlementKind, Plan, PlanId};

/// Entitlement lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitlementStatus {
    /// Window open, user entitled.
    Active,

    /// User opted out of renewal. Access continues until `end_date`.
    Cancelled,

    /// Window lapsed. Terminal.
    Expired,
}

impl EntitlementStatus {
    /// Stable string form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntitlementStatus::Active => "active",
            EntitlementStatus::Cancelled => "cancelled",
            EntitlementStatus::Expired => "expired",
        }
    }

    /// Parses the storage string form.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s {
            "active" => Ok(EntitlementStatus::Active),
            "cancelled" => Ok(EntitlementStatus::Cancelled),
            "expired" => Ok(EntitlementStatus::Expired),
            other => Err(ValidationError::invalid_format(
                "status",
                format!("unknown entitlement status '{}'", other),
            )),
        }
    }
}

impl StateMachine for EntitlementStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        use EntitlementStatus::*;
        matches!(
            (self, target),
            (Active, Cancelled) | (Active, Expired) | (Cancelled, Expired)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use EntitlementStatus::*;
        match self {
            Active => vec![Cancelled, Expired],
            Cancelled => vec![Expired],
            Expired => vec![],
        }
    }
}

/// Entitlement aggregate - a time-bounded grant of a feature kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlement {
    pub id: EntitlementId,
    pub user_id: UserId,
    pub kind: EntitlementKind,

    /// Plan that created or most recently extended this entitlement.
    pub plan_id: PlanId,

    pub status: EntitlementStatus,
    pub start_date: Timestamp,

    /// Exclusive end of the access window.
    pub end_date: Timestamp,

    /// Cleared on cancellation. Access itself is governed by `end_date`.
    pub auto_renew: bool,

    /// Gateway payment that created or most recently extended this row.
    pub source_payment_reference: Option<PaymentReference>,

    pub created_at: Timestamp,
    pub updated_at: Timestamp,

    /// Optimistic concurrency token, bumped by every persisted write.
    pub version: u32,
}

impl Entitlement {
    /// Creates a fresh entitlement from a verified payment.
    ///
    /// The window opens at `now` and runs one plan period.
    pub fn from_payment(intent: &PaymentIntent, plan: &Plan, now: Timestamp) -> Self {
        Self {
            id: EntitlementId::new(),
            user_id: intent.user_id.clone(),
            kind: plan.kind,
            plan_id: plan.id.clone(),
            status: EntitlementStatus::Active,
            start_date: now,
            end_date: now.plus_months(plan.period.months()),
            auto_renew: true,
            source_payment_reference: intent.payment_reference.clone(),
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    /// Extends the window by one plan period from the current end date.
    ///
    /// # Errors
    ///
    /// Returns error if the entitlement is not ACTIVE.
    pub fn extend(
        &mut self,
        plan: &Plan,
        source: Option<PaymentReference>,
        now: Timestamp,
    ) -> Result<(), ValidationError> {
        if self.status != EntitlementStatus::Active {
            return Err(ValidationError::invalid_format(
                "status",
                format!("cannot extend a {} entitlement", self.status.as_str()),
            ));
        }
        self.end_date = self.end_date.plus_months(plan.period.months());
        self.plan_id = plan.id.clone();
        self.source_payment_reference = source;
        self.updated_at = now;
        Ok(())
    }

    /// Cancels auto-renewal. Access is retained until `end_date`.
    ///
    /// # Errors
    ///
    /// Returns error if the entitlement is not ACTIVE.
    pub fn cancel(&mut self, now: Timestamp) -> Result<(), ValidationError> {
        self.status = self.status.transition_to(EntitlementStatus::Cancelled)?;
        self.auto_renew = false;
        self.updated_at = now;
        Ok(())
    }

    /// Flips a lapsed entitlement to EXPIRED.
    ///
    /// # Errors
    ///
    /// Returns error if already expired.
    pub fn expire(&mut self, now: Timestamp) -> Result<(), ValidationError> {
        self.status = self.status.transition_to(EntitlementStatus::Expired)?;
        self.updated_at = now;
        Ok(())
    }

    /// True if the window has lapsed but the status column has not been
    /// flipped to EXPIRED yet.
    pub fn is_stale(&self, now: Timestamp) -> bool {
        self.status != EntitlementStatus::Expired && !self.end_date.is_after(&now)
    }

    /// Whether the user currently holds access, judged from `end_date`
    /// alone so a lagging status column never grants or denies wrongly.
    pub fn is_entitled(&self, now: Timestamp) -> bool {
        match self.status {
            EntitlementStatus::Active | EntitlementStatus::Cancelled => {
                self.end_date.is_after(&now)
            }
            EntitlementStatus::Expired => false,
        }
    }
}
