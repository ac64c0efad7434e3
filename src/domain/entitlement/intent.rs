//! PaymentIntent aggregate entity.
//!
//! One row per order-creation call. An intent starts PENDING when the
//! gateway order is minted, and either becomes VERIFIED when the client
//! presents a valid payment signature, FAILED when the signature is wrong,
//! or EXPIRED when the TTL lapses without confirmation.
//!
//! # Invariants
//!
//! - `order_id` is unique (gateway-issued, primary correlation key)
//! - `payment_reference` is globally unique across all intents once set
//! - VERIFIED is terminal; a verified intent is never re-verified

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{
    OrderId, PaymentReference, StateMachine, Timestamp, UserId, ValidationError,
};

use super::plan::{Currency, EntitlementKind, Plan, PlanId};

/// Payment intent lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    /// Gateway order minted, awaiting client confirmation.
    Pending,

    /// Signature verified, payment settled. Terminal.
    Verified,

    /// Signature verification failed. Terminal.
    Failed,

    /// TTL elapsed before confirmation. Terminal.
    Expired,
}

impl IntentStatus {
    /// Stable string form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::Pending => "pending",
            IntentStatus::Verified => "verified",
            IntentStatus::Failed => "failed",
            IntentStatus::Expired => "expired",
        }
    }

    /// Parses the storage string form.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s {
            "pending" => Ok(IntentStatus::Pending),
            "verified" => Ok(IntentStatus::Verified),
            "failed" => Ok(IntentStatus::Failed),
            "expired" => Ok(IntentStatus::Expired),
            other => Err(ValidationError::invalid_format(
                "status",
                format!("unknown intent status '{}'", other),
            )),
        }
    }
}

impl StateMachine for IntentStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        use IntentStatus::*;
        matches!(
            (self, target),
            (Pending, Verified) | (Pending, Failed) | (Pending, Expired)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use IntentStatus::*;
        match self {
            Pending => vec![Verified, Failed, Expired],
            Verified | Failed | Expired => vec![],
        }
    }
}

/// PaymentIntent aggregate - a created-but-not-yet-confirmed payment order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    /// Gateway-issued order id.
    pub order_id: OrderId,

    /// User who created the order.
    pub user_id: UserId,

    /// Plan being purchased.
    pub plan_id: PlanId,

    /// Kind of entitlement the plan grants.
    pub kind: EntitlementKind,

    /// Amount in minor units, copied from the plan at creation.
    pub amount_minor_units: i64,

    /// Order currency.
    pub currency: Currency,

    /// Receipt string sent to the gateway (unique per call, <= 40 chars).
    pub receipt: String,

    /// Current lifecycle status.
    pub status: IntentStatus,

    /// Gateway payment id, set on verification. Unique across all intents.
    pub payment_reference: Option<PaymentReference>,

    /// Client-supplied signature, stored for audit only.
    pub signature: Option<String>,

    /// When the intent was created.
    pub created_at: Timestamp,

    /// TTL after which an unconfirmed intent is void.
    pub expires_at: Timestamp,

    /// When the intent was verified.
    pub verified_at: Option<Timestamp>,
}

impl PaymentIntent {
    /// Creates a new PENDING intent for a freshly minted gateway order.
    pub fn create(
        order_id: OrderId,
        user_id: UserId,
        plan: &Plan,
        receipt: String,
        now: Timestamp,
        ttl_secs: u64,
    ) -> Self {
        Self {
            order_id,
            user_id,
            plan_id: plan.id.clone(),
            kind: plan.kind,
            amount_minor_units: plan.amount_minor_units,
            currency: plan.currency,
            receipt,
            status: IntentStatus::Pending,
            payment_reference: None,
            signature: None,
            created_at: now,
            expires_at: now.plus_secs(ttl_secs),
            verified_at: None,
        }
    }

    /// True if the TTL has lapsed while still pending.
    pub fn is_stale(&self, now: Timestamp) -> bool {
        self.status == IntentStatus::Pending && self.expires_at.is_before(&now)
    }

    /// Marks the intent verified, attaching the payment reference and the
    /// signature that proved it.
    ///
    /// # Errors
    ///
    /// Returns error if the intent is not PENDING.
    pub fn verify(
        &mut self,
        reference: PaymentReference,
        signature: String,
        now: Timestamp,
    ) -> Result<(), ValidationError> {
        self.status = self.status.transition_to(IntentStatus::Verified)?;
        self.payment_reference = Some(reference);
        self.signature = Some(signature);
        self.verified_at = Some(now);
        Ok(())
    }

    /// Marks the intent failed after a signature mismatch.
    ///
    /// The rejected signature is kept for dispute resolution.
    ///
    /// # Errors
    ///
    /// Returns error if the intent is not PENDING.
    pub fn fail(&mut self, rejected_signature: String) -> Result<(), ValidationError> {
        self.status = self.status.transition_to(IntentStatus::Failed)?;
        self.signature = Some(rejected_signature);
        Ok(())
    }

    /// Marks the intent expired after its TTL lapsed.
    ///
    /// # Errors
    ///
    /// Returns error if the intent is not PENDING.
    pub fn expire(&mut self) -> Result<(), ValidationError> {
        self.status = self.status.transition_to(IntentStatus::Expired)?;
        Ok(())
    }
}
