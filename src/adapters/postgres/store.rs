//! PostgreSQL implementation of EntitlementStore.
//!
//! All mutating operations run in a transaction so a state change and its
//! audit events land together or not at all. Two database constraints
//! back the domain invariants:
//!
//! - `payment_intents_payment_reference_key` - a payment reference is
//!   consumed at most once, globally
//! - `uq_entitlements_one_active` - partial unique index, one ACTIVE row
//!   per (user_id, kind)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::domain::entitlement::{
    AuditEvent, AuditPayload, Currency, Entitlement, EntitlementKind, EntitlementStatus,
    IntentStatus, PaymentIntent, PlanId,
};
use crate::domain::foundation::{
    AuditEventId, EntitlementId, OrderId, PaymentReference, Timestamp, UserId,
};
use crate::ports::{EntitlementStore, Settlement, StoreError};

const REFERENCE_UNIQUE_CONSTRAINT: &str = "payment_intents_payment_reference_key";
const ONE_ACTIVE_CONSTRAINT: &str = "uq_entitlements_one_active";

/// PostgreSQL implementation of the EntitlementStore port.
pub struct PostgresEntitlementStore {
    pool: PgPool,
}

impl PostgresEntitlementStore {
    /// Creates a new store with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Database row representation of a payment intent.
#[derive(Debug, sqlx::FromRow)]
struct IntentRow {
    order_id: String,
    user_id: String,
    plan_id: String,
    kind: String,
    amount_minor_units: i64,
    currency: String,
    receipt: String,
    status: String,
    payment_reference: Option<String>,
    signature: Option<String>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    verified_at: Option<DateTime<Utc>>,
}

impl TryFrom<IntentRow> for PaymentIntent {
    type Error = StoreError;

    fn try_from(row: IntentRow) -> Result<Self, Self::Error> {
        Ok(PaymentIntent {
            order_id: OrderId::new(row.order_id).map_err(invalid_row)?,
            user_id: UserId::new(row.user_id).map_err(invalid_row)?,
            plan_id: PlanId::new(row.plan_id).map_err(invalid_row)?,
            kind: EntitlementKind::parse(&row.kind).map_err(invalid_row)?,
            amount_minor_units: row.amount_minor_units,
            currency: Currency::parse(&row.currency).map_err(invalid_row)?,
            receipt: row.receipt,
            status: IntentStatus::parse(&row.status).map_err(invalid_row)?,
            payment_reference: row
                .payment_reference
                .map(PaymentReference::new)
                .transpose()
                .map_err(invalid_row)?,
            signature: row.signature,
            created_at: Timestamp::from_datetime(row.created_at),
            expires_at: Timestamp::from_datetime(row.expires_at),
            verified_at: row.verified_at.map(Timestamp::from_datetime),
        })
    }
}

/// Database row representation of an entitlement.
#[derive(Debug, sqlx::FromRow)]
struct EntitlementRow {
    id: Uuid,
    user_id: String,
    kind: String,
    plan_id: String,
    status: String,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    auto_renew: bool,
    source_payment_reference: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i32,
}

impl TryFrom<EntitlementRow> for Entitlement {
    type Error = StoreError;

    fn try_from(row: EntitlementRow) -> Result<Self, Self::Error> {
        Ok(Entitlement {
            id: EntitlementId::from_uuid(row.id),
            user_id: UserId::new(row.user_id).map_err(invalid_row)?,
            kind: EntitlementKind::parse(&row.kind).map_err(invalid_row)?,
            plan_id: PlanId::new(row.plan_id).map_err(invalid_row)?,
            status: EntitlementStatus::parse(&row.status).map_err(invalid_row)?,
            start_date: Timestamp::from_datetime(row.start_date),
            end_date: Timestamp::from_datetime(row.end_date),
            auto_renew: row.auto_renew,
            source_payment_reference: row
                .source_payment_reference
                .map(PaymentReference::new)
                .transpose()
                .map_err(invalid_row)?,
            created_at: Timestamp::from_datetime(row.created_at),
            updated_at: Timestamp::from_datetime(row.updated_at),
            version: row.version.max(0) as u32,
        })
    }
}

/// Database row representation of an audit event.
#[derive(Debug, sqlx::FromRow)]
struct AuditRow {
    id: Uuid,
    user_id: String,
    payload: serde_json::Value,
    recorded_at: DateTime<Utc>,
}

impl TryFrom<AuditRow> for AuditEvent {
    type Error = StoreError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        let payload: AuditPayload = serde_json::from_value(row.payload)
            .map_err(|e| StoreError::Backend(format!("bad audit payload: {}", e)))?;
        Ok(AuditEvent {
            id: AuditEventId::from_uuid(row.id),
            user_id: UserId::new(row.user_id).map_err(invalid_row)?,
            payload,
            recorded_at: Timestamp::from_datetime(row.recorded_at),
        })
    }
}

fn invalid_row(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(format!("invalid row: {}", e))
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// Maps a constraint violation onto the store error vocabulary.
fn map_write_error(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &e {
        match db_err.constraint() {
            Some(REFERENCE_UNIQUE_CONSTRAINT) => return StoreError::DuplicateReference,
            // A second ACTIVE row lost a creation race; the caller
            // re-reads and extends instead.
            Some(ONE_ACTIVE_CONSTRAINT) => return StoreError::VersionConflict,
            _ => {}
        }
    }
    backend(e)
}

async fn insert_audit(
    tx: &mut Transaction<'_, Postgres>,
    audit: &AuditEvent,
) -> Result<(), StoreError> {
    let payload = serde_json::to_value(&audit.payload)
        .map_err(|e| StoreError::Backend(format!("unserializable audit payload: {}", e)))?;
    sqlx::query(
        r#"
        INSERT INTO audit_events (id, user_id, event_type, payload, recorded_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(audit.id.as_uuid())
    .bind(audit.user_id.as_str())
    .bind(audit.event_type())
    .bind(payload)
    .bind(audit.recorded_at.as_datetime())
    .execute(&mut **tx)
    .await
    .map_err(backend)?;
    Ok(())
}

/// Flips a PENDING intent to its terminal state. Returns false when the
/// compare-and-set lost to a concurrent writer.
async fn flip_pending_intent(
    tx: &mut Transaction<'_, Postgres>,
    intent: &PaymentIntent,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE payment_intents
        SET status = $2, payment_reference = $3, signature = $4, verified_at = $5
        WHERE order_id = $1 AND status = 'pending'
        "#,
    )
    .bind(intent.order_id.as_str())
    .bind(intent.status.as_str())
    .bind(intent.payment_reference.as_ref().map(|r| r.as_str()))
    .bind(intent.signature.as_deref())
    .bind(intent.verified_at.map(|t| *t.as_datetime()))
    .execute(&mut **tx)
    .await
    .map_err(map_write_error)?;
    Ok(result.rows_affected() > 0)
}

async fn update_entitlement_row(
    tx: &mut Transaction<'_, Postgres>,
    entitlement: &Entitlement,
    expected_version: u32,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE entitlements
        SET plan_id = $2, status = $3, end_date = $4, auto_renew = $5,
            source_payment_reference = $6, updated_at = $7,
            version = version + 1
        WHERE id = $1 AND version = $8
        "#,
    )
    .bind(entitlement.id.as_uuid())
    .bind(entitlement.plan_id.as_str())
    .bind(entitlement.status.as_str())
    .bind(entitlement.end_date.as_datetime())
    .bind(entitlement.auto_renew)
    .bind(
        entitlement
            .source_payment_reference
            .as_ref()
            .map(PaymentReference::as_str),
    )
    .bind(entitlement.updated_at.as_datetime())
    .bind(expected_version as i32)
    .execute(&mut **tx)
    .await
    .map_err(map_write_error)?;
    Ok(result.rows_affected() > 0)
}

async fn insert_entitlement_row(
    tx: &mut Transaction<'_, Postgres>,
    entitlement: &Entitlement,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO entitlements (
            id, user_id, kind, plan_id, status,
            start_date, end_date, auto_renew, source_payment_reference,
            created_at, updated_at, version
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 1)
        "#,
    )
    .bind(entitlement.id.as_uuid())
    .bind(entitlement.user_id.as_str())
    .bind(entitlement.kind.as_str())
    .bind(entitlement.plan_id.as_str())
    .bind(entitlement.status.as_str())
    .bind(entitlement.start_date.as_datetime())
    .bind(entitlement.end_date.as_datetime())
    .bind(entitlement.auto_renew)
    .bind(
        entitlement
            .source_payment_reference
            .as_ref()
            .map(PaymentReference::as_str),
    )
    .bind(entitlement.created_at.as_datetime())
    .bind(entitlement.updated_at.as_datetime())
    .execute(&mut **tx)
    .await
    .map_err(map_write_error)?;
    Ok(())
}

#[async_trait]
impl EntitlementStore for PostgresEntitlementStore {
    async fn insert_intent(
        &self,
        intent: &PaymentIntent,
        audit: &AuditEvent,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        sqlx::query(
            r#"
            INSERT INTO payment_intents (
                order_id, user_id, plan_id, kind, amount_minor_units, currency,
                receipt, status, payment_reference, signature,
                created_at, expires_at, verified_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(intent.order_id.as_str())
        .bind(intent.user_id.as_str())
        .bind(intent.plan_id.as_str())
        .bind(intent.kind.as_str())
        .bind(intent.amount_minor_units)
        .bind(intent.currency.as_str())
        .bind(&intent.receipt)
        .bind(intent.status.as_str())
        .bind(intent.payment_reference.as_ref().map(|r| r.as_str()))
        .bind(intent.signature.as_deref())
        .bind(intent.created_at.as_datetime())
        .bind(intent.expires_at.as_datetime())
        .bind(intent.verified_at.map(|t| *t.as_datetime()))
        .execute(&mut *tx)
        .await
        .map_err(map_write_error)?;

        insert_audit(&mut tx, audit).await?;
        tx.commit().await.map_err(backend)
    }

    async fn find_intent(&self, order_id: &OrderId) -> Result<Option<PaymentIntent>, StoreError> {
        let row: Option<IntentRow> = sqlx::query_as(
            r#"SELECT * FROM payment_intents WHERE order_id = $1"#,
        )
        .bind(order_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(PaymentIntent::try_from).transpose()
    }

    async fn reference_in_use(&self, reference: &str) -> Result<bool, StoreError> {
        let found: Option<(String,)> = sqlx::query_as(
            r#"SELECT order_id FROM payment_intents WHERE payment_reference = $1"#,
        )
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        Ok(found.is_some())
    }

    async fn mark_intent_failed(
        &self,
        intent: &PaymentIntent,
        audit: &AuditEvent,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        if flip_pending_intent(&mut tx, intent).await? {
            insert_audit(&mut tx, audit).await?;
        }
        tx.commit().await.map_err(backend)
    }

    async fn mark_intent_expired(
        &self,
        intent: &PaymentIntent,
        audit: &AuditEvent,
    ) -> Result<(), StoreError> {
        self.mark_intent_failed(intent, audit).await
    }

    async fn settle_payment(&self, settlement: &Settlement) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        if !flip_pending_intent(&mut tx, &settlement.intent).await? {
            // Another worker already settled, failed, or expired this
            // order. Rolls back on drop.
            return Err(StoreError::VersionConflict);
        }

        if let Some((expired, expected_version)) = &settlement.expire_first {
            if !update_entitlement_row(&mut tx, expired, *expected_version).await? {
                return Err(StoreError::VersionConflict);
            }
        }

        match settlement.expected_version {
            Some(expected) => {
                if !update_entitlement_row(&mut tx, &settlement.entitlement, expected).await? {
                    return Err(StoreError::VersionConflict);
                }
            }
            None => insert_entitlement_row(&mut tx, &settlement.entitlement).await?,
        }

        for audit in &settlement.audits {
            insert_audit(&mut tx, audit).await?;
        }

        tx.commit().await.map_err(backend)
    }

    async fn find_active_entitlement(
        &self,
        user_id: &UserId,
        kind: EntitlementKind,
    ) -> Result<Option<Entitlement>, StoreError> {
        let row: Option<EntitlementRow> = sqlx::query_as(
            r#"
            SELECT * FROM entitlements
            WHERE user_id = $1 AND kind = $2 AND status = 'active'
            "#,
        )
        .bind(user_id.as_str())
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(Entitlement::try_from).transpose()
    }

    async fn find_current_entitlement(
        &self,
        user_id: &UserId,
        kind: EntitlementKind,
    ) -> Result<Option<Entitlement>, StoreError> {
        let row: Option<EntitlementRow> = sqlx::query_as(
            r#"
            SELECT * FROM entitlements
            WHERE user_id = $1 AND kind = $2 AND status IN ('active', 'cancelled')
            ORDER BY end_date DESC
            LIMIT 1
            "#,
        )
        .bind(user_id.as_str())
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(Entitlement::try_from).transpose()
    }

    async fn update_entitlement(
        &self,
        entitlement: &Entitlement,
        expected_version: u32,
        audit: &AuditEvent,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        if !update_entitlement_row(&mut tx, entitlement, expected_version).await? {
            return Err(StoreError::VersionConflict);
        }
        insert_audit(&mut tx, audit).await?;
        tx.commit().await.map_err(backend)
    }

    async fn find_stale_pending_intents(
        &self,
        now: Timestamp,
        user_id: Option<&UserId>,
    ) -> Result<Vec<PaymentIntent>, StoreError> {
        let rows: Vec<IntentRow> = match user_id {
            Some(user_id) => {
                sqlx::query_as(
                    r#"
                    SELECT * FROM payment_intents
                    WHERE status = 'pending' AND expires_at < $1 AND user_id = $2
                    "#,
                )
                .bind(now.as_datetime())
                .bind(user_id.as_str())
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as(
                    r#"
                    SELECT * FROM payment_intents
                    WHERE status = 'pending' AND expires_at < $1
                    "#,
                )
                .bind(now.as_datetime())
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(backend)?;

        rows.into_iter().map(PaymentIntent::try_from).collect()
    }

    async fn find_stale_entitlements(
        &self,
        now: Timestamp,
    ) -> Result<Vec<Entitlement>, StoreError> {
        let rows: Vec<EntitlementRow> = sqlx::query_as(
            r#"
            SELECT * FROM entitlements
            WHERE status IN ('active', 'cancelled') AND end_date <= $1
            "#,
        )
        .bind(now.as_datetime())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(Entitlement::try_from).collect()
    }

    async fn audit_trail(&self, user_id: &UserId) -> Result<Vec<AuditEvent>, StoreError> {
        let rows: Vec<AuditRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, payload, recorded_at
            FROM audit_events
            WHERE user_id = $1
            ORDER BY recorded_at ASC, id ASC
            "#,
        )
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(AuditEvent::try_from).collect()
    }
}
