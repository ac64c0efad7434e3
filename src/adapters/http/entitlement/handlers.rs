//! HTTP handlers for entitlement endpoints.
//!
//! These handlers connect axum routes to the application layer command
//! handlers. Identity always comes from the authenticated request; there
//! is no fallback identity, an unauthenticated request is rejected with
//! 401 before any handler runs.

use std::sync::Arc;

use axum::extract::{Json, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

use crate::application::handlers::{
    CancelEntitlementCommand, CancelEntitlementHandler, CheckEntitlementCommand,
    CheckEntitlementHandler, CreateOrderCommand, CreateOrderHandler, VerifyPaymentCommand,
    VerifyPaymentHandler,
};
use crate::domain::entitlement::{EntitlementError, PaymentSignatureVerifier};
use crate::domain::foundation::UserId;
use crate::ports::{EntitlementStore, PaymentGateway};

use super::dto::{
    CancelRequest, CancelResponse, CreateOrderRequest, CreateOrderResponse, EntitlementView,
    ErrorResponse, StatusQuery, StatusResponse, VerifyPaymentRequest, VerifyPaymentResponse,
};

// ════════════════════════════════════════════════════════════════════════════════
// Application State
// ════════════════════════════════════════════════════════════════════════════════

/// Shared application state containing all dependencies.
///
/// Cloned per request; dependencies are Arc-wrapped for cheap sharing.
#[derive(Clone)]
pub struct EntitlementAppState {
    pub store: Arc<dyn EntitlementStore>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub signature_verifier: Arc<PaymentSignatureVerifier>,
    /// Seconds a pending intent stays claimable.
    pub intent_ttl_secs: u64,
}

impl EntitlementAppState {
    /// Create handlers on demand from the shared state.
    pub fn create_order_handler(&self) -> CreateOrderHandler {
        CreateOrderHandler::new(self.store.clone(), self.gateway.clone(), self.intent_ttl_secs)
    }

    pub fn verify_payment_handler(&self) -> VerifyPaymentHandler {
        VerifyPaymentHandler::new(self.store.clone(), self.signature_verifier.clone())
    }

    pub fn cancel_handler(&self) -> CancelEntitlementHandler {
        CancelEntitlementHandler::new(self.store.clone())
    }

    pub fn check_handler(&self) -> CheckEntitlementHandler {
        CheckEntitlementHandler::new(self.store.clone())
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// User Context (would come from auth middleware in production)
// ════════════════════════════════════════════════════════════════════════════════

/// Authenticated user context extracted from the request.
///
/// In production this would be extracted from a JWT/session by auth
/// middleware. For now, uses a header-based extraction for
/// development/testing. There is deliberately no anonymous fallback.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
}

/// Rejection type for AuthenticatedUser extraction.
pub struct AuthenticationRequired;

impl IntoResponse for AuthenticationRequired {
    fn into_response(self) -> axum::response::Response {
        let error = ErrorResponse::new("AUTH_REQUIRED", "Authentication is required", false);
        (StatusCode::UNAUTHORIZED, Json(error)).into_response()
    }
}

impl<S> axum::extract::FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AuthenticationRequired;

    fn from_request_parts<'life0, 'life1, 'async_trait>(
        parts: &'life0 mut axum::http::request::Parts,
        _state: &'life1 S,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self, Self::Rejection>> + Send + 'async_trait>,
    >
    where
        'life0: 'async_trait,
        'life1: 'async_trait,
        Self: 'async_trait,
    {
        Box::pin(async move {
            let user_id = parts
                .headers
                .get("X-User-Id")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| UserId::new(s).ok())
                .ok_or(AuthenticationRequired)?;

            Ok(AuthenticatedUser { user_id })
        })
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Endpoint Handlers
// ════════════════════════════════════════════════════════════════════════════════

/// POST /api/entitlement/orders - Create a payment order for a plan
pub async fn create_order(
    State(state): State<EntitlementAppState>,
    user: AuthenticatedUser,
    Json(request): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, EntitlementApiError> {
    let handler = state.create_order_handler();
    let cmd = CreateOrderCommand {
        user_id: user.user_id,
        plan_id: request.plan_id,
    };

    let result = handler.handle(cmd).await?;

    let response = CreateOrderResponse {
        order_id: result.order_id,
        amount: result.amount_minor_units / 100,
        amount_minor_units: result.amount_minor_units,
        currency: result.currency.as_str().to_string(),
        key_id: result.key_id,
    };

    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /api/entitlement/verify - Verify a completed checkout
pub async fn verify_payment(
    State(state): State<EntitlementAppState>,
    user: AuthenticatedUser,
    Json(request): Json<VerifyPaymentRequest>,
) -> Result<impl IntoResponse, EntitlementApiError> {
    let handler = state.verify_payment_handler();
    let cmd = VerifyPaymentCommand {
        user_id: user.user_id,
        order_id: request.order_id,
        payment_reference: request.payment_reference,
        signature: request.signature,
    };

    let result = handler.handle(cmd).await?;

    let response = VerifyPaymentResponse {
        entitlement: EntitlementView::from(result.entitlement),
        is_renewal: result.is_renewal,
    };

    Ok(Json(response))
}

/// GET /api/entitlement/status - Check the current entitlement
pub async fn get_status(
    State(state): State<EntitlementAppState>,
    user: AuthenticatedUser,
    Query(query): Query<StatusQuery>,
) -> Result<impl IntoResponse, EntitlementApiError> {
    let handler = state.check_handler();
    let cmd = CheckEntitlementCommand {
        user_id: user.user_id,
        kind: query.kind,
    };

    let view = handler.handle(cmd).await?;

    let response = StatusResponse {
        entitled: view.entitled,
        entitlement: view.entitlement.map(EntitlementView::from),
    };

    Ok(Json(response))
}

/// POST /api/entitlement/cancel - Cancel an entitlement
pub async fn cancel_entitlement(
    State(state): State<EntitlementAppState>,
    user: AuthenticatedUser,
    Json(request): Json<CancelRequest>,
) -> Result<impl IntoResponse, EntitlementApiError> {
    let handler = state.cancel_handler();
    let cmd = CancelEntitlementCommand {
        user_id: user.user_id,
        kind: request.kind,
    };

    let entitlement = handler.handle(cmd).await?;

    let response = CancelResponse {
        access_until: entitlement.end_date.to_string(),
        entitlement: EntitlementView::from(entitlement),
    };

    Ok(Json(response))
}

// ════════════════════════════════════════════════════════════════════════════════
// Error Mapping
// ════════════════════════════════════════════════════════════════════════════════

/// Newtype wrapper mapping domain errors onto HTTP responses.
pub struct EntitlementApiError(EntitlementError);

impl From<EntitlementError> for EntitlementApiError {
    fn from(err: EntitlementError) -> Self {
        Self(err)
    }
}

impl IntoResponse for EntitlementApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self.0 {
            EntitlementError::InvalidAmount { .. }
            | EntitlementError::UnknownPlan(_)
            | EntitlementError::InvalidSignature(_)
            | EntitlementError::DuplicatePayment(_)
            | EntitlementError::ValidationFailed { .. } => StatusCode::BAD_REQUEST,
            EntitlementError::IntentNotFound(_) | EntitlementError::EntitlementNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            EntitlementError::InvalidState { .. } | EntitlementError::PersistenceConflict => {
                StatusCode::CONFLICT
            }
            EntitlementError::GatewayUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            EntitlementError::Infrastructure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = ErrorResponse::new(self.0.code(), self.0.message(), self.0.is_retryable());
        (status, Json(body)).into_response()
    }
}
