//! HTTP API server for the presale node.
//!
//! Provides REST endpoints for quotes, payment creation and lookup, the
//! gateway notification (IPN) callback, and user balances and history.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use presale_core::{
    ExternalTxId, Payment, PricingConfig, Quote, TransactionRecord, User, UserId,
};
use presale_gateway::signing::SIGNATURE_HEADER;
use presale_ledger::StoreError;
use presale_settlement::{NewPayment, PaymentQuote, SettlementError, SettlementResult};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::state::NodeState;

/// Shown to clients for any failure they cannot act on beyond retrying.
const RETRY_MESSAGE: &str = "payment could not be processed, please retry";

const REFERRAL_CODE_ATTEMPTS: usize = 5;

// --- Request / response types ---

#[derive(Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub gateway: String,
    pub storage_backend: String,
    pub uptime_secs: u64,
    pub open_payments: usize,
    pub pricing: PricingConfig,
    pub commission_percent: Decimal,
}

#[derive(Deserialize)]
pub struct QuoteRequest {
    pub amount: Decimal,
}

#[derive(Deserialize)]
pub struct RegisterUserRequest {
    pub email: String,
    #[serde(default)]
    pub referred_by: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub struct UserResponse {
    pub user_id: UserId,
    pub email: String,
    pub referral_code: String,
    pub referred_by: Option<String>,
    pub balance: Decimal,
}

#[derive(Serialize, Deserialize)]
pub struct BalanceResponse {
    pub user_id: UserId,
    pub balance: Decimal,
}

#[derive(Serialize, Deserialize)]
pub struct HistoryResponse {
    pub user_id: UserId,
    pub records: Vec<TransactionRecord>,
}

#[derive(Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// Map an engine error to a response. Internal details are logged, never
/// returned.
fn settlement_error(e: SettlementError) -> ApiError {
    match e {
        SettlementError::InvalidArgument(msg) => error(StatusCode::BAD_REQUEST, msg),
        SettlementError::UnknownTransaction(id) => {
            error(StatusCode::NOT_FOUND, format!("unknown transaction {}", id))
        }
        SettlementError::UnknownUser(id) => {
            error(StatusCode::NOT_FOUND, format!("unknown user {}", id))
        }
        SettlementError::SignatureInvalid => error(StatusCode::UNAUTHORIZED, "invalid signature"),
        SettlementError::InvalidTransition { from, to } => error(
            StatusCode::CONFLICT,
            format!("payment cannot move from {} to {}", from, to),
        ),
        other => {
            tracing::error!(error = %other, retryable = other.is_retryable(), "request failed");
            let status = if other.is_retryable() {
                StatusCode::SERVICE_UNAVAILABLE
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            error(status, RETRY_MESSAGE)
        }
    }
}

fn parse_external_id(raw: String) -> Result<ExternalTxId, ApiError> {
    ExternalTxId::new(raw).map_err(|e| error(StatusCode::BAD_REQUEST, e.to_string()))
}

// --- Handlers ---

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
    })
}

async fn handle_status(
    State(state): State<Arc<NodeState>>,
) -> Result<Json<StatusResponse>, ApiError> {
    let open_payments = state
        .engine
        .store()
        .list_open()
        .map_err(|e| settlement_error(e.into()))?
        .len();
    let settings = presale_core::SettingsSource::snapshot(state.settings.as_ref());
    Ok(Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        gateway: state.engine.gateway().gateway_id().to_string(),
        storage_backend: state.storage_backend.to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        open_payments,
        pricing: settings.pricing,
        commission_percent: settings.commission_percent,
    }))
}

async fn handle_quote(
    State(state): State<Arc<NodeState>>,
    Json(req): Json<QuoteRequest>,
) -> Result<Json<Quote>, ApiError> {
    state
        .engine
        .quote(req.amount)
        .map(Json)
        .map_err(settlement_error)
}

async fn handle_register_user(
    State(state): State<Arc<NodeState>>,
    Json(req): Json<RegisterUserRequest>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    let email = req.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(error(StatusCode::BAD_REQUEST, "a valid email is required"));
    }
    let referred_by = req
        .referred_by
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());

    let store = state.engine.store();
    for _ in 0..REFERRAL_CODE_ATTEMPTS {
        let user = User::new(email, referred_by.clone());
        match store.put_user(user.clone()) {
            Ok(()) => {
                tracing::info!(user_id = %user.id, referral_code = %user.referral_code, "user registered");
                return Ok((StatusCode::CREATED, Json(user_response(user))));
            }
            // Generated code collided with an existing one; draw again.
            Err(StoreError::DuplicateReferralCode(_)) => continue,
            Err(e) => return Err(settlement_error(e.into())),
        }
    }
    Err(error(StatusCode::SERVICE_UNAVAILABLE, RETRY_MESSAGE))
}

fn user_response(user: User) -> UserResponse {
    UserResponse {
        user_id: user.id,
        email: user.email,
        referral_code: user.referral_code,
        referred_by: user.referred_by,
        balance: user.balance,
    }
}

async fn handle_create_payment(
    State(state): State<Arc<NodeState>>,
    Json(req): Json<NewPayment>,
) -> Result<(StatusCode, Json<PaymentQuote>), ApiError> {
    state
        .engine
        .create_payment(req)
        .await
        .map(|quote| (StatusCode::CREATED, Json(quote)))
        .map_err(settlement_error)
}

async fn handle_get_payment(
    State(state): State<Arc<NodeState>>,
    Path(external_tx_id): Path<String>,
) -> Result<Json<Payment>, ApiError> {
    let id = parse_external_id(external_tx_id)?;
    state.engine.payment(&id).map(Json).map_err(settlement_error)
}

async fn handle_cancel_payment(
    State(state): State<Arc<NodeState>>,
    Path(external_tx_id): Path<String>,
) -> Result<Json<SettlementResult>, ApiError> {
    let id = parse_external_id(external_tx_id)?;
    state
        .engine
        .cancel_payment(&id)
        .await
        .map(Json)
        .map_err(settlement_error)
}

/// Gateway notification endpoint. The body is taken raw so the signature is
/// checked over exactly the bytes that were sent.
async fn handle_ipn(
    State(state): State<Arc<NodeState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SettlementResult>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if signature.is_empty() {
        tracing::warn!("callback without signature header");
        return Err(error(StatusCode::UNAUTHORIZED, "invalid signature"));
    }
    state
        .engine
        .handle_callback(&body, signature)
        .await
        .map(Json)
        .map_err(settlement_error)
}

async fn handle_balance(
    State(state): State<Arc<NodeState>>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let user_id = UserId(user_id);
    let balance = state.engine.balance(&user_id).map_err(settlement_error)?;
    Ok(Json(BalanceResponse { user_id, balance }))
}

async fn handle_history(
    State(state): State<Arc<NodeState>>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let user_id = UserId(user_id);
    let records = state.engine.history(&user_id).map_err(settlement_error)?;
    Ok(Json(HistoryResponse { user_id, records }))
}

// --- Server ---

pub fn build_router(state: Arc<NodeState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(handle_health))
        .route("/api/v1/status", get(handle_status))
        .route("/api/v1/quote", post(handle_quote))
        .route("/api/v1/users", post(handle_register_user))
        .route("/api/v1/users/{user_id}/balance", get(handle_balance))
        .route("/api/v1/users/{user_id}/history", get(handle_history))
        .route("/api/v1/payments", post(handle_create_payment))
        .route("/api/v1/payments/{external_tx_id}", get(handle_get_payment))
        .route(
            "/api/v1/payments/{external_tx_id}/cancel",
            post(handle_cancel_payment),
        )
        .route("/api/v1/ipn", post(handle_ipn))
        .with_state(state)
}

/// Serve the API on an already-bound listener until the server exits.
pub async fn serve(listener: tokio::net::TcpListener, state: Arc<NodeState>) -> anyhow::Result<()> {
    let app = build_router(state);
    tracing::info!(listen_addr = %listener.local_addr()?, "HTTP API server started");
    axum::serve(listener, app).await?;
    Ok(())
}
