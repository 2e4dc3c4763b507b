//! # REST + WebSocket API
//!
//! Builds the axum router that exposes the kernel's operation surface.
//! All endpoints share application state through axum's `State` extractor.
//!
//! The calling principal is the signer of the request (see
//! [`crate::auth`]). Routes that act on behalf of a caller answer 401 for
//! unsigned or badly signed requests; the kernel itself then decides
//! whether that caller is allowed. Bodies and path segments that carry an
//! unusable identifier are refused with 400 before reaching the kernel.
//!
//! ## Endpoints
//!
//! | Method | Path                                | Description                      |
//! |--------|-------------------------------------|----------------------------------|
//! | GET    | `/health`                           | Liveness check                   |
//! | GET    | `/status`                           | Kernel status summary            |
//! | GET    | `/index`                            | Component addresses              |
//! | GET    | `/vault`                            | Vault balances and agents        |
//! | POST   | `/vault/deposit`                    | Deposit into custody             |
//! | POST   | `/vault/release`                    | Release (authorized agents)      |
//! | POST   | `/vault/authorizations`             | Set an agent's authorization     |
//! | GET    | `/vault/authorizations/:agent`      | Is the agent authorized          |
//! | GET    | `/vault/balances/:asset`            | Tracked balance                  |
//! | GET    | `/policy`                           | Current limit and admin          |
//! | POST   | `/policy/validate`                  | Validate a proposed payment      |
//! | PUT    | `/policy/max-payment`               | Change the per-payment limit     |
//! | POST   | `/payments`                         | Schedule a payment               |
//! | GET    | `/payments`                         | All payment records              |
//! | GET    | `/payments/ready`                   | Ids of mature payments           |
//! | GET    | `/payments/:id`                     | One payment record               |
//! | POST   | `/payments/:id/execute`             | Execute a mature payment         |
//! | POST   | `/ledger/mint`                      | Mint ledger funds (admin only)   |
//! | POST   | `/ledger/approve`                   | Approve a spender                |
//! | GET    | `/ledger/balances/:asset/:holder`   | Ledger balance                   |
//! | GET    | `/ws`                               | WebSocket for kernel events      |

use axum::{
    async_trait,
    extract::{
        rejection::JsonRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
        FromRequest, FromRequestParts, Path, Request, State,
    },
    http::{request::Parts, Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use pfta_contracts::{ErrorKind, KernelError, KernelIndex, KernelResult};
use pfta_protocol::config::PROTOCOL_VERSION;
use pfta_protocol::storage::KernelAddresses;
use pfta_protocol::{Amount, AssetId, AssetLedger, PaymentId, PaymentRecord, Principal, TokenLedger};

use crate::auth::{self, ReplayGuard};
use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone: everything behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    /// The deployed kernel.
    pub kernel: KernelIndex,
    /// The asset ledger the vault holds its funds on.
    pub ledger: Arc<TokenLedger>,
    /// Broadcast channel for kernel events.
    pub event_tx: broadcast::Sender<KernelEvent>,
    /// Prometheus metrics for in-handler recording.
    pub metrics: SharedMetrics,
    /// Request signatures seen within the freshness window.
    pub replay: Arc<ReplayGuard>,
}

impl AppState {
    /// Records latency for `operation` and, on failure, counts the
    /// rejection by kind before turning it into an API error.
    fn observe<T>(&self, operation: &'static str, started: Instant, result: KernelResult<T>) -> Result<T, ApiError> {
        self.metrics
            .operation_latency_seconds
            .with_label_values(&[operation])
            .observe(started.elapsed().as_secs_f64());
        result.map_err(|e| {
            self.metrics
                .rejected_operations_total
                .with_label_values(&[e.kind().as_str()])
                .inc();
            tracing::debug!(operation, kind = %e.kind(), error = %e, "operation rejected");
            ApiError::Kernel(e)
        })
    }

    fn publish(&self, event: KernelEvent) {
        // No subscribers is not an error.
        let _ = self.event_tx.send(event);
    }
}

/// Events pushed to WebSocket subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KernelEvent {
    Deposited {
        asset: AssetId,
        from: Principal,
        amount: Amount,
        balance: Amount,
    },
    Released {
        asset: AssetId,
        agent: Principal,
        recipient: Principal,
        amount: Amount,
        balance: Amount,
    },
    AgentAuthorized {
        agent: Principal,
        enabled: bool,
    },
    PolicyLimitChanged {
        previous: Amount,
        max_payment_amount: Amount,
    },
    PaymentScheduled {
        payment_id: PaymentId,
        asset: AssetId,
        recipient: Principal,
        amount: Amount,
        execute_after: DateTime<Utc>,
    },
    PaymentExecuted {
        payment_id: PaymentId,
        executed_by: Principal,
        asset: AssetId,
        recipient: Principal,
        amount: Amount,
    },
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error body returned by every endpoint on failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
}

/// Failures a handler can return.
#[derive(Debug)]
pub enum ApiError {
    /// A kernel operation failed.
    Kernel(KernelError),
    /// The request is unsigned, or its signature did not verify.
    Unauthenticated(String),
    /// The body or a path segment could not be decoded.
    BadRequest(String),
}

impl From<KernelError> for ApiError {
    fn from(e: KernelError) -> Self {
        ApiError::Kernel(e)
    }
}

/// HTTP status for each kernel error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Authorization => StatusCode::FORBIDDEN,
        ErrorKind::PolicyViolation => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::InsufficientFunds | ErrorKind::InvalidState => StatusCode::CONFLICT,
        ErrorKind::Configuration => StatusCode::BAD_REQUEST,
        ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, kind) = match self {
            ApiError::Kernel(KernelError::PaymentNotFound(id)) => (
                StatusCode::NOT_FOUND,
                KernelError::PaymentNotFound(id).to_string(),
                ErrorKind::InvalidState.as_str().to_string(),
            ),
            ApiError::Kernel(e) => {
                let kind = e.kind();
                if kind == ErrorKind::Storage {
                    tracing::error!(error = %e, "storage failure");
                }
                (status_for(kind), e.to_string(), kind.as_str().to_string())
            }
            ApiError::Unauthenticated(reason) => (
                StatusCode::UNAUTHORIZED,
                reason,
                "unauthenticated".to_string(),
            ),
            ApiError::BadRequest(reason) => (
                StatusCode::BAD_REQUEST,
                reason,
                "invalid_request".to_string(),
            ),
        };
        (status, Json(ErrorResponse { error, kind })).into_response()
    }
}

// ---------------------------------------------------------------------------
// Extractors
// ---------------------------------------------------------------------------

/// The principal a request acts as: the signer, as attached by
/// [`auth::authenticate`].
#[derive(Debug, Clone)]
pub struct Caller(pub Principal);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Caller>()
            .cloned()
            .ok_or_else(|| ApiError::Unauthenticated("this route requires a signed request".into()))
    }
}

/// `Json` whose rejections use the API error body.
#[derive(Debug)]
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(ApiError::BadRequest(rejection.body_text())),
        }
    }
}

fn principal_param(raw: String) -> Result<Principal, ApiError> {
    Principal::parse(raw).map_err(|e| ApiError::BadRequest(format!("invalid principal: {e}")))
}

fn asset_param(raw: String) -> Result<AssetId, ApiError> {
    AssetId::parse(raw).map_err(|e| ApiError::BadRequest(format!("invalid asset: {e}")))
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/index", get(index_handler))
        .route("/ws", get(ws_handler))
        .route("/vault", get(vault_handler))
        .route("/vault/deposit", post(deposit_handler))
        .route("/vault/release", post(release_handler))
        .route("/vault/authorizations", post(authorize_handler))
        .route("/vault/authorizations/:agent", get(authorization_handler))
        .route("/vault/balances/:asset", get(vault_balance_handler))
        .route("/policy", get(policy_handler))
        .route("/policy/validate", post(validate_handler))
        .route("/policy/max-payment", put(set_max_payment_handler))
        .route("/payments", post(schedule_handler).get(payments_handler))
        .route("/payments/ready", get(ready_payments_handler))
        .route("/payments/:id", get(payment_handler))
        .route("/payments/:id/execute", post(execute_handler))
        .route("/ledger/mint", post(mint_handler))
        .route("/ledger/approve", post(approve_handler))
        .route("/ledger/balances/:asset/:holder", get(ledger_balance_handler))
        .layer(middleware::from_fn_with_state(state.clone(), auth::authenticate))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request & Response Types
// ---------------------------------------------------------------------------

/// Response payload for `GET /status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub protocol_version: String,
    pub addresses: KernelAddresses,
    pub max_payment_amount: Amount,
    pub payment_count: u64,
    pub ready_payments: u64,
    /// RFC 3339 timestamp of the response.
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceEntry {
    pub asset: AssetId,
    pub balance: Amount,
}

/// Response payload for `GET /vault`.
#[derive(Debug, Serialize, Deserialize)]
pub struct VaultResponse {
    pub address: Principal,
    pub admin: Principal,
    pub balances: Vec<BalanceEntry>,
    pub authorized_agents: Vec<Principal>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DepositRequest {
    pub asset: AssetId,
    pub amount: Amount,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReleaseRequest {
    pub asset: AssetId,
    pub recipient: Principal,
    pub amount: Amount,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    pub agent: Principal,
    pub enabled: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthorizationResponse {
    pub agent: Principal,
    pub authorized: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PolicyResponse {
    pub address: Principal,
    pub admin: Principal,
    pub max_payment_amount: Amount,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ValidateRequest {
    pub asset: AssetId,
    pub amount: Amount,
    pub recipient: Principal,
}

/// A policy rejection is an answer here, not a failure, so it comes back
/// as `valid: false` with the reason.
#[derive(Debug, Serialize, Deserialize)]
pub struct ValidateResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MaxPaymentRequest {
    pub max_payment_amount: Amount,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MaxPaymentResponse {
    pub previous: Amount,
    pub max_payment_amount: Amount,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub asset: AssetId,
    pub recipient: Principal,
    pub amount: Amount,
    pub execute_after: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScheduleResponse {
    pub payment_id: PaymentId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReadyResponse {
    pub now: DateTime<Utc>,
    pub payment_ids: Vec<PaymentId>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MintRequest {
    pub asset: AssetId,
    pub to: Principal,
    pub amount: Amount,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApproveRequest {
    pub asset: AssetId,
    pub spender: Principal,
    pub amount: Amount,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LedgerBalanceResponse {
    pub asset: AssetId,
    pub holder: Principal,
    pub balance: Amount,
}

// ---------------------------------------------------------------------------
// Handlers: node
// ---------------------------------------------------------------------------

/// `GET /health`: returns 200 if the node is alive.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /status`: kernel summary.
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let scheduler = state.kernel.scheduler();
    Json(StatusResponse {
        version: state.version.clone(),
        protocol_version: PROTOCOL_VERSION.to_string(),
        addresses: state.kernel.addresses().clone(),
        max_payment_amount: state.kernel.policy().max_payment_amount(),
        payment_count: scheduler.payment_count(),
        ready_payments: scheduler.ready_payments().len() as u64,
        timestamp: Utc::now().to_rfc3339(),
    })
}

async fn index_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.kernel.addresses().clone())
}

/// `GET /ws`: WebSocket upgrade for live event streaming.
///
/// Clients receive JSON-encoded [`KernelEvent`] messages for every
/// committed state change. Client messages are ignored.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

/// Drives a single WebSocket connection, forwarding broadcast events
/// until the client disconnects or the channel is closed.
async fn handle_ws_connection(mut socket: WebSocket, state: AppState) {
    let mut rx = state.event_tx.subscribe();

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(ev) => {
                        let payload = match serde_json::to_string(&ev) {
                            Ok(s) => s,
                            Err(e) => {
                                tracing::warn!(error = %e, "failed to serialize ws event");
                                continue;
                            }
                        };
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "ws subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers: vault
// ---------------------------------------------------------------------------

async fn vault_handler(State(state): State<AppState>) -> impl IntoResponse {
    let vault = state.kernel.vault();
    Json(VaultResponse {
        address: vault.address().clone(),
        admin: vault.admin(),
        balances: vault
            .balances()
            .into_iter()
            .map(|(asset, balance)| BalanceEntry { asset, balance })
            .collect(),
        authorized_agents: vault.authorized_agents(),
    })
}

/// `POST /vault/deposit`: pulls funds from the caller into custody.
///
/// The caller must have approved the vault address on the ledger first.
async fn deposit_handler(
    State(state): State<AppState>,
    Caller(caller): Caller,
    ApiJson(req): ApiJson<DepositRequest>,
) -> Result<Json<BalanceEntry>, ApiError> {
    let started = Instant::now();
    let result = state.kernel.vault().deposit(&caller, &req.asset, req.amount);
    let balance = state.observe("deposit", started, result)?;

    state.metrics.deposits_total.inc();
    state.publish(KernelEvent::Deposited {
        asset: req.asset.clone(),
        from: caller,
        amount: req.amount,
        balance,
    });
    Ok(Json(BalanceEntry {
        asset: req.asset,
        balance,
    }))
}

/// `POST /vault/release`: direct release by an authorized agent.
async fn release_handler(
    State(state): State<AppState>,
    Caller(caller): Caller,
    ApiJson(req): ApiJson<ReleaseRequest>,
) -> Result<Json<BalanceEntry>, ApiError> {
    let started = Instant::now();
    let result = state
        .kernel
        .vault()
        .release(&caller, &req.asset, &req.recipient, req.amount);
    let balance = state.observe("release", started, result)?;

    state.metrics.releases_total.inc();
    state.publish(KernelEvent::Released {
        asset: req.asset.clone(),
        agent: caller,
        recipient: req.recipient,
        amount: req.amount,
        balance,
    });
    Ok(Json(BalanceEntry {
        asset: req.asset,
        balance,
    }))
}

/// `POST /vault/authorizations`: vault administrator only.
async fn authorize_handler(
    State(state): State<AppState>,
    Caller(caller): Caller,
    ApiJson(req): ApiJson<AuthorizationRequest>,
) -> Result<Json<AuthorizationResponse>, ApiError> {
    let started = Instant::now();
    let result = state
        .kernel
        .vault()
        .authorize_scheduler(&caller, &req.agent, req.enabled);
    state.observe("authorize_scheduler", started, result)?;

    state.publish(KernelEvent::AgentAuthorized {
        agent: req.agent.clone(),
        enabled: req.enabled,
    });
    Ok(Json(AuthorizationResponse {
        agent: req.agent,
        authorized: req.enabled,
    }))
}

async fn authorization_handler(
    State(state): State<AppState>,
    Path(agent): Path<String>,
) -> Result<Json<AuthorizationResponse>, ApiError> {
    let agent = principal_param(agent)?;
    let authorized = state.kernel.vault().is_authorized(&agent);
    Ok(Json(AuthorizationResponse { agent, authorized }))
}

async fn vault_balance_handler(
    State(state): State<AppState>,
    Path(asset): Path<String>,
) -> Result<Json<BalanceEntry>, ApiError> {
    let asset = asset_param(asset)?;
    let balance = state.kernel.vault().get_balance(&asset);
    Ok(Json(BalanceEntry { asset, balance }))
}

// ---------------------------------------------------------------------------
// Handlers: policy
// ---------------------------------------------------------------------------

async fn policy_handler(State(state): State<AppState>) -> impl IntoResponse {
    let policy = state.kernel.policy();
    Json(PolicyResponse {
        address: policy.address().clone(),
        admin: policy.admin(),
        max_payment_amount: policy.max_payment_amount(),
    })
}

/// `POST /policy/validate`: open to anyone, no side effects.
async fn validate_handler(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ValidateRequest>,
) -> Result<Json<ValidateResponse>, ApiError> {
    match state
        .kernel
        .policy()
        .validate_payment(&req.asset, req.amount, &req.recipient)
    {
        Ok(valid) => Ok(Json(ValidateResponse { valid, reason: None })),
        Err(KernelError::PolicyViolation(violation)) => Ok(Json(ValidateResponse {
            valid: false,
            reason: Some(violation.to_string()),
        })),
        Err(e) => Err(e.into()),
    }
}

/// `PUT /policy/max-payment`: policy administrator only.
async fn set_max_payment_handler(
    State(state): State<AppState>,
    Caller(caller): Caller,
    ApiJson(req): ApiJson<MaxPaymentRequest>,
) -> Result<Json<MaxPaymentResponse>, ApiError> {
    let started = Instant::now();
    let result = state
        .kernel
        .policy()
        .set_max_payment_amount(&caller, req.max_payment_amount);
    let previous = state.observe("set_max_payment_amount", started, result)?;

    state.publish(KernelEvent::PolicyLimitChanged {
        previous,
        max_payment_amount: req.max_payment_amount,
    });
    Ok(Json(MaxPaymentResponse {
        previous,
        max_payment_amount: req.max_payment_amount,
    }))
}

// ---------------------------------------------------------------------------
// Handlers: payments
// ---------------------------------------------------------------------------

/// `POST /payments`: records a payment intent. Returns 201 with the id.
async fn schedule_handler(
    State(state): State<AppState>,
    Caller(caller): Caller,
    ApiJson(req): ApiJson<ScheduleRequest>,
) -> Result<(StatusCode, Json<ScheduleResponse>), ApiError> {
    let started = Instant::now();
    let result = state.kernel.scheduler().schedule_payment(
        &caller,
        &req.asset,
        &req.recipient,
        req.amount,
        req.execute_after,
    );
    let payment_id = state.observe("schedule_payment", started, result)?;

    state.metrics.payments_scheduled_total.inc();
    state.publish(KernelEvent::PaymentScheduled {
        payment_id,
        asset: req.asset,
        recipient: req.recipient,
        amount: req.amount,
        execute_after: req.execute_after,
    });
    Ok((StatusCode::CREATED, Json(ScheduleResponse { payment_id })))
}

async fn payments_handler(State(state): State<AppState>) -> Json<Vec<PaymentRecord>> {
    Json(state.kernel.scheduler().payments())
}

async fn ready_payments_handler(State(state): State<AppState>) -> Json<ReadyResponse> {
    let scheduler = state.kernel.scheduler();
    Json(ReadyResponse {
        now: scheduler.now(),
        payment_ids: scheduler.ready_payments(),
    })
}

async fn payment_handler(
    State(state): State<AppState>,
    Path(id): Path<PaymentId>,
) -> Result<Json<PaymentRecord>, ApiError> {
    state
        .kernel
        .scheduler()
        .payment(id)
        .map(Json)
        .ok_or(ApiError::Kernel(KernelError::PaymentNotFound(id)))
}

/// `POST /payments/:id/execute`: anyone may trigger a mature payment.
async fn execute_handler(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<PaymentId>,
) -> Result<Json<PaymentRecord>, ApiError> {
    let started = Instant::now();
    let result = state.kernel.scheduler().execute_payment(&caller, id);
    let record = state.observe("execute_payment", started, result)?;

    state.metrics.payments_executed_total.inc();
    state.metrics.releases_total.inc();
    state.publish(KernelEvent::PaymentExecuted {
        payment_id: id,
        executed_by: caller,
        asset: record.asset.clone(),
        recipient: record.recipient.clone(),
        amount: record.amount,
    });
    Ok(Json(record))
}

// ---------------------------------------------------------------------------
// Handlers: ledger
// ---------------------------------------------------------------------------

/// `POST /ledger/mint`: issues ledger funds. Kernel administrator only.
async fn mint_handler(
    State(state): State<AppState>,
    Caller(caller): Caller,
    ApiJson(req): ApiJson<MintRequest>,
) -> Result<Json<LedgerBalanceResponse>, ApiError> {
    if caller != state.kernel.addresses().admin {
        return Err(ApiError::Kernel(KernelError::Unauthorized {
            caller,
            action: "mint ledger funds",
        }));
    }
    let balance = state
        .ledger
        .mint(&req.asset, &req.to, req.amount)
        .map_err(KernelError::from)?;
    Ok(Json(LedgerBalanceResponse {
        asset: req.asset,
        holder: req.to,
        balance,
    }))
}

/// `POST /ledger/approve`: the caller approves `spender` (normally the
/// vault) to pull up to `amount`.
async fn approve_handler(
    State(state): State<AppState>,
    Caller(caller): Caller,
    ApiJson(req): ApiJson<ApproveRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .ledger
        .approve(&req.asset, &caller, &req.spender, req.amount)
        .map_err(KernelError::from)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn ledger_balance_handler(
    State(state): State<AppState>,
    Path((asset, holder)): Path<(String, String)>,
) -> Result<Json<LedgerBalanceResponse>, ApiError> {
    let asset = asset_param(asset)?;
    let holder = principal_param(holder)?;
    let balance = state.ledger.balance_of(&asset, &holder);
    Ok(Json(LedgerBalanceResponse {
        asset,
        holder,
        balance,
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
