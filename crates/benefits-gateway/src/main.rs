use std::{net::SocketAddr, sync::Arc};

use anyhow::Result as AnyResult;
use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use benefits_core::{
    ApprovalAction, ApprovalEngine, ApprovalTrail, BenefitsError, CancellationCommand,
    CancellationReceipt, DecisionCommand, DecisionReceipt, LoanStatement, LoanType,
    PaymentCommand, RepaymentLedger, RequestType,
};
use benefits_platform::{
    CancelRequest, DecideRequest, PgBenefitsStore, RecordPaymentRequest, RecordPaymentResponse,
    RedisBus, RefreshRequest, RefreshResponse, ServiceConfig, connect_database,
};
use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

const EMPLOYEE_ID_HEADER: &str = "x-employee-id";

#[derive(Clone)]
struct AppState {
    engine: Arc<ApprovalEngine<PgBenefitsStore, RedisBus>>,
    ledger: Arc<RepaymentLedger<PgBenefitsStore, RedisBus>>,
    config: Arc<ServiceConfig>,
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "benefits_gateway=info".to_string()),
        )
        .init();

    let config = ServiceConfig::from_env("0.0.0.0:8080")?;
    let pool = connect_database(&config.database_url).await?;
    let redis = RedisBus::connect(&config.redis_url)?;
    let store = PgBenefitsStore::new(pool);

    if config.ledger_admin_ids.is_empty() {
        warn!("LEDGER_ADMIN_IDS is empty; ledger mutations will be refused");
    }

    let state = AppState {
        engine: Arc::new(ApprovalEngine::new(store.clone(), redis.clone())),
        ledger: Arc::new(RepaymentLedger::new(store, redis)),
        config: Arc::new(config.clone()),
    };

    let addr: SocketAddr = config.http_addr.parse()?;
    info!("gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route(
            "/workflow/{request_type}/{request_id}/decide",
            post(decide_request),
        )
        .route(
            "/workflow/{request_type}/{request_id}/cancel",
            post(cancel_request),
        )
        .route(
            "/workflow/{request_type}/{request_id}/approvals",
            get(approval_trail),
        )
        .route("/ledger/payments", post(record_payment))
        .route("/ledger/refresh", post(refresh_ledger))
        .route(
            "/ledger/{loan_type}/{loan_id}/statement",
            get(loan_statement),
        )
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn decide_request(
    State(state): State<AppState>,
    Path((request_type, request_id)): Path<(String, Uuid)>,
    headers: HeaderMap,
    body: Result<Json<DecideRequest>, JsonRejection>,
) -> Result<Json<DecisionReceipt>, (StatusCode, String)> {
    let actor_id = caller_id(&headers).map_err(api_error)?;
    let payload = json_body(body).map_err(api_error)?;
    let request_type = RequestType::parse(&request_type).map_err(api_error)?;
    let action = ApprovalAction::parse(&payload.action).map_err(api_error)?;

    let receipt = state
        .engine
        .decide(DecisionCommand {
            request_type,
            request_id,
            actor_id,
            action,
            comment: payload.comment,
        })
        .await
        .map_err(api_error)?;

    Ok(Json(receipt))
}

async fn cancel_request(
    State(state): State<AppState>,
    Path((request_type, request_id)): Path<(String, Uuid)>,
    headers: HeaderMap,
    body: Result<Option<Json<CancelRequest>>, JsonRejection>,
) -> Result<Json<CancellationReceipt>, (StatusCode, String)> {
    let employee_id = caller_id(&headers).map_err(api_error)?;
    let payload = optional_json_body(body).map_err(api_error)?;
    let request_type = RequestType::parse(&request_type).map_err(api_error)?;

    let receipt = state
        .engine
        .cancel(CancellationCommand {
            request_type,
            request_id,
            employee_id,
            reason: payload.reason,
        })
        .await
        .map_err(api_error)?;

    Ok(Json(receipt))
}

async fn approval_trail(
    State(state): State<AppState>,
    Path((request_type, request_id)): Path<(String, Uuid)>,
    headers: HeaderMap,
) -> Result<Json<ApprovalTrail>, (StatusCode, String)> {
    caller_id(&headers).map_err(api_error)?;
    let request_type = RequestType::parse(&request_type).map_err(api_error)?;

    let trail = state
        .engine
        .approval_trail(request_type, request_id)
        .await
        .map_err(api_error)?;

    Ok(Json(trail))
}

async fn record_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<RecordPaymentRequest>, JsonRejection>,
) -> Result<Json<RecordPaymentResponse>, (StatusCode, String)> {
    let recorded_by = caller_id(&headers).map_err(api_error)?;
    require_ledger_admin(&state.config, &recorded_by).map_err(api_error)?;
    let payload = json_body(body).map_err(api_error)?;
    let loan_type = LoanType::parse(&payload.loan_type).map_err(api_error)?;

    let receipt = state
        .ledger
        .apply_payment(PaymentCommand {
            loan_type,
            loan_id: payload.loan_id,
            amount: payload.payment_amount,
            notes: payload.notes,
            skip_schedule_allocation: payload.skip_schedule_allocation,
            payment_method: payload.payment_method.unwrap_or_default(),
            paid_on: payload.paid_on.unwrap_or_else(|| Utc::now().date_naive()),
            recorded_by,
        })
        .await
        .map_err(api_error)?;

    Ok(Json(RecordPaymentResponse {
        transaction_id: receipt.transaction_id,
        loan_id: receipt.loan_id,
        payment_amount: receipt.payment_amount,
        updated_deductions: receipt.touched_entries,
        loan_completed: receipt.loan_completed,
        loan_status: receipt.loan_status,
        unallocated_amount: receipt.unallocated_amount,
        cancelled_deductions: receipt.cancelled_entries,
    }))
}

async fn refresh_ledger(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Option<Json<RefreshRequest>>, JsonRejection>,
) -> Result<Json<RefreshResponse>, (StatusCode, String)> {
    let caller = caller_id(&headers).map_err(api_error)?;
    require_ledger_admin(&state.config, &caller).map_err(api_error)?;
    let payload = optional_json_body(body).map_err(api_error)?;

    let as_of = payload.as_of.unwrap_or_else(|| Utc::now().date_naive());
    let summary = state
        .ledger
        .refresh_schedules(as_of)
        .await
        .map_err(api_error)?;
    let loans_completed = state
        .ledger
        .complete_loans_if_paid()
        .await
        .map_err(api_error)?;

    info!(
        "manual ledger refresh by {} as of {}: {} entries, {} loans completed",
        caller,
        as_of,
        summary.entries_updated,
        loans_completed.len()
    );

    Ok(Json(RefreshResponse {
        as_of: summary.as_of,
        loans_scanned: summary.loans_scanned,
        entries_updated: summary.entries_updated,
        loans_completed,
    }))
}

async fn loan_statement(
    State(state): State<AppState>,
    Path((loan_type, loan_id)): Path<(String, Uuid)>,
    headers: HeaderMap,
) -> Result<Json<LoanStatement>, (StatusCode, String)> {
    let caller = caller_id(&headers).map_err(api_error)?;
    let loan_type = LoanType::parse(&loan_type).map_err(api_error)?;

    let statement = state
        .ledger
        .statement(loan_type, loan_id)
        .await
        .map_err(api_error)?;

    if statement.loan.employee_id != caller && !state.config.is_ledger_admin(&caller) {
        return Err(api_error(BenefitsError::Forbidden(
            "only the borrower or a ledger administrator may view this statement".to_string(),
        )));
    }

    Ok(Json(statement))
}

fn caller_id(headers: &HeaderMap) -> Result<String, BenefitsError> {
    headers
        .get(EMPLOYEE_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or(BenefitsError::Unauthorized)
}

/// Body problems are reported only after the caller is known, and always as 400.
fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, BenefitsError> {
    body.map(|Json(payload)| payload)
        .map_err(|rejection| BenefitsError::InvalidInput(rejection.body_text()))
}

/// Same as `json_body`, but a request without a body gets the default payload.
fn optional_json_body<T: Default>(
    body: Result<Option<Json<T>>, JsonRejection>,
) -> Result<T, BenefitsError> {
    let payload = body.map_err(|rejection| BenefitsError::InvalidInput(rejection.body_text()))?;
    Ok(payload.map(|Json(payload)| payload).unwrap_or_default())
}

fn require_ledger_admin(config: &ServiceConfig, employee_id: &str) -> Result<(), BenefitsError> {
    if config.is_ledger_admin(employee_id) {
        Ok(())
    } else {
        Err(BenefitsError::Forbidden(format!(
            "{employee_id} is not a ledger administrator"
        )))
    }
}

fn api_error(err: BenefitsError) -> (StatusCode, String) {
    match err {
        BenefitsError::Unauthorized => (StatusCode::UNAUTHORIZED, err.to_string()),
        BenefitsError::Forbidden(_) => (StatusCode::FORBIDDEN, err.to_string()),
        BenefitsError::NotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        BenefitsError::Conflict(_) => (StatusCode::CONFLICT, err.to_string()),
        BenefitsError::InvalidInput(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        BenefitsError::Internal(inner) => {
            error!("request failed: {inner:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_string(),
            )
        }
    }
}
