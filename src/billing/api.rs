use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use diesel::PgConnection;
use serde::Deserialize;
use std::sync::Arc;

use crate::billing::payments::{self, Payment, RecordPaymentRequest, TransitionRequest};
use crate::billing::BillingError;
use crate::core::middleware::AuthenticatedUser;
use crate::core::rbac::Permission;
use crate::core::shared::state::AppState;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentListQuery {
    pub student_id: Option<i64>,
}

async fn with_conn<T, F>(state: &AppState, f: F) -> Result<T, BillingError>
where
    T: Send + 'static,
    F: FnOnce(&mut PgConnection) -> Result<T, BillingError> + Send + 'static,
{
    let pool = state.conn.clone();
    tokio::task::spawn_blocking(move || -> Result<T, BillingError> {
        let mut conn = pool.get()?;
        f(&mut conn)
    })
    .await?
}

fn acting_for(user: &AuthenticatedUser, requested: Option<i64>) -> Result<i64, BillingError> {
    user.acting_for(requested).map_err(BillingError::Forbidden)
}

pub async fn handle_record_payment(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<RecordPaymentRequest>,
) -> Result<(StatusCode, Json<Payment>), BillingError> {
    let student_id = acting_for(&user, req.student_id)?;
    let permission = if student_id == user.user_id {
        Permission::EnrollCourses
    } else {
        Permission::ProcessPayments
    };
    state.policy.authorize(&user, permission)?;

    let payment = with_conn(&state, move |conn| payments::record_payment(conn, student_id, req)).await?;
    Ok((StatusCode::CREATED, Json(payment)))
}

pub async fn handle_list_payments(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(query): Query<PaymentListQuery>,
) -> Result<Json<Vec<Payment>>, BillingError> {
    let student_id = acting_for(&user, query.student_id)?;
    if student_id != user.user_id {
        state.policy.authorize(&user, Permission::ViewPayments)?;
    }
    let list = with_conn(&state, move |conn| payments::list_for_student(conn, student_id)).await?;
    Ok(Json(list))
}

fn ensure_visible(
    state: &AppState,
    user: &AuthenticatedUser,
    payment: &Payment,
) -> Result<(), BillingError> {
    if payment.student_id == user.user_id {
        return Ok(());
    }
    state.policy.authorize(user, Permission::ViewPayments)?;
    Ok(())
}

pub async fn handle_get_payment(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<Payment>, BillingError> {
    let payment = with_conn(&state, move |conn| payments::get_payment(conn, id)).await?;
    ensure_visible(&state, &user, &payment)?;
    Ok(Json(payment))
}

pub async fn handle_get_by_transaction(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(transaction_id): Path<String>,
) -> Result<Json<Payment>, BillingError> {
    let payment =
        with_conn(&state, move |conn| payments::find_by_transaction(conn, &transaction_id)).await?;
    ensure_visible(&state, &user, &payment)?;
    Ok(Json(payment))
}

pub async fn handle_complete_payment(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
    body: Option<Json<TransitionRequest>>,
) -> Result<Json<Payment>, BillingError> {
    state.policy.authorize(&user, Permission::ProcessPayments)?;
    let transaction_id = body.and_then(|Json(b)| b.transaction_id);
    let payment =
        with_conn(&state, move |conn| payments::mark_completed(conn, id, transaction_id)).await?;
    Ok(Json(payment))
}

pub async fn handle_fail_payment(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
    body: Option<Json<TransitionRequest>>,
) -> Result<Json<Payment>, BillingError> {
    state.policy.authorize(&user, Permission::ProcessPayments)?;
    let transaction_id = body.and_then(|Json(b)| b.transaction_id);
    let payment =
        with_conn(&state, move |conn| payments::mark_failed(conn, id, transaction_id)).await?;
    Ok(Json(payment))
}

pub async fn handle_refund_payment(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<Payment>, BillingError> {
    state.policy.authorize(&user, Permission::RefundPayments)?;
    let payment = with_conn(&state, move |conn| payments::mark_refunded(conn, id)).await?;
    Ok(Json(payment))
}

pub fn configure_billing_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/billing/payments",
            get(handle_list_payments).post(handle_record_payment),
        )
        .route("/api/billing/payments/:id", get(handle_get_payment))
        .route("/api/billing/payments/:id/complete", post(handle_complete_payment))
        .route("/api/billing/payments/:id/fail", post(handle_fail_payment))
        .route("/api/billing/payments/:id/refund", post(handle_refund_payment))
        .route(
            "/api/billing/transactions/:transaction_id",
            get(handle_get_by_transaction),
        )
}
