//! Course payments and their status lifecycle.
//!
//! ```text
//! pending ──► completed ──► refunded
//!    │
//!    └──────► failed
//! ```

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::info;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::billing::BillingError;
use crate::core::shared::schema::billing::payments;
use crate::core::shared::schema::learn::courses;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Refunded)
    }

    pub fn can_transition_to(self, to: PaymentStatus) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Completed)
                | (Self::Pending, Self::Failed)
                | (Self::Completed, Self::Refunded)
        )
    }

    pub fn transition(self, to: PaymentStatus) -> Result<PaymentStatus, BillingError> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(BillingError::InvalidState(format!(
                "payment cannot move from {self} to {to}"
            )))
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "refunded" => Ok(Self::Refunded),
            other => Err(BillingError::Internal(format!(
                "unknown payment status {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable)]
#[diesel(table_name = payments)]
pub struct Payment {
    pub id: i64,
    pub student_id: i64,
    pub course_id: i64,
    pub amount: BigDecimal,
    pub payment_method: String,
    pub transaction_id: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn status(&self) -> Result<PaymentStatus, BillingError> {
        self.status.parse()
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = payments)]
struct NewPayment {
    student_id: i64,
    course_id: i64,
    amount: BigDecimal,
    payment_method: String,
    transaction_id: Option<String>,
    status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordPaymentRequest {
    pub student_id: Option<i64>,
    pub course_id: i64,
    pub amount: BigDecimal,
    pub payment_method: String,
    pub transaction_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub transaction_id: Option<String>,
}

fn rename_conflict(err: diesel::result::Error, transaction_id: Option<&str>) -> BillingError {
    match BillingError::from(err) {
        BillingError::Conflict(_) => BillingError::Conflict(format!(
            "transaction {} is already recorded",
            transaction_id.unwrap_or_default()
        )),
        other => other,
    }
}

/// Largest value a `NUMERIC(10, 2)` money column holds is just below this.
const MONEY_LIMIT: i64 = 100_000_000;

/// Checks a money value fits a `NUMERIC(10, 2)` column exactly and returns it
/// at scale 2.
pub fn money_amount(value: &BigDecimal, field: &str) -> Result<BigDecimal, String> {
    if *value < BigDecimal::from(0) {
        return Err(format!("{field} must not be negative, got {value}"));
    }
    if *value >= BigDecimal::from(MONEY_LIMIT) {
        return Err(format!("{field} must be below {MONEY_LIMIT}, got {value}"));
    }
    let scaled = value.with_scale(2);
    if scaled != *value {
        return Err(format!("{field} has more than two decimal places: {value}"));
    }
    Ok(scaled)
}

fn normalized_transaction_id(raw: Option<String>) -> Option<String> {
    raw.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}

pub fn record_payment(
    conn: &mut PgConnection,
    student_id: i64,
    req: RecordPaymentRequest,
) -> Result<Payment, BillingError> {
    let amount = money_amount(&req.amount, "amount").map_err(BillingError::InvalidArgument)?;
    let payment_method = req.payment_method.trim().to_string();
    if payment_method.is_empty() {
        return Err(BillingError::InvalidArgument(
            "payment_method is required".to_string(),
        ));
    }
    let transaction_id = normalized_transaction_id(req.transaction_id);

    conn.transaction(|conn| {
        let course_exists: i64 = courses::table
            .find(req.course_id)
            .count()
            .get_result(conn)?;
        if course_exists == 0 {
            return Err(BillingError::NotFound(format!("course {}", req.course_id)));
        }

        let payment: Payment = diesel::insert_into(payments::table)
            .values(&NewPayment {
                student_id,
                course_id: req.course_id,
                amount,
                payment_method,
                transaction_id: transaction_id.clone(),
                status: PaymentStatus::Pending.as_str().to_string(),
            })
            .get_result(conn)
            .map_err(|e| rename_conflict(e, transaction_id.as_deref()))?;

        info!(
            "Recorded pending payment {} of {} by student {} for course {}",
            payment.id, payment.amount, student_id, payment.course_id
        );
        Ok(payment)
    })
}

pub fn get_payment(conn: &mut PgConnection, payment_id: i64) -> Result<Payment, BillingError> {
    payments::table
        .find(payment_id)
        .first::<Payment>(conn)
        .optional()?
        .ok_or_else(|| BillingError::NotFound(format!("payment {payment_id}")))
}

pub fn find_by_transaction(
    conn: &mut PgConnection,
    transaction_id: &str,
) -> Result<Payment, BillingError> {
    payments::table
        .filter(payments::transaction_id.eq(transaction_id))
        .first::<Payment>(conn)
        .optional()?
        .ok_or_else(|| BillingError::NotFound(format!("transaction {transaction_id}")))
}

pub fn list_for_student(
    conn: &mut PgConnection,
    student_id: i64,
) -> Result<Vec<Payment>, BillingError> {
    Ok(payments::table
        .filter(payments::student_id.eq(student_id))
        .order(payments::created_at.desc())
        .load(conn)?)
}

pub fn has_completed_payment(
    conn: &mut PgConnection,
    student_id: i64,
    course_id: i64,
) -> Result<bool, BillingError> {
    let completed: i64 = payments::table
        .filter(payments::student_id.eq(student_id))
        .filter(payments::course_id.eq(course_id))
        .filter(payments::status.eq(PaymentStatus::Completed.as_str()))
        .count()
        .get_result(conn)?;
    Ok(completed > 0)
}

fn transition(
    conn: &mut PgConnection,
    payment_id: i64,
    to: PaymentStatus,
    transaction_id: Option<String>,
) -> Result<Payment, BillingError> {
    let transaction_id = normalized_transaction_id(transaction_id);

    conn.transaction(|conn| {
        let current: Payment = payments::table
            .find(payment_id)
            .for_update()
            .first(conn)
            .optional()?
            .ok_or_else(|| BillingError::NotFound(format!("payment {payment_id}")))?;
        let from = current.status()?;
        let next = from.transition(to)?;

        let updated: Payment = diesel::update(payments::table.find(payment_id))
            .set((
                payments::status.eq(next.as_str()),
                payments::transaction_id.eq(transaction_id.clone().or(current.transaction_id)),
                payments::updated_at.eq(Utc::now()),
            ))
            .get_result(conn)
            .map_err(|e| rename_conflict(e, transaction_id.as_deref()))?;

        info!("Payment {} moved from {} to {}", payment_id, from, next);
        Ok(updated)
    })
}

pub fn mark_completed(
    conn: &mut PgConnection,
    payment_id: i64,
    transaction_id: Option<String>,
) -> Result<Payment, BillingError> {
    transition(conn, payment_id, PaymentStatus::Completed, transaction_id)
}

pub fn mark_failed(
    conn: &mut PgConnection,
    payment_id: i64,
    transaction_id: Option<String>,
) -> Result<Payment, BillingError> {
    transition(conn, payment_id, PaymentStatus::Failed, transaction_id)
}

pub fn mark_refunded(conn: &mut PgConnection, payment_id: i64) -> Result<Payment, BillingError> {
    transition(conn, payment_id, PaymentStatus::Refunded, None)
}
