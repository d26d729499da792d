//! Enrollment tracking: one row per (student, course) holding progress 0..=100
//! and the completion timestamp, which is set exactly when progress is 100.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::{debug, info};

use crate::billing::payments;
use crate::core::shared::schema::learn::{enrollments, lessons};
use crate::learn::courses;
use crate::learn::error::LearnError;
use crate::learn::events::{EventBus, LearnEvent};
use crate::learn::types::{Enrollment, NewEnrollment, ProgressUpdate};

pub const COMPLETE: i32 = 100;

pub fn clamp_percent(percent: i64) -> i32 {
    percent.clamp(0, i64::from(COMPLETE)) as i32
}

/// Share of completed lessons as a whole percentage, rounded half up.
///
/// Only a fully completed course reports 100; anything short of that is
/// capped at 99.
pub fn completion_percent(completed: usize, total: usize) -> i32 {
    if total == 0 {
        return 0;
    }
    if completed >= total {
        return COMPLETE;
    }
    let completed = completed as u64;
    let total = total as u64;
    (((200 * completed + total) / (2 * total)) as i32).min(COMPLETE - 1)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressPlan {
    pub progress: i32,
    pub completed_at: Option<DateTime<Utc>>,
    pub newly_completed: bool,
}

impl ProgressPlan {
    pub fn changes(&self, enrollment: &Enrollment) -> bool {
        self.progress != enrollment.progress || self.completed_at != enrollment.completed_at
    }
}

/// Store `target` as-is; the completion stamp follows the value.
pub fn plan_set(enrollment: &Enrollment, target: i32, now: DateTime<Utc>) -> ProgressPlan {
    if target >= COMPLETE {
        ProgressPlan {
            progress: COMPLETE,
            completed_at: enrollment.completed_at.or(Some(now)),
            newly_completed: enrollment.completed_at.is_none(),
        }
    } else {
        ProgressPlan {
            progress: target.max(0),
            completed_at: None,
            newly_completed: false,
        }
    }
}

/// Like [`plan_set`] but never moves progress backwards.
pub fn plan_advance(enrollment: &Enrollment, target: i32, now: DateTime<Utc>) -> ProgressPlan {
    plan_set(enrollment, target.max(enrollment.progress), now)
}

pub fn get_enrollment(
    conn: &mut PgConnection,
    student_id: i64,
    course_id: i64,
) -> Result<Option<Enrollment>, LearnError> {
    Ok(enrollments::table
        .filter(enrollments::student_id.eq(student_id))
        .filter(enrollments::course_id.eq(course_id))
        .first::<Enrollment>(conn)
        .optional()?)
}

pub fn require_enrollment(
    conn: &mut PgConnection,
    student_id: i64,
    course_id: i64,
) -> Result<Enrollment, LearnError> {
    get_enrollment(conn, student_id, course_id)?.ok_or_else(|| {
        LearnError::PreconditionFailed(format!(
            "student {student_id} is not enrolled in course {course_id}"
        ))
    })
}

fn lock_enrollment(
    conn: &mut PgConnection,
    student_id: i64,
    course_id: i64,
) -> Result<Option<Enrollment>, LearnError> {
    Ok(enrollments::table
        .filter(enrollments::student_id.eq(student_id))
        .filter(enrollments::course_id.eq(course_id))
        .for_update()
        .first::<Enrollment>(conn)
        .optional()?)
}

pub fn list_for_student(
    conn: &mut PgConnection,
    student_id: i64,
) -> Result<Vec<Enrollment>, LearnError> {
    Ok(enrollments::table
        .filter(enrollments::student_id.eq(student_id))
        .order(enrollments::created_at.asc())
        .load(conn)?)
}

/// Returns the enrollment and whether this call created it.
pub fn enroll(
    conn: &mut PgConnection,
    student_id: i64,
    course_id: i64,
) -> Result<(Enrollment, bool), LearnError> {
    conn.transaction(|conn| {
        let course = courses::get_course(conn, course_id)?;
        if !course.is_published {
            return Err(LearnError::PreconditionFailed(format!(
                "course {course_id} is not published"
            )));
        }
        if course.price > BigDecimal::from(0)
            && !payments::has_completed_payment(conn, student_id, course_id)?
        {
            return Err(LearnError::PreconditionFailed(format!(
                "course {course_id} requires a completed payment"
            )));
        }

        let inserted = diesel::insert_into(enrollments::table)
            .values(&NewEnrollment {
                student_id,
                course_id,
                progress: 0,
                completed_at: None,
            })
            .on_conflict((enrollments::student_id, enrollments::course_id))
            .do_nothing()
            .execute(conn)?;

        let enrollment = get_enrollment(conn, student_id, course_id)?.ok_or_else(|| {
            LearnError::Internal(format!(
                "enrollment for student {student_id} in course {course_id} vanished"
            ))
        })?;
        if inserted > 0 {
            info!("Student {} enrolled in course {}", student_id, course_id);
        }
        Ok((enrollment, inserted > 0))
    })
}

fn lesson_count(conn: &mut PgConnection, course_id: i64) -> Result<i64, LearnError> {
    Ok(lessons::table
        .filter(lessons::course_id.eq(course_id))
        .count()
        .get_result(conn)?)
}

/// Write a plan to a row already locked by the caller's transaction.
pub(crate) fn apply_plan(
    conn: &mut PgConnection,
    enrollment: Enrollment,
    plan: ProgressPlan,
) -> Result<ProgressUpdate, LearnError> {
    if plan.progress == COMPLETE && plan.newly_completed && lesson_count(conn, enrollment.course_id)? == 0 {
        return Err(LearnError::PreconditionFailed(format!(
            "course {} has no lessons and cannot be completed",
            enrollment.course_id
        )));
    }
    if !plan.changes(&enrollment) {
        debug!(
            "Progress for student {} in course {} unchanged at {}",
            enrollment.student_id, enrollment.course_id, enrollment.progress
        );
        return Ok(ProgressUpdate {
            enrollment,
            newly_completed: false,
        });
    }

    let updated: Enrollment = diesel::update(enrollments::table.find(enrollment.id))
        .set((
            enrollments::progress.eq(plan.progress),
            enrollments::completed_at.eq(plan.completed_at),
            enrollments::updated_at.eq(Utc::now()),
        ))
        .get_result(conn)?;

    info!(
        "Progress for student {} in course {}: {} -> {}",
        updated.student_id, updated.course_id, enrollment.progress, updated.progress
    );
    Ok(ProgressUpdate {
        enrollment: updated,
        newly_completed: plan.newly_completed,
    })
}

/// Raise progress inside an open transaction; the caller publishes completion.
pub(crate) fn advance_progress(
    conn: &mut PgConnection,
    student_id: i64,
    course_id: i64,
    percent: i32,
) -> Result<ProgressUpdate, LearnError> {
    let enrollment = lock_enrollment(conn, student_id, course_id)?.ok_or_else(|| {
        LearnError::PreconditionFailed(format!(
            "student {student_id} is not enrolled in course {course_id}"
        ))
    })?;
    let plan = plan_advance(&enrollment, percent, Utc::now());
    apply_plan(conn, enrollment, plan)
}

pub(crate) fn publish_if_completed(events: &EventBus, update: &ProgressUpdate) {
    if update.newly_completed {
        events.publish(LearnEvent::CourseCompleted {
            student_id: update.enrollment.student_id,
            course_id: update.enrollment.course_id,
        });
    }
}

pub fn set_progress(
    conn: &mut PgConnection,
    events: &EventBus,
    student_id: i64,
    course_id: i64,
    percent: i64,
) -> Result<ProgressUpdate, LearnError> {
    let update = conn.transaction(|conn| {
        let enrollment = lock_enrollment(conn, student_id, course_id)?.ok_or_else(|| {
            LearnError::InvalidArgument(format!(
                "no enrollment for student {student_id} in course {course_id}"
            ))
        })?;
        let plan = plan_set(&enrollment, clamp_percent(percent), Utc::now());
        apply_plan(conn, enrollment, plan)
    })?;
    publish_if_completed(events, &update);
    Ok(update)
}

pub fn mark_completed(
    conn: &mut PgConnection,
    events: &EventBus,
    student_id: i64,
    course_id: i64,
) -> Result<ProgressUpdate, LearnError> {
    let update = conn.transaction(|conn| {
        let enrollment = lock_enrollment(conn, student_id, course_id)?.ok_or_else(|| {
            LearnError::NotFound(format!(
                "enrollment for student {student_id} in course {course_id}"
            ))
        })?;
        let plan = plan_set(&enrollment, COMPLETE, Utc::now());
        apply_plan(conn, enrollment, plan)
    })?;
    publish_if_completed(events, &update);
    Ok(update)
}
