//! Lesson sequencing and gating.
//!
//! Lessons of a course form a strict line ordered by `lesson_order`. A lesson
//! is unlocked when every lesson before it has a completion record for the
//! student; completion records are the only source of truth for this.

use chrono::Utc;
use diesel::prelude::*;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::core::shared::schema::learn::{lesson_completions, lessons};
use crate::learn::error::LearnError;
use crate::learn::events::EventBus;
use crate::learn::types::{
    Lesson, LessonCompletion, LessonNavigation, LessonOutline, LessonStatus, NewLessonCompletion,
    ProgressUpdate,
};
use crate::learn::{courses, enrollment, quiz};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LessonSequence {
    ids: Vec<i64>,
}

impl LessonSequence {
    /// `lessons` must already be sorted by order.
    pub fn new(lessons: &[Lesson]) -> Self {
        Self {
            ids: lessons.iter().map(|l| l.id).collect(),
        }
    }

    pub fn from_ids(ids: Vec<i64>) -> Self {
        Self { ids }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn position(&self, lesson_id: i64) -> Option<usize> {
        self.ids.iter().position(|&id| id == lesson_id)
    }

    pub fn next(&self, lesson_id: i64) -> Option<i64> {
        let pos = self.position(lesson_id)?;
        self.ids.get(pos + 1).copied()
    }

    pub fn previous(&self, lesson_id: i64) -> Option<i64> {
        let pos = self.position(lesson_id)?;
        pos.checked_sub(1).and_then(|p| self.ids.get(p).copied())
    }

    /// First earlier lesson that is still incomplete, if any.
    pub fn blocker(&self, lesson_id: i64, completed: &HashSet<i64>) -> Option<i64> {
        let pos = self.position(lesson_id)?;
        self.ids[..pos]
            .iter()
            .copied()
            .find(|id| !completed.contains(id))
    }

    pub fn is_unlocked(&self, lesson_id: i64, completed: &HashSet<i64>) -> bool {
        self.position(lesson_id).is_some() && self.blocker(lesson_id, completed).is_none()
    }

    pub fn unlocked(&self, completed: &HashSet<i64>) -> Vec<i64> {
        self.ids
            .iter()
            .copied()
            .filter(|&id| self.is_unlocked(id, completed))
            .collect()
    }

    pub fn completed_count(&self, completed: &HashSet<i64>) -> usize {
        self.ids.iter().filter(|id| completed.contains(id)).count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonCompletionOutcome {
    pub completion: LessonCompletion,
    /// The lesson had already been completed before this call.
    pub already_completed: bool,
    pub progress: ProgressUpdate,
}

pub fn completed_lesson_ids(
    conn: &mut PgConnection,
    student_id: i64,
    course_id: i64,
) -> Result<HashSet<i64>, LearnError> {
    let ids: Vec<i64> = lesson_completions::table
        .inner_join(lessons::table)
        .filter(lesson_completions::student_id.eq(student_id))
        .filter(lessons::course_id.eq(course_id))
        .select(lesson_completions::lesson_id)
        .load(conn)?;
    Ok(ids.into_iter().collect())
}

fn load_sequence(conn: &mut PgConnection, course_id: i64) -> Result<(Vec<Lesson>, LessonSequence), LearnError> {
    let lessons = courses::list_lessons(conn, course_id)?;
    let sequence = LessonSequence::new(&lessons);
    Ok((lessons, sequence))
}

pub fn require_unlocked(
    conn: &mut PgConnection,
    student_id: i64,
    lesson: &Lesson,
) -> Result<(), LearnError> {
    let (_, sequence) = load_sequence(conn, lesson.course_id)?;
    let completed = completed_lesson_ids(conn, student_id, lesson.course_id)?;
    match sequence.blocker(lesson.id, &completed) {
        Some(blocking) => Err(LearnError::PreconditionFailed(format!(
            "lesson {} is locked until lesson {} is completed",
            lesson.id, blocking
        ))),
        None => Ok(()),
    }
}

pub fn complete_lesson(
    conn: &mut PgConnection,
    events: &EventBus,
    student_id: i64,
    lesson_id: i64,
) -> Result<LessonCompletionOutcome, LearnError> {
    let outcome = conn.transaction(|conn| {
        let lesson = courses::get_lesson(conn, lesson_id)?;
        enrollment::require_enrollment(conn, student_id, lesson.course_id)?;
        require_unlocked(conn, student_id, &lesson)?;

        if let Some(quiz_id) = quiz::quiz_ids_for_lessons(conn, &[lesson.id])?.get(&lesson.id) {
            if !quiz::has_passing_result(conn, *quiz_id, student_id)? {
                return Err(LearnError::PreconditionFailed(format!(
                    "lesson {} requires a passing result on quiz {}",
                    lesson.id, quiz_id
                )));
            }
        }

        let inserted = diesel::insert_into(lesson_completions::table)
            .values(&NewLessonCompletion {
                student_id,
                lesson_id,
                completed_at: Utc::now(),
            })
            .on_conflict((lesson_completions::student_id, lesson_completions::lesson_id))
            .do_nothing()
            .execute(conn)?;

        let completion: LessonCompletion = lesson_completions::table
            .filter(lesson_completions::student_id.eq(student_id))
            .filter(lesson_completions::lesson_id.eq(lesson_id))
            .first(conn)?;

        let (_, sequence) = load_sequence(conn, lesson.course_id)?;
        let completed = completed_lesson_ids(conn, student_id, lesson.course_id)?;
        let percent =
            enrollment::completion_percent(sequence.completed_count(&completed), sequence.len());
        let progress = enrollment::advance_progress(conn, student_id, lesson.course_id, percent)?;

        if inserted > 0 {
            info!(
                "Student {} completed lesson {} in course {} ({}%)",
                student_id, lesson_id, lesson.course_id, progress.enrollment.progress
            );
        } else {
            debug!("Student {} re-completed lesson {}", student_id, lesson_id);
        }

        Ok(LessonCompletionOutcome {
            completion,
            already_completed: inserted == 0,
            progress,
        })
    })?;

    enrollment::publish_if_completed(events, &outcome.progress);
    Ok(outcome)
}

pub fn lesson_outline(
    conn: &mut PgConnection,
    student_id: i64,
    course_id: i64,
) -> Result<LessonOutline, LearnError> {
    courses::get_course(conn, course_id)?;
    let enrollment = enrollment::require_enrollment(conn, student_id, course_id)?;
    let (lessons, sequence) = load_sequence(conn, course_id)?;
    let completed = completed_lesson_ids(conn, student_id, course_id)?;
    let lesson_ids: Vec<i64> = lessons.iter().map(|l| l.id).collect();
    let quizzes: HashMap<i64, i64> = quiz::quiz_ids_for_lessons(conn, &lesson_ids)?;

    let lessons = lessons
        .into_iter()
        .map(|l| LessonStatus {
            completed: completed.contains(&l.id),
            locked: !sequence.is_unlocked(l.id, &completed),
            has_quiz: quizzes.contains_key(&l.id),
            id: l.id,
            title: l.title,
            order: l.lesson_order,
            duration_minutes: l.duration_minutes,
        })
        .collect();

    Ok(LessonOutline {
        course_id,
        student_id,
        progress: enrollment.progress,
        lessons,
    })
}

pub fn navigation(
    conn: &mut PgConnection,
    student_id: i64,
    lesson_id: i64,
) -> Result<LessonNavigation, LearnError> {
    let lesson = courses::get_lesson(conn, lesson_id)?;
    let (_, sequence) = load_sequence(conn, lesson.course_id)?;
    let completed = completed_lesson_ids(conn, student_id, lesson.course_id)?;
    Ok(LessonNavigation {
        lesson_id,
        previous: sequence.previous(lesson_id),
        next: sequence.next(lesson_id),
        unlocked: sequence.is_unlocked(lesson_id, &completed),
        completed: completed.contains(&lesson_id),
    })
}
