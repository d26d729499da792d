//! HTTP handlers for `/api/learn`.
//!
//! Every handler resolves the acting student, checks the policy table, then
//! runs the storage work on the blocking pool.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use diesel::PgConnection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::core::middleware::AuthenticatedUser;
use crate::core::rbac::Permission;
use crate::core::shared::state::AppState;
use crate::learn::error::LearnError;
use crate::learn::quiz::GradedQuiz;
use crate::learn::sequencer::LessonCompletionOutcome;
use crate::learn::types::{
    Certificate, CertificateVerification, Course, CreateCourseRequest, CreateLessonRequest,
    CreateQuizRequest, Enrollment, Lesson, LessonNavigation, LessonOutline, ProgressUpdate,
    QuizResult, QuizSubmission, SetProgressRequest, StudentRequest,
};
use crate::learn::{certificates, courses, enrollment, quiz, sequencer};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionResponse {
    pub result: QuizResult,
    pub grading: GradedQuiz,
}

async fn with_conn<T, F>(state: &AppState, f: F) -> Result<T, LearnError>
where
    T: Send + 'static,
    F: FnOnce(&mut PgConnection) -> Result<T, LearnError> + Send + 'static,
{
    let pool = state.conn.clone();
    tokio::task::spawn_blocking(move || -> Result<T, LearnError> {
        let mut conn = pool.get()?;
        f(&mut conn)
    })
    .await?
}

fn acting_for(user: &AuthenticatedUser, requested: Option<i64>) -> Result<i64, LearnError> {
    user.acting_for(requested).map_err(LearnError::Forbidden)
}

// ----- Courses -----

pub async fn handle_create_course(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<CreateCourseRequest>,
) -> Result<(StatusCode, Json<Course>), LearnError> {
    state.policy.authorize(&user, Permission::CreateCourses)?;
    let course = with_conn(&state, move |conn| {
        courses::create_course(conn, user.user_id, req)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(course)))
}

pub async fn handle_list_courses(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<Course>>, LearnError> {
    state.policy.authorize(&user, Permission::ViewCourses)?;
    let published_only = !user.role.is_staff();
    let list = with_conn(&state, move |conn| courses::list_courses(conn, published_only)).await?;
    Ok(Json(list))
}

pub async fn handle_get_course(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<Course>, LearnError> {
    state.policy.authorize(&user, Permission::ViewCourses)?;
    let course = with_conn(&state, move |conn| courses::get_course(conn, id)).await?;
    if !course.is_published && !user.role.is_staff() {
        return Err(LearnError::NotFound(format!("course {id}")));
    }
    Ok(Json(course))
}

pub async fn handle_publish_course(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<Course>, LearnError> {
    state.policy.authorize(&user, Permission::PublishCourses)?;
    let course = with_conn(&state, move |conn| courses::publish_course(conn, id)).await?;
    Ok(Json(course))
}

pub async fn handle_list_lessons(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<Vec<Lesson>>, LearnError> {
    state.policy.authorize(&user, Permission::ViewLessons)?;
    let lessons = with_conn(&state, move |conn| {
        courses::get_course(conn, id)?;
        courses::list_lessons(conn, id)
    })
    .await?;
    Ok(Json(lessons))
}

pub async fn handle_add_lesson(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
    Json(req): Json<CreateLessonRequest>,
) -> Result<(StatusCode, Json<Lesson>), LearnError> {
    state.policy.authorize(&user, Permission::CreateLessons)?;
    let lesson = with_conn(&state, move |conn| courses::add_lesson(conn, id, req)).await?;
    Ok((StatusCode::CREATED, Json(lesson)))
}

// ----- Enrollment & progress -----

pub async fn handle_enroll(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(course_id): Path<i64>,
    body: Option<Json<StudentRequest>>,
) -> Result<(StatusCode, Json<Enrollment>), LearnError> {
    let requested = body.and_then(|Json(b)| b.student_id);
    let student_id = acting_for(&user, requested)?;
    let permission = if student_id == user.user_id {
        Permission::EnrollCourses
    } else {
        Permission::CreateEnrollments
    };
    state.policy.authorize(&user, permission)?;

    let (enrollment, created) =
        with_conn(&state, move |conn| enrollment::enroll(conn, student_id, course_id)).await?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(enrollment)))
}

pub async fn handle_list_enrollments(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(query): Query<StudentRequest>,
) -> Result<Json<Vec<Enrollment>>, LearnError> {
    let student_id = acting_for(&user, query.student_id)?;
    if student_id != user.user_id {
        state.policy.authorize(&user, Permission::ViewEnrollments)?;
    }
    let list =
        with_conn(&state, move |conn| enrollment::list_for_student(conn, student_id)).await?;
    Ok(Json(list))
}

pub async fn handle_outline(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(course_id): Path<i64>,
    Query(query): Query<StudentRequest>,
) -> Result<Json<LessonOutline>, LearnError> {
    state.policy.authorize(&user, Permission::ViewLessons)?;
    let student_id = acting_for(&user, query.student_id)?;
    let outline = with_conn(&state, move |conn| {
        sequencer::lesson_outline(conn, student_id, course_id)
    })
    .await?;
    Ok(Json(outline))
}

pub async fn handle_set_progress(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(course_id): Path<i64>,
    Json(req): Json<SetProgressRequest>,
) -> Result<Json<ProgressUpdate>, LearnError> {
    state.policy.authorize(&user, Permission::EditCourses)?;
    let student_id = acting_for(&user, req.student_id)?;
    let events = state.events.clone();
    let update = with_conn(&state, move |conn| {
        enrollment::set_progress(conn, &events, student_id, course_id, req.percent)
    })
    .await?;
    Ok(Json(update))
}

pub async fn handle_mark_completed(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(course_id): Path<i64>,
    body: Option<Json<StudentRequest>>,
) -> Result<Json<ProgressUpdate>, LearnError> {
    state.policy.authorize(&user, Permission::EditCourses)?;
    let student_id = acting_for(&user, body.and_then(|Json(b)| b.student_id))?;
    let events = state.events.clone();
    let update = with_conn(&state, move |conn| {
        enrollment::mark_completed(conn, &events, student_id, course_id)
    })
    .await?;
    Ok(Json(update))
}

// ----- Lessons -----

pub async fn handle_complete_lesson(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(lesson_id): Path<i64>,
    body: Option<Json<StudentRequest>>,
) -> Result<Json<LessonCompletionOutcome>, LearnError> {
    state.policy.authorize(&user, Permission::ViewLessons)?;
    let student_id = acting_for(&user, body.and_then(|Json(b)| b.student_id))?;
    let events = state.events.clone();
    let outcome = with_conn(&state, move |conn| {
        sequencer::complete_lesson(conn, &events, student_id, lesson_id)
    })
    .await?;
    Ok(Json(outcome))
}

pub async fn handle_navigation(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(lesson_id): Path<i64>,
    Query(query): Query<StudentRequest>,
) -> Result<Json<LessonNavigation>, LearnError> {
    state.policy.authorize(&user, Permission::ViewLessons)?;
    let student_id = acting_for(&user, query.student_id)?;
    let nav = with_conn(&state, move |conn| {
        sequencer::navigation(conn, student_id, lesson_id)
    })
    .await?;
    Ok(Json(nav))
}

// ----- Quizzes -----

pub async fn handle_create_quiz(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(lesson_id): Path<i64>,
    Json(req): Json<CreateQuizRequest>,
) -> Result<(StatusCode, Json<quiz::Quiz>), LearnError> {
    state.policy.authorize(&user, Permission::CreateQuizzes)?;
    let created = with_conn(&state, move |conn| quiz::create_quiz(conn, lesson_id, req)).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn handle_get_quiz(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(quiz_id): Path<i64>,
) -> Result<Json<serde_json::Value>, LearnError> {
    state.policy.authorize(&user, Permission::ViewQuizzes)?;
    let found = with_conn(&state, move |conn| quiz::get_quiz(conn, quiz_id)).await?;
    if state.policy.is_allowed(user.role, Permission::EditQuizzes) {
        let full = serde_json::to_value(&found).map_err(|e| LearnError::Internal(e.to_string()))?;
        return Ok(Json(full));
    }
    Ok(Json(found.redacted()))
}

pub async fn handle_submit_quiz(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(quiz_id): Path<i64>,
    Json(submission): Json<QuizSubmission>,
) -> Result<Json<SubmissionResponse>, LearnError> {
    state.policy.authorize(&user, Permission::TakeQuizzes)?;
    let student_id = user.user_id;
    let default_passing_score = state.config.learn.default_passing_score;
    let (result, grading) = with_conn(&state, move |conn| {
        quiz::submit_quiz(conn, quiz_id, student_id, submission, default_passing_score)
    })
    .await?;
    Ok(Json(SubmissionResponse { result, grading }))
}

pub async fn handle_get_result(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(quiz_id): Path<i64>,
    Query(query): Query<StudentRequest>,
) -> Result<Json<QuizResult>, LearnError> {
    state.policy.authorize(&user, Permission::ViewQuizzes)?;
    let student_id = acting_for(&user, query.student_id)?;
    let result = with_conn(&state, move |conn| {
        quiz::get_quiz(conn, quiz_id)?;
        quiz::get_result(conn, quiz_id, student_id)?.ok_or_else(|| {
            LearnError::NotFound(format!("result of student {student_id} on quiz {quiz_id}"))
        })
    })
    .await?;
    Ok(Json(result))
}

// ----- Certificates -----

pub async fn handle_issue_certificate(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(course_id): Path<i64>,
    body: Option<Json<StudentRequest>>,
) -> Result<Json<Certificate>, LearnError> {
    state.policy.authorize(&user, Permission::GenerateCertificates)?;
    let student_id = acting_for(&user, body.and_then(|Json(b)| b.student_id))?;
    let config = state.config.learn.clone();
    let cert = with_conn(&state, move |conn| {
        certificates::issue_certificate(conn, &config, student_id, course_id)
    })
    .await?;
    Ok(Json(cert))
}

pub async fn handle_list_certificates(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(query): Query<StudentRequest>,
) -> Result<Json<Vec<Certificate>>, LearnError> {
    state.policy.authorize(&user, Permission::ViewCertificates)?;
    let student_id = acting_for(&user, query.student_id)?;
    let list = with_conn(&state, move |conn| {
        certificates::list_certificates(conn, student_id)
    })
    .await?;
    Ok(Json(list))
}

/// Public: anyone holding a certificate number may check it.
pub async fn handle_verify_certificate(
    State(state): State<Arc<AppState>>,
    Path(number): Path<String>,
) -> Result<Json<CertificateVerification>, LearnError> {
    let verification = with_conn(&state, move |conn| {
        certificates::verify_certificate(conn, &number)
    })
    .await?;
    Ok(Json(verification))
}
