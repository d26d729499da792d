//! Types for the Learn module (LMS)
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::core::shared::schema::learn::*;
use crate::learn::quiz::{Question, SubmittedAnswer};

// ============================================================================
// DATA MODELS
// ============================================================================

// ----- Course Models -----

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable)]
#[diesel(table_name = courses)]
pub struct Course {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub description: Option<String>,
    pub price: BigDecimal,
    pub is_published: bool,
    pub teacher_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = courses)]
pub struct NewCourse {
    pub title: String,
    pub slug: String,
    pub description: Option<String>,
    pub price: BigDecimal,
    pub is_published: bool,
    pub teacher_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCourseRequest {
    pub title: String,
    pub slug: Option<String>,
    pub description: Option<String>,
    pub price: Option<BigDecimal>,
    pub teacher_id: Option<i64>,
}

// ----- Lesson Models -----

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable)]
#[diesel(table_name = lessons)]
pub struct Lesson {
    pub id: i64,
    pub course_id: i64,
    pub title: String,
    pub content: Option<String>,
    pub video_url: Option<String>,
    pub file_url: Option<String>,
    pub duration_minutes: i32,
    pub lesson_order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = lessons)]
pub struct NewLesson {
    pub course_id: i64,
    pub title: String,
    pub content: Option<String>,
    pub video_url: Option<String>,
    pub file_url: Option<String>,
    pub duration_minutes: i32,
    pub lesson_order: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateLessonRequest {
    pub title: String,
    pub content: Option<String>,
    pub video_url: Option<String>,
    pub file_url: Option<String>,
    pub duration_minutes: Option<i32>,
    pub order: Option<i32>,
}

/// One lesson as seen by a particular student.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LessonStatus {
    pub id: i64,
    pub title: String,
    pub order: i32,
    pub duration_minutes: i32,
    pub has_quiz: bool,
    pub completed: bool,
    pub locked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonOutline {
    pub course_id: i64,
    pub student_id: i64,
    pub progress: i32,
    pub lessons: Vec<LessonStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LessonNavigation {
    pub lesson_id: i64,
    pub previous: Option<i64>,
    pub next: Option<i64>,
    pub unlocked: bool,
    pub completed: bool,
}

// ----- Progress Models -----

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable)]
#[diesel(table_name = enrollments)]
pub struct Enrollment {
    pub id: i64,
    pub student_id: i64,
    pub course_id: i64,
    pub progress: i32,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = enrollments)]
pub struct NewEnrollment {
    pub student_id: i64,
    pub course_id: i64,
    pub progress: i32,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable)]
#[diesel(table_name = lesson_completions)]
pub struct LessonCompletion {
    pub id: i64,
    pub student_id: i64,
    pub lesson_id: i64,
    pub completed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = lesson_completions)]
pub struct NewLessonCompletion {
    pub student_id: i64,
    pub lesson_id: i64,
    pub completed_at: DateTime<Utc>,
}

/// Outcome of a write to an enrollment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub enrollment: Enrollment,
    /// True only for the write that moved the enrollment to 100%.
    pub newly_completed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StudentRequest {
    pub student_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetProgressRequest {
    pub student_id: Option<i64>,
    pub percent: i64,
}

// ----- Quiz Models -----

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable)]
#[diesel(table_name = quizzes)]
pub struct QuizRow {
    pub id: i64,
    pub lesson_id: i64,
    pub title: String,
    pub passing_score: Option<i32>,
    pub max_attempts: Option<i32>,
    pub questions: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = quizzes)]
pub struct NewQuiz {
    pub lesson_id: i64,
    pub title: String,
    pub passing_score: Option<i32>,
    pub max_attempts: Option<i32>,
    pub questions: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateQuizRequest {
    pub title: String,
    pub passing_score: Option<i32>,
    pub max_attempts: Option<i32>,
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizSubmission {
    pub answers: HashMap<String, SubmittedAnswer>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable)]
#[diesel(table_name = quiz_results)]
pub struct QuizResult {
    pub id: i64,
    pub quiz_id: i64,
    pub student_id: i64,
    pub answer: serde_json::Value,
    pub breakdown: serde_json::Value,
    pub is_correct: bool,
    pub score_obtained: i32,
    pub score: i32,
    pub passed: bool,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = quiz_results)]
pub struct NewQuizResult {
    pub quiz_id: i64,
    pub student_id: i64,
    pub answer: serde_json::Value,
    pub breakdown: serde_json::Value,
    pub is_correct: bool,
    pub score_obtained: i32,
    pub score: i32,
    pub passed: bool,
    pub attempts: i32,
}

// ----- Certificate Models -----

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable)]
#[diesel(table_name = certificates)]
pub struct Certificate {
    pub id: i64,
    pub student_id: i64,
    pub course_id: i64,
    pub certificate_number: String,
    pub pdf_url: Option<String>,
    pub issue_date: NaiveDate,
    pub expiry_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Certificate {
    pub fn is_expired_on(&self, today: NaiveDate) -> bool {
        self.expiry_date.is_some_and(|expiry| expiry < today)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_on(Utc::now().date_naive())
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = certificates)]
pub struct NewCertificate {
    pub student_id: i64,
    pub course_id: i64,
    pub certificate_number: String,
    pub pdf_url: Option<String>,
    pub issue_date: NaiveDate,
    pub expiry_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateVerification {
    pub is_valid: bool,
    pub is_expired: bool,
    pub certificate: Option<Certificate>,
    pub message: String,
}
