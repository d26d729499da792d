//! Learn Module - course delivery for learnserver
//!
//! - Course catalogue with ordered lessons
//! - Enrollment and progress tracking
//! - Sequential lesson gating and navigation
//! - Quizzes with typed questions and server-side grading
//! - Certificates issued on course completion

pub mod certificates;
pub mod courses;
pub mod enrollment;
pub mod error;
pub mod events;
pub mod handlers;
pub mod quiz;
pub mod sequencer;
pub mod types;

use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;

use crate::core::shared::state::AppState;

pub use error::LearnError;
pub use events::{EventBus, LearnEvent};

// ============================================================================
// ROUTE CONFIGURATION
// ============================================================================

pub fn configure_learn_routes() -> Router<Arc<AppState>> {
    use handlers::*;

    Router::new()
        // Course routes
        .route(
            "/api/learn/courses",
            get(handle_list_courses).post(handle_create_course),
        )
        .route("/api/learn/courses/:id", get(handle_get_course))
        .route("/api/learn/courses/:id/publish", post(handle_publish_course))
        .route(
            "/api/learn/courses/:id/lessons",
            get(handle_list_lessons).post(handle_add_lesson),
        )
        // Enrollment & progress routes
        .route("/api/learn/courses/:id/enroll", post(handle_enroll))
        .route("/api/learn/courses/:id/outline", get(handle_outline))
        .route("/api/learn/courses/:id/progress", put(handle_set_progress))
        .route("/api/learn/courses/:id/complete", post(handle_mark_completed))
        .route("/api/learn/enrollments", get(handle_list_enrollments))
        // Lesson routes
        .route("/api/learn/lessons/:id/complete", post(handle_complete_lesson))
        .route("/api/learn/lessons/:id/navigation", get(handle_navigation))
        .route("/api/learn/lessons/:id/quiz", post(handle_create_quiz))
        // Quiz routes
        .route("/api/learn/quizzes/:id", get(handle_get_quiz))
        .route("/api/learn/quizzes/:id/submit", post(handle_submit_quiz))
        .route("/api/learn/quizzes/:id/result", get(handle_get_result))
        // Certificate routes
        .route(
            "/api/learn/courses/:id/certificate",
            post(handle_issue_certificate),
        )
        .route("/api/learn/certificates", get(handle_list_certificates))
        .route(
            "/api/learn/certificates/:number/verify",
            get(handle_verify_certificate),
        )
}

pub fn configure(router: Router<Arc<AppState>>) -> Router<Arc<AppState>> {
    router.merge(configure_learn_routes())
}
