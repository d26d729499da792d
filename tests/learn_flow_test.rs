//! End-to-end flows against a real PostgreSQL database.
//!
//! Set `DATABASE_URL` to run these; without a reachable database every test
//! prints a notice and returns.

use bigdecimal::BigDecimal;
use diesel::PgConnection;
use std::collections::HashMap;
use uuid::Uuid;

use learnserver::billing::payments::{self, PaymentStatus, RecordPaymentRequest};
use learnserver::billing::BillingError;
use learnserver::core::config::{DatabaseConfig, LearnConfig};
use learnserver::core::shared::utils::{create_conn, establish_pg_connection, run_migrations, DbPool};
use learnserver::learn::events::{EventBus, LearnEvent};
use learnserver::learn::quiz::{self, SubmittedAnswer};
use learnserver::learn::types::{
    CreateCourseRequest, CreateLessonRequest, CreateQuizRequest, Lesson, QuizSubmission,
};
use learnserver::learn::{certificates, courses, enrollment, sequencer, LearnError};

const TEACHER: i64 = 1;

fn test_pool() -> Option<DbPool> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping database test");
        return None;
    };
    let config = DatabaseConfig {
        url,
        max_connections: 4,
        connect_timeout_secs: 5,
        run_migrations: true,
    };
    if let Err(e) = establish_pg_connection(&config) {
        eprintln!("Database unavailable ({e}), skipping");
        return None;
    }
    let pool = create_conn(&config).ok()?;
    run_migrations(&pool).ok()?;
    Some(pool)
}

fn unique_id() -> i64 {
    (Uuid::new_v4().as_u64_pair().0 >> 2) as i64
}

fn course(conn: &mut PgConnection, price: Option<i64>) -> i64 {
    let created = courses::create_course(
        conn,
        TEACHER,
        CreateCourseRequest {
            title: format!("Course {}", Uuid::new_v4()),
            slug: None,
            description: Some("test course".to_string()),
            price: price.map(BigDecimal::from),
            teacher_id: None,
        },
    )
    .unwrap();
    created.id
}

fn lesson(conn: &mut PgConnection, course_id: i64, title: &str) -> Lesson {
    courses::add_lesson(
        conn,
        course_id,
        CreateLessonRequest {
            title: title.to_string(),
            content: Some(format!("{title} content")),
            video_url: None,
            file_url: None,
            duration_minutes: Some(10),
            order: None,
        },
    )
    .unwrap()
}

fn two_question_quiz() -> CreateQuizRequest {
    serde_json::from_value(serde_json::json!({
        "title": "Checkpoint",
        "questions": [
            {"id": "Q1", "text": "first", "points": 5, "type": "single_choice",
             "options": [{"id": "x", "text": "X"}, {"id": "y", "text": "Y"}, {"id": "z", "text": "Z"}],
             "correct": "x"},
            {"id": "Q2", "text": "second", "points": 5, "type": "single_choice",
             "options": [{"id": "x", "text": "X"}, {"id": "y", "text": "Y"}, {"id": "z", "text": "Z"}],
             "correct": "y"}
        ]
    }))
    .unwrap()
}

fn answers(q1: &str, q2: &str) -> QuizSubmission {
    QuizSubmission {
        answers: HashMap::from([
            ("Q1".to_string(), SubmittedAnswer::Text(q1.to_string())),
            ("Q2".to_string(), SubmittedAnswer::Text(q2.to_string())),
        ]),
    }
}

#[test]
fn test_full_course_flow() {
    let Some(pool) = test_pool() else { return };
    let conn = &mut pool.get().unwrap();
    let events = EventBus::new();
    let mut rx = events.subscribe();
    let student = unique_id();
    let learn_config = LearnConfig::default();

    let course_id = course(conn, None);
    let a = lesson(conn, course_id, "A");
    let b = lesson(conn, course_id, "B");
    let c = lesson(conn, course_id, "C");
    assert_eq!((a.lesson_order, b.lesson_order, c.lesson_order), (1, 2, 3));
    let checkpoint = quiz::create_quiz(conn, b.id, two_question_quiz()).unwrap();

    assert!(matches!(
        enrollment::enroll(conn, student, course_id),
        Err(LearnError::PreconditionFailed(_))
    ));
    courses::publish_course(conn, course_id).unwrap();
    let (_, created) = enrollment::enroll(conn, student, course_id).unwrap();
    assert!(created);
    let (again, created) = enrollment::enroll(conn, student, course_id).unwrap();
    assert!(!created);
    assert_eq!(again.progress, 0);

    assert!(matches!(
        sequencer::complete_lesson(conn, &events, student, c.id),
        Err(LearnError::PreconditionFailed(_))
    ));

    let first = sequencer::complete_lesson(conn, &events, student, a.id).unwrap();
    assert!(!first.already_completed);
    assert_eq!(first.progress.enrollment.progress, 33);
    let repeat = sequencer::complete_lesson(conn, &events, student, a.id).unwrap();
    assert!(repeat.already_completed);
    assert_eq!(repeat.progress.enrollment.progress, 33);

    let outline = sequencer::lesson_outline(conn, student, course_id).unwrap();
    let locked: Vec<bool> = outline.lessons.iter().map(|l| l.locked).collect();
    assert_eq!(locked, vec![false, false, true]);
    assert!(outline.lessons[1].has_quiz);

    let nav = sequencer::navigation(conn, student, b.id).unwrap();
    assert_eq!(nav.previous, Some(a.id));
    assert_eq!(nav.next, Some(c.id));
    assert!(nav.unlocked);

    assert!(matches!(
        sequencer::complete_lesson(conn, &events, student, b.id),
        Err(LearnError::PreconditionFailed(_))
    ));

    let (result, graded) =
        quiz::submit_quiz(conn, checkpoint.id, student, answers("x", "z"), 70).unwrap();
    assert_eq!(graded.score, 50);
    assert!(!graded.passed);
    assert_eq!(result.attempts, 1);

    let (result, graded) =
        quiz::submit_quiz(conn, checkpoint.id, student, answers("x", "y"), 70).unwrap();
    assert_eq!(graded.score, 100);
    assert!(result.passed);
    assert_eq!(result.attempts, 2);
    let stored = quiz::get_result(conn, checkpoint.id, student).unwrap().unwrap();
    assert_eq!(stored.id, result.id);

    let second = sequencer::complete_lesson(conn, &events, student, b.id).unwrap();
    assert_eq!(second.progress.enrollment.progress, 67);
    assert!(matches!(
        certificates::issue_certificate(conn, &learn_config, student, course_id),
        Err(LearnError::PreconditionFailed(_))
    ));
    assert!(rx.try_recv().is_err());

    let last = sequencer::complete_lesson(conn, &events, student, c.id).unwrap();
    assert_eq!(last.progress.enrollment.progress, 100);
    assert!(last.progress.newly_completed);
    assert!(last.progress.enrollment.completed_at.is_some());
    assert_eq!(
        rx.try_recv().unwrap(),
        LearnEvent::CourseCompleted {
            student_id: student,
            course_id
        }
    );

    let cert = certificates::issue_certificate(conn, &learn_config, student, course_id).unwrap();
    assert!(certificates::is_well_formed_number(&cert.certificate_number));
    let same = certificates::issue_certificate(conn, &learn_config, student, course_id).unwrap();
    assert_eq!(same.certificate_number, cert.certificate_number);

    let verification = certificates::verify_certificate(conn, &cert.certificate_number).unwrap();
    assert!(verification.is_valid);
    let missing = certificates::verify_certificate(conn, "CERT-20000101-000000000000").unwrap();
    assert!(!missing.is_valid);
}

#[test]
fn test_progress_overrides() {
    let Some(pool) = test_pool() else { return };
    let conn = &mut pool.get().unwrap();
    let events = EventBus::new();
    let mut rx = events.subscribe();
    let student = unique_id();

    let course_id = course(conn, None);
    lesson(conn, course_id, "Only lesson");
    courses::publish_course(conn, course_id).unwrap();

    assert!(matches!(
        enrollment::set_progress(conn, &events, student, course_id, 50),
        Err(LearnError::InvalidArgument(_))
    ));

    enrollment::enroll(conn, student, course_id).unwrap();
    let low = enrollment::set_progress(conn, &events, student, course_id, -20).unwrap();
    assert_eq!(low.enrollment.progress, 0);
    let high = enrollment::set_progress(conn, &events, student, course_id, 250).unwrap();
    assert_eq!(high.enrollment.progress, 100);
    assert!(high.newly_completed);
    let stamped = high.enrollment.completed_at;
    assert!(stamped.is_some());
    assert!(rx.try_recv().is_ok());

    let again = enrollment::mark_completed(conn, &events, student, course_id).unwrap();
    assert!(!again.newly_completed);
    assert_eq!(again.enrollment.completed_at, stamped);
    assert!(rx.try_recv().is_err());

    let lowered = enrollment::set_progress(conn, &events, student, course_id, 80).unwrap();
    assert_eq!(lowered.enrollment.progress, 80);
    assert!(lowered.enrollment.completed_at.is_none());
}

#[test]
fn test_empty_course_cannot_complete() {
    let Some(pool) = test_pool() else { return };
    let conn = &mut pool.get().unwrap();
    let events = EventBus::new();
    let student = unique_id();

    let course_id = course(conn, None);
    courses::publish_course(conn, course_id).unwrap();
    enrollment::enroll(conn, student, course_id).unwrap();

    assert!(matches!(
        enrollment::mark_completed(conn, &events, student, course_id),
        Err(LearnError::PreconditionFailed(_))
    ));
    let outline = sequencer::lesson_outline(conn, student, course_id).unwrap();
    assert!(outline.lessons.is_empty());
}

#[test]
fn test_duplicate_lesson_order_conflicts() {
    let Some(pool) = test_pool() else { return };
    let conn = &mut pool.get().unwrap();
    let course_id = course(conn, None);
    lesson(conn, course_id, "First");

    let clash = courses::add_lesson(
        conn,
        course_id,
        CreateLessonRequest {
            title: "Also first".to_string(),
            content: None,
            video_url: None,
            file_url: None,
            duration_minutes: None,
            order: Some(1),
        },
    );
    assert!(matches!(clash, Err(LearnError::Conflict(_))));
}

#[test]
fn test_paid_course_and_payment_lifecycle() {
    let Some(pool) = test_pool() else { return };
    let conn = &mut pool.get().unwrap();
    let student = unique_id();

    let course_id = course(conn, Some(49));
    lesson(conn, course_id, "Paid lesson");
    courses::publish_course(conn, course_id).unwrap();

    assert!(matches!(
        enrollment::enroll(conn, student, course_id),
        Err(LearnError::PreconditionFailed(_))
    ));

    let negative = payments::record_payment(
        conn,
        student,
        RecordPaymentRequest {
            student_id: None,
            course_id,
            amount: BigDecimal::from(-1),
            payment_method: "card".to_string(),
            transaction_id: None,
        },
    );
    assert!(matches!(negative, Err(BillingError::InvalidArgument(_))));

    let payment = payments::record_payment(
        conn,
        student,
        RecordPaymentRequest {
            student_id: None,
            course_id,
            amount: BigDecimal::from(49),
            payment_method: "card".to_string(),
            transaction_id: None,
        },
    )
    .unwrap();
    assert_eq!(payment.status().unwrap(), PaymentStatus::Pending);

    assert!(matches!(
        payments::mark_refunded(conn, payment.id),
        Err(BillingError::InvalidState(_))
    ));

    let transaction_id = format!("tx-{}", Uuid::new_v4());
    let completed =
        payments::mark_completed(conn, payment.id, Some(transaction_id.clone())).unwrap();
    assert_eq!(completed.status().unwrap(), PaymentStatus::Completed);
    assert_eq!(
        payments::find_by_transaction(conn, &transaction_id).unwrap().id,
        payment.id
    );

    let (_, created) = enrollment::enroll(conn, student, course_id).unwrap();
    assert!(created);

    let refunded = payments::mark_refunded(conn, payment.id).unwrap();
    assert_eq!(refunded.status().unwrap(), PaymentStatus::Refunded);
    assert!(matches!(
        payments::mark_completed(conn, payment.id, None),
        Err(BillingError::InvalidState(_))
    ));
}

#[test]
fn test_certificate_number_collisions_exhaust_retries() {
    let Some(pool) = test_pool() else { return };
    let conn = &mut pool.get().unwrap();
    let events = EventBus::new();
    let config = LearnConfig {
        certificate_number_retries: 2,
        ..LearnConfig::default()
    };

    let course_id = course(conn, None);
    lesson(conn, course_id, "Only lesson");
    courses::publish_course(conn, course_id).unwrap();

    let first = unique_id();
    let second = unique_id();
    for student in [first, second] {
        enrollment::enroll(conn, student, course_id).unwrap();
        enrollment::mark_completed(conn, &events, student, course_id).unwrap();
    }

    let taken = certificates::issue_certificate(conn, &config, first, course_id).unwrap();
    let mut calls = 0;
    let collided = certificates::issue_certificate_with(conn, &config, second, course_id, |_| {
        calls += 1;
        taken.certificate_number.clone()
    });
    assert!(matches!(collided, Err(LearnError::Conflict(_))));
    assert_eq!(calls, 2);

    let issued = certificates::issue_certificate(conn, &config, second, course_id).unwrap();
    assert_ne!(issued.certificate_number, taken.certificate_number);
}

#[test]
fn test_max_attempts_enforced() {
    let Some(pool) = test_pool() else { return };
    let conn = &mut pool.get().unwrap();
    let student = unique_id();

    let course_id = course(conn, None);
    let only = lesson(conn, course_id, "Quiz lesson");
    let mut req = two_question_quiz();
    req.max_attempts = Some(1);
    let limited = quiz::create_quiz(conn, only.id, req).unwrap();
    courses::publish_course(conn, course_id).unwrap();

    assert!(matches!(
        quiz::submit_quiz(conn, limited.id, student, answers("x", "y"), 70),
        Err(LearnError::PreconditionFailed(_))
    ));

    enrollment::enroll(conn, student, course_id).unwrap();
    quiz::submit_quiz(conn, limited.id, student, answers("z", "z"), 70).unwrap();
    assert!(matches!(
        quiz::submit_quiz(conn, limited.id, student, answers("x", "y"), 70),
        Err(LearnError::PreconditionFailed(_))
    ));

    assert!(matches!(
        quiz::create_quiz(conn, only.id, two_question_quiz()),
        Err(LearnError::Conflict(_))
    ));
}
