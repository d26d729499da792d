pub mod billing;
pub mod learn;

pub use self::billing::*;
pub use self::learn::*;

diesel::joinable!(payments -> courses (course_id));

diesel::allow_tables_to_appear_in_same_query!(
    courses,
    lessons,
    enrollments,
    lesson_completions,
    quizzes,
    quiz_results,
    certificates,
    payments,
);
