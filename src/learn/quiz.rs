//! Quiz attempt evaluation.
//!
//! Questions are stored as JSONB on the quiz row but are always read and
//! written through [`Question`], a tagged union with one variant per question
//! type, and are validated before they are persisted. Grading is pure; the
//! database half of this module only loads the quiz, runs an attempt through
//! `InProgress -> Submitted -> Graded`, and upserts the single result row kept
//! per (quiz, student).

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::upsert::excluded;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::core::shared::schema::learn::{lessons, quiz_results, quizzes};
use crate::learn::error::LearnError;
use crate::learn::types::{
    CreateQuizRequest, Lesson, NewQuiz, NewQuizResult, QuizResult, QuizRow, QuizSubmission,
};
use crate::learn::{enrollment, sequencer};

// ============================================================================
// QUESTION MODEL
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChoiceOption {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchItem {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestionKind {
    SingleChoice {
        options: Vec<ChoiceOption>,
        correct: String,
    },
    MultipleChoice {
        options: Vec<ChoiceOption>,
        correct: BTreeSet<String>,
    },
    TrueFalse {
        correct: bool,
    },
    FillInBlank {
        accepted: Vec<String>,
    },
    Matching {
        left: Vec<MatchItem>,
        right: Vec<MatchItem>,
        /// left item id -> right item id
        pairs: BTreeMap<String, String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Question {
    pub id: String,
    pub text: String,
    pub points: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(flatten)]
    pub kind: QuestionKind,
}

/// Upper bound on a single question's weight.
pub const MAX_QUESTION_POINTS: i32 = 10_000;
/// Upper bound on the summed weight of a quiz.
pub const MAX_QUIZ_POINTS: i64 = 1_000_000;

/// Answer as submitted by a student; its shape depends on the question type.
///
/// Any other JSON value lands in `Other` and is graded incorrect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum SubmittedAnswer {
    Flag(bool),
    Text(String),
    Selection(Vec<String>),
    Pairs(BTreeMap<String, String>),
    Other(serde_json::Value),
}

impl SubmittedAnswer {
    fn is_blank(&self) -> bool {
        matches!(self, SubmittedAnswer::Other(serde_json::Value::Null))
    }
}

fn check_unique_ids<'a>(
    question_id: &str,
    what: &str,
    ids: impl Iterator<Item = &'a str>,
) -> Result<HashSet<&'a str>, LearnError> {
    let mut seen = HashSet::new();
    for id in ids {
        if id.trim().is_empty() {
            return Err(LearnError::InvalidArgument(format!(
                "question {question_id}: {what} ids must not be empty"
            )));
        }
        if !seen.insert(id) {
            return Err(LearnError::InvalidArgument(format!(
                "question {question_id}: duplicate {what} id {id}"
            )));
        }
    }
    Ok(seen)
}

impl Question {
    pub fn validate(&self) -> Result<(), LearnError> {
        let id = self.id.as_str();
        if id.trim().is_empty() {
            return Err(LearnError::InvalidArgument(
                "question id must not be empty".to_string(),
            ));
        }
        if self.points <= 0 || self.points > MAX_QUESTION_POINTS {
            return Err(LearnError::InvalidArgument(format!(
                "question {id}: points must be between 1 and {MAX_QUESTION_POINTS}"
            )));
        }

        match &self.kind {
            QuestionKind::SingleChoice { options, correct } => {
                let option_ids = check_unique_ids(id, "option", options.iter().map(|o| o.id.as_str()))?;
                if options.len() < 2 {
                    return Err(LearnError::InvalidArgument(format!(
                        "question {id}: single choice needs at least two options"
                    )));
                }
                if !option_ids.contains(correct.as_str()) {
                    return Err(LearnError::InvalidArgument(format!(
                        "question {id}: correct option {correct} is not one of the options"
                    )));
                }
            }
            QuestionKind::MultipleChoice { options, correct } => {
                let option_ids = check_unique_ids(id, "option", options.iter().map(|o| o.id.as_str()))?;
                if options.is_empty() {
                    return Err(LearnError::InvalidArgument(format!(
                        "question {id}: multiple choice needs options"
                    )));
                }
                if correct.is_empty() {
                    return Err(LearnError::InvalidArgument(format!(
                        "question {id}: multiple choice needs at least one correct option"
                    )));
                }
                if let Some(unknown) = correct.iter().find(|c| !option_ids.contains(c.as_str())) {
                    return Err(LearnError::InvalidArgument(format!(
                        "question {id}: correct option {unknown} is not one of the options"
                    )));
                }
            }
            QuestionKind::TrueFalse { .. } => {}
            QuestionKind::FillInBlank { accepted } => {
                if accepted.iter().all(|a| a.trim().is_empty()) {
                    return Err(LearnError::InvalidArgument(format!(
                        "question {id}: fill in the blank needs an accepted answer"
                    )));
                }
            }
            QuestionKind::Matching { left, right, pairs } => {
                let left_ids = check_unique_ids(id, "left item", left.iter().map(|m| m.id.as_str()))?;
                let right_ids =
                    check_unique_ids(id, "right item", right.iter().map(|m| m.id.as_str()))?;
                if left.is_empty() {
                    return Err(LearnError::InvalidArgument(format!(
                        "question {id}: matching needs at least one pair"
                    )));
                }
                for (l, r) in pairs {
                    if !left_ids.contains(l.as_str()) || !right_ids.contains(r.as_str()) {
                        return Err(LearnError::InvalidArgument(format!(
                            "question {id}: pair {l} -> {r} references an unknown item"
                        )));
                    }
                }
                if let Some(unpaired) = left.iter().find(|m| !pairs.contains_key(&m.id)) {
                    return Err(LearnError::InvalidArgument(format!(
                        "question {id}: left item {} has no pair",
                        unpaired.id
                    )));
                }
            }
        }
        Ok(())
    }
}

pub fn validate_questions(questions: &[Question]) -> Result<(), LearnError> {
    if questions.is_empty() {
        return Err(LearnError::InvalidArgument(
            "a quiz needs at least one question".to_string(),
        ));
    }
    check_unique_ids("quiz", "question", questions.iter().map(|q| q.id.as_str()))?;
    for question in questions {
        question.validate()?;
    }
    let total: i64 = questions.iter().map(|q| i64::from(q.points)).sum();
    if total > MAX_QUIZ_POINTS {
        return Err(LearnError::InvalidArgument(format!(
            "quiz is worth {total} points, at most {MAX_QUIZ_POINTS} allowed"
        )));
    }
    Ok(())
}

// ============================================================================
// GRADING
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PairOutcome {
    pub left: String,
    pub expected: String,
    pub submitted: Option<String>,
    pub is_correct: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionOutcome {
    pub question_id: String,
    pub answered: bool,
    pub is_correct: bool,
    pub points_earned: i32,
    pub points_possible: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pairs: Vec<PairOutcome>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GradedQuiz {
    pub score_obtained: i32,
    pub total_points: i32,
    /// Percentage of points earned, 0..=100.
    pub score: i32,
    pub passing_score: i32,
    pub passed: bool,
    /// Every question answered correctly.
    pub is_correct: bool,
    pub questions: Vec<QuestionOutcome>,
}

fn normalize_blank(s: &str) -> String {
    s.trim().to_lowercase()
}

fn selection(answer: &SubmittedAnswer) -> Option<BTreeSet<&str>> {
    match answer {
        SubmittedAnswer::Selection(ids) => Some(ids.iter().map(String::as_str).collect()),
        SubmittedAnswer::Text(id) => Some(BTreeSet::from([id.as_str()])),
        _ => None,
    }
}

pub fn grade_question(question: &Question, answer: Option<&SubmittedAnswer>) -> QuestionOutcome {
    let mut pairs = Vec::new();

    let is_correct = match (&question.kind, answer) {
        (_, None) => false,
        (QuestionKind::SingleChoice { correct, .. }, Some(answer)) => selection(answer)
            .is_some_and(|chosen| chosen.len() == 1 && chosen.contains(correct.as_str())),
        (QuestionKind::MultipleChoice { correct, .. }, Some(answer)) => {
            selection(answer).is_some_and(|chosen| {
                chosen.len() == correct.len() && correct.iter().all(|c| chosen.contains(c.as_str()))
            })
        }
        (QuestionKind::TrueFalse { correct }, Some(SubmittedAnswer::Flag(flag))) => {
            flag == correct
        }
        (QuestionKind::FillInBlank { accepted }, Some(SubmittedAnswer::Text(text))) => {
            let submitted = normalize_blank(text);
            !submitted.is_empty() && accepted.iter().any(|a| normalize_blank(a) == submitted)
        }
        (QuestionKind::Matching { pairs: key, .. }, Some(answer)) => {
            let submitted = match answer {
                SubmittedAnswer::Pairs(map) => Some(map),
                _ => None,
            };
            for (left, expected) in key {
                let given = submitted.and_then(|m| m.get(left)).cloned();
                pairs.push(PairOutcome {
                    left: left.clone(),
                    expected: expected.clone(),
                    is_correct: given.as_deref() == Some(expected.as_str()),
                    submitted: given,
                });
            }
            submitted.is_some() && pairs.iter().all(|p| p.is_correct)
        }
        _ => false,
    };

    QuestionOutcome {
        question_id: question.id.clone(),
        answered: answer.is_some_and(|a| !a.is_blank()),
        is_correct,
        points_earned: if is_correct { question.points } else { 0 },
        points_possible: question.points,
        pairs,
    }
}

/// `100 * earned / total`, rounded half away from zero.
pub fn percentage(earned: i32, total: i32) -> i32 {
    if total <= 0 {
        return 0;
    }
    let earned = i64::from(earned.max(0));
    let total = i64::from(total);
    ((200 * earned + total) / (2 * total)) as i32
}

pub fn grade(
    questions: &[Question],
    answers: &HashMap<String, SubmittedAnswer>,
    passing_score: i32,
) -> GradedQuiz {
    let outcomes: Vec<QuestionOutcome> = questions
        .iter()
        .map(|q| grade_question(q, answers.get(&q.id)))
        .collect();

    let score_obtained = outcomes
        .iter()
        .fold(0i32, |acc, o| acc.saturating_add(o.points_earned));
    let total_points = outcomes
        .iter()
        .fold(0i32, |acc, o| acc.saturating_add(o.points_possible));
    let score = percentage(score_obtained, total_points);

    GradedQuiz {
        score_obtained,
        total_points,
        score,
        passing_score,
        passed: total_points > 0 && score >= passing_score,
        is_correct: !outcomes.is_empty() && outcomes.iter().all(|o| o.is_correct),
        questions: outcomes,
    }
}

// ============================================================================
// QUIZ + ATTEMPT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quiz {
    pub id: i64,
    pub lesson_id: i64,
    pub title: String,
    pub passing_score: Option<i32>,
    pub max_attempts: Option<i32>,
    pub questions: Vec<Question>,
}

impl Quiz {
    pub fn from_row(row: QuizRow) -> Result<Self, LearnError> {
        let questions: Vec<Question> = serde_json::from_value(row.questions).map_err(|e| {
            LearnError::Internal(format!("quiz {} has unreadable questions: {e}", row.id))
        })?;
        Ok(Self {
            id: row.id,
            lesson_id: row.lesson_id,
            title: row.title,
            passing_score: row.passing_score,
            max_attempts: row.max_attempts,
            questions,
        })
    }

    pub fn effective_passing_score(&self, default_passing_score: i32) -> i32 {
        self.passing_score.unwrap_or(default_passing_score)
    }

    pub fn total_points(&self) -> i32 {
        self.questions
            .iter()
            .fold(0i32, |acc, q| acc.saturating_add(q.points))
    }

    /// Copy without answer keys, for students about to take the quiz.
    pub fn redacted(&self) -> serde_json::Value {
        let questions: Vec<serde_json::Value> = self
            .questions
            .iter()
            .map(|q| {
                let (kind, extra) = match &q.kind {
                    QuestionKind::SingleChoice { options, .. } => {
                        ("single_choice", serde_json::json!({ "options": options }))
                    }
                    QuestionKind::MultipleChoice { options, .. } => {
                        ("multiple_choice", serde_json::json!({ "options": options }))
                    }
                    QuestionKind::TrueFalse { .. } => ("true_false", serde_json::json!({})),
                    QuestionKind::FillInBlank { .. } => ("fill_in_blank", serde_json::json!({})),
                    QuestionKind::Matching { left, right, .. } => (
                        "matching",
                        serde_json::json!({ "left": left, "right": right }),
                    ),
                };
                let mut value = serde_json::json!({
                    "id": q.id,
                    "text": q.text,
                    "points": q.points,
                    "type": kind,
                });
                if let (Some(target), Some(extra)) = (value.as_object_mut(), extra.as_object()) {
                    target.extend(extra.clone());
                }
                value
            })
            .collect();
        serde_json::json!({
            "id": self.id,
            "lesson_id": self.lesson_id,
            "title": self.title,
            "passing_score": self.passing_score,
            "max_attempts": self.max_attempts,
            "total_points": self.total_points(),
            "questions": questions,
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    InProgress,
    Submitted,
    Graded,
}

#[derive(Debug, Clone)]
pub struct QuizAttempt {
    pub quiz_id: i64,
    pub student_id: i64,
    pub started_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    state: AttemptState,
    answers: HashMap<String, SubmittedAnswer>,
    outcome: Option<GradedQuiz>,
}

impl QuizAttempt {
    pub fn start(quiz_id: i64, student_id: i64) -> Self {
        Self {
            quiz_id,
            student_id,
            started_at: Utc::now(),
            submitted_at: None,
            state: AttemptState::InProgress,
            answers: HashMap::new(),
            outcome: None,
        }
    }

    pub fn state(&self) -> AttemptState {
        self.state
    }

    pub fn answers(&self) -> &HashMap<String, SubmittedAnswer> {
        &self.answers
    }

    pub fn submit(&mut self, answers: HashMap<String, SubmittedAnswer>) -> Result<(), LearnError> {
        if self.state != AttemptState::InProgress {
            return Err(LearnError::InvalidState(format!(
                "attempt on quiz {} was already submitted",
                self.quiz_id
            )));
        }
        self.answers = answers;
        self.submitted_at = Some(Utc::now());
        self.state = AttemptState::Submitted;
        Ok(())
    }

    pub fn grade(&mut self, quiz: &Quiz, default_passing_score: i32) -> Result<&GradedQuiz, LearnError> {
        match self.state {
            AttemptState::InProgress => {
                return Err(LearnError::InvalidState(format!(
                    "attempt on quiz {} has not been submitted",
                    self.quiz_id
                )))
            }
            AttemptState::Graded => {
                return Err(LearnError::InvalidState(format!(
                    "attempt on quiz {} was already graded",
                    self.quiz_id
                )))
            }
            AttemptState::Submitted => {}
        }
        if quiz.id != self.quiz_id {
            return Err(LearnError::InvalidArgument(format!(
                "attempt belongs to quiz {}, not {}",
                self.quiz_id, quiz.id
            )));
        }
        let graded = grade(
            &quiz.questions,
            &self.answers,
            quiz.effective_passing_score(default_passing_score),
        );
        self.state = AttemptState::Graded;
        Ok(&*self.outcome.insert(graded))
    }

    pub fn outcome(&self) -> Option<&GradedQuiz> {
        self.outcome.as_ref()
    }
}

// ============================================================================
// PERSISTENCE
// ============================================================================

pub fn create_quiz(
    conn: &mut PgConnection,
    lesson_id: i64,
    req: CreateQuizRequest,
) -> Result<Quiz, LearnError> {
    let title = req.title.trim().to_string();
    if title.is_empty() {
        return Err(LearnError::InvalidArgument("quiz title is required".to_string()));
    }
    if let Some(score) = req.passing_score {
        if !(0..=100).contains(&score) {
            return Err(LearnError::InvalidArgument(format!(
                "passing score must be within 0..=100, got {score}"
            )));
        }
    }
    if req.max_attempts.is_some_and(|m| m <= 0) {
        return Err(LearnError::InvalidArgument(
            "max_attempts must be positive".to_string(),
        ));
    }
    validate_questions(&req.questions)?;

    let questions = serde_json::to_value(&req.questions)
        .map_err(|e| LearnError::Internal(format!("cannot encode questions: {e}")))?;

    conn.transaction(|conn| {
        lessons::table
            .find(lesson_id)
            .first::<Lesson>(conn)
            .optional()?
            .ok_or_else(|| LearnError::NotFound(format!("lesson {lesson_id}")))?;

        let row: QuizRow = diesel::insert_into(quizzes::table)
            .values(&NewQuiz {
                lesson_id,
                title,
                passing_score: req.passing_score,
                max_attempts: req.max_attempts,
                questions,
            })
            .get_result(conn)
            .map_err(|e| match LearnError::from(e) {
                LearnError::Conflict(_) => {
                    LearnError::Conflict(format!("lesson {lesson_id} already has a quiz"))
                }
                other => other,
            })?;

        info!("Created quiz {} for lesson {}", row.id, lesson_id);
        Quiz::from_row(row)
    })
}

pub fn get_quiz(conn: &mut PgConnection, quiz_id: i64) -> Result<Quiz, LearnError> {
    let row = quizzes::table
        .find(quiz_id)
        .first::<QuizRow>(conn)
        .optional()?
        .ok_or_else(|| LearnError::NotFound(format!("quiz {quiz_id}")))?;
    Quiz::from_row(row)
}

pub fn quiz_ids_for_lessons(
    conn: &mut PgConnection,
    lesson_ids: &[i64],
) -> Result<HashMap<i64, i64>, LearnError> {
    let rows: Vec<(i64, i64)> = quizzes::table
        .filter(quizzes::lesson_id.eq_any(lesson_ids))
        .select((quizzes::lesson_id, quizzes::id))
        .load(conn)?;
    Ok(rows.into_iter().collect())
}

pub fn get_result(
    conn: &mut PgConnection,
    quiz_id: i64,
    student_id: i64,
) -> Result<Option<QuizResult>, LearnError> {
    Ok(quiz_results::table
        .filter(quiz_results::quiz_id.eq(quiz_id))
        .filter(quiz_results::student_id.eq(student_id))
        .first::<QuizResult>(conn)
        .optional()?)
}

pub fn has_passing_result(
    conn: &mut PgConnection,
    quiz_id: i64,
    student_id: i64,
) -> Result<bool, LearnError> {
    Ok(get_result(conn, quiz_id, student_id)?.is_some_and(|r| r.passed))
}

/// Grade a submission and store it as the student's single result for the quiz.
pub fn submit_quiz(
    conn: &mut PgConnection,
    quiz_id: i64,
    student_id: i64,
    submission: QuizSubmission,
    default_passing_score: i32,
) -> Result<(QuizResult, GradedQuiz), LearnError> {
    conn.transaction(|conn| {
        let quiz = get_quiz(conn, quiz_id)?;
        let lesson: Lesson = lessons::table.find(quiz.lesson_id).first(conn)?;

        enrollment::require_enrollment(conn, student_id, lesson.course_id)?;
        sequencer::require_unlocked(conn, student_id, &lesson)?;

        let previous: Option<QuizResult> = quiz_results::table
            .filter(quiz_results::quiz_id.eq(quiz_id))
            .filter(quiz_results::student_id.eq(student_id))
            .for_update()
            .first(conn)
            .optional()?;
        let attempts_used = previous.as_ref().map_or(0, |r| r.attempts);
        if let Some(max) = quiz.max_attempts {
            if attempts_used >= max {
                return Err(LearnError::PreconditionFailed(format!(
                    "student {student_id} has used all {max} attempts on quiz {quiz_id}"
                )));
            }
        }

        let mut attempt = QuizAttempt::start(quiz_id, student_id);
        attempt.submit(submission.answers)?;
        let graded = attempt.grade(&quiz, default_passing_score)?.clone();

        let answer = serde_json::to_value(attempt.answers())
            .map_err(|e| LearnError::Internal(e.to_string()))?;
        let breakdown = serde_json::to_value(&graded.questions)
            .map_err(|e| LearnError::Internal(e.to_string()))?;

        let row = NewQuizResult {
            quiz_id,
            student_id,
            answer,
            breakdown,
            is_correct: graded.is_correct,
            score_obtained: graded.score_obtained,
            score: graded.score,
            passed: graded.passed,
            attempts: 1,
        };

        let stored: QuizResult = diesel::insert_into(quiz_results::table)
            .values(&row)
            .on_conflict((quiz_results::quiz_id, quiz_results::student_id))
            .do_update()
            .set((
                quiz_results::answer.eq(excluded(quiz_results::answer)),
                quiz_results::breakdown.eq(excluded(quiz_results::breakdown)),
                quiz_results::is_correct.eq(excluded(quiz_results::is_correct)),
                quiz_results::score_obtained.eq(excluded(quiz_results::score_obtained)),
                quiz_results::score.eq(excluded(quiz_results::score)),
                quiz_results::passed.eq(excluded(quiz_results::passed)),
                quiz_results::attempts.eq(quiz_results::attempts + 1),
                quiz_results::updated_at.eq(Utc::now()),
            ))
            .get_result(conn)?;

        info!(
            "Graded quiz {} for student {}: score {} (passing {}), passed={}, attempt {}",
            quiz_id, student_id, graded.score, graded.passing_score, graded.passed, stored.attempts
        );
        Ok((stored, graded))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn option(id: &str) -> ChoiceOption {
        ChoiceOption {
            id: id.to_string(),
            text: format!("option {id}"),
        }
    }

    fn single(id: &str, correct: &str, points: i32) -> Question {
        Question {
            id: id.to_string(),
            text: format!("question {id}"),
            points,
            explanation: None,
            kind: QuestionKind::SingleChoice {
                options: vec![option("x"), option("y"), option("z")],
                correct: correct.to_string(),
            },
        }
    }

    fn matching(id: &str) -> Question {
        let item = |id: &str| MatchItem {
            id: id.to_string(),
            text: id.to_lowercase(),
        };
        Question {
            id: id.to_string(),
            text: "match them".to_string(),
            points: 4,
            explanation: None,
            kind: QuestionKind::Matching {
                left: vec![item("L1"), item("L2")],
                right: vec![item("R1"), item("R2"), item("R3")],
                pairs: BTreeMap::from([
                    ("L1".to_string(), "R1".to_string()),
                    ("L2".to_string(), "R2".to_string()),
                ]),
            },
        }
    }

    fn answers(pairs: &[(&str, SubmittedAnswer)]) -> HashMap<String, SubmittedAnswer> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn text(s: &str) -> SubmittedAnswer {
        SubmittedAnswer::Text(s.to_string())
    }

    #[test]
    fn test_two_single_choice_half_right() {
        let questions = vec![single("Q1", "x", 5), single("Q2", "y", 5)];
        let graded = grade(
            &questions,
            &answers(&[("Q1", text("x")), ("Q2", text("z"))]),
            70,
        );
        assert_eq!(graded.score, 50);
        assert_eq!(graded.score_obtained, 5);
        assert_eq!(graded.total_points, 10);
        assert!(!graded.passed);
        assert!(!graded.is_correct);
    }

    #[test]
    fn test_matching_requires_every_pair() {
        let q = matching("M1");
        let submitted = SubmittedAnswer::Pairs(BTreeMap::from([
            ("L1".to_string(), "R1".to_string()),
            ("L2".to_string(), "R3".to_string()),
        ]));
        let outcome = grade_question(&q, Some(&submitted));
        assert!(!outcome.is_correct);
        assert_eq!(outcome.points_earned, 0);
        assert_eq!(outcome.pairs.len(), 2);
        assert!(outcome.pairs[0].is_correct);
        assert!(!outcome.pairs[1].is_correct);
        assert_eq!(outcome.pairs[1].submitted.as_deref(), Some("R3"));

        let all_right = SubmittedAnswer::Pairs(BTreeMap::from([
            ("L1".to_string(), "R1".to_string()),
            ("L2".to_string(), "R2".to_string()),
        ]));
        assert!(grade_question(&q, Some(&all_right)).is_correct);
    }

    #[test]
    fn test_multiple_choice_is_order_insensitive_and_exact() {
        let q = Question {
            id: "MC".to_string(),
            text: "pick".to_string(),
            points: 2,
            explanation: None,
            kind: QuestionKind::MultipleChoice {
                options: vec![option("a"), option("b"), option("c")],
                correct: BTreeSet::from(["a".to_string(), "c".to_string()]),
            },
        };
        let pick = |ids: &[&str]| {
            SubmittedAnswer::Selection(ids.iter().map(|s| s.to_string()).collect())
        };
        assert!(grade_question(&q, Some(&pick(&["c", "a"]))).is_correct);
        assert!(!grade_question(&q, Some(&pick(&["a"]))).is_correct);
        assert!(!grade_question(&q, Some(&pick(&["a", "b", "c"]))).is_correct);
    }

    #[test]
    fn test_true_false_and_shape_mismatch() {
        let q = Question {
            id: "TF".to_string(),
            text: "the sky is blue".to_string(),
            points: 1,
            explanation: None,
            kind: QuestionKind::TrueFalse { correct: true },
        };
        assert!(grade_question(&q, Some(&SubmittedAnswer::Flag(true))).is_correct);
        assert!(!grade_question(&q, Some(&SubmittedAnswer::Flag(false))).is_correct);
        assert!(!grade_question(&q, Some(&text("true"))).is_correct);
    }

    #[test]
    fn test_unexpected_answer_shapes_are_graded_incorrect() {
        let questions = vec![single("Q1", "x", 5), single("Q2", "y", 5), single("Q3", "z", 5)];
        let submission: QuizSubmission = serde_json::from_value(serde_json::json!({
            "answers": {"Q1": 5, "Q2": null, "Q3": "z"}
        }))
        .unwrap();
        assert_eq!(
            submission.answers["Q1"],
            SubmittedAnswer::Other(serde_json::json!(5))
        );

        let graded = grade(&questions, &submission.answers, 70);
        assert!(!graded.questions[0].is_correct);
        assert!(graded.questions[0].answered);
        assert!(!graded.questions[1].is_correct);
        assert!(!graded.questions[1].answered);
        assert!(graded.questions[2].is_correct);
        assert_eq!(graded.score, 33);

        let numbers: SubmittedAnswer = serde_json::from_value(serde_json::json!([1, 2])).unwrap();
        assert!(!grade_question(&questions[0], Some(&numbers)).is_correct);
    }

    #[test]
    fn test_fill_in_blank_trimmed_case_insensitive() {
        let q = Question {
            id: "FB".to_string(),
            text: "Rust's package manager is ___".to_string(),
            points: 3,
            explanation: None,
            kind: QuestionKind::FillInBlank {
                accepted: vec!["Cargo".to_string(), "cargo-cli".to_string()],
            },
        };
        assert!(grade_question(&q, Some(&text("  cargo "))).is_correct);
        assert!(grade_question(&q, Some(&text("CARGO-CLI"))).is_correct);
        assert!(!grade_question(&q, Some(&text("npm"))).is_correct);
        assert!(!grade_question(&q, Some(&text("   "))).is_correct);
    }

    #[test]
    fn test_unanswered_counts_as_incorrect() {
        let questions = vec![single("Q1", "x", 3), single("Q2", "y", 1)];
        let graded = grade(&questions, &answers(&[("Q1", text("x"))]), 70);
        assert_eq!(graded.score, 75);
        assert!(graded.passed);
        assert!(!graded.questions[1].answered);
        assert!(!graded.questions[1].is_correct);
    }

    #[test]
    fn test_percentage_rounds_half_up() {
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(2, 3), 67);
        assert_eq!(percentage(1, 8), 13);
        assert_eq!(percentage(0, 10), 0);
        assert_eq!(percentage(10, 10), 100);
        assert_eq!(percentage(5, 0), 0);
    }

    #[test]
    fn test_pass_threshold_is_inclusive() {
        let questions: Vec<Question> = (0..10).map(|i| single(&format!("Q{i}"), "x", 1)).collect();
        let seven: HashMap<String, SubmittedAnswer> =
            (0..7).map(|i| (format!("Q{i}"), text("x"))).collect();
        let graded = grade(&questions, &seven, 70);
        assert_eq!(graded.score, 70);
        assert!(graded.passed);
    }

    #[test]
    fn test_question_json_shape() {
        let json = serde_json::json!([
            {"id": "Q1", "text": "2+2?", "points": 5, "type": "single_choice",
             "options": [{"id": "a", "text": "4"}, {"id": "b", "text": "5"}], "correct": "a"},
            {"id": "Q2", "text": "Rust is memory safe", "points": 1, "type": "true_false", "correct": true},
            {"id": "Q3", "text": "Match", "points": 2, "type": "matching",
             "left": [{"id": "L1", "text": "fn"}], "right": [{"id": "R1", "text": "function"}],
             "pairs": {"L1": "R1"}}
        ]);
        let questions: Vec<Question> = serde_json::from_value(json).unwrap();
        assert!(validate_questions(&questions).is_ok());
        assert!(matches!(questions[1].kind, QuestionKind::TrueFalse { correct: true }));

        let submission: HashMap<String, SubmittedAnswer> = serde_json::from_value(serde_json::json!({
            "Q1": ["a"], "Q2": true, "Q3": {"L1": "R1"}
        }))
        .unwrap();
        let graded = grade(&questions, &submission, 70);
        assert_eq!(graded.score, 100);
        assert!(graded.is_correct);
    }

    #[test]
    fn test_validation_rejects_bad_questions() {
        let mut bad_key = single("Q1", "w", 5);
        assert!(bad_key.validate().is_err());
        bad_key.kind = QuestionKind::SingleChoice {
            options: vec![option("x"), option("x")],
            correct: "x".to_string(),
        };
        assert!(bad_key.validate().is_err());

        assert!(single("Q1", "x", 0).validate().is_err());
        assert!(single("Q1", "x", MAX_QUESTION_POINTS).validate().is_ok());
        assert!(single("Q1", "x", MAX_QUESTION_POINTS + 1).validate().is_err());
        assert!(single("Q1", "x", i32::MAX).validate().is_err());
        let heavy: Vec<Question> = (0..101)
            .map(|i| single(&format!("Q{i}"), "x", MAX_QUESTION_POINTS))
            .collect();
        assert!(validate_questions(&heavy).is_err());
        assert!(validate_questions(&heavy[..100]).is_ok());
        assert!(validate_questions(&[]).is_err());
        assert!(validate_questions(&[single("Q1", "x", 1), single("Q1", "y", 1)]).is_err());

        let mut unpaired = matching("M1");
        if let QuestionKind::Matching { pairs, .. } = &mut unpaired.kind {
            pairs.remove("L2");
        }
        assert!(unpaired.validate().is_err());

        let blank = Question {
            id: "FB".to_string(),
            text: "___".to_string(),
            points: 1,
            explanation: None,
            kind: QuestionKind::FillInBlank {
                accepted: vec![" ".to_string()],
            },
        };
        assert!(blank.validate().is_err());
    }

    #[test]
    fn test_attempt_state_machine() {
        let quiz = Quiz {
            id: 9,
            lesson_id: 1,
            title: "Basics".to_string(),
            passing_score: None,
            max_attempts: None,
            questions: vec![single("Q1", "x", 1)],
        };
        let mut attempt = QuizAttempt::start(9, 3);
        assert_eq!(attempt.state(), AttemptState::InProgress);
        assert!(matches!(
            attempt.grade(&quiz, 70),
            Err(LearnError::InvalidState(_))
        ));

        attempt.submit(answers(&[("Q1", text("x"))])).unwrap();
        assert_eq!(attempt.state(), AttemptState::Submitted);
        assert!(matches!(
            attempt.submit(HashMap::new()),
            Err(LearnError::InvalidState(_))
        ));

        let graded = attempt.grade(&quiz, 70).unwrap();
        assert_eq!(graded.score, 100);
        assert_eq!(graded.passing_score, 70);
        assert_eq!(attempt.state(), AttemptState::Graded);
        assert!(attempt.outcome().is_some());
        assert!(matches!(
            attempt.grade(&quiz, 70),
            Err(LearnError::InvalidState(_))
        ));
    }

    #[test]
    fn test_redacted_quiz_hides_answer_keys() {
        let quiz = Quiz {
            id: 1,
            lesson_id: 1,
            title: "Basics".to_string(),
            passing_score: Some(80),
            max_attempts: Some(3),
            questions: vec![single("Q1", "y", 2), matching("M1")],
        };
        let redacted = quiz.redacted();
        let rendered = redacted.to_string();
        assert!(!rendered.contains("\"correct\""));
        assert!(!rendered.contains("\"pairs\""));
        assert_eq!(redacted["total_points"], 6);
        assert_eq!(redacted["questions"][0]["type"], "single_choice");
        assert_eq!(redacted["questions"][1]["left"][0]["id"], "L1");
    }
}
