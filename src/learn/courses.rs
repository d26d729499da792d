//! Course catalogue: courses and their ordered lessons.

use bigdecimal::BigDecimal;
use chrono::Utc;
use diesel::dsl::max;
use diesel::prelude::*;
use log::info;

use crate::billing::payments;
use crate::core::shared::schema::learn::{courses, lessons};
use crate::learn::error::LearnError;
use crate::learn::types::{
    Course, CreateCourseRequest, CreateLessonRequest, Lesson, NewCourse, NewLesson,
};

/// Lowercase ASCII alphanumerics with every other run collapsed to a single `-`.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

fn rename_conflict(err: diesel::result::Error, message: String) -> LearnError {
    match LearnError::from(err) {
        LearnError::Conflict(_) => LearnError::Conflict(message),
        other => other,
    }
}

pub fn get_course(conn: &mut PgConnection, course_id: i64) -> Result<Course, LearnError> {
    courses::table
        .find(course_id)
        .first::<Course>(conn)
        .optional()?
        .ok_or_else(|| LearnError::NotFound(format!("course {course_id}")))
}

pub fn list_courses(conn: &mut PgConnection, published_only: bool) -> Result<Vec<Course>, LearnError> {
    let mut query = courses::table.into_boxed();
    if published_only {
        query = query.filter(courses::is_published.eq(true));
    }
    Ok(query.order(courses::created_at.desc()).load(conn)?)
}

pub fn create_course(
    conn: &mut PgConnection,
    teacher_id: i64,
    req: CreateCourseRequest,
) -> Result<Course, LearnError> {
    let title = req.title.trim().to_string();
    if title.is_empty() {
        return Err(LearnError::InvalidArgument("course title is required".to_string()));
    }
    let slug = slugify(req.slug.as_deref().unwrap_or(&title));
    if slug.is_empty() {
        return Err(LearnError::InvalidArgument(format!(
            "cannot derive a slug from {title:?}"
        )));
    }
    let price = req.price.unwrap_or_else(|| BigDecimal::from(0));
    let price = payments::money_amount(&price, "price").map_err(LearnError::InvalidArgument)?;

    let course: Course = diesel::insert_into(courses::table)
        .values(&NewCourse {
            title,
            slug: slug.clone(),
            description: req.description,
            price,
            is_published: false,
            teacher_id: req.teacher_id.unwrap_or(teacher_id),
        })
        .get_result(conn)
        .map_err(|e| rename_conflict(e, format!("a course with slug {slug} already exists")))?;

    info!("Created course {} ({})", course.id, course.slug);
    Ok(course)
}

pub fn publish_course(conn: &mut PgConnection, course_id: i64) -> Result<Course, LearnError> {
    conn.transaction(|conn| {
        get_course(conn, course_id)?;
        let course: Course = diesel::update(courses::table.find(course_id))
            .set((
                courses::is_published.eq(true),
                courses::updated_at.eq(Utc::now()),
            ))
            .get_result(conn)?;
        info!("Published course {}", course_id);
        Ok(course)
    })
}

pub fn get_lesson(conn: &mut PgConnection, lesson_id: i64) -> Result<Lesson, LearnError> {
    lessons::table
        .find(lesson_id)
        .first::<Lesson>(conn)
        .optional()?
        .ok_or_else(|| LearnError::NotFound(format!("lesson {lesson_id}")))
}

/// Lessons of a course in sequence order.
pub fn list_lessons(conn: &mut PgConnection, course_id: i64) -> Result<Vec<Lesson>, LearnError> {
    Ok(lessons::table
        .filter(lessons::course_id.eq(course_id))
        .order(lessons::lesson_order.asc())
        .load(conn)?)
}

pub fn add_lesson(
    conn: &mut PgConnection,
    course_id: i64,
    req: CreateLessonRequest,
) -> Result<Lesson, LearnError> {
    let title = req.title.trim().to_string();
    if title.is_empty() {
        return Err(LearnError::InvalidArgument("lesson title is required".to_string()));
    }
    let duration_minutes = req.duration_minutes.unwrap_or(0);
    if duration_minutes < 0 {
        return Err(LearnError::InvalidArgument(
            "duration_minutes must not be negative".to_string(),
        ));
    }
    if req.order.is_some_and(|o| o < 1) {
        return Err(LearnError::InvalidArgument(
            "lesson order starts at 1".to_string(),
        ));
    }

    conn.transaction(|conn| {
        // Serializes concurrent appends to the same course.
        courses::table
            .find(course_id)
            .for_update()
            .first::<Course>(conn)
            .optional()?
            .ok_or_else(|| LearnError::NotFound(format!("course {course_id}")))?;

        let lesson_order = match req.order {
            Some(order) => order,
            None => {
                let last: Option<i32> = lessons::table
                    .filter(lessons::course_id.eq(course_id))
                    .select(max(lessons::lesson_order))
                    .first(conn)?;
                last.unwrap_or(0) + 1
            }
        };

        let lesson: Lesson = diesel::insert_into(lessons::table)
            .values(&NewLesson {
                course_id,
                title,
                content: req.content,
                video_url: req.video_url,
                file_url: req.file_url,
                duration_minutes,
                lesson_order,
            })
            .get_result(conn)
            .map_err(|e| {
                rename_conflict(
                    e,
                    format!("course {course_id} already has a lesson at position {lesson_order}"),
                )
            })?;

        info!(
            "Added lesson {} to course {} at position {}",
            lesson.id, course_id, lesson_order
        );
        Ok(lesson)
    })
}
