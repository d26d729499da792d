diesel::table! {
    courses (id) {
        id -> Int8,
        title -> Text,
        slug -> Text,
        description -> Nullable<Text>,
        price -> Numeric,
        is_published -> Bool,
        teacher_id -> Int8,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    lessons (id) {
        id -> Int8,
        course_id -> Int8,
        title -> Text,
        content -> Nullable<Text>,
        video_url -> Nullable<Text>,
        file_url -> Nullable<Text>,
        duration_minutes -> Int4,
        lesson_order -> Int4,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    enrollments (id) {
        id -> Int8,
        student_id -> Int8,
        course_id -> Int8,
        progress -> Int4,
        completed_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    lesson_completions (id) {
        id -> Int8,
        student_id -> Int8,
        lesson_id -> Int8,
        completed_at -> Timestamptz,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    quizzes (id) {
        id -> Int8,
        lesson_id -> Int8,
        title -> Text,
        passing_score -> Nullable<Int4>,
        max_attempts -> Nullable<Int4>,
        questions -> Jsonb,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    quiz_results (id) {
        id -> Int8,
        quiz_id -> Int8,
        student_id -> Int8,
        answer -> Jsonb,
        breakdown -> Jsonb,
        is_correct -> Bool,
        score_obtained -> Int4,
        score -> Int4,
        passed -> Bool,
        attempts -> Int4,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    certificates (id) {
        id -> Int8,
        student_id -> Int8,
        course_id -> Int8,
        certificate_number -> Text,
        pdf_url -> Nullable<Text>,
        issue_date -> Date,
        expiry_date -> Nullable<Date>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::joinable!(lessons -> courses (course_id));
diesel::joinable!(enrollments -> courses (course_id));
diesel::joinable!(lesson_completions -> lessons (lesson_id));
diesel::joinable!(quizzes -> lessons (lesson_id));
diesel::joinable!(quiz_results -> quizzes (quiz_id));
diesel::joinable!(certificates -> courses (course_id));
