diesel::table! {
    payments (id) {
        id -> Int8,
        student_id -> Int8,
        course_id -> Int8,
        amount -> Numeric,
        payment_method -> Text,
        transaction_id -> Nullable<Text>,
        status -> Text,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}
