//! Certificate issuance and verification.

use chrono::{Days, NaiveDate, Utc};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use log::{info, warn};
use uuid::Uuid;

use crate::core::config::LearnConfig;
use crate::core::shared::schema::learn::certificates;
use crate::learn::enrollment;
use crate::learn::error::LearnError;
use crate::learn::types::{Certificate, CertificateVerification, NewCertificate};

pub const CERTIFICATE_PREFIX: &str = "CERT";
pub const TOKEN_LEN: usize = 12;

const STUDENT_COURSE_CONSTRAINT: &str = "certificates_student_course_unique";

/// `CERT-YYYYMMDD-<12 uppercase hex>`
pub fn generate_certificate_number(issue_date: NaiveDate) -> String {
    let token = Uuid::new_v4().simple().to_string().to_uppercase();
    format!(
        "{}-{}-{}",
        CERTIFICATE_PREFIX,
        issue_date.format("%Y%m%d"),
        &token[..TOKEN_LEN]
    )
}

pub fn is_well_formed_number(number: &str) -> bool {
    let mut parts = number.splitn(3, '-');
    let (Some(prefix), Some(date), Some(token)) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    prefix == CERTIFICATE_PREFIX
        && NaiveDate::parse_from_str(date, "%Y%m%d").is_ok()
        && date.len() == 8
        && token.len() == TOKEN_LEN
        && token
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase())
}

pub fn expiry_for(issue_date: NaiveDate, validity_days: Option<u32>) -> Option<NaiveDate> {
    validity_days.and_then(|days| issue_date.checked_add_days(Days::new(u64::from(days))))
}

pub fn find_certificate(
    conn: &mut PgConnection,
    student_id: i64,
    course_id: i64,
) -> Result<Option<Certificate>, LearnError> {
    Ok(certificates::table
        .filter(certificates::student_id.eq(student_id))
        .filter(certificates::course_id.eq(course_id))
        .first::<Certificate>(conn)
        .optional()?)
}

pub fn list_certificates(
    conn: &mut PgConnection,
    student_id: i64,
) -> Result<Vec<Certificate>, LearnError> {
    Ok(certificates::table
        .filter(certificates::student_id.eq(student_id))
        .order(certificates::issue_date.desc())
        .load(conn)?)
}

pub fn issue_certificate(
    conn: &mut PgConnection,
    config: &LearnConfig,
    student_id: i64,
    course_id: i64,
) -> Result<Certificate, LearnError> {
    issue_certificate_with(conn, config, student_id, course_id, generate_certificate_number)
}

/// Issue with a caller-supplied number generator; numbers that collide with an
/// existing certificate are regenerated up to `certificate_number_retries` times.
pub fn issue_certificate_with<F>(
    conn: &mut PgConnection,
    config: &LearnConfig,
    student_id: i64,
    course_id: i64,
    mut next_number: F,
) -> Result<Certificate, LearnError>
where
    F: FnMut(NaiveDate) -> String,
{
    conn.transaction(|conn| {
        let enrollment = enrollment::get_enrollment(conn, student_id, course_id)?.ok_or_else(|| {
            LearnError::NotFound(format!(
                "enrollment for student {student_id} in course {course_id}"
            ))
        })?;
        if enrollment.progress < enrollment::COMPLETE {
            return Err(LearnError::PreconditionFailed(format!(
                "course {course_id} is only {}% complete for student {student_id}",
                enrollment.progress
            )));
        }
        if let Some(existing) = find_certificate(conn, student_id, course_id)? {
            return Ok(existing);
        }

        let issue_date = Utc::now().date_naive();
        let expiry_date = expiry_for(issue_date, config.certificate_validity_days);

        for attempt in 1..=config.certificate_number_retries {
            let certificate_number = next_number(issue_date);
            let inserted = conn.transaction::<Certificate, DieselError, _>(|conn| {
                diesel::insert_into(certificates::table)
                    .values(&NewCertificate {
                        student_id,
                        course_id,
                        certificate_number: certificate_number.clone(),
                        pdf_url: None,
                        issue_date,
                        expiry_date,
                    })
                    .get_result(conn)
            });

            match inserted {
                Ok(cert) => {
                    info!(
                        "Issued certificate {} to student {} for course {}",
                        cert.certificate_number, student_id, course_id
                    );
                    return Ok(cert);
                }
                Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, details))
                    if details.constraint_name() == Some(STUDENT_COURSE_CONSTRAINT) =>
                {
                    // Issued concurrently by another request.
                    return find_certificate(conn, student_id, course_id)?.ok_or_else(|| {
                        LearnError::Internal(format!(
                            "certificate for student {student_id} in course {course_id} vanished"
                        ))
                    });
                }
                Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                    warn!(
                        "Certificate number {} already taken (attempt {}/{})",
                        certificate_number, attempt, config.certificate_number_retries
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(LearnError::Conflict(format!(
            "could not allocate a unique certificate number after {} attempts",
            config.certificate_number_retries
        )))
    })
}

pub fn verify_certificate(
    conn: &mut PgConnection,
    certificate_number: &str,
) -> Result<CertificateVerification, LearnError> {
    let cert: Option<Certificate> = certificates::table
        .filter(certificates::certificate_number.eq(certificate_number))
        .first(conn)
        .optional()?;
    Ok(verification(cert, Utc::now().date_naive()))
}

pub fn verification(cert: Option<Certificate>, today: NaiveDate) -> CertificateVerification {
    match cert {
        Some(cert) => {
            let is_expired = cert.is_expired_on(today);
            CertificateVerification {
                is_valid: !is_expired,
                is_expired,
                message: if is_expired {
                    "Certificate has expired".to_string()
                } else {
                    "Certificate is valid".to_string()
                },
                certificate: Some(cert),
            }
        }
        None => CertificateVerification {
            is_valid: false,
            is_expired: false,
            certificate: None,
            message: "Certificate not found".to_string(),
        },
    }
}
