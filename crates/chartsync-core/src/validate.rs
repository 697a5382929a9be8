//! Input validation for records and user accounts.
//!
//! Validation failures carry no side effects: nothing is written and no
//! audit entry is produced for a rejected input.

use crate::error::{RegistryError, RegistryResult};
use crate::models::NewPatientRecord;

/// Maximum length for diagnosis and treatment plan text.
pub const MAX_TEXT_LEN: usize = 2000;
/// Maximum length for free-form notes.
pub const MAX_NOTES_LEN: usize = 4000;

/// Validate input for record creation.
pub fn validate_new_record(input: &NewPatientRecord) -> RegistryResult<()> {
    if input.first_name.trim().is_empty() {
        return Err(RegistryError::Validation("first name is required".into()));
    }
    if input.last_name.trim().is_empty() {
        return Err(RegistryError::Validation("last name is required".into()));
    }
    if !is_valid_patient_external_id(&input.patient_external_id) {
        return Err(RegistryError::Validation(format!(
            "patient id '{}' does not match PAT-######-AAA",
            input.patient_external_id
        )));
    }
    if let Some(dob) = &input.date_of_birth {
        validate_date_of_birth(dob)?;
    }
    validate_text_field("diagnosis", &input.diagnosis, MAX_TEXT_LEN)?;
    validate_text_field("treatment plan", &input.treatment_plan, MAX_TEXT_LEN)?;
    validate_text_field("notes", &input.notes, MAX_NOTES_LEN)?;
    Ok(())
}

/// Business id format: "PAT-" + six digits + "-" + three uppercase letters.
pub fn is_valid_patient_external_id(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.len() != 14 || !s.starts_with("PAT-") || bytes[10] != b'-' {
        return false;
    }
    bytes[4..10].iter().all(u8::is_ascii_digit)
        && bytes[11..14].iter().all(u8::is_ascii_uppercase)
}

/// Date of birth must parse as an ISO date and not lie in the future.
pub fn validate_date_of_birth(dob: &str) -> RegistryResult<()> {
    let date = chrono::NaiveDate::parse_from_str(dob, "%Y-%m-%d")
        .map_err(|_| RegistryError::Validation(format!("invalid date of birth '{}'", dob)))?;
    if date > chrono::Utc::now().date_naive() {
        return Err(RegistryError::Validation(
            "date of birth must not be in the future".into(),
        ));
    }
    Ok(())
}

/// Minimal email shape check; real deliverability is the mail system's
/// problem.
pub fn is_valid_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
        }
        None => false,
    }
}

pub fn validate_email(email: &str) -> RegistryResult<()> {
    if is_valid_email(email) {
        Ok(())
    } else {
        Err(RegistryError::Validation(format!(
            "invalid email '{}'",
            email
        )))
    }
}

fn validate_text_field(
    name: &str,
    value: &Option<String>,
    max_len: usize,
) -> RegistryResult<()> {
    if let Some(text) = value {
        if text.chars().count() > max_len {
            return Err(RegistryError::Validation(format!(
                "{} exceeds {} characters",
                name, max_len
            )));
        }
    }
    Ok(())
}
