// src/validation.rs

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};

use crate::error::ApiError;
use crate::geo::valid_coordinates;

const PHONE_MIN: u64 = 100_000_000;
const PHONE_MAX: u64 = 999_999_999;

#[derive(Debug, Clone, Deserialize)]
pub struct AddressInput {
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Patient details as submitted by the booking and registration forms.
#[derive(Debug, Clone, Deserialize)]
pub struct PatientDetailsInput {
    pub name: String,
    #[serde(deserialize_with = "string_or_number")]
    pub phone_number: String,
    pub email: String,
    pub address: AddressInput,
    pub sex: String,
    pub dob: NaiveDate,
}

/// Trimmed and canonicalised; safe to match against stored patients.
#[derive(Debug, Clone, PartialEq)]
pub struct PatientDetails {
    pub name: String,
    pub phone_number: String,
    pub email: String,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub sex: String,
    pub dob: NaiveDate,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    })
}

fn invalid(msg: impl Into<String>) -> ApiError {
    ApiError::BadRequest("VALIDATION_ERROR", msg.into())
}

/// Separators are dropped and the digits read as a number, so a leading
/// trunk zero ("0917 123 4567" style input) is tolerated.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let n: u64 = digits.parse().ok()?;
    (PHONE_MIN..=PHONE_MAX).contains(&n).then(|| n.to_string())
}

pub fn is_valid_email(raw: &str) -> bool {
    let s = raw.trim();
    if s.is_empty() || s.len() > 254 || s.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && domain.split('.').all(|part| !part.is_empty())
}

pub fn validate_patient_details(
    input: &PatientDetailsInput,
    today: NaiveDate,
) -> Result<PatientDetails, ApiError> {
    let name = input.name.trim();
    if name.is_empty() {
        return Err(invalid("Name is required."));
    }
    if name.chars().count() > 128 {
        return Err(invalid("Name is too long (max 128)"));
    }

    let phone_number = normalize_phone(&input.phone_number)
        .ok_or_else(|| invalid("Invalid phone number"))?;

    if !is_valid_email(&input.email) {
        return Err(invalid("Invalid email address"));
    }
    let email = input.email.trim().to_lowercase();

    let address = input.address.address.trim();
    if address.is_empty() {
        return Err(invalid("Address must be provided"));
    }
    if !valid_coordinates(input.address.latitude, input.address.longitude) {
        return Err(invalid("Invalid address"));
    }

    let sex = input.sex.trim();
    if sex.is_empty() {
        return Err(invalid("Sex is required"));
    }

    if input.dob > today {
        return Err(invalid("Date of birth cannot be in the future"));
    }

    Ok(PatientDetails {
        name: name.to_string(),
        phone_number,
        email,
        address: address.to_string(),
        latitude: input.address.latitude,
        longitude: input.address.longitude,
        sex: sex.to_string(),
        dob: input.dob,
    })
}

pub fn validate_password(pw: &str) -> Result<(), ApiError> {
    if pw.chars().count() < 8 {
        return Err(invalid("Password must be at least 8 characters"));
    }
    if !pw.chars().any(|c| c.is_ascii_digit()) {
        return Err(invalid("Password must contain at least 1 number"));
    }
    if !pw.chars().any(|c| c.is_lowercase()) {
        return Err(invalid("Password must contain at least 1 lowercase letter"));
    }
    if !pw.chars().any(|c| c.is_uppercase()) {
        return Err(invalid("Password must contain at least 1 uppercase letter"));
    }
    Ok(())
}

pub fn validate_password_pair(pw: &str, confirm: &str) -> Result<(), ApiError> {
    if confirm.is_empty() {
        return Err(invalid("Confirm password is required"));
    }
    validate_password(pw)?;
    if pw != confirm {
        return Err(invalid("Passwords don't match"));
    }
    Ok(())
}
