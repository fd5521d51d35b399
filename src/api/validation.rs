//! Input validation for API requests.
//!
//! This module provides validation functions for API request data,
//! ensuring all inputs meet the required format and constraints.
//!
//! For collecting multiple validation errors and returning them as an ApiError,
//! use the `ValidationErrorBuilder` from the `error` module.

use lazy_static::lazy_static;
use regex::Regex;

use crate::db::{QueryHeading, QueryStatus};

lazy_static! {
    /// Regex for validating usernames (letters, digits, `_`, `.`, `-`)
    static ref USERNAME_REGEX: Regex = Regex::new(
        r"^[A-Za-z0-9][A-Za-z0-9_.-]*$"
    ).unwrap();

    /// Regex for validating email addresses (deliberately loose)
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[^@\s]+@[^@\s]+\.[^@\s]+$"
    ).unwrap();

    /// Regex for validating mobile numbers (optional leading +, digits, spaces, dashes)
    static ref MOBILE_REGEX: Regex = Regex::new(
        r"^\+?[0-9][0-9 -]{5,18}[0-9]$"
    ).unwrap();
}

/// Minimum accepted password length
const MIN_PASSWORD_LENGTH: usize = 8;

/// Maximum stored length of a query description
const MAX_DESCRIPTION_LENGTH: usize = 5000;

/// Validate a username
pub fn validate_username(username: &str) -> Result<(), String> {
    if username.is_empty() {
        return Err("Username is required".to_string());
    }

    if username.len() < 3 {
        return Err("Username is too short (min 3 characters)".to_string());
    }

    if username.len() > 32 {
        return Err("Username is too long (max 32 characters)".to_string());
    }

    if !USERNAME_REGEX.is_match(username) {
        return Err(
            "Username may only contain letters, digits, '_', '.' and '-'".to_string(),
        );
    }

    Ok(())
}

/// Validate an email address
pub fn validate_email(email: &str) -> Result<(), String> {
    if email.is_empty() {
        return Err("Email is required".to_string());
    }

    if email.len() > 254 {
        return Err("Email is too long (max 254 characters)".to_string());
    }

    if !EMAIL_REGEX.is_match(email) {
        return Err("Invalid email address".to_string());
    }

    Ok(())
}

/// Validate a password and its confirmation
pub fn validate_password(password: &str, confirm_password: &str) -> Result<(), String> {
    if password.is_empty() {
        return Err("Password is required".to_string());
    }

    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        ));
    }

    if password != confirm_password {
        return Err("Passwords do not match".to_string());
    }

    Ok(())
}

/// Validate a mobile number
pub fn validate_mobile(mobile: &str) -> Result<(), String> {
    if mobile.is_empty() {
        return Err("Mobile number is required".to_string());
    }

    if !MOBILE_REGEX.is_match(mobile) {
        return Err("Invalid mobile number".to_string());
    }

    Ok(())
}

/// Validate a query heading against the fixed categories
pub fn validate_heading(heading: &str) -> Result<QueryHeading, String> {
    if heading.trim().is_empty() {
        return Err("Query heading is required".to_string());
    }

    heading.parse().map_err(|_| {
        format!(
            "Invalid query heading. Must be one of: {}",
            QueryHeading::labels().join(", ")
        )
    })
}

/// Validate a query description
pub fn validate_description(description: &str) -> Result<(), String> {
    if description.trim().is_empty() {
        return Err("Query description is required".to_string());
    }

    if description.chars().count() > MAX_DESCRIPTION_LENGTH {
        return Err(format!(
            "Query description is too long (max {} characters)",
            MAX_DESCRIPTION_LENGTH
        ));
    }

    Ok(())
}

/// Parse an optional status filter. Absent, empty or `All` means no filter.
pub fn parse_status_filter(value: Option<&str>) -> Result<Option<QueryStatus>, String> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) if v.eq_ignore_ascii_case("all") => Ok(None),
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|_| "Invalid status. Must be one of: All, Open, Closed".to_string()),
    }
}

/// Parse an optional heading filter. Absent, empty or `All` means no filter.
///
/// Any other value is matched literally so rows with legacy headings can
/// still be found.
pub fn parse_heading_filter(value: Option<&str>) -> Option<String> {
    match value.map(str::trim) {
        None | Some("") => None,
        Some(v) if v.eq_ignore_ascii_case("all") => None,
        Some(v) => Some(v.to_string()),
    }
}
