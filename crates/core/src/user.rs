//! User field validation.

use validator::ValidateEmail;

use crate::error::CoreError;

/// Maximum length of a username.
const MAX_USERNAME_LEN: usize = 64;

/// Minimum length of a username.
const MIN_USERNAME_LEN: usize = 3;

/// Validate a username.
///
/// Rules:
/// - Between `MIN_USERNAME_LEN` and `MAX_USERNAME_LEN` characters.
/// - Only alphanumeric, hyphen, underscore, or dot characters.
pub fn validate_username(username: &str) -> Result<(), CoreError> {
    let len = username.chars().count();
    if !(MIN_USERNAME_LEN..=MAX_USERNAME_LEN).contains(&len) {
        return Err(CoreError::Validation(format!(
            "Username must be between {MIN_USERNAME_LEN} and {MAX_USERNAME_LEN} characters"
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(CoreError::Validation(
            "Username may only contain alphanumeric, hyphen, underscore, or dot characters"
                .to_string(),
        ));
    }
    Ok(())
}

/// Lowercase and trim an email so uniqueness checks are case-insensitive.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn validate_email(email: &str) -> Result<(), CoreError> {
    if email.validate_email() {
        Ok(())
    } else {
        Err(CoreError::Validation(format!("Invalid email address '{email}'")))
    }
}
