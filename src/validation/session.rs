use crate::error::{AppError, Result};

/// Largest accepted request body, in bytes.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Validates a user id.
///
/// User ids become part of backend keys, so only ASCII letters, digits
/// and `_ - . @` are accepted.
///
/// # Arguments
///
/// * `user_id` - The user id to validate.
///
/// # Returns
///
/// A `Result<()>` indicating whether the user id is valid.
pub fn validate_user_id(user_id: &str) -> Result<()> {
    if user_id.is_empty() {
        return Err(AppError::Validation("User id cannot be empty".to_string()));
    }

    if user_id.len() > 255 {
        return Err(AppError::Validation(
            "User id must be at most 255 characters".to_string(),
        ));
    }

    if !user_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '@'))
    {
        return Err(AppError::Validation(
            "User id can only contain ASCII letters, numbers, '_', '-', '.' and '@'".to_string(),
        ));
    }

    Ok(())
}
