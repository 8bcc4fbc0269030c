//! User records and account deletion.
//!
//! The bot keeps just enough about a user to run the onboarding step after
//! the first login (a display name) and to erase everything on `/logout`.

use thiserror::Error;

mod account;
mod storage;

pub use account::delete_account;
pub use storage::{UserRecord, UserStore};

/// Longest display name accepted, in characters.
pub const MAX_DISPLAY_NAME_CHARS: usize = 12;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("display name cannot be empty")]
    Empty,
    #[error("display name must be at most {} characters", MAX_DISPLAY_NAME_CHARS)]
    TooLong,
    #[error("display name cannot contain control characters")]
    ControlCharacter,
}

/// Trims and validates a display name.
pub fn validate_display_name(raw: &str) -> Result<String, ValidationError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ValidationError::Empty);
    }
    if name.chars().count() > MAX_DISPLAY_NAME_CHARS {
        return Err(ValidationError::TooLong);
    }
    if name.chars().any(char::is_control) {
        return Err(ValidationError::ControlCharacter);
    }
    Ok(name.to_string())
}
