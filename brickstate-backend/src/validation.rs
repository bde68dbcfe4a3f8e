/// Input validation functions for the control API
use thiserror::Error;

const MAX_CONSUMER_NAME: usize = 64;
const MAX_PLAYER_NAME: usize = 64;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Consumer name cannot be empty")]
    ConsumerNameEmpty,

    #[error("Consumer name too long (max 64 characters, got {0})")]
    ConsumerNameTooLong(usize),

    #[error("Consumer name contains invalid characters (only alphanumeric, '-', '_' and '.' allowed)")]
    ConsumerNameInvalidChars,

    #[error("Player name cannot be empty")]
    PlayerNameEmpty,

    #[error("Player name too long (max 64 characters, got {0})")]
    PlayerNameTooLong(usize),

    #[error("Player name contains control characters")]
    PlayerNameControlChars,
}

/// Validates a consumer name
///
/// Rules:
/// - Cannot be empty
/// - Max 64 characters
/// - Only alphanumeric characters, dashes, underscores and dots
pub fn validate_consumer_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::ConsumerNameEmpty);
    }

    let len = name.chars().count();
    if len > MAX_CONSUMER_NAME {
        return Err(ValidationError::ConsumerNameTooLong(len));
    }

    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(ValidationError::ConsumerNameInvalidChars);
    }

    Ok(())
}

/// Validates a player display name
///
/// Rules:
/// - Cannot be empty
/// - Max 64 characters
/// - No control characters (display names may contain spaces and symbols)
pub fn validate_player_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::PlayerNameEmpty);
    }

    let len = name.chars().count();
    if len > MAX_PLAYER_NAME {
        return Err(ValidationError::PlayerNameTooLong(len));
    }

    if name.chars().any(char::is_control) {
        return Err(ValidationError::PlayerNameControlChars);
    }

    Ok(())
}
