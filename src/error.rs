//! Error types for the quillpad server.

use thiserror::Error;

/// All errors that can occur within the quillpad library.
#[derive(Debug, Error)]
pub enum QuillpadError {
    /// A SQLite operation failed.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// An I/O operation on the filesystem failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A payload could not be serialized to or deserialized from JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Hashing or verifying a password failed internally.
    #[error("Password hash error: {0}")]
    PasswordHash(String),

    /// The session token is missing, malformed, tampered with, or expired.
    #[error("Invalid session token")]
    InvalidToken,

    /// The requested username is already registered.
    #[error("Username already taken: {0}")]
    UsernameTaken(String),

    /// Login was attempted with an unknown username or wrong password.
    #[error("Invalid username or password")]
    InvalidCredentials,

    /// The user referenced by a valid token no longer exists.
    #[error("User not found")]
    UserNotFound,

    /// The page does not exist or belongs to another user.
    #[error("Not allowed to access this page")]
    Forbidden,

    /// A request payload failed a local validity check.
    #[error("Validation failed: {0}")]
    Validation(String),
}

/// Convenience alias that pins the error type to [`QuillpadError`].
pub type Result<T> = std::result::Result<T, QuillpadError>;

impl QuillpadError {
    /// Returns a short, human-readable message suitable for display to the end user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Database(_) | Self::Io(_) | Self::Json(_) | Self::PasswordHash(_) => {
                "Internal server error".to_string()
            }
            Self::InvalidToken => "Not signed in".to_string(),
            Self::UsernameTaken(_) => "This username is already taken".to_string(),
            Self::InvalidCredentials => "Invalid username or password".to_string(),
            Self::UserNotFound => "User not found".to_string(),
            Self::Forbidden => "You do not have access to this page".to_string(),
            Self::Validation(msg) => msg.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_errors_are_not_leaked() {
        let e = QuillpadError::PasswordHash("argon2 parameter mismatch".to_string());
        assert_eq!(e.user_message(), "Internal server error");
    }

    #[test]
    fn test_validation_message_passes_through() {
        let e = QuillpadError::Validation("All fields are required".to_string());
        assert_eq!(e.user_message(), "All fields are required");
    }
}
