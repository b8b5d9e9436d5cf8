//! Identifier validation for definitions written through the admin edit path.
//!
//! Definition ids become file names (`<category>/<id>.json`) and sled key segments
//! (`ledger:<event>:<user>:...`), so they are restricted to a conservative character set.

/// Maximum length of a quest or event id.
pub const MAX_ID_LEN: usize = 64;

/// Definition id validation errors with helpful messages
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    #[error("Id is empty")]
    Empty,

    #[error("Id is too long (maximum {max} characters)")]
    TooLong { max: usize },

    #[error("Id contains invalid characters: {chars}")]
    InvalidCharacters { chars: String },

    #[error("Id contains path separators or parent references")]
    PathTraversal,
}

/// Validate a quest or event id.
///
/// Allowed: ASCII letters, digits, `_` and `-`. Leading dots and path separators
/// are rejected separately so the error names the actual problem.
pub fn validate_definition_id(id: &str) -> Result<(), IdError> {
    if id.is_empty() {
        return Err(IdError::Empty);
    }
    if id.len() > MAX_ID_LEN {
        return Err(IdError::TooLong { max: MAX_ID_LEN });
    }
    if id.contains('/') || id.contains('\\') || id.contains("..") {
        return Err(IdError::PathTraversal);
    }
    let invalid: String = id
        .chars()
        .filter(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
        .collect();
    if !invalid.is_empty() {
        return Err(IdError::InvalidCharacters { chars: invalid });
    }
    Ok(())
}

/// Validate a user id as handed over by the chat adapter (Discord snowflakes in practice)
/// and return the trimmed form used for locks, store keys and ledger rows.
pub fn canonical_user_id(user_id: &str) -> Result<String, IdError> {
    let trimmed = user_id.trim();
    if trimmed.is_empty() {
        return Err(IdError::Empty);
    }
    if trimmed.len() > MAX_ID_LEN {
        return Err(IdError::TooLong { max: MAX_ID_LEN });
    }
    if trimmed.contains(':') {
        return Err(IdError::InvalidCharacters {
            chars: ":".to_string(),
        });
    }
    Ok(trimmed.to_string())
}
