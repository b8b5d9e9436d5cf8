use thiserror::Error;

/// Errors that can arise while loading definitions or touching the progress store.
///
/// Invalid state transitions (claiming an unfinished quest, activating during a
/// cooldown) are not errors; those operations report `false` / `None` instead.
#[derive(Debug, Error)]
pub enum QuestError {
    /// Wrapper around sled's error type.
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// Wrapper around bincode serialization and deserialization errors.
    #[error("serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// Wrapper around JSON errors from definition files.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Wrapper around IO errors (directory walks, definition rewrites).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A multi-tree store transaction was aborted.
    #[error("store transaction aborted")]
    TransactionAborted,

    /// Returned when deserializing a record with an unexpected schema version.
    #[error("schema mismatch for {entity}: expected {expected}, got {found}")]
    SchemaMismatch {
        entity: &'static str,
        expected: u8,
        found: u8,
    },

    /// A definition was rejected by the admin edit path.
    #[error("invalid definition: {0}")]
    InvalidDefinition(String),

    /// User ids are key segments in the store and may not contain `:`.
    #[error("invalid user id: {0}")]
    InvalidUserId(#[from] crate::validation::IdError),
}
