use thiserror::Error;

/// Errors that can occur within the store subsystem.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Archive filesystem operation failed.
    #[error("Archive I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No row matched the lookup.
    #[error("Not found: {what}")]
    NotFound { what: String },

    /// A stored column held a value the type layer rejects.
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
