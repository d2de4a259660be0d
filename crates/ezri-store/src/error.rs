//! Error types for Ezri storage.

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// A stored value could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record.
        entity: &'static str,
        /// Key that was looked up.
        id: String,
    },
}

impl StoreError {
    /// Shorthand for a missing profile.
    #[must_use]
    pub fn profile_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            entity: "profile",
            id: id.to_string(),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<ezri_core::ParseError> for StoreError {
    fn from(err: ezri_core::ParseError) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<ezri_core::IdError> for StoreError {
    fn from(err: ezri_core::IdError) -> Self {
        Self::Serialization(err.to_string())
    }
}
