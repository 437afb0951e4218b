//! Error types for pcloud-core

use thiserror::Error;

/// Result type alias using pcloud-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in pcloud-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Object not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A collection name that is not part of the synced schema
    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    /// Push or pull against the cloud backend failed
    #[error("Backend error: {0}")]
    Backend(String),

    /// Media upload/download failed
    #[error("Media error: {0}")]
    Media(String),

    /// Operation requires an authenticated user
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Operation requires a resolved device identity
    #[error("Device identity has not been resolved yet")]
    MissingDeviceId,

    /// Update was produced by a schema version this core cannot translate
    #[error("Unsupported schema version: {0}")]
    UnsupportedSchemaVersion(i64),

    /// A queued action exhausted its attempts
    #[error("Queued action {id} failed: {message}")]
    ActionFailed { id: i64, message: String },

    /// A downloaded update could not be applied to local storage
    #[error("Failed to integrate update into {collection}: {message}")]
    Integration { collection: String, message: String },
}

impl Error {
    /// Build an integration error for the given collection.
    pub fn integration(collection: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Integration {
            collection: collection.into(),
            message: message.to_string(),
        }
    }
}
