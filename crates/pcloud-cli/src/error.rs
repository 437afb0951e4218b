use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] pcloud_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Visit limit must be at least 1")]
    InvalidVisitLimit,
    #[error("Queued action {id} could not be read: {message}")]
    UnreadableAction { id: i64, message: String },
}
