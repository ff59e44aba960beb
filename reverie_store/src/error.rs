// Embedding store errors.

use crate::record::RecordId;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("embedding store unavailable: {0}")]
    Unavailable(#[from] rusqlite::Error),

    #[error("embedding store lock poisoned")]
    Poisoned,

    #[error("cannot prepare store location {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no record with id {0}")]
    UnknownRecord(RecordId),

    #[error("invalid parameter vector: {0}")]
    InvalidVector(String),

    #[error("invalid rating {0}: must be finite")]
    InvalidRating(f64),

    #[error("corrupt record {id}: {reason}")]
    Corrupt { id: RecordId, reason: String },
}

impl StoreError {
    pub fn is_resource(&self) -> bool {
        matches!(
            self,
            StoreError::Unavailable(_) | StoreError::Poisoned | StoreError::Io { .. }
        )
    }
}
