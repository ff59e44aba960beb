// Stored record types.

use crate::vector::ParameterVector;
use chrono::{DateTime, Utc};
use reverie_music::{Fingerprint, Genre};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Store-assigned record identifier.
pub type RecordId = i64;

/// Free-form context saved with each record, kept as JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordMetadata {
    pub tags: Vec<String>,
    pub note: Option<String>,
    pub seed: Option<u64>,
    /// Melody fingerprint; feeds the uniqueness history of later runs.
    pub fingerprint: Option<Fingerprint>,
    /// Quality warnings raised during the run, as display strings.
    pub warnings: Vec<String>,
    pub audio_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub id: RecordId,
    pub genre: Genre,
    pub vector: ParameterVector,
    pub metadata: RecordMetadata,
    pub rating: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl EmbeddingRecord {
    pub fn has_warnings(&self) -> bool {
        !self.metadata.warnings.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarMatch {
    pub id: RecordId,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub rating: f64,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_records: usize,
    pub rated_records: usize,
    pub mean_rating: Option<f64>,
    pub per_genre: BTreeMap<Genre, usize>,
}
