// Error type for the composition stages (melody, optimizer, arrangement,
// genre profiles, MIDI export).
//
// Input problems (bad duration, unknown genre, incomplete profile) are
// reported here before any audio work starts. Quality degradation is not an
// error: see `uniqueness::DegradedUniqueness`.

use crate::arrangement::Role;
use crate::genre::Genre;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum MusicError {
    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    #[error("invalid tempo: {0} bpm")]
    InvalidTempo(f64),

    #[error("unknown genre: {0}")]
    UnknownGenre(String),

    #[error("genre profile {genre} has no {role} role")]
    MissingRoleProfile { genre: Genre, role: Role },

    #[error("invalid profile for {genre}: {reason}")]
    InvalidProfile { genre: Genre, reason: String },

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed genre profiles in {path}: {source}")]
    ProfileFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode MIDI: {0}")]
    Midi(String),
}

impl MusicError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MusicError::Io {
            path: path.into(),
            source,
        }
    }
}
