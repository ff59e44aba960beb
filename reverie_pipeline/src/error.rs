// Pipeline error: wraps the stage errors and classifies every failure as an
// input problem, a resource problem, or an internal fault.

use reverie_music::MusicError;
use reverie_render::RenderError;
use reverie_store::StoreError;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The request was invalid; retrying the same request cannot succeed.
    Input,
    /// An external dependency (engine, sample library, database) failed.
    Resource,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Music(#[from] MusicError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error("malformed config {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode run summary: {0}")]
    Summary(#[source] serde_json::Error),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Music(e) => match e {
                MusicError::Io { .. } | MusicError::Midi(_) => ErrorKind::Resource,
                _ => ErrorKind::Input,
            },
            PipelineError::Render(e) if e.is_resource() => ErrorKind::Resource,
            PipelineError::Render(_) => ErrorKind::Input,
            PipelineError::Store(e) if e.is_resource() => ErrorKind::Resource,
            PipelineError::Store(StoreError::Corrupt { .. }) => ErrorKind::Internal,
            PipelineError::Store(_) => ErrorKind::Input,
            PipelineError::InvalidOption(_) | PipelineError::Config { .. } => ErrorKind::Input,
            PipelineError::Io { .. } => ErrorKind::Resource,
            PipelineError::Summary(_) | PipelineError::Task(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_kinds_follow_taxonomy() {
        let input = PipelineError::from(MusicError::InvalidDuration("0 bars".into()));
        assert_eq!(input.kind(), ErrorKind::Input);
        let unknown = PipelineError::from(MusicError::UnknownGenre("polka".into()));
        assert_eq!(unknown.kind(), ErrorKind::Input);

        let missing = PipelineError::from(RenderError::EngineUnavailable {
            engine: "fluidsynth".into(),
            reason: "not found".into(),
        });
        assert_eq!(missing.kind(), ErrorKind::Resource);
        let stalled = PipelineError::from(RenderError::EngineTimeout {
            engine: "ffmpeg".into(),
            timeout: Duration::from_secs(1),
        });
        assert_eq!(stalled.kind(), ErrorKind::Resource);

        assert_eq!(
            PipelineError::from(StoreError::UnknownRecord(3)).kind(),
            ErrorKind::Input
        );
        assert_eq!(
            PipelineError::from(StoreError::Poisoned).kind(),
            ErrorKind::Resource
        );
    }
}
