// Errors raised while rendering an arrangement to audio.
//
// Missing binaries, a missing sample library, stalled engines, and failing
// engines are resource errors: the run aborts and nothing is recorded.
// Clipping is not an error; see `renderer::ClippingDetected`.

use reverie_music::MusicError;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("{engine} is unavailable: {reason}")]
    EngineUnavailable { engine: String, reason: String },

    #[error("{engine} did not finish within {timeout:?}")]
    EngineTimeout { engine: String, timeout: Duration },

    #[error("{engine} failed: {detail}")]
    EngineFailed { engine: String, detail: String },

    #[error("invalid render configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Music(#[from] MusicError),

    #[error("failed to read audio {path}: {source}")]
    Wav {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RenderError {
    /// True for failures of the environment (engines, files) rather than of
    /// the request.
    pub fn is_resource(&self) -> bool {
        matches!(
            self,
            RenderError::EngineUnavailable { .. }
                | RenderError::EngineTimeout { .. }
                | RenderError::EngineFailed { .. }
                | RenderError::Wav { .. }
                | RenderError::Io { .. }
        )
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RenderError::Io {
            path: path.into(),
            source,
        }
    }
}
