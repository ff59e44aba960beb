// Pipeline configuration, loaded from a JSON file. Every field has a
// default, so `{}` is a valid config and a missing file falls back to
// `PipelineConfig::default()` at the CLI.

use crate::error::PipelineError;
use reverie_music::{GenreRegistry, MusicError};
use reverie_render::RenderConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Run directories are created under here.
    pub output_dir: PathBuf,
    pub database: PathBuf,
    /// JSON array of genre profiles; the built-in profiles when absent.
    pub genre_profiles: Option<PathBuf>,
    pub render: RenderConfig,
    /// Melodies generated per run before optimization.
    pub candidate_count: usize,
    /// Rated records consulted when biasing parameters from history.
    pub recommendation_limit: usize,
    pub bias: BiasConfig,
}

/// Spread of the seeded jitter applied around a learned centroid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BiasConfig {
    pub tempo_bpm: f64,
    pub reverb_mix: f64,
    pub compression_ratio: f64,
    pub stereo_width: f64,
}

impl Default for BiasConfig {
    fn default() -> Self {
        Self {
            tempo_bpm: 3.0,
            reverb_mix: 0.05,
            compression_ratio: 0.3,
            stereo_width: 0.05,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            database: PathBuf::from("output/reverie.db"),
            genre_profiles: None,
            render: RenderConfig::default(),
            candidate_count: 3,
            recommendation_limit: 10,
            bias: BiasConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let text = std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        let config: Self = serde_json::from_str(&text).map_err(|source| PipelineError::Config {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "loaded pipeline config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(1..=32).contains(&self.candidate_count) {
            return Err(PipelineError::InvalidOption(format!(
                "candidate_count {} outside 1..=32",
                self.candidate_count
            )));
        }
        let spreads = [
            self.bias.tempo_bpm,
            self.bias.reverb_mix,
            self.bias.compression_ratio,
            self.bias.stereo_width,
        ];
        if spreads.iter().any(|s| !s.is_finite() || *s < 0.0) {
            return Err(PipelineError::InvalidOption(
                "bias spreads must be finite and non-negative".into(),
            ));
        }
        self.render.validate()?;
        Ok(())
    }

    pub fn registry(&self) -> Result<GenreRegistry, MusicError> {
        match &self.genre_profiles {
            Some(path) => GenreRegistry::load(path),
            None => Ok(GenreRegistry::builtin()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_is_default() {
        let config: PipelineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, PipelineConfig::default());
        config.validate().unwrap();
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reverie.json");
        std::fs::write(
            &path,
            r#"{"output_dir": "/tmp/runs", "candidate_count": 5,
                "render": {"synth_gain": 0.25, "humanize": {"enabled": false}}}"#,
        )
        .unwrap();
        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("/tmp/runs"));
        assert_eq!(config.candidate_count, 5);
        assert_eq!(config.render.synth_gain, 0.25);
        assert!(!config.render.humanize.enabled);
        assert_eq!(config.recommendation_limit, 10);
    }

    #[test]
    fn test_malformed_and_invalid_configs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            PipelineConfig::load(&path),
            Err(PipelineError::Config { .. })
        ));

        std::fs::write(&path, r#"{"candidate_count": 0}"#).unwrap();
        assert!(matches!(
            PipelineConfig::load(&path),
            Err(PipelineError::InvalidOption(_))
        ));
    }

    #[test]
    fn test_builtin_registry_when_no_profile_file() {
        let registry = PipelineConfig::default().registry().unwrap();
        assert_eq!(registry.genres().count(), 6);
    }
}
