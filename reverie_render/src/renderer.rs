// Production rendering: arrangement in, finished WAV out.
//
// `Renderer::render` humanizes a copy of the arrangement, writes it as a
// scratch MIDI file next to the output, synthesizes a raw mix, runs the
// genre's effect chain, and measures the result. The scratch files are
// removed whether or not the engines succeed. The effect chain must pass
// `ProductionSettings::validate` (canonical order, limiter last) before any
// engine is called. A measured peak above the limiter ceiling is reported as
// `ClippingDetected` alongside the output rather than as an error.

use crate::config::RenderConfig;
use crate::engine::{EffectsEngine, SynthesisEngine, SynthesisRequest};
use crate::error::RenderError;
use crate::ffmpeg::Ffmpeg;
use crate::fluidsynth::FluidSynth;
use crate::humanize::{HumanizeSettings, humanize};
use crate::levels::{LevelSummary, measure};
use reverie_music::midi::write_arrangement_midi;
use reverie_music::{Arrangement, ProductionSettings};
use reverie_prng::SeededRng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One least-significant bit of 16-bit PCM.
pub const CLIP_TOLERANCE: f64 = 1.0 / 32768.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClippingDetected {
    pub peak: f64,
    pub ceiling: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderOutput {
    pub audio_path: PathBuf,
    pub levels: LevelSummary,
    pub clipping: Option<ClippingDetected>,
}

pub struct Renderer {
    synth: Arc<dyn SynthesisEngine>,
    effects: Arc<dyn EffectsEngine>,
    humanize: HumanizeSettings,
}

impl Renderer {
    pub fn new(
        synth: Arc<dyn SynthesisEngine>,
        effects: Arc<dyn EffectsEngine>,
        humanize: HumanizeSettings,
    ) -> Self {
        Self {
            synth,
            effects,
            humanize,
        }
    }

    /// FluidSynth + FFmpeg as configured.
    pub fn from_config(config: &RenderConfig) -> Result<Self, RenderError> {
        config.validate()?;
        Ok(Self::new(
            Arc::new(FluidSynth::from_config(config)),
            Arc::new(Ffmpeg::from_config(config)),
            config.humanize.clone(),
        ))
    }

    /// Verify both engines can run before any work is done.
    pub async fn preflight(&self) -> Result<(), RenderError> {
        self.synth.check().await?;
        self.effects.check().await?;
        tracing::debug!(
            synth = self.synth.name(),
            effects = self.effects.name(),
            "render engines available"
        );
        Ok(())
    }

    pub async fn render(
        &self,
        arrangement: &Arrangement,
        settings: &ProductionSettings,
        audio_path: &Path,
        rng: &mut SeededRng,
    ) -> Result<RenderOutput, RenderError> {
        settings.validate()?;
        let ceiling = settings
            .limiter_ceiling()
            .ok_or_else(|| RenderError::InvalidConfig("effect chain has no limiter".into()))?;

        let dir = audio_path.parent().unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| RenderError::io(dir, e))?;
        let stem = audio_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "render".to_string());
        let midi_path = dir.join(format!("{stem}.render.mid"));
        let raw_path = dir.join(format!("{stem}.raw.wav"));

        let produced = self
            .produce(arrangement, settings, audio_path, &midi_path, &raw_path, rng)
            .await;
        for scratch in [&midi_path, &raw_path] {
            match tokio::fs::remove_file(scratch).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::debug!(path = %scratch.display(), error = %e, "scratch file not removed");
                }
            }
        }
        let levels = produced?;

        let clipping = (levels.peak > ceiling + CLIP_TOLERANCE).then_some(ClippingDetected {
            peak: levels.peak,
            ceiling,
        });
        if let Some(c) = &clipping {
            tracing::warn!(peak = c.peak, ceiling = c.ceiling, "output exceeds limiter ceiling");
        }
        tracing::info!(
            path = %audio_path.display(),
            peak = levels.peak,
            rms = levels.rms,
            secs = levels.duration_secs(),
            "render complete"
        );

        Ok(RenderOutput {
            audio_path: audio_path.to_path_buf(),
            levels,
            clipping,
        })
    }

    /// Humanize, synthesize, process, and measure. Leaves the scratch files
    /// behind for the caller to remove.
    async fn produce(
        &self,
        arrangement: &Arrangement,
        settings: &ProductionSettings,
        audio_path: &Path,
        midi_path: &Path,
        raw_path: &Path,
        rng: &mut SeededRng,
    ) -> Result<LevelSummary, RenderError> {
        let performance = humanize(arrangement, &self.humanize, rng);
        write_arrangement_midi(&performance, midi_path)?;

        tracing::info!(engine = self.synth.name(), "synthesizing");
        self.synth
            .synthesize(SynthesisRequest {
                arrangement: &performance,
                midi_path,
                output_path: raw_path,
            })
            .await?;

        tracing::info!(
            engine = self.effects.name(),
            stages = settings.stages.len(),
            "applying effect chain"
        );
        self.effects
            .process(raw_path, &settings.stages, audio_path)
            .await?;

        let measured = audio_path.to_path_buf();
        tokio::task::spawn_blocking(move || measure(&measured))
            .await
            .map_err(|e| RenderError::EngineFailed {
                engine: "level meter".into(),
                detail: e.to_string(),
            })?
    }
}
