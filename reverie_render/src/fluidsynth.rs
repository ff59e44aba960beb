// FluidSynth synthesis engine.
//
// Renders a MIDI file with a SoundFont to a float WAV using the fast
// (non-realtime) file renderer. Float output keeps inter-sample overs
// intact so the limiter, not the synthesizer, decides the final peak.

use crate::config::RenderConfig;
use crate::engine::{SynthesisEngine, SynthesisRequest, probe_tool, run_tool};
use crate::error::RenderError;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENGINE: &str = "fluidsynth";

#[derive(Debug, Clone)]
pub struct FluidSynth {
    binary: PathBuf,
    soundfont: PathBuf,
    sample_rate: u32,
    gain: f64,
    timeout: Duration,
}

impl FluidSynth {
    pub fn from_config(config: &RenderConfig) -> Self {
        Self {
            binary: config.fluidsynth_binary.clone(),
            soundfont: config.soundfont.clone(),
            sample_rate: config.sample_rate,
            gain: config.synth_gain,
            timeout: config.timeout(),
        }
    }

    fn args(&self, midi: &Path, output: &Path) -> Vec<OsString> {
        vec![
            "-ni".into(),
            "-q".into(),
            "-T".into(),
            "wav".into(),
            "-O".into(),
            "float".into(),
            "-F".into(),
            output.into(),
            "-r".into(),
            self.sample_rate.to_string().into(),
            "-g".into(),
            format!("{:.3}", self.gain).into(),
            self.soundfont.clone().into(),
            midi.into(),
        ]
    }
}

#[async_trait]
impl SynthesisEngine for FluidSynth {
    fn name(&self) -> &str {
        ENGINE
    }

    async fn check(&self) -> Result<(), RenderError> {
        match tokio::fs::metadata(&self.soundfont).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => {
                return Err(RenderError::EngineUnavailable {
                    engine: ENGINE.into(),
                    reason: format!("soundfont {} is not a file", self.soundfont.display()),
                });
            }
            Err(e) => {
                return Err(RenderError::EngineUnavailable {
                    engine: ENGINE.into(),
                    reason: format!("soundfont {}: {e}", self.soundfont.display()),
                });
            }
        }
        probe_tool(ENGINE, &self.binary, &["--version"]).await
    }

    async fn synthesize(&self, request: SynthesisRequest<'_>) -> Result<(), RenderError> {
        let args = self.args(request.midi_path, request.output_path);
        run_tool(ENGINE, &self.binary, &args, self.timeout).await?;
        // FluidSynth exits 0 when it cannot load the MIDI file.
        match tokio::fs::metadata(request.output_path).await {
            Ok(meta) if meta.len() > 44 => Ok(()),
            _ => Err(RenderError::EngineFailed {
                engine: ENGINE.into(),
                detail: format!("no audio written to {}", request.output_path.display()),
            }),
        }
    }
}
