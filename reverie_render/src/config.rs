// Render configuration: engine binaries, sample library, output format, and
// humanization. Embedded in the pipeline config file under "render"; every
// field has a default so partial files are fine.

use crate::error::RenderError;
use crate::humanize::HumanizeSettings;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Largest synthesizer master gain accepted. FluidSynth's own default of
/// 0.2 is quiet; values above 1.0 clip dense passages before the limiter.
pub const MAX_SYNTH_GAIN: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub fluidsynth_binary: PathBuf,
    pub ffmpeg_binary: PathBuf,
    /// General MIDI SoundFont used for synthesis.
    pub soundfont: PathBuf,
    pub sample_rate: u32,
    pub synth_gain: f64,
    /// Per-engine-call timeout.
    pub timeout_secs: u64,
    pub humanize: HumanizeSettings,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            fluidsynth_binary: PathBuf::from("fluidsynth"),
            ffmpeg_binary: PathBuf::from("ffmpeg"),
            soundfont: PathBuf::from("/usr/share/sounds/sf2/FluidR3_GM.sf2"),
            sample_rate: 44_100,
            synth_gain: 0.5,
            timeout_secs: 300,
            humanize: HumanizeSettings::default(),
        }
    }
}

impl RenderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<(), RenderError> {
        if !(f64::MIN_POSITIVE..=MAX_SYNTH_GAIN).contains(&self.synth_gain) {
            return Err(RenderError::InvalidConfig(format!(
                "synth_gain {} outside (0, {MAX_SYNTH_GAIN}]",
                self.synth_gain
            )));
        }
        if !(8_000..=192_000).contains(&self.sample_rate) {
            return Err(RenderError::InvalidConfig(format!(
                "sample_rate {} outside 8000..=192000",
                self.sample_rate
            )));
        }
        if self.timeout_secs == 0 {
            return Err(RenderError::InvalidConfig("timeout_secs must be positive".into()));
        }
        self.humanize.validate()
    }
}
