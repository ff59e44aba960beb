// Production renderer: turns an arrangement into a finished audio file.
//
// Rendering is two external engines behind traits. FluidSynth synthesizes
// the arrangement's MIDI with a General MIDI SoundFont, then FFmpeg applies
// the genre's effect chain (gain, EQ, compression, reverb, stereo width,
// limiter) and writes 16-bit PCM. Each engine call runs under a timeout.
// After rendering the output peak is measured against the limiter ceiling.
//
// Module overview:
// - `engine.rs`: `SynthesisEngine` / `EffectsEngine` traits and the
//   timeout-bounded process runner.
// - `fluidsynth.rs`, `ffmpeg.rs`: the shipped engines.
// - `config.rs`: `RenderConfig` (binaries, SoundFont, gain, timeout).
// - `humanize.rs`: timing/velocity jitter applied before synthesis.
// - `levels.rs`: WAV peak/RMS measurement via `hound`.
// - `renderer.rs`: `Renderer`, which sequences the above.
// - `testing.rs`: in-process engines (behind the `test-engines` feature).

pub mod config;
pub mod engine;
pub mod error;
pub mod ffmpeg;
pub mod fluidsynth;
pub mod humanize;
pub mod levels;
pub mod renderer;
#[cfg(any(test, feature = "test-engines"))]
pub mod testing;

pub use config::RenderConfig;
pub use engine::{EffectsEngine, SynthesisEngine, SynthesisRequest};
pub use error::RenderError;
pub use humanize::HumanizeSettings;
pub use levels::LevelSummary;
pub use renderer::{CLIP_TOLERANCE, ClippingDetected, RenderOutput, Renderer};
