// In-process stand-in engines for tests.
//
// `ToneSynth` renders each note as a plain sine so the synthesized level
// tracks note count and velocity the way a real synth does, without needing
// a SoundFont. `ReferenceProcessor` applies the effect chain sample by
// sample (EQ is treated as flat; reverb is a single feedback comb) and ends
// with a lookahead peak limiter shaped like `alimiter` (5 ms attack, 50 ms
// release): gain ramps down ahead of a peak and recovers afterwards, and is
// shared by both channels. `UnavailableEngine` and `BrokenEngine` exercise
// the failure paths.

use crate::engine::{EffectsEngine, SynthesisEngine, SynthesisRequest};
use crate::error::RenderError;
use async_trait::async_trait;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use reverie_music::{Arrangement, EffectStage, TICKS_PER_BEAT};
use std::path::Path;

const LIMITER_ATTACK_S: f64 = 0.005;
const LIMITER_RELEASE_S: f64 = 0.050;

#[derive(Debug, Clone)]
pub struct ToneSynth {
    pub sample_rate: u32,
    pub gain: f64,
}

impl Default for ToneSynth {
    fn default() -> Self {
        Self {
            sample_rate: 8_000,
            gain: 0.5,
        }
    }
}

impl ToneSynth {
    /// Interleaved stereo samples for `arrangement`.
    pub fn render_samples(&self, arrangement: &Arrangement) -> Vec<f32> {
        let rate = self.sample_rate as f64;
        let secs_per_tick = 60.0 / (arrangement.tempo_bpm() * TICKS_PER_BEAT as f64);
        let frames = (arrangement.total_ticks() as f64 * secs_per_tick * rate).ceil() as usize + 1;
        let mut mix = vec![0.0f64; frames * 2];

        for track in &arrangement.tracks {
            let pan = track.pan.clamp(-1.0, 1.0);
            let left = (1.0 - pan).min(1.0);
            let right = (1.0 + pan).min(1.0);
            for note in &track.notes {
                let freq = 440.0 * 2f64.powf((note.pitch as f64 - 69.0) / 12.0);
                let amp = self.gain * track.volume * note.velocity as f64 / 127.0;
                let first = (note.start as f64 * secs_per_tick * rate) as usize;
                let last = ((note.end() as f64 * secs_per_tick * rate) as usize).min(frames);
                for frame in first..last {
                    let t = (frame - first) as f64 / rate;
                    let s = amp * (std::f64::consts::TAU * freq * t).sin();
                    mix[frame * 2] += s * left;
                    mix[frame * 2 + 1] += s * right;
                }
            }
        }
        mix.into_iter().map(|s| s as f32).collect()
    }
}

#[async_trait]
impl SynthesisEngine for ToneSynth {
    fn name(&self) -> &str {
        "tone-synth"
    }

    async fn check(&self) -> Result<(), RenderError> {
        Ok(())
    }

    async fn synthesize(&self, request: SynthesisRequest<'_>) -> Result<(), RenderError> {
        let samples = self.render_samples(request.arrangement);
        write_f32(request.output_path, self.sample_rate, &samples)
    }
}

#[derive(Debug, Clone)]
pub struct ReferenceProcessor {
    honour_limiter: bool,
}

impl Default for ReferenceProcessor {
    fn default() -> Self {
        Self {
            honour_limiter: true,
        }
    }
}

impl ReferenceProcessor {
    /// A processor that skips the limiter stage and writes float output, so
    /// overs survive to the level meter.
    pub fn without_limiter() -> Self {
        Self {
            honour_limiter: false,
        }
    }

    fn apply(&self, samples: &mut [f64], sample_rate: u32, stages: &[EffectStage]) {
        for stage in stages {
            match *stage {
                EffectStage::Gain { level } => samples.iter_mut().for_each(|s| *s *= level),
                EffectStage::Equalizer { .. } => {}
                EffectStage::Compressor {
                    threshold_db, ratio, ..
                } => {
                    let threshold = 10f64.powf(threshold_db / 20.0);
                    for s in samples.iter_mut() {
                        let mag = s.abs();
                        if mag > threshold {
                            *s = s.signum() * (threshold + (mag - threshold) / ratio);
                        }
                    }
                }
                EffectStage::Reverb { decay_s, mix } => {
                    let delay = ((decay_s * 0.1 * sample_rate as f64) as usize).max(1) * 2;
                    for i in delay..samples.len() {
                        samples[i] += 0.5 * mix * samples[i - delay];
                    }
                }
                EffectStage::StereoWidth { width } => {
                    for frame in samples.chunks_exact_mut(2) {
                        let mid = (frame[0] + frame[1]) / 2.0;
                        let side = (frame[0] - frame[1]) / 2.0 * width;
                        frame[0] = mid + side;
                        frame[1] = mid - side;
                    }
                }
                EffectStage::Limiter { ceiling } => {
                    if self.honour_limiter {
                        limit(samples, sample_rate, ceiling);
                    }
                }
            }
        }
    }
}

/// Peak-limit interleaved stereo to `ceiling`.
///
/// Each frame needs gain `ceiling / peak` (1 when under the ceiling). The
/// applied gain at a frame is the lowest linear ramp, over the lookahead
/// window, that reaches every upcoming frame's need in time; it then recovers
/// at most `1 / release` per second. The ramp's own frame term keeps the
/// gain at or below each frame's need.
pub fn limit(samples: &mut [f64], sample_rate: u32, ceiling: f64) {
    let rate = sample_rate.max(1) as f64;
    let lookahead = ((rate * LIMITER_ATTACK_S) as usize).max(1);
    let recovery = 1.0 / (rate * LIMITER_RELEASE_S).max(1.0);
    let need: Vec<f64> = samples
        .chunks_exact(2)
        .map(|frame| {
            let peak = frame[0].abs().max(frame[1].abs());
            if peak > ceiling { ceiling / peak } else { 1.0 }
        })
        .collect();

    let mut gain = 1.0f64;
    for (i, frame) in samples.chunks_exact_mut(2).enumerate() {
        let horizon = (i + lookahead).min(need.len());
        let ahead = need[i..horizon]
            .iter()
            .enumerate()
            .map(|(d, &g)| g + (1.0 - g) * d as f64 / lookahead as f64)
            .fold(1.0, f64::min);
        gain = ahead.min(gain + recovery);
        frame[0] *= gain;
        frame[1] *= gain;
    }
}

#[async_trait]
impl EffectsEngine for ReferenceProcessor {
    fn name(&self) -> &str {
        "reference-processor"
    }

    async fn check(&self) -> Result<(), RenderError> {
        Ok(())
    }

    async fn process(
        &self,
        input: &Path,
        stages: &[EffectStage],
        output: &Path,
    ) -> Result<(), RenderError> {
        let (sample_rate, mut samples) = read_stereo(input)?;
        self.apply(&mut samples, sample_rate, stages);
        if self.honour_limiter {
            write_i16(output, sample_rate, &samples)
        } else {
            let floats: Vec<f32> = samples.iter().map(|&s| s as f32).collect();
            write_f32(output, sample_rate, &floats)
        }
    }
}

/// Fails every check and every call with `EngineUnavailable`.
#[derive(Debug, Clone, Default)]
pub struct UnavailableEngine;

fn unavailable() -> RenderError {
    RenderError::EngineUnavailable {
        engine: "unavailable".into(),
        reason: "not installed".into(),
    }
}

#[async_trait]
impl SynthesisEngine for UnavailableEngine {
    fn name(&self) -> &str {
        "unavailable"
    }

    async fn check(&self) -> Result<(), RenderError> {
        Err(unavailable())
    }

    async fn synthesize(&self, _request: SynthesisRequest<'_>) -> Result<(), RenderError> {
        Err(unavailable())
    }
}

#[async_trait]
impl EffectsEngine for UnavailableEngine {
    fn name(&self) -> &str {
        "unavailable"
    }

    async fn check(&self) -> Result<(), RenderError> {
        Err(unavailable())
    }

    async fn process(&self, _: &Path, _: &[EffectStage], _: &Path) -> Result<(), RenderError> {
        Err(unavailable())
    }
}

/// Passes preflight, then fails the actual work.
#[derive(Debug, Clone, Default)]
pub struct BrokenEngine;

fn broken() -> RenderError {
    RenderError::EngineFailed {
        engine: "broken".into(),
        detail: "exit status: 1".into(),
    }
}

#[async_trait]
impl SynthesisEngine for BrokenEngine {
    fn name(&self) -> &str {
        "broken"
    }

    async fn check(&self) -> Result<(), RenderError> {
        Ok(())
    }

    async fn synthesize(&self, _request: SynthesisRequest<'_>) -> Result<(), RenderError> {
        Err(broken())
    }
}

#[async_trait]
impl EffectsEngine for BrokenEngine {
    fn name(&self) -> &str {
        "broken"
    }

    async fn check(&self) -> Result<(), RenderError> {
        Ok(())
    }

    async fn process(&self, _: &Path, _: &[EffectStage], _: &Path) -> Result<(), RenderError> {
        Err(broken())
    }
}

fn wav_error(path: &Path) -> impl Fn(hound::Error) -> RenderError + '_ {
    move |source| RenderError::Wav {
        path: path.to_path_buf(),
        source,
    }
}

fn write_f32(path: &Path, sample_rate: u32, samples: &[f32]) -> Result<(), RenderError> {
    let spec = WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(path, spec).map_err(wav_error(path))?;
    for &s in samples {
        writer.write_sample(s).map_err(wav_error(path))?;
    }
    writer.finalize().map_err(wav_error(path))
}

fn write_i16(path: &Path, sample_rate: u32, samples: &[f64]) -> Result<(), RenderError> {
    let spec = WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec).map_err(wav_error(path))?;
    for &s in samples {
        let v = (s.clamp(-1.0, 1.0) * i16::MAX as f64).round() as i16;
        writer.write_sample(v).map_err(wav_error(path))?;
    }
    writer.finalize().map_err(wav_error(path))
}

/// Interleaved stereo; mono input is duplicated onto both channels.
fn read_stereo(path: &Path) -> Result<(u32, Vec<f64>), RenderError> {
    let mut reader = WavReader::open(path).map_err(wav_error(path))?;
    let spec = reader.spec();
    let samples: Vec<f64> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map(|v| v as f64))
            .collect::<Result<_, _>>()
            .map_err(wav_error(path))?,
        SampleFormat::Int => {
            let scale = 1.0 / (1u64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f64;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f64 * scale))
                .collect::<Result<_, _>>()
                .map_err(wav_error(path))?
        }
    };
    let stereo = match spec.channels {
        1 => samples.iter().flat_map(|&s| [s, s]).collect(),
        2 => samples,
        n => samples
            .chunks_exact(n as usize)
            .flat_map(|frame| [frame[0], frame[1]])
            .collect(),
    };
    Ok((spec.sample_rate, stereo))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limiter_holds_ceiling_with_smooth_gain() {
        let rate = 8_000;
        let frames = 2_000;
        let spike = 1_000;
        let mut samples: Vec<f64> = (0..frames)
            .flat_map(|i| {
                let v = if i == spike { 2.0 } else { 0.5 };
                [v, -v]
            })
            .collect();
        limit(&mut samples, rate, 0.9);

        assert!(samples.iter().all(|s| s.abs() <= 0.9 + 1e-12));
        // The spike itself is pulled to the ceiling, not below it.
        assert!((samples[spike * 2] - 0.9).abs() < 1e-9);
        // Gain ramps down ahead of the spike.
        let attack = (rate as f64 * LIMITER_ATTACK_S) as usize;
        let before = samples[(spike - attack / 2) * 2];
        assert!(before < 0.5 && before > 0.45 * 0.5, "pre-spike {before}");
        assert_eq!(samples[(spike - attack - 1) * 2], 0.5);
        // ...and recovers gradually after it.
        let after = samples[(spike + 10) * 2];
        assert!(after < 0.5, "post-spike {after}");
        assert!((samples[(frames - 1) * 2] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_limiter_leaves_quiet_material_alone() {
        let mut samples: Vec<f64> = (0..500).map(|i| ((i as f64) * 0.1).sin() * 0.6).collect();
        let original = samples.clone();
        limit(&mut samples, 8_000, 0.95);
        assert_eq!(samples, original);
    }
}
