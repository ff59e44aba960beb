// Output level measurement for rendered WAV files.

use crate::error::RenderError;
use hound::{SampleFormat, WavReader};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Peak and RMS of a rendered file, as linear amplitude in [0, 1]
/// (integer samples are scaled by 2^(bits-1)).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelSummary {
    pub peak: f64,
    pub rms: f64,
    pub channels: u16,
    pub sample_rate: u32,
    pub frames: u64,
}

impl LevelSummary {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames as f64 / self.sample_rate as f64
    }

    pub fn peak_dbfs(&self) -> f64 {
        20.0 * self.peak.max(1e-9).log10()
    }
}

pub fn measure(path: &Path) -> Result<LevelSummary, RenderError> {
    let wav_err = |source| RenderError::Wav {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = WavReader::open(path).map_err(wav_err)?;
    let spec = reader.spec();

    let mut peak = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut count = 0u64;
    let mut accumulate = |s: f64| {
        peak = peak.max(s.abs());
        sum_sq += s * s;
        count += 1;
    };

    match spec.sample_format {
        SampleFormat::Float => {
            for sample in reader.samples::<f32>() {
                accumulate(sample.map_err(wav_err)? as f64);
            }
        }
        SampleFormat::Int => {
            let scale = 1.0 / (1u64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f64;
            for sample in reader.samples::<i32>() {
                accumulate(sample.map_err(wav_err)? as f64 * scale);
            }
        }
    }

    let rms = if count == 0 {
        0.0
    } else {
        (sum_sq / count as f64).sqrt()
    };
    let channels = spec.channels.max(1);
    Ok(LevelSummary {
        peak,
        rms,
        channels: spec.channels,
        sample_rate: spec.sample_rate,
        frames: count / channels as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{WavSpec, WavWriter};

    fn write_i16(path: &Path, samples: &[i16]) {
        let spec = WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut w = WavWriter::create(path, spec).unwrap();
        for &s in samples {
            w.write_sample(s).unwrap();
        }
        w.finalize().unwrap();
    }

    #[test]
    fn test_int16_peak_and_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.wav");
        write_i16(&path, &[0, 16384, -32768, 0]);
        let levels = measure(&path).unwrap();
        assert_eq!(levels.peak, 1.0);
        assert_eq!(levels.frames, 2);
        assert_eq!(levels.channels, 2);
        let expected_rms = ((0.25 + 1.0) / 4.0f64).sqrt();
        assert!((levels.rms - expected_rms).abs() < 1e-12);
    }

    #[test]
    fn test_float_peak() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.wav");
        let spec = WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut w = WavWriter::create(&path, spec).unwrap();
        for s in [0.1f32, -1.25, 0.5] {
            w.write_sample(s).unwrap();
        }
        w.finalize().unwrap();
        let levels = measure(&path).unwrap();
        assert_eq!(levels.peak, 1.25);
        assert!(levels.peak_dbfs() > 0.0);
    }

    #[test]
    fn test_missing_file_is_wav_error() {
        let err = measure(Path::new("/nonexistent/none.wav")).unwrap_err();
        assert!(matches!(err, RenderError::Wav { .. }));
    }
}
