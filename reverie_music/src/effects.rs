// Production effect chain: the ordered list of processing stages applied to
// the synthesized mix.
//
// The chain is a typed enum list rather than a free-form filter string so
// that the canonical order can be checked before anything is rendered:
// gain, equalization, compression, reverb, stereo widening, limiting. The
// limiter is always last, which is what makes the output ceiling a hard
// guarantee. Renderers translate stages into their own engine syntax.

use crate::error::MusicError;
use crate::genre::Genre;
use serde::{Deserialize, Serialize};

/// One processing stage with its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum EffectStage {
    /// Linear pre-gain, in (0, 1].
    Gain { level: f64 },
    /// Three-band shelf/peak EQ, dB per band in [-12, 12].
    Equalizer {
        low_db: f64,
        mid_db: f64,
        high_db: f64,
    },
    Compressor {
        threshold_db: f64,
        ratio: f64,
        attack_ms: f64,
        release_ms: f64,
    },
    /// `mix` is the wet share in [0, 1].
    Reverb { decay_s: f64, mix: f64 },
    /// 1.0 leaves the stereo image unchanged.
    StereoWidth { width: f64 },
    /// Output ceiling as linear peak amplitude, in (0, 1].
    Limiter { ceiling: f64 },
}

/// Stage discriminant, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StageKind {
    Gain,
    Equalizer,
    Compressor,
    Reverb,
    StereoWidth,
    Limiter,
}

impl StageKind {
    pub const CANONICAL_ORDER: [StageKind; 6] = [
        StageKind::Gain,
        StageKind::Equalizer,
        StageKind::Compressor,
        StageKind::Reverb,
        StageKind::StereoWidth,
        StageKind::Limiter,
    ];
}

impl EffectStage {
    pub fn kind(&self) -> StageKind {
        match self {
            EffectStage::Gain { .. } => StageKind::Gain,
            EffectStage::Equalizer { .. } => StageKind::Equalizer,
            EffectStage::Compressor { .. } => StageKind::Compressor,
            EffectStage::Reverb { .. } => StageKind::Reverb,
            EffectStage::StereoWidth { .. } => StageKind::StereoWidth,
            EffectStage::Limiter { .. } => StageKind::Limiter,
        }
    }

    fn check_ranges(&self) -> Result<(), String> {
        fn within(name: &str, v: f64, lo: f64, hi: f64) -> Result<(), String> {
            if v.is_finite() && v >= lo && v <= hi {
                Ok(())
            } else {
                Err(format!("{name} = {v} outside [{lo}, {hi}]"))
            }
        }
        match *self {
            EffectStage::Gain { level } => {
                within("gain level", level, 0.0, 1.0)?;
                if level == 0.0 {
                    return Err("gain level must be positive".into());
                }
                Ok(())
            }
            EffectStage::Equalizer {
                low_db,
                mid_db,
                high_db,
            } => {
                within("eq low", low_db, -12.0, 12.0)?;
                within("eq mid", mid_db, -12.0, 12.0)?;
                within("eq high", high_db, -12.0, 12.0)
            }
            EffectStage::Compressor {
                threshold_db,
                ratio,
                attack_ms,
                release_ms,
            } => {
                within("compressor threshold", threshold_db, -60.0, 0.0)?;
                within("compressor ratio", ratio, 1.0, 20.0)?;
                within("compressor attack", attack_ms, 0.01, 2000.0)?;
                within("compressor release", release_ms, 0.01, 9000.0)
            }
            EffectStage::Reverb { decay_s, mix } => {
                within("reverb decay", decay_s, 0.0, 10.0)?;
                within("reverb mix", mix, 0.0, 1.0)
            }
            EffectStage::StereoWidth { width } => within("stereo width", width, 0.0, 2.0),
            EffectStage::Limiter { ceiling } => {
                within("limiter ceiling", ceiling, 0.0, 1.0)?;
                if ceiling == 0.0 {
                    return Err("limiter ceiling must be positive".into());
                }
                Ok(())
            }
        }
    }
}

/// Scalar summary of a chain, used by the parameter vector and the
/// history-biased sampler.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EffectIntensities {
    pub gain: f64,
    /// Mean absolute band gain in dB.
    pub eq_db: f64,
    pub compression_ratio: f64,
    pub reverb_mix: f64,
    pub reverb_decay_s: f64,
    pub stereo_width: f64,
}

/// Effect chain for one run, tied to the genre profile it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionSettings {
    pub genre: Genre,
    pub stages: Vec<EffectStage>,
}

impl ProductionSettings {
    /// Reject chains that are incomplete, out of order, or out of range.
    pub fn validate(&self) -> Result<(), MusicError> {
        let invalid = |reason: String| MusicError::InvalidProfile {
            genre: self.genre,
            reason,
        };
        let kinds: Vec<StageKind> = self.stages.iter().map(EffectStage::kind).collect();
        if kinds != StageKind::CANONICAL_ORDER {
            return Err(invalid(format!(
                "effect chain must be exactly {:?}, got {:?}",
                StageKind::CANONICAL_ORDER,
                kinds
            )));
        }
        for stage in &self.stages {
            stage.check_ranges().map_err(invalid)?;
        }
        Ok(())
    }

    pub fn limiter_ceiling(&self) -> Option<f64> {
        self.stages.iter().find_map(|s| match s {
            EffectStage::Limiter { ceiling } => Some(*ceiling),
            _ => None,
        })
    }

    pub fn intensities(&self) -> EffectIntensities {
        let mut out = EffectIntensities {
            gain: 1.0,
            eq_db: 0.0,
            compression_ratio: 1.0,
            reverb_mix: 0.0,
            reverb_decay_s: 0.0,
            stereo_width: 1.0,
        };
        for stage in &self.stages {
            match *stage {
                EffectStage::Gain { level } => out.gain = level,
                EffectStage::Equalizer {
                    low_db,
                    mid_db,
                    high_db,
                } => out.eq_db = (low_db.abs() + mid_db.abs() + high_db.abs()) / 3.0,
                EffectStage::Compressor { ratio, .. } => out.compression_ratio = ratio,
                EffectStage::Reverb { decay_s, mix } => {
                    out.reverb_mix = mix;
                    out.reverb_decay_s = decay_s;
                }
                EffectStage::StereoWidth { width } => out.stereo_width = width,
                EffectStage::Limiter { .. } => {}
            }
        }
        out
    }

    /// Copy of the chain with reverb mix, compression ratio, and stereo width
    /// replaced (clamped into their valid ranges). Stage order is untouched.
    pub fn with_intensities(&self, target: &EffectIntensities) -> Self {
        let stages = self
            .stages
            .iter()
            .map(|stage| match *stage {
                EffectStage::Compressor {
                    threshold_db,
                    attack_ms,
                    release_ms,
                    ..
                } => EffectStage::Compressor {
                    threshold_db,
                    ratio: target.compression_ratio.clamp(1.0, 20.0),
                    attack_ms,
                    release_ms,
                },
                EffectStage::Reverb { decay_s, .. } => EffectStage::Reverb {
                    decay_s,
                    mix: target.reverb_mix.clamp(0.0, 1.0),
                },
                EffectStage::StereoWidth { .. } => EffectStage::StereoWidth {
                    width: target.stereo_width.clamp(0.0, 2.0),
                },
                other => other,
            })
            .collect();
        ProductionSettings {
            genre: self.genre,
            stages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> ProductionSettings {
        ProductionSettings {
            genre: Genre::Ambient,
            stages: vec![
                EffectStage::Gain { level: 0.7 },
                EffectStage::Equalizer {
                    low_db: 2.0,
                    mid_db: 0.0,
                    high_db: -1.0,
                },
                EffectStage::Compressor {
                    threshold_db: -12.0,
                    ratio: 4.0,
                    attack_ms: 20.0,
                    release_ms: 250.0,
                },
                EffectStage::Reverb {
                    decay_s: 3.0,
                    mix: 0.6,
                },
                EffectStage::StereoWidth { width: 1.5 },
                EffectStage::Limiter { ceiling: 0.95 },
            ],
        }
    }

    #[test]
    fn test_canonical_chain_validates() {
        chain().validate().unwrap();
    }

    #[test]
    fn test_reordered_chain_rejected() {
        let mut c = chain();
        c.stages.swap(4, 5);
        assert!(matches!(c.validate(), Err(MusicError::InvalidProfile { .. })));
    }

    #[test]
    fn test_missing_limiter_rejected() {
        let mut c = chain();
        c.stages.pop();
        assert!(c.validate().is_err());
        assert_eq!(c.limiter_ceiling(), None);
    }

    #[test]
    fn test_out_of_range_rejected() {
        let mut c = chain();
        c.stages[0] = EffectStage::Gain { level: 1.5 };
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_with_intensities_keeps_order_and_clamps() {
        let c = chain();
        let mut target = c.intensities();
        target.reverb_mix = 1.7;
        target.compression_ratio = 2.5;
        let adjusted = c.with_intensities(&target);
        adjusted.validate().unwrap();
        let got = adjusted.intensities();
        assert_eq!(got.reverb_mix, 1.0);
        assert_eq!(got.compression_ratio, 2.5);
        assert_eq!(got.eq_db, 1.0);
    }

    #[test]
    fn test_json_uses_stage_tags() {
        let json = serde_json::to_string(&EffectStage::Limiter { ceiling: 0.9 }).unwrap();
        assert_eq!(json, r#"{"stage":"limiter","ceiling":0.9}"#);
    }
}
