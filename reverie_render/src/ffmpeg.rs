// FFmpeg effects engine.
//
// Translates the typed effect chain into an `-af` filter graph, one filter
// per stage in chain order, and writes 16-bit PCM. Stages that would be a
// no-op (flat EQ bands, dry reverb, unit stereo width) emit nothing. The
// limiter maps to `alimiter` with makeup gain disabled so its `limit` is the
// true output ceiling.

use crate::config::RenderConfig;
use crate::engine::{EffectsEngine, probe_tool, run_tool};
use crate::error::RenderError;
use async_trait::async_trait;
use reverie_music::EffectStage;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENGINE: &str = "ffmpeg";

const LOW_SHELF_HZ: u32 = 200;
const MID_PEAK_HZ: u32 = 1000;
const HIGH_SHELF_HZ: u32 = 3000;

#[derive(Debug, Clone)]
pub struct Ffmpeg {
    binary: PathBuf,
    timeout: Duration,
}

impl Ffmpeg {
    pub fn from_config(config: &RenderConfig) -> Self {
        Self {
            binary: config.ffmpeg_binary.clone(),
            timeout: config.timeout(),
        }
    }

    fn args(&self, input: &Path, stages: &[EffectStage], output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-y".into(),
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-i".into(),
            input.into(),
        ];
        let chain = filter_chain(stages);
        if !chain.is_empty() {
            args.push("-af".into());
            args.push(chain.into());
        }
        args.extend([OsString::from("-c:a"), OsString::from("pcm_s16le"), output.into()]);
        args
    }
}

/// The `-af` filter graph for a chain.
pub fn filter_chain(stages: &[EffectStage]) -> String {
    let mut filters = Vec::new();
    for stage in stages {
        match *stage {
            EffectStage::Gain { level } => filters.push(format!("volume={level:.4}")),
            EffectStage::Equalizer {
                low_db,
                mid_db,
                high_db,
            } => {
                if low_db != 0.0 {
                    filters.push(format!("lowshelf=f={LOW_SHELF_HZ}:g={low_db:.2}"));
                }
                if mid_db != 0.0 {
                    filters.push(format!(
                        "equalizer=f={MID_PEAK_HZ}:width_type=o:width=2:g={mid_db:.2}"
                    ));
                }
                if high_db != 0.0 {
                    filters.push(format!("highshelf=f={HIGH_SHELF_HZ}:g={high_db:.2}"));
                }
            }
            EffectStage::Compressor {
                threshold_db,
                ratio,
                attack_ms,
                release_ms,
            } => filters.push(format!(
                "acompressor=threshold={threshold_db:.2}dB:ratio={ratio:.2}:attack={attack_ms:.2}:release={release_ms:.2}"
            )),
            EffectStage::Reverb { decay_s, mix } => {
                if mix > 0.0 {
                    let delay_ms = (decay_s * 100.0).round().max(1.0);
                    filters.push(format!("aecho=0.8:0.9:{delay_ms:.0}:{mix:.3}"));
                }
            }
            EffectStage::StereoWidth { width } => {
                if width != 1.0 {
                    filters.push(format!("extrastereo=m={width:.3}:c=false"));
                }
            }
            EffectStage::Limiter { ceiling } => filters.push(format!(
                "alimiter=limit={ceiling:.4}:attack=5:release=50:level=disabled"
            )),
        }
    }
    filters.join(",")
}

#[async_trait]
impl EffectsEngine for Ffmpeg {
    fn name(&self) -> &str {
        ENGINE
    }

    async fn check(&self) -> Result<(), RenderError> {
        probe_tool(ENGINE, &self.binary, &["-version"]).await
    }

    async fn process(
        &self,
        input: &Path,
        stages: &[EffectStage],
        output: &Path,
    ) -> Result<(), RenderError> {
        let args = self.args(input, stages, output);
        run_tool(ENGINE, &self.binary, &args, self.timeout).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reverie_music::{Genre, GenreRegistry};

    #[test]
    fn test_chain_follows_stage_order() {
        let stages = [
            EffectStage::Gain { level: 0.8 },
            EffectStage::Equalizer {
                low_db: 2.0,
                mid_db: 0.0,
                high_db: -3.0,
            },
            EffectStage::Compressor {
                threshold_db: -18.0,
                ratio: 3.0,
                attack_ms: 20.0,
                release_ms: 250.0,
            },
            EffectStage::Reverb {
                decay_s: 2.5,
                mix: 0.3,
            },
            EffectStage::StereoWidth { width: 1.2 },
            EffectStage::Limiter { ceiling: 0.95 },
        ];
        let chain = filter_chain(&stages);
        assert_eq!(
            chain,
            "volume=0.8000,\
             lowshelf=f=200:g=2.00,\
             highshelf=f=3000:g=-3.00,\
             acompressor=threshold=-18.00dB:ratio=3.00:attack=20.00:release=250.00,\
             aecho=0.8:0.9:250:0.300,\
             extrastereo=m=1.200:c=false,\
             alimiter=limit=0.9500:attack=5:release=50:level=disabled"
        );
    }

    #[test]
    fn test_noop_stages_are_skipped() {
        let stages = [
            EffectStage::Reverb {
                decay_s: 1.0,
                mix: 0.0,
            },
            EffectStage::StereoWidth { width: 1.0 },
            EffectStage::Limiter { ceiling: 0.9 },
        ];
        assert_eq!(
            filter_chain(&stages),
            "alimiter=limit=0.9000:attack=5:release=50:level=disabled"
        );
    }

    #[test]
    fn test_every_builtin_chain_ends_in_configured_limiter() {
        let registry = GenreRegistry::builtin();
        for genre in Genre::ALL {
            let settings = registry.get(genre).unwrap().production_settings();
            let chain = filter_chain(&settings.stages);
            let last = chain.rsplit(',').next().unwrap();
            assert!(last.starts_with("alimiter="), "{genre}: {chain}");

            let limit: f64 = last
                .split(':')
                .find_map(|opt| opt.strip_prefix("alimiter=limit="))
                .unwrap()
                .parse()
                .unwrap();
            let ceiling = settings.limiter_ceiling().unwrap();
            assert!((limit - ceiling).abs() < 1e-4, "{genre}: {limit} vs {ceiling}");
            assert!(limit < 1.0, "{genre}: limiter at full scale");
            assert!(last.ends_with(":level=disabled"), "{genre}: makeup gain on");
        }
    }

    #[test]
    fn test_args_write_pcm16() {
        let ffmpeg = Ffmpeg::from_config(&RenderConfig::default());
        let args: Vec<String> = ffmpeg
            .args(
                Path::new("raw.wav"),
                &[EffectStage::Limiter { ceiling: 0.95 }],
                Path::new("out.wav"),
            )
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args.last().unwrap(), "out.wav");
        assert!(args.windows(2).any(|w| w[0] == "-c:a" && w[1] == "pcm_s16le"));
        assert!(args.windows(2).any(|w| w[0] == "-i" && w[1] == "raw.wav"));
    }
}
