// The generation coordinator: one `generate` call runs the whole chain.
//
// Order of work for a run:
//   1. Resolve the genre profile and check the request (duration, tempo,
//      threshold) so input errors surface before anything else.
//   2. Preflight both render engines.
//   3. Build the uniqueness history from the store's recent fingerprints and,
//      if asked, bias tempo and effect intensities from rated history.
//   4. Generate `candidate_count` melodies in parallel from derived seed
//      streams; keep the one least similar to history.
//   5. Optimize it for uniqueness, arrange it, render it.
//   6. Record the generation in the store, then write `run.json`. If the
//      summary cannot be written the record is removed again.
//
// Every random draw comes from `SeededRng::derive(seed, <stage label>)`, so
// with the same seed, options, and store contents a run reproduces its
// melody and arrangement exactly. Any input or resource error aborts the run;
// nothing stays recorded for an aborted run. Quality warnings never abort.
//
// Melody search, arrangement, MIDI writes, and store access are blocking
// work and run on tokio's blocking pool. Each run gets its own directory,
// created exclusively; a name collision with a concurrent run takes a
// numeric suffix.
//
// Checkpoints in the run directory:
//   01_melody.mid, 02_arrangement.mid, 03_production.wav, run.json

use crate::config::{BiasConfig, PipelineConfig};
use crate::error::PipelineError;
use crate::sampler::ParameterBias;
use chrono::Utc;
use rayon::prelude::*;
use reverie_music::midi::{write_arrangement_midi, write_melody_midi};
use reverie_music::{
    Arrangement, Contour, DegradedUniqueness, DurationSpec, Fingerprint, Genre, GenreRegistry,
    History, Key, Melody, MelodyRequest, MusicError, ProductionSettings, arrange, generate_melody,
    optimize,
};
use reverie_prng::SeededRng;
use reverie_render::{ClippingDetected, LevelSummary, Renderer};
use reverie_store::{EmbeddingStore, GenerationParameters, RecordId, RecordMetadata};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Instrument;

pub const MELODY_MIDI: &str = "01_melody.mid";
pub const ARRANGEMENT_MIDI: &str = "02_arrangement.mid";
pub const PRODUCTION_WAV: &str = "03_production.wav";
pub const RUN_SUMMARY: &str = "run.json";

const RUN_DIR_ATTEMPTS: u32 = 1000;

/// Per-call options. Anything left `None` comes from the genre profile (or
/// from history when `learn_from_history` is set).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerateOptions {
    pub seed: Option<u64>,
    pub key: Option<Key>,
    pub tempo_bpm: Option<f64>,
    pub contour: Option<Contour>,
    /// Overrides the profile's uniqueness threshold.
    pub similarity_threshold: Option<f64>,
    pub learn_from_history: bool,
    pub tags: Vec<String>,
    pub note: Option<String>,
}

/// Non-fatal quality problems. The run completes and the record carries
/// them so later sampling can down-weight it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "warning", rename_all = "snake_case")]
pub enum QualityWarning {
    DegradedUniqueness(DegradedUniqueness),
    Clipping(ClippingDetected),
}

impl fmt::Display for QualityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityWarning::DegradedUniqueness(w) => write!(
                f,
                "degraded uniqueness: similarity {:.3} >= threshold {:.3} after {} iterations",
                w.max_similarity, w.threshold, w.iterations
            ),
            QualityWarning::Clipping(c) => write!(
                f,
                "clipping: peak {:.4} above ceiling {:.4}",
                c.peak, c.ceiling
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UniquenessReport {
    pub max_similarity: f64,
    pub threshold: f64,
    pub iterations: usize,
    pub accepted: usize,
    pub history_size: usize,
    pub candidates: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Checkpoints {
    pub run_dir: PathBuf,
    pub melody_midi: PathBuf,
    pub arrangement_midi: PathBuf,
    pub audio: PathBuf,
    pub summary: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOutput {
    pub seed: u64,
    pub melody: Melody,
    pub arrangement: Arrangement,
    pub settings: ProductionSettings,
    pub levels: LevelSummary,
    pub record_id: RecordId,
    pub uniqueness: UniquenessReport,
    pub warnings: Vec<QualityWarning>,
    pub checkpoints: Checkpoints,
    /// Rated records behind the parameter bias; 0 when none was applied.
    pub bias_support: usize,
}

/// What `run.json` holds, and what the CLI prints.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary<'a> {
    pub record_id: RecordId,
    pub genre: Genre,
    pub seed: u64,
    pub key: String,
    pub contour: Contour,
    pub tempo_bpm: f64,
    pub duration_secs: f64,
    pub notes: usize,
    pub roles: Vec<String>,
    pub settings: &'a ProductionSettings,
    pub levels: LevelSummary,
    pub uniqueness: UniquenessReport,
    pub warnings: Vec<String>,
    pub bias_support: usize,
    pub checkpoints: &'a Checkpoints,
}

impl GenerationOutput {
    pub fn summary(&self) -> RunSummary<'_> {
        RunSummary {
            record_id: self.record_id,
            genre: self.arrangement.genre,
            seed: self.seed,
            key: self.melody.key.to_string(),
            contour: self.melody.contour,
            tempo_bpm: self.melody.tempo_bpm,
            duration_secs: self.melody.duration_secs(),
            notes: self.melody.notes.len(),
            roles: self
                .arrangement
                .roles()
                .into_iter()
                .map(|r| r.to_string())
                .collect(),
            settings: &self.settings,
            levels: self.levels,
            uniqueness: self.uniqueness,
            warnings: self.warnings.iter().map(|w| w.to_string()).collect(),
            bias_support: self.bias_support,
            checkpoints: &self.checkpoints,
        }
    }
}

/// Coordinator tunables taken from `PipelineConfig`.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorSettings {
    pub output_dir: PathBuf,
    pub candidate_count: usize,
    pub recommendation_limit: usize,
    pub bias: BiasConfig,
}

impl CoordinatorSettings {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            output_dir: config.output_dir.clone(),
            candidate_count: config.candidate_count.max(1),
            recommendation_limit: config.recommendation_limit,
            bias: config.bias.clone(),
        }
    }
}

pub struct Coordinator {
    registry: GenreRegistry,
    renderer: Renderer,
    store: Arc<EmbeddingStore>,
    settings: CoordinatorSettings,
}

impl Coordinator {
    pub fn new(
        registry: GenreRegistry,
        renderer: Renderer,
        store: Arc<EmbeddingStore>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            registry,
            renderer,
            store,
            settings,
        }
    }

    /// FluidSynth/FFmpeg renderer, the configured registry, and the store at
    /// the configured database path.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let registry = config.registry()?;
        let renderer = Renderer::from_config(&config.render)?;
        let store = Arc::new(EmbeddingStore::open(&config.database)?);
        Ok(Self::new(
            registry,
            renderer,
            store,
            CoordinatorSettings::from_config(config),
        ))
    }

    pub fn registry(&self) -> &GenreRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<EmbeddingStore> {
        &self.store
    }

    pub async fn generate(
        &self,
        genre: Genre,
        duration: DurationSpec,
        options: &GenerateOptions,
    ) -> Result<GenerationOutput, PipelineError> {
        let seed = options.seed.unwrap_or_else(clock_seed);
        if options.seed.is_none() {
            tracing::info!(seed, "no seed given, drew one from the clock");
        }
        let span = tracing::info_span!("generate", %genre, seed);
        self.run(genre, duration, options, seed)
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        genre: Genre,
        duration: DurationSpec,
        options: &GenerateOptions,
        seed: u64,
    ) -> Result<GenerationOutput, PipelineError> {
        let profile = Arc::new(self.registry.get(genre)?.clone());
        let mut policy = profile.uniqueness;
        if let Some(threshold) = options.similarity_threshold {
            if !(f64::MIN_POSITIVE..=1.0).contains(&threshold) {
                return Err(PipelineError::InvalidOption(format!(
                    "similarity threshold {threshold} outside (0, 1]"
                )));
            }
            policy.similarity_threshold = threshold;
        }
        let tempo = options.tempo_bpm.unwrap_or(profile.melody.tempo_bpm);
        if !tempo.is_finite() || !(20.0..=300.0).contains(&tempo) {
            return Err(MusicError::InvalidTempo(tempo).into());
        }
        duration.to_ticks(tempo)?;

        self.renderer.preflight().await?;

        let (fingerprints, rated) = {
            let store = Arc::clone(&self.store);
            let learn = options.learn_from_history;
            let limit = self.settings.recommendation_limit;
            blocking(move || {
                let fingerprints = store.recent_fingerprints(genre, policy.history_limit)?;
                let rated = if learn {
                    store.recommend(genre, limit)?
                } else {
                    Vec::new()
                };
                Ok((fingerprints, rated))
            })
            .await?
        };
        let history = History::from_fingerprints(&fingerprints);
        let history_size = history.len();

        let base_settings = profile.production_settings();
        let (biased_tempo, settings, bias_support) = match ParameterBias::from_records(&rated) {
            Some(bias) => {
                let mut rng = SeededRng::derive(seed, "bias");
                let choice = bias.sample(&base_settings, &self.settings.bias, &mut rng);
                tracing::info!(
                    support = bias.support(),
                    tempo = choice.tempo_bpm,
                    "biasing parameters from rated history"
                );
                (Some(choice.tempo_bpm), choice.settings, bias.support())
            }
            None => (None, base_settings, 0),
        };

        let request = MelodyRequest {
            duration,
            key: options.key,
            tempo_bpm: options.tempo_bpm.or(biased_tempo),
            contour: options.contour,
            seed,
        };
        let (candidate_count, optimized) = {
            let profile = Arc::clone(&profile);
            let count = self.settings.candidate_count;
            blocking(move || {
                let candidates: Vec<Melody> = (0..count)
                    .into_par_iter()
                    .map(|i| {
                        let mut rng = SeededRng::derive(seed, &format!("melody/{i}"));
                        generate_melody(&profile, &request, &mut rng)
                    })
                    .collect::<Result<_, _>>()?;
                let candidate_count = candidates.len();
                let melody = least_similar(candidates, &history)
                    .ok_or_else(|| PipelineError::InvalidOption("no melody candidates".into()))?;
                let register = (profile.melody.pitch_low, profile.melody.pitch_high);
                let optimized = optimize(
                    &melody,
                    &history,
                    &policy,
                    register,
                    &mut SeededRng::derive(seed, "uniqueness"),
                );
                Ok((candidate_count, optimized))
            })
            .await?
        };
        let mut warnings = Vec::new();
        if let Some(w) = optimized.warning {
            warnings.push(QualityWarning::DegradedUniqueness(w));
        }
        let uniqueness = UniquenessReport {
            max_similarity: optimized.max_similarity,
            threshold: policy.similarity_threshold,
            iterations: optimized.iterations,
            accepted: optimized.accepted,
            history_size,
            candidates: candidate_count,
        };
        let melody = optimized.melody;

        let checkpoints = create_run_dir(&self.settings.output_dir, genre, seed).await?;
        let arrangement = {
            let profile = Arc::clone(&profile);
            let melody = melody.clone();
            let checkpoints = checkpoints.clone();
            blocking(move || {
                write_melody_midi(&melody, &checkpoints.melody_midi)?;
                let arrangement =
                    arrange(&melody, &profile, &mut SeededRng::derive(seed, "arrangement"))?;
                write_arrangement_midi(&arrangement, &checkpoints.arrangement_midi)?;
                Ok(arrangement)
            })
            .await?
        };

        let audio = self
            .renderer
            .render(
                &arrangement,
                &settings,
                &checkpoints.audio,
                &mut SeededRng::derive(seed, "render"),
            )
            .await?;
        if let Some(clip) = audio.clipping {
            warnings.push(QualityWarning::Clipping(clip));
        }

        let metadata = RecordMetadata {
            tags: options.tags.clone(),
            note: options.note.clone(),
            seed: Some(seed),
            fingerprint: Some(Fingerprint::of(&melody)),
            warnings: warnings.iter().map(|w| w.to_string()).collect(),
            audio_path: Some(audio.audio_path.clone()),
        };
        let parameters = GenerationParameters::from_generation(&arrangement, &settings);
        let record_id = {
            let store = Arc::clone(&self.store);
            blocking(move || Ok(store.record(&parameters, &metadata)?)).await?
        };

        let output = GenerationOutput {
            seed,
            melody,
            arrangement,
            settings,
            levels: audio.levels,
            record_id,
            uniqueness,
            warnings,
            checkpoints,
            bias_support,
        };
        if let Err(e) = write_summary(&output).await {
            let store = Arc::clone(&self.store);
            if let Err(undo) = blocking(move || Ok(store.remove(record_id)?)).await {
                tracing::error!(record_id, error = %undo, "failed to remove unsummarized record");
            }
            return Err(e);
        }
        tracing::info!(
            record_id,
            warnings = output.warnings.len(),
            "generation recorded"
        );
        Ok(output)
    }
}

/// Run blocking or CPU-heavy work on the blocking pool, under the caller's
/// subscriber and inside its span.
async fn blocking<T, F>(work: F) -> Result<T, PipelineError>
where
    F: FnOnce() -> Result<T, PipelineError> + Send + 'static,
    T: Send + 'static,
{
    let span = tracing::Span::current();
    let dispatch = tracing::dispatcher::get_default(|d| d.clone());
    tokio::task::spawn_blocking(move || {
        tracing::dispatcher::with_default(&dispatch, || span.in_scope(work))
    })
    .await?
}

/// Create `{genre}-{seed}-{timestamp}` under `output_dir` and lay out the
/// checkpoint paths inside it.
async fn create_run_dir(
    output_dir: &Path,
    genre: Genre,
    seed: u64,
) -> Result<Checkpoints, PipelineError> {
    let base = format!("{genre}-{seed}-{}", Utc::now().format("%Y%m%dT%H%M%S%.3f"));
    let run_dir = create_unique_dir(output_dir, &base).await?;
    Ok(Checkpoints {
        melody_midi: run_dir.join(MELODY_MIDI),
        arrangement_midi: run_dir.join(ARRANGEMENT_MIDI),
        audio: run_dir.join(PRODUCTION_WAV),
        summary: run_dir.join(RUN_SUMMARY),
        run_dir,
    })
}

/// Exclusively create `parent/base`, or `parent/base-N` for the first free N.
async fn create_unique_dir(parent: &Path, base: &str) -> Result<PathBuf, PipelineError> {
    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| PipelineError::io(parent, e))?;
    let mut attempt = 0;
    loop {
        let dir = if attempt == 0 {
            parent.join(base)
        } else {
            parent.join(format!("{base}-{attempt}"))
        };
        match tokio::fs::create_dir(&dir).await {
            Ok(()) => return Ok(dir),
            Err(e)
                if e.kind() == std::io::ErrorKind::AlreadyExists && attempt < RUN_DIR_ATTEMPTS =>
            {
                attempt += 1;
            }
            Err(e) => return Err(PipelineError::io(&dir, e)),
        }
    }
}

/// Lowest max-similarity to history; the earliest candidate wins ties.
fn least_similar(candidates: Vec<Melody>, history: &History) -> Option<Melody> {
    let mut best: Option<(f64, Melody)> = None;
    for melody in candidates {
        let score = history.max_similarity(&Fingerprint::of(&melody));
        if best.as_ref().is_none_or(|(s, _)| score < *s) {
            best = Some((score, melody));
        }
    }
    best.map(|(_, m)| m)
}

async fn write_summary(output: &GenerationOutput) -> Result<(), PipelineError> {
    let json = serde_json::to_string_pretty(&output.summary()).map_err(PipelineError::Summary)?;
    let path: &Path = &output.checkpoints.summary;
    tokio::fs::write(path, json)
        .await
        .map_err(|e| PipelineError::io(path, e))
}

fn clock_seed() -> u64 {
    Utc::now().timestamp_micros().unsigned_abs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reverie_music::{Note, TICKS_PER_BEAT};

    fn melody_from(pitches: &[u8]) -> Melody {
        let registry = GenreRegistry::builtin();
        let profile = registry.get(Genre::Ambient).unwrap();
        let mut melody = generate_melody(
            profile,
            &MelodyRequest::new(DurationSpec::Bars(2), 1),
            &mut SeededRng::new(1),
        )
        .unwrap();
        melody.notes = pitches
            .iter()
            .enumerate()
            .map(|(i, &p)| Note::new(p, i as u32 * TICKS_PER_BEAT, TICKS_PER_BEAT, 70))
            .collect();
        melody
    }

    #[test]
    fn test_least_similar_prefers_novel_then_first() {
        let familiar = melody_from(&[60, 62, 64, 65, 67]);
        let novel = melody_from(&[60, 55, 57, 52, 64]);
        let history = History::from_fingerprints([&Fingerprint::of(&familiar)]);

        let picked = least_similar(vec![familiar.clone(), novel.clone()], &history).unwrap();
        assert_eq!(picked.notes, novel.notes);

        let empty = History::new();
        let picked = least_similar(vec![familiar.clone(), novel], &empty).unwrap();
        assert_eq!(picked.notes, familiar.notes);
        assert!(least_similar(Vec::new(), &empty).is_none());
    }

    #[tokio::test]
    async fn test_run_dir_collision_takes_suffix() {
        let root = tempfile::tempdir().unwrap();
        let first = create_unique_dir(root.path(), "lofi-9-stamp").await.unwrap();
        let second = create_unique_dir(root.path(), "lofi-9-stamp").await.unwrap();
        let third = create_unique_dir(root.path(), "lofi-9-stamp").await.unwrap();
        assert_eq!(first, root.path().join("lofi-9-stamp"));
        assert_eq!(second, root.path().join("lofi-9-stamp-1"));
        assert_eq!(third, root.path().join("lofi-9-stamp-2"));
        assert!(second.is_dir() && third.is_dir());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_run_dirs_never_shared() {
        let root = tempfile::tempdir().unwrap();
        let spawn = |dir: PathBuf| {
            tokio::spawn(async move { create_run_dir(&dir, Genre::Lofi, 9).await })
        };
        for _ in 0..20 {
            let a = spawn(root.path().to_path_buf());
            let b = spawn(root.path().to_path_buf());
            let (a, b) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());
            assert_ne!(a.run_dir, b.run_dir);
        }
    }

    #[test]
    fn test_warning_display() {
        let w = QualityWarning::Clipping(ClippingDetected {
            peak: 0.99,
            ceiling: 0.95,
        });
        assert!(w.to_string().starts_with("clipping"));
    }
}
