// Genre profiles and the registry that serves them.
//
// A profile bundles everything genre-specific: tempo and mode defaults, the
// melodic vocabulary (contour, range, motif sizes, rhythm palette), the
// dynamics curve, one `RoleProfile` per arrangement role, the uniqueness
// policy, and the production effect chain. Profiles are plain data. They are
// validated once, when the registry is built, so every later stage can rely
// on required roles being present and ranges being sane.
//
// `GenreRegistry::builtin()` carries the six shipped genres; `load(path)`
// reads a JSON array of profiles with the same shape (see `to_json()`).

use crate::arrangement::Role;
use crate::contour::Contour;
use crate::effects::{EffectStage, ProductionSettings};
use crate::error::MusicError;
use crate::note::TICKS_PER_BEAT;
use crate::scale::Mode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Closed set of supported genres.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Genre {
    Relaxation,
    Ambient,
    Meditation,
    Lofi,
    Classical,
    Cinematic,
}

impl Genre {
    pub const ALL: [Genre; 6] = [
        Genre::Relaxation,
        Genre::Ambient,
        Genre::Meditation,
        Genre::Lofi,
        Genre::Classical,
        Genre::Cinematic,
    ];

    pub fn index(self) -> usize {
        Genre::ALL.iter().position(|&g| g == self).unwrap_or(0)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Genre::Relaxation => "relaxation",
            Genre::Ambient => "ambient",
            Genre::Meditation => "meditation",
            Genre::Lofi => "lofi",
            Genre::Classical => "classical",
            Genre::Cinematic => "cinematic",
        }
    }
}

impl fmt::Display for Genre {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Genre {
    type Err = MusicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Genre::ALL
            .into_iter()
            .find(|g| g.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| MusicError::UnknownGenre(s.to_string()))
    }
}

/// One entry of a rhythm palette: a note length and its relative weight.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RhythmWeight {
    pub ticks: u32,
    pub weight: f64,
}

/// Melodic vocabulary of a genre.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MelodyProfile {
    pub tempo_bpm: f64,
    pub mode: Mode,
    /// Tonic pitch classes a key is drawn from when none is requested.
    pub roots: Vec<u8>,
    pub contour: Contour,
    /// Height of the contour curve in scale degrees.
    pub contour_span: u8,
    pub pitch_low: u8,
    pub pitch_high: u8,
    pub motif_min_len: usize,
    pub motif_max_len: usize,
    /// Upper bound on distinct motifs per melody (1-3).
    pub max_motifs: usize,
    pub rhythm: Vec<RhythmWeight>,
    /// Chance that a motif step is a third instead of a second.
    pub leap_probability: f64,
    /// Chance that a repeated motif occurrence is developed.
    pub variation_probability: f64,
    /// Chance that an eligible whole-tone step gets a passing tone.
    pub chromatic_probability: f64,
}

/// Velocity shaping.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DynamicsProfile {
    pub base_velocity: u8,
    /// Random spread added on top of the base.
    pub spread: u8,
    /// Extra velocity on bar downbeats.
    pub downbeat_accent: u8,
    /// Extra velocity at the contour's peak, scaled by contour height.
    pub swell: u8,
}

/// Instrument, placement, register, and density of one arrangement role.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoleProfile {
    /// General MIDI program number (0-127).
    pub program: u8,
    /// Stereo position in [-1, 1].
    pub pan: f64,
    /// Level in [0, 1].
    pub volume: f64,
    pub pitch_low: u8,
    pub pitch_high: u8,
    /// Share of eligible melody events the role responds to, in [0, 1].
    #[serde(default = "full_density")]
    pub density: f64,
}

fn full_density() -> f64 {
    1.0
}

/// Thresholds and budget for the uniqueness optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UniquenessPolicy {
    /// Maximum acceptable similarity to any history entry, in (0, 1].
    pub similarity_threshold: f64,
    /// Perturbations tried before giving up.
    pub iteration_budget: usize,
    pub initial_temperature: f64,
    /// Multiplicative cooling per iteration.
    pub cooling_rate: f64,
    /// How many recent melodies of the genre count as history.
    pub history_limit: usize,
}

impl Default for UniquenessPolicy {
    fn default() -> Self {
        UniquenessPolicy {
            similarity_threshold: 0.80,
            iteration_budget: 2000,
            initial_temperature: 0.05,
            cooling_rate: 0.997,
            history_limit: 50,
        }
    }
}

/// Everything the pipeline needs to know about one genre.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenreProfile {
    pub genre: Genre,
    #[serde(default)]
    pub description: String,
    pub melody: MelodyProfile,
    pub dynamics: DynamicsProfile,
    pub roles: BTreeMap<Role, RoleProfile>,
    /// Minimum melody note length (ticks) that receives harmony.
    #[serde(default = "default_sustain_ticks")]
    pub harmony_sustain_ticks: u32,
    #[serde(default)]
    pub uniqueness: UniquenessPolicy,
    pub production: Vec<EffectStage>,
}

fn default_sustain_ticks() -> u32 {
    TICKS_PER_BEAT
}

impl GenreProfile {
    pub fn role(&self, role: Role) -> Result<&RoleProfile, MusicError> {
        self.roles
            .get(&role)
            .ok_or(MusicError::MissingRoleProfile {
                genre: self.genre,
                role,
            })
    }

    pub fn production_settings(&self) -> ProductionSettings {
        ProductionSettings {
            genre: self.genre,
            stages: self.production.clone(),
        }
    }

    /// Check every invariant later stages rely on.
    pub fn validate(&self) -> Result<(), MusicError> {
        let invalid = |reason: String| MusicError::InvalidProfile {
            genre: self.genre,
            reason,
        };

        for role in Role::REQUIRED {
            self.role(role)?;
        }
        for (role, rp) in &self.roles {
            if !(-1.0..=1.0).contains(&rp.pan) {
                return Err(invalid(format!("{role} pan {} outside [-1, 1]", rp.pan)));
            }
            if !(0.0..=1.0).contains(&rp.volume) {
                return Err(invalid(format!("{role} volume {} outside [0, 1]", rp.volume)));
            }
            if !(0.0..=1.0).contains(&rp.density) {
                return Err(invalid(format!("{role} density {} outside [0, 1]", rp.density)));
            }
            if rp.program > 127 {
                return Err(invalid(format!("{role} program {} is not General MIDI", rp.program)));
            }
            check_register(&format!("{role}"), rp.pitch_low, rp.pitch_high).map_err(invalid)?;
        }

        let m = &self.melody;
        if !m.tempo_bpm.is_finite() || !(20.0..=300.0).contains(&m.tempo_bpm) {
            return Err(invalid(format!("tempo {} outside [20, 300]", m.tempo_bpm)));
        }
        if m.roots.is_empty() || m.roots.iter().any(|&r| r > 11) {
            return Err(invalid("roots must be non-empty pitch classes 0-11".into()));
        }
        if m.contour_span > 14 {
            return Err(invalid(format!("contour span {} exceeds two octaves", m.contour_span)));
        }
        check_register("melody", m.pitch_low, m.pitch_high).map_err(invalid)?;
        if m.motif_min_len < 4 || m.motif_max_len > 8 || m.motif_min_len > m.motif_max_len {
            return Err(invalid(format!(
                "motif length {}..={} must lie within 4..=8",
                m.motif_min_len, m.motif_max_len
            )));
        }
        if !(1..=3).contains(&m.max_motifs) {
            return Err(invalid(format!("max_motifs {} outside 1..=3", m.max_motifs)));
        }
        if m.rhythm.is_empty()
            || m.rhythm.iter().any(|r| r.ticks == 0 || !r.weight.is_finite() || r.weight < 0.0)
            || m.rhythm.iter().all(|r| r.weight == 0.0)
        {
            return Err(invalid("rhythm palette needs positive lengths and weights".into()));
        }
        for (name, p) in [
            ("leap_probability", m.leap_probability),
            ("variation_probability", m.variation_probability),
            ("chromatic_probability", m.chromatic_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(invalid(format!("{name} {p} outside [0, 1]")));
            }
        }

        if !(1..=127).contains(&self.dynamics.base_velocity) {
            return Err(invalid("base velocity must be 1-127".into()));
        }
        if self.harmony_sustain_ticks == 0 {
            return Err(invalid("harmony_sustain_ticks must be positive".into()));
        }

        let u = &self.uniqueness;
        if !(f64::MIN_POSITIVE..=1.0).contains(&u.similarity_threshold) {
            return Err(invalid("similarity threshold must be in (0, 1]".into()));
        }
        if !(u.initial_temperature.is_finite() && u.initial_temperature > 0.0)
            || !(f64::MIN_POSITIVE..=1.0).contains(&u.cooling_rate)
        {
            return Err(invalid("annealing temperature and cooling rate must be positive".into()));
        }
        if u.history_limit == 0 {
            return Err(invalid("history_limit must be at least 1".into()));
        }

        self.production_settings().validate()
    }
}

fn check_register(name: &str, low: u8, high: u8) -> Result<(), String> {
    if high > 127 || low >= high || high - low < 12 {
        return Err(format!(
            "{name} register {low}..={high} must span at least an octave within 0-127"
        ));
    }
    Ok(())
}

/// Validated set of genre profiles.
#[derive(Debug, Clone)]
pub struct GenreRegistry {
    profiles: BTreeMap<Genre, GenreProfile>,
}

impl GenreRegistry {
    /// Build a registry from profiles, validating each one.
    pub fn from_profiles(
        profiles: impl IntoIterator<Item = GenreProfile>,
    ) -> Result<Self, MusicError> {
        let mut map = BTreeMap::new();
        for profile in profiles {
            profile.validate()?;
            let genre = profile.genre;
            if map.insert(genre, profile).is_some() {
                return Err(MusicError::InvalidProfile {
                    genre,
                    reason: "genre defined more than once".into(),
                });
            }
        }
        Ok(GenreRegistry { profiles: map })
    }

    /// The six shipped genres.
    pub fn builtin() -> Self {
        let profiles = builtin_profiles()
            .into_iter()
            .map(|p| (p.genre, p))
            .collect();
        GenreRegistry { profiles }
    }

    /// Load profiles from a JSON array file.
    pub fn load(path: &Path) -> Result<Self, MusicError> {
        let text = std::fs::read_to_string(path).map_err(|e| MusicError::io(path, e))?;
        let profiles: Vec<GenreProfile> =
            serde_json::from_str(&text).map_err(|source| MusicError::ProfileFormat {
                path: path.to_path_buf(),
                source,
            })?;
        let registry = Self::from_profiles(profiles)?;
        tracing::info!(
            path = %path.display(),
            genres = registry.profiles.len(),
            "loaded genre profiles"
        );
        Ok(registry)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let profiles: Vec<&GenreProfile> = self.profiles.values().collect();
        serde_json::to_string_pretty(&profiles)
    }

    pub fn get(&self, genre: Genre) -> Result<&GenreProfile, MusicError> {
        self.profiles
            .get(&genre)
            .ok_or_else(|| MusicError::UnknownGenre(genre.to_string()))
    }

    /// Look up a profile by genre name.
    pub fn lookup(&self, name: &str) -> Result<&GenreProfile, MusicError> {
        self.get(name.parse()?)
    }

    pub fn genres(&self) -> impl Iterator<Item = Genre> + '_ {
        self.profiles.keys().copied()
    }
}

fn role(program: u8, pan: f64, volume: f64, register: (u8, u8), density: f64) -> RoleProfile {
    RoleProfile {
        program,
        pan,
        volume,
        pitch_low: register.0,
        pitch_high: register.1,
        density,
    }
}

fn rhythm(palette: &[(u32, f64)]) -> Vec<RhythmWeight> {
    palette
        .iter()
        .map(|&(ticks, weight)| RhythmWeight { ticks, weight })
        .collect()
}

fn chain(
    gain: f64,
    eq: (f64, f64, f64),
    compressor: (f64, f64),
    reverb: (f64, f64),
    width: f64,
) -> Vec<EffectStage> {
    vec![
        EffectStage::Gain { level: gain },
        EffectStage::Equalizer {
            low_db: eq.0,
            mid_db: eq.1,
            high_db: eq.2,
        },
        EffectStage::Compressor {
            threshold_db: compressor.0,
            ratio: compressor.1,
            attack_ms: 20.0,
            release_ms: 250.0,
        },
        EffectStage::Reverb {
            decay_s: reverb.0,
            mix: reverb.1,
        },
        EffectStage::StereoWidth { width },
        EffectStage::Limiter { ceiling: 0.95 },
    ]
}

fn builtin_profiles() -> Vec<GenreProfile> {
    use Role::*;
    vec![
        GenreProfile {
            genre: Genre::Relaxation,
            description: "Slow, consonant piano over soft strings".into(),
            melody: MelodyProfile {
                tempo_bpm: 65.0,
                mode: Mode::Major,
                roots: vec![0, 5, 7],
                contour: Contour::Arch,
                contour_span: 5,
                pitch_low: 60,
                pitch_high: 84,
                motif_min_len: 4,
                motif_max_len: 6,
                max_motifs: 2,
                rhythm: rhythm(&[(480, 3.0), (960, 2.0), (720, 1.0), (240, 1.0)]),
                leap_probability: 0.15,
                variation_probability: 0.35,
                chromatic_probability: 0.08,
            },
            dynamics: DynamicsProfile {
                base_velocity: 45,
                spread: 12,
                downbeat_accent: 8,
                swell: 10,
            },
            roles: BTreeMap::from([
                (Melody, role(0, 0.0, 0.79, (60, 84), 1.0)),
                (Harmony, role(48, 0.25, 0.59, (48, 67), 1.0)),
                (Bass, role(32, 0.0, 0.71, (28, 50), 1.0)),
                (Texture, role(8, -0.5, 0.35, (72, 96), 0.4)),
            ]),
            harmony_sustain_ticks: TICKS_PER_BEAT,
            uniqueness: UniquenessPolicy::default(),
            production: chain(0.75, (-1.0, 0.0, 1.0), (-12.0, 4.0), (2.0, 0.4), 1.2),
        },
        GenreProfile {
            genre: Genre::Ambient,
            description: "Sparse vibraphone drifting over a warm pad".into(),
            melody: MelodyProfile {
                tempo_bpm: 60.0,
                mode: Mode::Minor,
                roots: vec![2, 9, 4],
                contour: Contour::Wave,
                contour_span: 4,
                pitch_low: 57,
                pitch_high: 81,
                motif_min_len: 4,
                motif_max_len: 7,
                max_motifs: 2,
                rhythm: rhythm(&[(960, 3.0), (1440, 2.0), (1920, 1.0), (480, 1.0)]),
                leap_probability: 0.10,
                variation_probability: 0.30,
                chromatic_probability: 0.05,
            },
            dynamics: DynamicsProfile {
                base_velocity: 38,
                spread: 12,
                downbeat_accent: 5,
                swell: 12,
            },
            roles: BTreeMap::from([
                (Melody, role(11, 0.0, 0.75, (57, 81), 1.0)),
                (Harmony, role(89, 0.3, 0.60, (45, 69), 1.0)),
                (Bass, role(42, 0.0, 0.65, (31, 52), 1.0)),
                (Texture, role(92, -0.6, 0.35, (69, 93), 0.3)),
            ]),
            harmony_sustain_ticks: TICKS_PER_BEAT,
            uniqueness: UniquenessPolicy::default(),
            production: chain(0.7, (2.0, 0.0, -1.0), (-12.0, 4.0), (3.0, 0.6), 1.5),
        },
        GenreProfile {
            genre: Genre::Meditation,
            description: "Very slow flute lines with long held tones".into(),
            melody: MelodyProfile {
                tempo_bpm: 50.0,
                mode: Mode::Major,
                roots: vec![0, 2, 7],
                contour: Contour::Wave,
                contour_span: 3,
                pitch_low: 57,
                pitch_high: 79,
                motif_min_len: 4,
                motif_max_len: 5,
                max_motifs: 1,
                rhythm: rhythm(&[(960, 3.0), (1920, 2.0), (1440, 1.0)]),
                leap_probability: 0.05,
                variation_probability: 0.20,
                chromatic_probability: 0.0,
            },
            dynamics: DynamicsProfile {
                base_velocity: 35,
                spread: 10,
                downbeat_accent: 4,
                swell: 8,
            },
            roles: BTreeMap::from([
                (Melody, role(73, 0.0, 0.75, (57, 79), 1.0)),
                (Harmony, role(89, 0.2, 0.55, (45, 67), 1.0)),
                (Bass, role(42, 0.0, 0.60, (31, 52), 1.0)),
                (Texture, role(10, -0.5, 0.30, (72, 96), 0.25)),
            ]),
            harmony_sustain_ticks: TICKS_PER_BEAT * 2,
            uniqueness: UniquenessPolicy::default(),
            production: chain(0.65, (-2.0, 0.0, 0.0), (-12.0, 3.0), (2.5, 0.5), 1.3),
        },
        GenreProfile {
            genre: Genre::Lofi,
            description: "Dusty electric piano with a walking bass, no texture layer".into(),
            melody: MelodyProfile {
                tempo_bpm: 75.0,
                mode: Mode::Minor,
                roots: vec![9, 4, 2],
                contour: Contour::Descending,
                contour_span: 5,
                pitch_low: 57,
                pitch_high: 79,
                motif_min_len: 4,
                motif_max_len: 8,
                max_motifs: 3,
                rhythm: rhythm(&[(240, 2.0), (480, 3.0), (720, 2.0), (960, 1.0)]),
                leap_probability: 0.20,
                variation_probability: 0.40,
                chromatic_probability: 0.12,
            },
            dynamics: DynamicsProfile {
                base_velocity: 55,
                spread: 15,
                downbeat_accent: 10,
                swell: 6,
            },
            roles: BTreeMap::from([
                (Melody, role(4, 0.0, 0.80, (57, 79), 1.0)),
                (Harmony, role(5, -0.2, 0.55, (48, 67), 1.0)),
                (Bass, role(33, 0.0, 0.75, (28, 48), 1.0)),
            ]),
            harmony_sustain_ticks: TICKS_PER_BEAT,
            uniqueness: UniquenessPolicy::default(),
            production: chain(0.8, (3.0, -2.0, -3.0), (-8.0, 6.0), (1.2, 0.2), 0.9),
        },
        GenreProfile {
            genre: Genre::Classical,
            description: "Piano melody with strings and cello, clear phrasing".into(),
            melody: MelodyProfile {
                tempo_bpm: 80.0,
                mode: Mode::Major,
                roots: vec![0, 7, 2, 5],
                contour: Contour::Arch,
                contour_span: 7,
                pitch_low: 60,
                pitch_high: 88,
                motif_min_len: 5,
                motif_max_len: 8,
                max_motifs: 3,
                rhythm: rhythm(&[(240, 2.0), (480, 4.0), (960, 2.0), (720, 1.0)]),
                leap_probability: 0.25,
                variation_probability: 0.45,
                chromatic_probability: 0.10,
            },
            dynamics: DynamicsProfile {
                base_velocity: 50,
                spread: 30,
                downbeat_accent: 12,
                swell: 15,
            },
            roles: BTreeMap::from([
                (Melody, role(0, 0.0, 0.80, (60, 88), 1.0)),
                (Harmony, role(48, 0.3, 0.60, (48, 72), 1.0)),
                (Bass, role(42, 0.0, 0.70, (36, 55), 1.0)),
                (Texture, role(71, -0.4, 0.45, (60, 84), 0.5)),
            ]),
            harmony_sustain_ticks: TICKS_PER_BEAT,
            uniqueness: UniquenessPolicy::default(),
            production: chain(0.85, (0.0, 1.0, 0.5), (-12.0, 2.0), (1.8, 0.35), 1.1),
        },
        GenreProfile {
            genre: Genre::Cinematic,
            description: "Rising horn themes over string beds and contrabass".into(),
            melody: MelodyProfile {
                tempo_bpm: 70.0,
                mode: Mode::Minor,
                roots: vec![2, 0, 9],
                contour: Contour::Ascending,
                contour_span: 8,
                pitch_low: 55,
                pitch_high: 86,
                motif_min_len: 4,
                motif_max_len: 7,
                max_motifs: 3,
                rhythm: rhythm(&[(480, 3.0), (960, 3.0), (1440, 1.0), (240, 1.0)]),
                leap_probability: 0.30,
                variation_probability: 0.50,
                chromatic_probability: 0.10,
            },
            dynamics: DynamicsProfile {
                base_velocity: 55,
                spread: 30,
                downbeat_accent: 15,
                swell: 25,
            },
            roles: BTreeMap::from([
                (Melody, role(60, 0.0, 0.85, (55, 86), 1.0)),
                (Harmony, role(48, 0.3, 0.65, (43, 67), 1.0)),
                (Bass, role(43, 0.0, 0.75, (28, 50), 1.0)),
                (Texture, role(46, -0.5, 0.45, (67, 91), 0.5)),
            ]),
            harmony_sustain_ticks: TICKS_PER_BEAT,
            uniqueness: UniquenessPolicy::default(),
            production: chain(0.9, (4.0, 0.0, 2.0), (-6.0, 4.0), (2.2, 0.45), 1.4),
        },
    ]
}
