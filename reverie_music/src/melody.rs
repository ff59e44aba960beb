// Melody engine: genre-conditioned, motif-based melody generation.
//
// A melody is built by repeatedly placing motif instances along a contour
// curve. At each placement the contour gives a target height (in scale
// degrees above the starting register), one of the 1-3 motifs is chosen,
// optionally developed (see `motif::Variation`), and laid down starting on
// the target degree. Placement continues beat-aligned until the requested
// length is filled; the last notes are clipped so nothing sounds past it.
//
// All pitches come from `Key::pitch_at`, so the only out-of-key notes are
// the flagged chromatic passing tones inserted between whole-tone steps.
// Velocities follow the genre's dynamics: base + random spread, a downbeat
// accent, and a swell that tracks contour height.
//
// The generator draws only from the `SeededRng` it is given.

use crate::contour::Contour;
use crate::error::MusicError;
use crate::genre::{DynamicsProfile, Genre, GenreProfile};
use crate::motif::{Motif, Variation};
use crate::note::{Note, TICKS_PER_BAR, TICKS_PER_BEAT, round_up_to_beat};
use crate::scale::Key;
use reverie_prng::SeededRng;
use serde::{Deserialize, Serialize};

/// Melodies start on the third above the tonic.
const START_DEGREE: i32 = 2;

/// Longest piece the engine will lay out.
const MAX_SECONDS: f64 = 3600.0;
const MAX_BARS: u32 = 2000;

/// Requested length of a piece.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationSpec {
    Seconds(f64),
    Bars(u32),
}

impl DurationSpec {
    /// Length in ticks at `tempo_bpm`, rounded up to a whole beat.
    pub fn to_ticks(self, tempo_bpm: f64) -> Result<u32, MusicError> {
        match self {
            DurationSpec::Seconds(s) => {
                if !s.is_finite() || s <= 0.0 {
                    return Err(MusicError::InvalidDuration(format!(
                        "{s} seconds is not a positive length"
                    )));
                }
                if s > MAX_SECONDS {
                    return Err(MusicError::InvalidDuration(format!(
                        "{s} seconds exceeds the {MAX_SECONDS} second limit"
                    )));
                }
                let beats = (s * tempo_bpm / 60.0).ceil().max(1.0) as u32;
                Ok(beats * TICKS_PER_BEAT)
            }
            DurationSpec::Bars(0) => Err(MusicError::InvalidDuration("zero bars".into())),
            DurationSpec::Bars(b) if b > MAX_BARS => Err(MusicError::InvalidDuration(format!(
                "{b} bars exceeds the {MAX_BARS} bar limit"
            ))),
            DurationSpec::Bars(b) => Ok(b * TICKS_PER_BAR),
        }
    }
}

/// Caller-controlled inputs to one melody generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MelodyRequest {
    pub duration: DurationSpec,
    pub key: Option<Key>,
    pub tempo_bpm: Option<f64>,
    pub contour: Option<Contour>,
    pub seed: u64,
}

impl MelodyRequest {
    pub fn new(duration: DurationSpec, seed: u64) -> Self {
        MelodyRequest {
            duration,
            key: None,
            tempo_bpm: None,
            contour: None,
            seed,
        }
    }
}

/// Note-index range of one placed motif instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub start: usize,
    pub end: usize,
}

impl Segment {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

/// A single monophonic melodic line plus the context it was written in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Melody {
    pub genre: Genre,
    pub key: Key,
    pub contour: Contour,
    pub tempo_bpm: f64,
    pub seed: u64,
    /// Requested length; no note ends after it.
    pub total_ticks: u32,
    /// Sorted by start; non-overlapping.
    pub notes: Vec<Note>,
    pub segments: Vec<Segment>,
}

impl Melody {
    pub fn duration_secs(&self) -> f64 {
        self.total_ticks as f64 / TICKS_PER_BEAT as f64 * 60.0 / self.tempo_bpm
    }

    /// Notes per beat.
    pub fn note_density(&self) -> f64 {
        let beats = self.total_ticks as f64 / TICKS_PER_BEAT as f64;
        if beats == 0.0 {
            0.0
        } else {
            self.notes.len() as f64 / beats
        }
    }

    pub fn average_velocity(&self) -> f64 {
        if self.notes.is_empty() {
            return 0.0;
        }
        self.notes.iter().map(|n| n.velocity as f64).sum::<f64>() / self.notes.len() as f64
    }

    /// True if every note not flagged chromatic belongs to the key.
    pub fn is_in_key(&self) -> bool {
        self.notes
            .iter()
            .all(|n| n.chromatic || self.key.is_diatonic(n.pitch))
    }

    pub fn end_tick(&self) -> u32 {
        self.notes.last().map(|n| n.end()).unwrap_or(0)
    }
}

/// Generate a melody for `profile`.
pub fn generate_melody(
    profile: &GenreProfile,
    request: &MelodyRequest,
    rng: &mut SeededRng,
) -> Result<Melody, MusicError> {
    let m = &profile.melody;
    let tempo_bpm = request.tempo_bpm.unwrap_or(m.tempo_bpm);
    if !tempo_bpm.is_finite() || !(20.0..=300.0).contains(&tempo_bpm) {
        return Err(MusicError::InvalidTempo(tempo_bpm));
    }
    let total_ticks = request.duration.to_ticks(tempo_bpm)?;

    let key = match request.key {
        Some(k) => k,
        None => Key::new(rng.choose(&m.roots).copied().unwrap_or(0), m.mode),
    };
    let contour = request.contour.unwrap_or(m.contour);

    let motif_count = rng.range_usize_inclusive(1, m.max_motifs.clamp(1, 3));
    let motifs: Vec<Motif> = (0..motif_count).map(|_| Motif::generate(m, rng)).collect();
    let mut occurrences = vec![0u32; motifs.len()];

    let register = m.pitch_low + (m.pitch_high - m.pitch_low) / 4;
    let base_degree = key.tonic_degree_below(register) + START_DEGREE;

    let mut notes: Vec<Note> = Vec::new();
    let mut segments = Vec::new();
    let mut cursor = 0u32;

    while cursor < total_ticks {
        let t = cursor as f64 / total_ticks as f64;
        let target = base_degree + contour.degree_at(t, m.contour_span);

        let idx = rng.range_usize(0, motifs.len());
        let variation = if occurrences[idx] > 0 && rng.random_bool(m.variation_probability) {
            Variation::pick(rng)
        } else {
            Variation::Exact
        };
        occurrences[idx] += 1;

        let mut placed = Vec::new();
        let mut at = cursor;
        for step in motifs[idx].varied(variation) {
            if at >= total_ticks {
                break;
            }
            if let Some(pitch) = key.fold_into(target + step.degree, m.pitch_low, m.pitch_high) {
                let mut note = Note::new(pitch, at, step.duration, 0);
                note.clip_to(total_ticks);
                note.velocity = velocity_for(&profile.dynamics, contour, &note, total_ticks, rng);
                placed.push(note);
            }
            at += step.duration;
        }
        let placed = add_passing_tones(placed, m.chromatic_probability, rng);

        if !placed.is_empty() {
            let start = notes.len();
            notes.extend(placed);
            segments.push(Segment {
                start,
                end: notes.len(),
            });
        }
        cursor = round_up_to_beat(at).max(cursor + TICKS_PER_BEAT);
    }

    tracing::debug!(
        genre = %profile.genre,
        key = %key,
        %contour,
        motifs = motif_count,
        notes = notes.len(),
        "generated melody"
    );

    Ok(Melody {
        genre: profile.genre,
        key,
        contour,
        tempo_bpm,
        seed: request.seed,
        total_ticks,
        notes,
        segments,
    })
}

fn velocity_for(
    dynamics: &DynamicsProfile,
    contour: Contour,
    note: &Note,
    total_ticks: u32,
    rng: &mut SeededRng,
) -> u8 {
    let mut v = dynamics.base_velocity as u32 + rng.range_u64(0, dynamics.spread as u64 + 1) as u32;
    if note.start % TICKS_PER_BAR == 0 {
        v += dynamics.downbeat_accent as u32;
    }
    let height = contour.height(note.start as f64 / total_ticks.max(1) as f64);
    v += (height * dynamics.swell as f64).round() as u32;
    v.clamp(1, 127) as u8
}

/// Split notes that lead by a whole tone into the next note, turning their
/// second half into a chromatic passing tone.
fn add_passing_tones(placed: Vec<Note>, probability: f64, rng: &mut SeededRng) -> Vec<Note> {
    if probability <= 0.0 || placed.len() < 2 {
        return placed;
    }
    let mut out = Vec::with_capacity(placed.len() + 2);
    for (i, note) in placed.iter().enumerate() {
        let next = placed.get(i + 1);
        let eligible = next.is_some_and(|n| {
            n.start == note.end()
                && note.pitch.abs_diff(n.pitch) == 2
                && note.duration >= TICKS_PER_BEAT
        });
        match next {
            Some(n) if eligible && rng.random_bool(probability) => {
                let head = note.duration / 2;
                out.push(Note {
                    duration: head,
                    ..*note
                });
                out.push(Note {
                    pitch: (note.pitch + n.pitch) / 2,
                    start: note.start + head,
                    duration: note.duration - head,
                    velocity: note.velocity.saturating_sub(6).max(1),
                    chromatic: true,
                });
            }
            _ => out.push(*note),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genre::GenreRegistry;
    use crate::scale::Mode;

    fn generate(genre: Genre, duration: DurationSpec, seed: u64) -> Result<Melody, MusicError> {
        let registry = GenreRegistry::builtin();
        let profile = registry.get(genre)?;
        let request = MelodyRequest::new(duration, seed);
        generate_melody(profile, &request, &mut SeededRng::derive(seed, "melody"))
    }

    #[test]
    fn test_same_seed_same_melody() {
        let a = generate(Genre::Relaxation, DurationSpec::Seconds(30.0), 42).unwrap();
        let b = generate(Genre::Relaxation, DurationSpec::Seconds(30.0), 42).unwrap();
        assert_eq!(a, b);
        let c = generate(Genre::Relaxation, DurationSpec::Seconds(30.0), 43).unwrap();
        assert_ne!(a.notes, c.notes);
    }

    #[test]
    fn test_every_genre_stays_in_key() {
        for genre in Genre::ALL {
            for seed in 0..20 {
                let melody = generate(genre, DurationSpec::Bars(8), seed).unwrap();
                assert!(melody.is_in_key(), "{genre} seed {seed} left the key");
                assert!(!melody.notes.is_empty());
            }
        }
    }

    #[test]
    fn test_notes_fit_inside_requested_length() {
        for seed in 0..20 {
            let melody = generate(Genre::Cinematic, DurationSpec::Seconds(20.0), seed).unwrap();
            // 20 s at 70 bpm = 23.33 beats, rounded up to 24.
            assert_eq!(melody.total_ticks, 24 * TICKS_PER_BEAT);
            assert!(melody.end_tick() <= melody.total_ticks);
            // Placement keeps going until the last bar is reached.
            assert!(melody.end_tick() + TICKS_PER_BAR * 2 > melody.total_ticks);
            for pair in melody.notes.windows(2) {
                assert!(pair[0].end() <= pair[1].start, "notes overlap");
            }
        }
    }

    #[test]
    fn test_rejects_bad_durations() {
        for bad in [
            DurationSpec::Seconds(0.0),
            DurationSpec::Seconds(-5.0),
            DurationSpec::Seconds(f64::NAN),
            DurationSpec::Seconds(f64::INFINITY),
            DurationSpec::Bars(0),
        ] {
            assert!(
                matches!(
                    generate(Genre::Ambient, bad, 1),
                    Err(MusicError::InvalidDuration(_))
                ),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_request_overrides_profile_defaults() {
        let registry = GenreRegistry::builtin();
        let profile = registry.get(Genre::Lofi).unwrap();
        let mut request = MelodyRequest::new(DurationSpec::Bars(4), 5);
        request.key = Some(Key::new(7, Mode::Major));
        request.tempo_bpm = Some(92.0);
        request.contour = Some(Contour::Arch);
        let melody = generate_melody(profile, &request, &mut SeededRng::new(5)).unwrap();
        assert_eq!(melody.key, Key::new(7, Mode::Major));
        assert_eq!(melody.tempo_bpm, 92.0);
        assert_eq!(melody.contour, Contour::Arch);
        assert!(melody.is_in_key());

        request.tempo_bpm = Some(0.0);
        assert!(matches!(
            generate_melody(profile, &request, &mut SeededRng::new(5)),
            Err(MusicError::InvalidTempo(_))
        ));
    }

    #[test]
    fn test_passing_tones_sit_between_neighbours() {
        let mut found = 0;
        for seed in 0..40 {
            let melody = generate(Genre::Lofi, DurationSpec::Bars(16), seed).unwrap();
            for (i, note) in melody.notes.iter().enumerate() {
                if !note.chromatic {
                    continue;
                }
                found += 1;
                assert!(!melody.key.is_diatonic(note.pitch));
                let before = melody.notes[i - 1];
                let after = melody.notes[i + 1];
                assert_eq!(before.end(), note.start);
                assert_eq!(note.end(), after.start);
                assert_eq!(before.pitch.abs_diff(after.pitch), 2);
            }
        }
        assert!(found > 0, "lofi should produce some passing tones");
    }

    #[test]
    fn test_segments_cover_all_notes() {
        let melody = generate(Genre::Classical, DurationSpec::Bars(12), 77).unwrap();
        let mut expected = 0;
        for seg in &melody.segments {
            assert_eq!(seg.start, expected);
            assert!(!seg.is_empty());
            expected = seg.end;
        }
        assert_eq!(expected, melody.notes.len());
    }

    #[test]
    fn test_velocities_follow_dynamics() {
        let registry = GenreRegistry::builtin();
        let dynamics = registry.get(Genre::Meditation).unwrap().dynamics;
        let melody = generate(Genre::Meditation, DurationSpec::Bars(8), 3).unwrap();
        let ceiling = dynamics.base_velocity
            + dynamics.spread
            + dynamics.downbeat_accent
            + dynamics.swell;
        for n in &melody.notes {
            assert!(n.velocity >= dynamics.base_velocity.saturating_sub(6));
            assert!(n.velocity <= ceiling);
        }
    }
}
