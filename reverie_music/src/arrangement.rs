// Arrangement layerer: turns one melody into a multi-track piece.
//
// Each role the genre profile declares becomes one track with its own
// General MIDI program, pan, volume, and register:
// - Melody: the input melody, note for note.
// - Harmony: a diatonic third and fifth stacked below every sustained melody
//   note (at least `harmony_sustain_ticks` long).
// - Bass: the implied chord root on beat 1 and its fifth on beat 3 of each
//   bar. The implied chord at a beat is the triad whose root lies a fifth
//   below the sounding melody note, the same chord the harmony spells.
// - Texture (optional): a counter-line in contrary motion to the melody at
//   reduced density.
//
// Derived voices are always folded into their role's register by whole
// octaves, so they stay diatonic, and are clipped to the melody's length.

use crate::error::MusicError;
use crate::genre::{Genre, GenreProfile, RoleProfile};
use crate::melody::Melody;
use crate::note::{Note, TICKS_PER_BAR, TICKS_PER_BEAT};
use crate::scale::Key;
use reverie_prng::SeededRng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bass notes fall on beats 1 and 3.
const BASS_STEP: u32 = TICKS_PER_BEAT * 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Melody,
    Harmony,
    Bass,
    /// Counter-melody / texture layer.
    Texture,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Melody, Role::Harmony, Role::Bass, Role::Texture];
    pub const REQUIRED: [Role; 3] = [Role::Melody, Role::Harmony, Role::Bass];

    /// MIDI channel the role plays on. Channel 9 (drums) is never used.
    pub fn channel(self) -> u8 {
        match self {
            Role::Melody => 0,
            Role::Harmony => 1,
            Role::Bass => 2,
            Role::Texture => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Melody => "melody",
            Role::Harmony => "harmony",
            Role::Bass => "bass",
            Role::Texture => "texture",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One instrument part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub role: Role,
    pub program: u8,
    pub channel: u8,
    pub pan: f64,
    pub volume: f64,
    /// Sorted by start, then pitch. Harmony may hold simultaneous notes.
    pub notes: Vec<Note>,
}

impl Track {
    fn new(role: Role, rp: &RoleProfile, mut notes: Vec<Note>) -> Self {
        notes.sort_by_key(|n| (n.start, n.pitch));
        Track {
            role,
            program: rp.program,
            channel: role.channel(),
            pan: rp.pan,
            volume: rp.volume,
            notes,
        }
    }
}

/// A melody plus its accompaniment, ready to render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arrangement {
    pub genre: Genre,
    pub melody: Melody,
    /// One track per declared role, in `Role` order.
    pub tracks: Vec<Track>,
}

impl Arrangement {
    pub fn track(&self, role: Role) -> Option<&Track> {
        self.tracks.iter().find(|t| t.role == role)
    }

    pub fn roles(&self) -> Vec<Role> {
        self.tracks.iter().map(|t| t.role).collect()
    }

    pub fn total_ticks(&self) -> u32 {
        self.melody.total_ticks
    }

    pub fn key(&self) -> Key {
        self.melody.key
    }

    pub fn tempo_bpm(&self) -> f64 {
        self.melody.tempo_bpm
    }
}

/// Build the arrangement for `melody` from the profile's role definitions.
pub fn arrange(
    melody: &Melody,
    profile: &GenreProfile,
    rng: &mut SeededRng,
) -> Result<Arrangement, MusicError> {
    let melody_role = profile.role(Role::Melody)?;
    let harmony_role = profile.role(Role::Harmony)?;
    let bass_role = profile.role(Role::Bass)?;

    let mut tracks = vec![
        Track::new(Role::Melody, melody_role, melody.notes.clone()),
        Track::new(
            Role::Harmony,
            harmony_role,
            harmony_notes(melody, harmony_role, profile.harmony_sustain_ticks, rng),
        ),
        Track::new(
            Role::Bass,
            bass_role,
            bass_notes(melody, bass_role, profile.dynamics.base_velocity, rng),
        ),
    ];
    if let Some(texture_role) = profile.roles.get(&Role::Texture) {
        tracks.push(Track::new(
            Role::Texture,
            texture_role,
            texture_notes(melody, texture_role, rng),
        ));
    }

    tracing::debug!(
        genre = %profile.genre,
        tracks = tracks.len(),
        notes = tracks.iter().map(|t| t.notes.len()).sum::<usize>(),
        "arranged melody"
    );

    Ok(Arrangement {
        genre: profile.genre,
        melody: melody.clone(),
        tracks,
    })
}

fn scaled_velocity(velocity: u8, factor: f64) -> u8 {
    ((velocity as f64 * factor).round() as i64).clamp(1, 127) as u8
}

fn harmony_notes(
    melody: &Melody,
    rp: &RoleProfile,
    sustain_ticks: u32,
    rng: &mut SeededRng,
) -> Vec<Note> {
    let key = melody.key;
    let mut out = Vec::new();
    for note in melody.notes.iter().filter(|n| !n.chromatic && n.duration >= sustain_ticks) {
        let Some(degree) = key.absolute_degree(note.pitch) else {
            continue;
        };
        if !rng.random_bool(rp.density) {
            continue;
        }
        for below in [2, 4] {
            if let Some(pitch) = key.fold_into(degree - below, rp.pitch_low, rp.pitch_high) {
                let mut n = Note::new(pitch, note.start, note.duration, scaled_velocity(note.velocity, 0.8));
                if n.clip_to(melody.total_ticks) {
                    out.push(n);
                }
            }
        }
    }
    out
}

/// Root (absolute degree) of the chord implied at `tick`, if a diatonic
/// melody note is sounding there.
fn implied_root(melody: &Melody, tick: u32) -> Option<i32> {
    melody
        .notes
        .iter()
        .find(|n| n.sounds_at(tick) && !n.chromatic)
        .and_then(|n| melody.key.absolute_degree(n.pitch))
        .map(|d| d - 4)
}

fn bass_notes(melody: &Melody, rp: &RoleProfile, base_velocity: u8, rng: &mut SeededRng) -> Vec<Note> {
    let mut out = Vec::new();
    // Hold the tonic until the melody implies something else.
    let mut root = 0;
    let velocity = base_velocity.saturating_add(8).min(127);
    let mut tick = 0;
    while tick < melody.total_ticks {
        if let Some(r) = implied_root(melody, tick) {
            root = r;
        }
        let on_downbeat = tick % TICKS_PER_BAR == 0;
        let degree = if on_downbeat { root } else { root + 4 };
        if rng.random_bool(rp.density) {
            if let Some(pitch) = melody.key.fold_into(degree, rp.pitch_low, rp.pitch_high) {
                let mut n = Note::new(pitch, tick, BASS_STEP, velocity);
                if n.clip_to(melody.total_ticks) {
                    out.push(n);
                }
            }
        }
        tick += BASS_STEP;
    }
    out
}

fn texture_notes(melody: &Melody, rp: &RoleProfile, rng: &mut SeededRng) -> Vec<Note> {
    let key = melody.key;
    let middle = rp.pitch_low + (rp.pitch_high - rp.pitch_low) / 2;
    let Some(anchor) = key.absolute_degree(key.snap(middle)) else {
        return Vec::new();
    };
    let mut first_degree = None;
    let mut out = Vec::new();
    for note in melody.notes.iter().filter(|n| !n.chromatic) {
        let Some(degree) = key.absolute_degree(note.pitch) else {
            continue;
        };
        let origin = *first_degree.get_or_insert(degree);
        if !rng.random_bool(rp.density) {
            continue;
        }
        let mirrored = anchor - (degree - origin);
        if let Some(pitch) = key.fold_into(mirrored, rp.pitch_low, rp.pitch_high) {
            let mut n = Note::new(pitch, note.start, note.duration, scaled_velocity(note.velocity, 0.7));
            if n.clip_to(melody.total_ticks) {
                out.push(n);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genre::GenreRegistry;
    use crate::melody::{DurationSpec, MelodyRequest, generate_melody};

    fn build(genre: Genre, seed: u64) -> (Melody, Arrangement) {
        let registry = GenreRegistry::builtin();
        let profile = registry.get(genre).unwrap();
        let request = MelodyRequest::new(DurationSpec::Bars(8), seed);
        let melody = generate_melody(profile, &request, &mut SeededRng::new(seed)).unwrap();
        let arrangement = arrange(&melody, profile, &mut SeededRng::derive(seed, "arrange")).unwrap();
        (melody, arrangement)
    }

    #[test]
    fn test_declared_roles_present() {
        let (_, arr) = build(Genre::Relaxation, 1);
        assert_eq!(arr.roles(), Role::ALL.to_vec());
        let (_, lofi) = build(Genre::Lofi, 1);
        assert_eq!(lofi.roles(), Role::REQUIRED.to_vec());
    }

    #[test]
    fn test_melody_track_is_the_melody() {
        let (melody, arr) = build(Genre::Ambient, 2);
        assert_eq!(arr.track(Role::Melody).unwrap().notes, melody.notes);
        assert_eq!(arr.melody, melody);
    }

    #[test]
    fn test_derived_voices_diatonic_in_register_and_length() {
        let registry = GenreRegistry::builtin();
        for genre in Genre::ALL {
            let profile = registry.get(genre).unwrap();
            for seed in 0..10 {
                let (melody, arr) = build(genre, seed);
                for track in arr.tracks.iter().filter(|t| t.role != Role::Melody) {
                    let rp = profile.role(track.role).unwrap();
                    for n in &track.notes {
                        assert!(melody.key.is_diatonic(n.pitch), "{genre} {} off key", track.role);
                        assert!((rp.pitch_low..=rp.pitch_high).contains(&n.pitch));
                        assert!(n.end() <= melody.total_ticks);
                        assert!(n.duration > 0);
                    }
                }
            }
        }
    }

    #[test]
    fn test_bass_on_strong_beats() {
        let (melody, arr) = build(Genre::Classical, 3);
        let bass = arr.track(Role::Bass).unwrap();
        assert_eq!(bass.notes.len() as u32, melody.total_ticks / BASS_STEP);
        for n in &bass.notes {
            assert_eq!(n.start % BASS_STEP, 0);
        }
        // The beat-3 note is the fifth of the downbeat's chord whenever the
        // melody implies the same chord on both beats.
        let key = melody.key;
        for pair in bass.notes.chunks(2) {
            if let [one, three] = pair {
                if implied_root(&melody, three.start).is_none() {
                    let d1 = key.absolute_degree(one.pitch).unwrap();
                    let d3 = key.absolute_degree(three.pitch).unwrap();
                    assert_eq!((d3 - d1).rem_euclid(7), 4);
                }
            }
        }
    }

    #[test]
    fn test_harmony_only_under_sustained_notes() {
        let registry = GenreRegistry::builtin();
        let profile = registry.get(Genre::Relaxation).unwrap();
        let (melody, arr) = build(Genre::Relaxation, 4);
        for n in &arr.track(Role::Harmony).unwrap().notes {
            let above = melody
                .notes
                .iter()
                .find(|m| m.start == n.start)
                .expect("harmony note without melody note");
            assert!(above.duration >= profile.harmony_sustain_ticks);
            assert!(!above.chromatic);
        }
    }

    #[test]
    fn test_track_settings_come_from_profile() {
        let registry = GenreRegistry::builtin();
        let profile = registry.get(Genre::Cinematic).unwrap();
        let (_, arr) = build(Genre::Cinematic, 5);
        for track in &arr.tracks {
            let rp = profile.role(track.role).unwrap();
            assert_eq!(track.program, rp.program);
            assert_eq!(track.pan, rp.pan);
            assert_eq!(track.volume, rp.volume);
            assert_eq!(track.channel, track.role.channel());
        }
    }

    #[test]
    fn test_missing_role_is_an_error() {
        let registry = GenreRegistry::builtin();
        let mut profile = registry.get(Genre::Ambient).unwrap().clone();
        let request = MelodyRequest::new(DurationSpec::Bars(2), 6);
        let melody = generate_melody(&profile, &request, &mut SeededRng::new(6)).unwrap();
        profile.roles.remove(&Role::Harmony);
        assert!(matches!(
            arrange(&melody, &profile, &mut SeededRng::new(6)),
            Err(MusicError::MissingRoleProfile {
                role: Role::Harmony,
                ..
            })
        ));
    }

    #[test]
    fn test_arrangement_is_deterministic() {
        let (_, a) = build(Genre::Meditation, 7);
        let (_, b) = build(Genre::Meditation, 7);
        assert_eq!(a, b);
    }
}
