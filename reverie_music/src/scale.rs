// Keys, scales, and scale-degree arithmetic.
//
// Every pitch decision in the melody engine, the optimizer, and the
// arrangement layerer goes through a `Key`. Pitches are addressed by an
// *absolute degree*: the number of diatonic steps above the key's tonic in
// MIDI octave -1 (so degree 7 is one octave above degree 0). Adding or
// subtracting absolute degrees is diatonic transposition by construction,
// which is how the whole engine keeps notes in the key.
//
// Only the two modes the genre profiles use (major and natural minor) exist.

use crate::error::MusicError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Scale quality of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Major,
    Minor,
}

impl Mode {
    /// Semitone offsets of the seven scale degrees above the tonic.
    pub fn intervals(self) -> [u8; 7] {
        match self {
            Mode::Major => [0, 2, 4, 5, 7, 9, 11],
            Mode::Minor => [0, 2, 3, 5, 7, 8, 10],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Major => "major",
            Mode::Minor => "minor",
        }
    }
}

/// A tonic pitch class plus a mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawKey")]
pub struct Key {
    /// Pitch class of the tonic (0 = C, 2 = D, ... 11 = B).
    pub root: u8,
    pub mode: Mode,
}

/// Unchecked wire form of a `Key`.
#[derive(Deserialize)]
struct RawKey {
    root: u8,
    mode: Mode,
}

impl TryFrom<RawKey> for Key {
    type Error = MusicError;

    fn try_from(raw: RawKey) -> Result<Self, Self::Error> {
        if raw.root >= 12 {
            return Err(MusicError::InvalidKey(format!(
                "root pitch class {} outside 0..=11",
                raw.root
            )));
        }
        Ok(Key::new(raw.root, raw.mode))
    }
}

impl Key {
    pub fn new(root: u8, mode: Mode) -> Self {
        Key {
            root: root % 12,
            mode,
        }
    }

    /// Check if a MIDI pitch belongs to the key's scale.
    pub fn is_diatonic(&self, pitch: u8) -> bool {
        self.scale_degree(pitch).is_some()
    }

    /// Scale degree (0-6) of a pitch, or `None` if it is outside the scale.
    pub fn scale_degree(&self, pitch: u8) -> Option<u8> {
        let pc = (pitch as i32 - self.root as i32).rem_euclid(12) as u8;
        self.mode
            .intervals()
            .iter()
            .position(|&iv| iv == pc)
            .map(|d| d as u8)
    }

    /// Absolute degree of a diatonic pitch, or `None` for a chromatic one.
    pub fn absolute_degree(&self, pitch: u8) -> Option<i32> {
        let rel = pitch as i32 - self.root as i32;
        let octave = rel.div_euclid(12);
        let degree = self.scale_degree(pitch)? as i32;
        Some(octave * 7 + degree)
    }

    /// MIDI pitch of an absolute degree, or `None` outside 0..=127.
    pub fn pitch_at(&self, degree: i32) -> Option<u8> {
        let octave = degree.div_euclid(7);
        let idx = degree.rem_euclid(7) as usize;
        let pitch = self.root as i32 + octave * 12 + self.mode.intervals()[idx] as i32;
        u8::try_from(pitch).ok().filter(|&p| p <= 127)
    }

    /// Move a diatonic pitch by `steps` scale degrees.
    pub fn transpose(&self, pitch: u8, steps: i32) -> Option<u8> {
        self.pitch_at(self.absolute_degree(pitch)? + steps)
    }

    /// Absolute degree of the tonic in the octave at or below `pitch`.
    pub fn tonic_degree_below(&self, pitch: u8) -> i32 {
        let rel = pitch as i32 - self.root as i32;
        rel.div_euclid(12) * 7
    }

    /// Shift `degree` by whole octaves until its pitch lies in `[low, high]`.
    ///
    /// Returns `None` if the range holds no octave of that degree.
    pub fn fold_into(&self, mut degree: i32, low: u8, high: u8) -> Option<u8> {
        for _ in 0..12 {
            let pitch = self.pitch_at(degree);
            match pitch {
                Some(p) if p > high => degree -= 7,
                Some(p) if p < low => degree += 7,
                Some(p) => return Some(p),
                None if degree < 0 => degree += 7,
                None => degree -= 7,
            }
        }
        None
    }

    /// Snap a pitch to the nearest scale tone, preferring the lower neighbour.
    pub fn snap(&self, pitch: u8) -> u8 {
        if self.is_diatonic(pitch) {
            return pitch;
        }
        for offset in 1u8..=6 {
            if pitch >= offset && self.is_diatonic(pitch - offset) {
                return pitch - offset;
            }
            if pitch <= 127 - offset && self.is_diatonic(pitch + offset) {
                return pitch + offset;
            }
        }
        pitch
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", NOTE_NAMES[self.root as usize], self.mode.as_str())
    }
}

impl FromStr for Key {
    type Err = MusicError;

    /// Parses `"D minor"`, `"F#"`, `"Bb major"`, `"a minor"`. Mode defaults to major.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let tonic = parts
            .next()
            .ok_or_else(|| MusicError::InvalidKey(s.to_string()))?;
        let root = parse_pitch_class(tonic).ok_or_else(|| MusicError::InvalidKey(s.to_string()))?;
        let mode = match parts.next().map(|m| m.to_ascii_lowercase()) {
            None => Mode::Major,
            Some(m) if m == "major" || m == "maj" => Mode::Major,
            Some(m) if m == "minor" || m == "min" => Mode::Minor,
            Some(_) => return Err(MusicError::InvalidKey(s.to_string())),
        };
        if parts.next().is_some() {
            return Err(MusicError::InvalidKey(s.to_string()));
        }
        Ok(Key::new(root, mode))
    }
}

/// Parse a note letter with optional `#`/`b` accidentals into a pitch class.
pub fn parse_pitch_class(name: &str) -> Option<u8> {
    let mut chars = name.chars();
    let letter = chars.next()?.to_ascii_uppercase();
    let base: i32 = match letter {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };
    let mut offset = 0;
    for c in chars {
        match c {
            '#' => offset += 1,
            'b' => offset -= 1,
            _ => return None,
        }
    }
    Some((base + offset).rem_euclid(12) as u8)
}

/// Note name with octave, e.g. `60` -> `"C4"`.
pub fn pitch_name(pitch: u8) -> String {
    let octave = pitch as i32 / 12 - 1;
    format!("{}{}", NOTE_NAMES[(pitch % 12) as usize], octave)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_c_major_membership() {
        let key = Key::new(0, Mode::Major);
        for p in [60, 62, 64, 65, 67, 69, 71, 72] {
            assert!(key.is_diatonic(p), "{} should be in C major", pitch_name(p));
        }
        assert!(!key.is_diatonic(61));
        assert!(!key.is_diatonic(66));
    }

    #[test]
    fn test_absolute_degree_round_trip() {
        let key = Key::new(2, Mode::Minor);
        for p in 20u8..110 {
            if let Some(d) = key.absolute_degree(p) {
                assert_eq!(key.pitch_at(d), Some(p));
            }
        }
        // D5 is seven degrees above D4.
        assert_eq!(key.absolute_degree(74), key.absolute_degree(62).map(|d| d + 7));
    }

    #[test]
    fn test_transpose_stays_in_key() {
        let key = Key::new(7, Mode::Major);
        let g4 = 67;
        assert_eq!(key.transpose(g4, 1), Some(69));
        assert_eq!(key.transpose(g4, 2), Some(71));
        assert_eq!(key.transpose(g4, -1), Some(66)); // F#
        assert_eq!(key.transpose(61, 1), None);
    }

    #[test]
    fn test_fold_into_range() {
        let key = Key::new(0, Mode::Major);
        let deg = key.absolute_degree(84).unwrap();
        let folded = key.fold_into(deg, 36, 55).unwrap();
        assert_eq!(folded, 48);
        assert_eq!(key.fold_into(deg, 60, 62), Some(60));
    }

    #[test]
    fn test_snap() {
        let key = Key::new(0, Mode::Major);
        assert_eq!(key.snap(60), 60);
        assert_eq!(key.snap(61), 60);
        assert_eq!(key.snap(66), 65);
    }

    #[test]
    fn test_deserialize_rejects_out_of_range_root() {
        let key: Key = serde_json::from_str(r#"{"root": 11, "mode": "minor"}"#).unwrap();
        assert_eq!(key.to_string(), "B minor");
        for root in [12, 200] {
            let json = format!(r#"{{"root": {root}, "mode": "major"}}"#);
            assert!(serde_json::from_str::<Key>(&json).is_err(), "root {root} accepted");
        }
    }

    #[test]
    fn test_parse_keys() {
        assert_eq!("D minor".parse::<Key>().unwrap(), Key::new(2, Mode::Minor));
        assert_eq!("Bb major".parse::<Key>().unwrap(), Key::new(10, Mode::Major));
        assert_eq!("f#".parse::<Key>().unwrap(), Key::new(6, Mode::Major));
        assert!("H minor".parse::<Key>().is_err());
        assert!("C dorian".parse::<Key>().is_err());
        assert_eq!(Key::new(9, Mode::Minor).to_string(), "A minor");
    }
}
