// Note events and the tick grid they live on.
//
// Positions and durations are exact integers in ticks (480 per beat, the
// same resolution the MIDI writer uses), so beat arithmetic never rounds.
// The workspace assumes 4/4 time throughout.

use serde::{Deserialize, Serialize};

/// Ticks per beat (quarter note). Also the MIDI file's PPQ.
pub const TICKS_PER_BEAT: u32 = 480;

pub const BEATS_PER_BAR: u32 = 4;

pub const TICKS_PER_BAR: u32 = TICKS_PER_BEAT * BEATS_PER_BAR;

/// A single pitched event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// MIDI pitch, 0-127.
    pub pitch: u8,
    /// Onset in ticks from the start of the piece.
    pub start: u32,
    /// Length in ticks, always > 0.
    pub duration: u32,
    /// MIDI velocity, 1-127.
    pub velocity: u8,
    /// Intentional chromatic passing tone; exempt from the in-key rule.
    #[serde(default)]
    pub chromatic: bool,
}

impl Note {
    pub fn new(pitch: u8, start: u32, duration: u32, velocity: u8) -> Self {
        Note {
            pitch,
            start,
            duration,
            velocity,
            chromatic: false,
        }
    }

    pub fn end(&self) -> u32 {
        self.start + self.duration
    }

    pub fn start_beats(&self) -> f64 {
        self.start as f64 / TICKS_PER_BEAT as f64
    }

    pub fn duration_beats(&self) -> f64 {
        self.duration as f64 / TICKS_PER_BEAT as f64
    }

    /// True if the note sounds at `tick`.
    pub fn sounds_at(&self, tick: u32) -> bool {
        self.start <= tick && tick < self.end()
    }

    /// Cut the note so it ends no later than `limit`. Returns false if
    /// nothing of the note is left.
    pub fn clip_to(&mut self, limit: u32) -> bool {
        if self.start >= limit {
            return false;
        }
        self.duration = self.duration.min(limit - self.start);
        true
    }
}

/// Round a tick position up to the next beat boundary.
pub fn round_up_to_beat(ticks: u32) -> u32 {
    ticks.div_ceil(TICKS_PER_BEAT) * TICKS_PER_BEAT
}
