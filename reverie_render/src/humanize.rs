// Performance humanization: small gaussian offsets on note timing and
// velocity, applied to a copy of the arrangement right before synthesis.
// The stored arrangement and its MIDI checkpoint stay on the grid.

use crate::error::RenderError;
use reverie_music::{Arrangement, TICKS_PER_BEAT};
use reverie_prng::SeededRng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HumanizeSettings {
    pub enabled: bool,
    /// Maximum timing offset in milliseconds; the standard deviation is
    /// half of this.
    pub timing_ms: f64,
    /// Maximum velocity offset.
    pub velocity: u8,
}

impl Default for HumanizeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            timing_ms: 12.0,
            velocity: 8,
        }
    }
}

impl HumanizeSettings {
    pub fn validate(&self) -> Result<(), RenderError> {
        if !(0.0..=100.0).contains(&self.timing_ms) {
            return Err(RenderError::InvalidConfig(format!(
                "humanize.timing_ms {} outside [0, 100]",
                self.timing_ms
            )));
        }
        if self.velocity > 32 {
            return Err(RenderError::InvalidConfig(format!(
                "humanize.velocity {} above 32",
                self.velocity
            )));
        }
        Ok(())
    }
}

/// Return a humanized copy of `arrangement`. Notes stay inside the piece and
/// keep at least one tick of length; velocities stay in 1..=127.
pub fn humanize(
    arrangement: &Arrangement,
    settings: &HumanizeSettings,
    rng: &mut SeededRng,
) -> Arrangement {
    let mut out = arrangement.clone();
    if !settings.enabled {
        return out;
    }
    let total = arrangement.total_ticks();
    let ticks_per_ms = TICKS_PER_BEAT as f64 * arrangement.tempo_bpm() / 60_000.0;
    let max_shift = settings.timing_ms * ticks_per_ms;
    let max_vel = settings.velocity as f64;

    for track in &mut out.tracks {
        for note in &mut track.notes {
            let shift = (rng.gaussian() * max_shift / 2.0)
                .clamp(-max_shift, max_shift)
                .round() as i64;
            let start = (note.start as i64 + shift).clamp(0, total.saturating_sub(1) as i64) as u32;
            note.start = start;
            note.duration = note.duration.min(total - start).max(1);

            let dv = (rng.gaussian() * max_vel / 2.0)
                .clamp(-max_vel, max_vel)
                .round() as i32;
            note.velocity = (note.velocity as i32 + dv).clamp(1, 127) as u8;
        }
        track.notes.sort_by_key(|n| (n.start, n.pitch));
    }
    out
}
