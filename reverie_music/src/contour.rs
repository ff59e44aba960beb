// Melodic contour curves.
//
// A contour maps normalized time t in [0, 1] to a target height in scale
// degrees above the phrase's starting register. Curves are piecewise linear
// and rounded with plain IEEE arithmetic, so the same seed yields the same
// targets on every platform.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Contour {
    /// Rise to a peak at the midpoint, then fall back.
    Arch,
    /// Start high, end low.
    Descending,
    /// Start low, end high.
    Ascending,
    /// Two full rise-and-fall cycles.
    Wave,
}

impl Contour {
    pub const ALL: [Contour; 4] = [
        Contour::Arch,
        Contour::Descending,
        Contour::Ascending,
        Contour::Wave,
    ];

    /// Ordinal used by the parameter vector.
    pub fn index(self) -> usize {
        match self {
            Contour::Arch => 0,
            Contour::Descending => 1,
            Contour::Ascending => 2,
            Contour::Wave => 3,
        }
    }

    /// Curve height in [0, 1] at normalized time `t` (clamped to [0, 1]).
    pub fn height(self, t: f64) -> f64 {
        let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
        match self {
            Contour::Arch => 1.0 - (2.0 * t - 1.0).abs(),
            Contour::Descending => 1.0 - t,
            Contour::Ascending => t,
            Contour::Wave => {
                let phase = (t * 2.0).fract();
                let phase = if t >= 1.0 { 0.0 } else { phase };
                1.0 - (2.0 * phase - 1.0).abs()
            }
        }
    }

    /// Target offset in scale degrees at time `t` for a contour spanning
    /// `span` degrees.
    pub fn degree_at(self, t: f64, span: u8) -> i32 {
        (self.height(t) * span as f64).round() as i32
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Contour::Arch => "arch",
            Contour::Descending => "descending",
            Contour::Ascending => "ascending",
            Contour::Wave => "wave",
        }
    }
}

impl fmt::Display for Contour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Contour {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Contour::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown contour: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arch_peaks_in_middle() {
        assert_eq!(Contour::Arch.degree_at(0.0, 6), 0);
        assert_eq!(Contour::Arch.degree_at(0.5, 6), 6);
        assert_eq!(Contour::Arch.degree_at(1.0, 6), 0);
    }

    #[test]
    fn test_monotone_shapes() {
        let mut prev_up = i32::MIN;
        let mut prev_down = i32::MAX;
        for i in 0..=20 {
            let t = i as f64 / 20.0;
            let up = Contour::Ascending.degree_at(t, 7);
            let down = Contour::Descending.degree_at(t, 7);
            assert!(up >= prev_up);
            assert!(down <= prev_down);
            prev_up = up;
            prev_down = down;
        }
    }

    #[test]
    fn test_wave_has_two_peaks() {
        assert_eq!(Contour::Wave.degree_at(0.25, 4), 4);
        assert_eq!(Contour::Wave.degree_at(0.5, 4), 0);
        assert_eq!(Contour::Wave.degree_at(0.75, 4), 4);
        assert_eq!(Contour::Wave.degree_at(1.0, 4), 0);
    }

    #[test]
    fn test_parse() {
        assert_eq!("Arch".parse::<Contour>(), Ok(Contour::Arch));
        assert!("static".parse::<Contour>().is_err());
    }
}
