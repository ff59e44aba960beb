// Short melodic cells and their development.
//
// A motif is 4-8 steps, each a scale-degree offset from the motif's first
// note plus a length in ticks. The melody engine places motif instances along
// the contour, transposing each instance diatonically to the local target.
// Repeated occurrences can be developed (inverted, augmented, diminished,
// retrograde) so the piece stays recognizable without looping verbatim.

use crate::genre::MelodyProfile;
use crate::note::TICKS_PER_BEAT;
use reverie_prng::SeededRng;
use serde::{Deserialize, Serialize};

/// Shortest length a diminished step can shrink to (a sixteenth).
const MIN_STEP_TICKS: u32 = TICKS_PER_BEAT / 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotifStep {
    /// Scale degrees above the motif's first note.
    pub degree: i32,
    pub duration: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Motif {
    pub steps: Vec<MotifStep>,
}

/// How a repeated motif occurrence is developed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variation {
    Exact,
    /// Mirror every degree offset around the first note.
    Inverted,
    /// Lengths x 3/2.
    Augmented,
    /// Lengths x 3/4.
    Diminished,
    /// Steps in reverse order, re-anchored on the new first note.
    Retrograde,
}

impl Variation {
    pub const DEVELOPED: [Variation; 4] = [
        Variation::Inverted,
        Variation::Augmented,
        Variation::Diminished,
        Variation::Retrograde,
    ];

    pub fn pick(rng: &mut SeededRng) -> Variation {
        Variation::DEVELOPED[rng.range_usize(0, Variation::DEVELOPED.len())]
    }
}

impl Motif {
    /// Draw a new motif from the genre's melodic vocabulary.
    pub fn generate(profile: &MelodyProfile, rng: &mut SeededRng) -> Motif {
        let len = rng.range_usize_inclusive(profile.motif_min_len, profile.motif_max_len);
        let weights: Vec<f64> = profile.rhythm.iter().map(|r| r.weight).collect();
        let mut steps = Vec::with_capacity(len);
        let mut degree = 0i32;

        for i in 0..len {
            if i > 0 {
                let size = if rng.random_bool(profile.leap_probability) {
                    2
                } else {
                    1
                };
                // Lean back toward the anchor once the cell wanders a fourth away.
                let down = if degree.abs() >= 3 {
                    degree > 0
                } else {
                    rng.random_bool(0.5)
                };
                degree += if down { -size } else { size };
            }
            let duration = rng
                .weighted_index(&weights)
                .and_then(|idx| profile.rhythm.get(idx))
                .map(|r| r.ticks)
                .unwrap_or(TICKS_PER_BEAT);
            steps.push(MotifStep { degree, duration });
        }
        Motif { steps }
    }

    pub fn total_ticks(&self) -> u32 {
        self.steps.iter().map(|s| s.duration).sum()
    }

    /// The steps of this motif after applying `variation`.
    pub fn varied(&self, variation: Variation) -> Vec<MotifStep> {
        match variation {
            Variation::Exact => self.steps.clone(),
            Variation::Inverted => self
                .steps
                .iter()
                .map(|s| MotifStep {
                    degree: -s.degree,
                    duration: s.duration,
                })
                .collect(),
            Variation::Augmented => self
                .steps
                .iter()
                .map(|s| MotifStep {
                    degree: s.degree,
                    duration: s.duration * 3 / 2,
                })
                .collect(),
            Variation::Diminished => self
                .steps
                .iter()
                .map(|s| MotifStep {
                    degree: s.degree,
                    duration: (s.duration * 3 / 4).max(MIN_STEP_TICKS),
                })
                .collect(),
            Variation::Retrograde => {
                let anchor = self.steps.last().map(|s| s.degree).unwrap_or(0);
                self.steps
                    .iter()
                    .rev()
                    .map(|s| MotifStep {
                        degree: s.degree - anchor,
                        duration: s.duration,
                    })
                    .collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genre::{Genre, GenreRegistry};

    fn profile() -> MelodyProfile {
        GenreRegistry::builtin()
            .get(Genre::Classical)
            .unwrap()
            .melody
            .clone()
    }

    #[test]
    fn test_generated_motif_shape() {
        let p = profile();
        let mut rng = SeededRng::new(9);
        for _ in 0..500 {
            let m = Motif::generate(&p, &mut rng);
            assert!((p.motif_min_len..=p.motif_max_len).contains(&m.steps.len()));
            assert_eq!(m.steps[0].degree, 0);
            for pair in m.steps.windows(2) {
                let step = (pair[1].degree - pair[0].degree).abs();
                assert!(step == 1 || step == 2, "step of {step} degrees");
            }
            assert!(m.steps.iter().all(|s| s.duration > 0));
        }
    }

    #[test]
    fn test_variations() {
        let m = Motif {
            steps: vec![
                MotifStep { degree: 0, duration: 480 },
                MotifStep { degree: 2, duration: 240 },
                MotifStep { degree: 1, duration: 960 },
            ],
        };
        let inv: Vec<i32> = m.varied(Variation::Inverted).iter().map(|s| s.degree).collect();
        assert_eq!(inv, vec![0, -2, -1]);

        let aug: Vec<u32> = m.varied(Variation::Augmented).iter().map(|s| s.duration).collect();
        assert_eq!(aug, vec![720, 360, 1440]);

        let dim: Vec<u32> = m.varied(Variation::Diminished).iter().map(|s| s.duration).collect();
        assert_eq!(dim, vec![360, 180, 720]);

        let retro = m.varied(Variation::Retrograde);
        assert_eq!(retro[0], MotifStep { degree: 0, duration: 960 });
        assert_eq!(retro[2].degree, -1);

        assert_eq!(m.varied(Variation::Exact), m.steps);
        assert_eq!(m.total_ticks(), 1680);
    }
}
