// Uniqueness optimizer: pushes a melody away from recently produced ones.
//
// Works like simulated annealing with a single objective, the maximum
// similarity between the candidate's fingerprint and any fingerprint in the
// history window. Each iteration proposes one perturbation, rescores, and
// accepts or rejects with the Metropolis criterion. The search stops as soon
// as the best candidate falls below the similarity threshold, or when the
// iteration budget runs out, in which case the best melody seen is returned
// with a `DegradedUniqueness` warning instead of failing the run.
//
// Perturbations (all diatonic, so the melody never leaves its key):
// - Segment transposition (~30%): shift one motif instance by 1-2 degrees.
// - Segment swap (~15%): exchange the pitch sequences of two equally long
//   motif instances, or reverse one instance when no pair matches.
// - Pitch alteration (~40%): move a single note by 1-2 degrees.
// - Duration alteration (~15%): change a single note's length, never past
//   the next onset or the end of the piece.
//
// Tempo, key, total length, and the onset grid are never touched, so the
// contour and duration of the input survive.

use crate::fingerprint::{Fingerprint, GramSets};
use crate::genre::UniquenessPolicy;
use crate::melody::{Melody, Segment};
use crate::note::TICKS_PER_BEAT;
use reverie_prng::SeededRng;
use serde::{Deserialize, Serialize};

/// Floor on the annealing temperature, keeps the acceptance test finite.
const MIN_TEMPERATURE: f64 = 1e-6;

const DURATION_CHOICES: [u32; 5] = [
    TICKS_PER_BEAT / 2,
    TICKS_PER_BEAT,
    TICKS_PER_BEAT * 3 / 2,
    TICKS_PER_BEAT * 2,
    TICKS_PER_BEAT * 3,
];

/// Recently produced melodies a new one is compared against.
#[derive(Debug, Clone, Default)]
pub struct History {
    entries: Vec<GramSets>,
}

impl History {
    pub fn new() -> Self {
        History::default()
    }

    pub fn from_fingerprints<'a>(fingerprints: impl IntoIterator<Item = &'a Fingerprint>) -> Self {
        History {
            entries: fingerprints.into_iter().map(Fingerprint::grams).collect(),
        }
    }

    pub fn push(&mut self, fingerprint: &Fingerprint) {
        self.entries.push(fingerprint.grams());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest similarity to any entry; 0.0 for an empty history.
    pub fn max_similarity(&self, fingerprint: &Fingerprint) -> f64 {
        let grams = fingerprint.grams();
        self.entries
            .iter()
            .map(|e| grams.similarity(e))
            .fold(0.0, f64::max)
    }
}

/// Quality warning: the budget ran out before the melody became distinct enough.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DegradedUniqueness {
    pub max_similarity: f64,
    pub threshold: f64,
    pub iterations: usize,
}

/// Result of an optimizer run.
#[derive(Debug, Clone)]
pub struct Optimized {
    pub melody: Melody,
    /// Similarity of `melody` to its nearest history entry.
    pub max_similarity: f64,
    pub iterations: usize,
    pub accepted: usize,
    pub warning: Option<DegradedUniqueness>,
}

/// Adaptive cooling state: tracks acceptance over a sliding window and
/// slows or speeds cooling to keep the search moving.
struct AdaptiveCooler {
    base_rate: f64,
    window_accepted: u32,
    window_total: u32,
    window_size: u32,
}

impl AdaptiveCooler {
    fn new(base_rate: f64) -> Self {
        AdaptiveCooler {
            base_rate,
            window_accepted: 0,
            window_total: 0,
            window_size: 100,
        }
    }

    fn record(&mut self, accepted: bool) {
        self.window_total += 1;
        if accepted {
            self.window_accepted += 1;
        }
    }

    fn effective_rate(&mut self) -> f64 {
        if self.window_total < self.window_size {
            return self.base_rate;
        }
        let accept_ratio = self.window_accepted as f64 / self.window_total as f64;
        self.window_accepted = 0;
        self.window_total = 0;

        if accept_ratio < 0.05 {
            self.base_rate + (1.0 - self.base_rate) * 0.5
        } else if accept_ratio > 0.50 {
            self.base_rate * 0.98
        } else {
            self.base_rate
        }
    }
}

/// Run the optimizer. `register` bounds every pitch it may write.
pub fn optimize(
    melody: &Melody,
    history: &History,
    policy: &UniquenessPolicy,
    register: (u8, u8),
    rng: &mut SeededRng,
) -> Optimized {
    let threshold = policy.similarity_threshold;
    let mut current = melody.clone();
    let mut current_score = history.max_similarity(&Fingerprint::of(&current));

    if current_score < threshold {
        return Optimized {
            melody: current,
            max_similarity: current_score,
            iterations: 0,
            accepted: 0,
            warning: None,
        };
    }

    let mut best = current.clone();
    let mut best_score = current_score;
    let mut temp = policy.initial_temperature;
    let mut cooler = AdaptiveCooler::new(policy.cooling_rate);
    let mut iterations = 0;
    let mut accepted = 0;

    for _ in 0..policy.iteration_budget {
        iterations += 1;
        let mut proposal = current.clone();
        if !perturb(&mut proposal, register, rng) {
            cooler.record(false);
            continue;
        }
        let score = history.max_similarity(&Fingerprint::of(&proposal));
        let take = metropolis_accept(score - current_score, temp, rng);
        cooler.record(take);
        if take {
            current = proposal;
            current_score = score;
            accepted += 1;
            if current_score < best_score {
                best = current.clone();
                best_score = current_score;
                if best_score < threshold {
                    break;
                }
            }
        }
        temp = (temp * cooler.effective_rate()).max(MIN_TEMPERATURE);
    }

    let warning = (best_score >= threshold).then_some(DegradedUniqueness {
        max_similarity: best_score,
        threshold,
        iterations,
    });
    if let Some(w) = &warning {
        tracing::warn!(
            similarity = w.max_similarity,
            threshold = w.threshold,
            iterations,
            "uniqueness budget exhausted"
        );
    } else {
        tracing::debug!(similarity = best_score, iterations, accepted, "melody made unique");
    }

    Optimized {
        melody: best,
        max_similarity: best_score,
        iterations,
        accepted,
        warning,
    }
}

/// Lower similarity is better, so accept every decrease and accept increases
/// with probability exp(-delta / temp).
fn metropolis_accept(delta: f64, temp: f64, rng: &mut SeededRng) -> bool {
    if delta < 0.0 {
        true
    } else {
        let probability = (-delta / temp).exp();
        rng.next_f64() < probability
    }
}

/// Apply one random perturbation. Returns false if the drawn move could not
/// be applied (nothing changed).
fn perturb(melody: &mut Melody, register: (u8, u8), rng: &mut SeededRng) -> bool {
    if melody.notes.is_empty() {
        return false;
    }
    match rng.weighted_index(&[0.30, 0.15, 0.40, 0.15]) {
        Some(0) => transpose_segment(melody, register, rng),
        Some(1) => swap_segments(melody, rng),
        Some(2) => alter_pitch(melody, register, rng),
        _ => alter_duration(melody, rng),
    }
}

fn degree_shift(rng: &mut SeededRng) -> i32 {
    let size = rng.range_i32_inclusive(1, 2);
    if rng.random_bool(0.5) { size } else { -size }
}

fn transpose_segment(melody: &mut Melody, register: (u8, u8), rng: &mut SeededRng) -> bool {
    let Some(&seg) = rng.choose(&melody.segments) else {
        return false;
    };
    let steps = degree_shift(rng);
    let key = melody.key;
    let mut shifted = Vec::with_capacity(seg.len());
    for note in &melody.notes[seg.start..seg.end] {
        let source = if note.chromatic { key.snap(note.pitch) } else { note.pitch };
        match key.transpose(source, steps) {
            Some(p) if p >= register.0 && p <= register.1 => shifted.push(p),
            _ => return false,
        }
    }
    for (note, pitch) in melody.notes[seg.start..seg.end].iter_mut().zip(shifted) {
        note.pitch = pitch;
        note.chromatic = false;
    }
    true
}

fn swap_segments(melody: &mut Melody, rng: &mut SeededRng) -> bool {
    let Some(&a) = rng.choose(&melody.segments) else {
        return false;
    };
    let partners: Vec<_> = melody
        .segments
        .iter()
        .copied()
        .filter(|s| s.start != a.start && s.len() == a.len())
        .collect();

    let pitches = |m: &Melody, s: Segment| -> Vec<(u8, bool)> {
        m.notes[s.start..s.end]
            .iter()
            .map(|n| (n.pitch, n.chromatic))
            .collect()
    };

    match rng.choose(&partners) {
        Some(&b) => {
            let pa = pitches(melody, a);
            let pb = pitches(melody, b);
            if pa == pb {
                return false;
            }
            write_pitches(melody, a, &pb);
            write_pitches(melody, b, &pa);
        }
        None => {
            let mut pa = pitches(melody, a);
            let original = pa.clone();
            pa.reverse();
            if pa == original {
                return false;
            }
            write_pitches(melody, a, &pa);
        }
    }
    true
}

fn write_pitches(melody: &mut Melody, seg: Segment, pitches: &[(u8, bool)]) {
    for (note, &(pitch, chromatic)) in melody.notes[seg.start..seg.end].iter_mut().zip(pitches) {
        note.pitch = pitch;
        note.chromatic = chromatic;
    }
}

fn alter_pitch(melody: &mut Melody, register: (u8, u8), rng: &mut SeededRng) -> bool {
    let candidates: Vec<usize> = (0..melody.notes.len())
        .filter(|&i| !melody.notes[i].chromatic)
        .collect();
    let Some(&idx) = rng.choose(&candidates) else {
        return false;
    };
    let steps = degree_shift(rng);
    match melody.key.transpose(melody.notes[idx].pitch, steps) {
        Some(p) if p >= register.0 && p <= register.1 => {
            melody.notes[idx].pitch = p;
            true
        }
        _ => false,
    }
}

fn alter_duration(melody: &mut Melody, rng: &mut SeededRng) -> bool {
    let idx = rng.range_usize(0, melody.notes.len());
    let limit = melody
        .notes
        .get(idx + 1)
        .map(|n| n.start)
        .unwrap_or(melody.total_ticks);
    let note = &mut melody.notes[idx];
    let room = limit.saturating_sub(note.start);
    let Some(&wanted) = rng.choose(&DURATION_CHOICES) else {
        return false;
    };
    let duration = wanted.min(room);
    if duration == 0 || duration == note.duration {
        return false;
    }
    note.duration = duration;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genre::{Genre, GenreRegistry};
    use crate::melody::{DurationSpec, MelodyRequest, generate_melody};

    fn melody(seed: u64) -> (Melody, (u8, u8)) {
        let registry = GenreRegistry::builtin();
        let profile = registry.get(Genre::Classical).unwrap();
        let request = MelodyRequest::new(DurationSpec::Bars(8), seed);
        let m = generate_melody(profile, &request, &mut SeededRng::new(seed)).unwrap();
        (m, (profile.melody.pitch_low, profile.melody.pitch_high))
    }

    #[test]
    fn test_empty_history_is_untouched() {
        let (m, register) = melody(1);
        let out = optimize(
            &m,
            &History::new(),
            &UniquenessPolicy::default(),
            register,
            &mut SeededRng::new(2),
        );
        assert_eq!(out.melody, m);
        assert_eq!(out.iterations, 0);
        assert!(out.warning.is_none());
    }

    #[test]
    fn test_duplicate_of_history_is_pushed_away() {
        let policy = UniquenessPolicy::default();
        for seed in 0..10 {
            let (m, register) = melody(seed);
            let history = History::from_fingerprints([&Fingerprint::of(&m)]);
            let out = optimize(&m, &history, &policy, register, &mut SeededRng::new(seed));

            let score = history.max_similarity(&Fingerprint::of(&out.melody));
            assert!((score - out.max_similarity).abs() < 1e-12);
            match out.warning {
                None => assert!(score < policy.similarity_threshold),
                Some(w) => {
                    assert!(w.max_similarity >= policy.similarity_threshold);
                    assert!(out.iterations <= policy.iteration_budget);
                }
            }
            assert!(out.melody.is_in_key());
            assert_eq!(out.melody.total_ticks, m.total_ticks);
            assert_eq!(out.melody.key, m.key);
            assert_eq!(out.melody.tempo_bpm, m.tempo_bpm);
            assert!(out.melody.end_tick() <= out.melody.total_ticks);
            for pair in out.melody.notes.windows(2) {
                assert!(pair[0].end() <= pair[1].start);
            }
        }
    }

    #[test]
    fn test_zero_budget_reports_degraded() {
        let (m, register) = melody(4);
        let history = History::from_fingerprints([&Fingerprint::of(&m)]);
        let policy = UniquenessPolicy {
            iteration_budget: 0,
            ..Default::default()
        };
        let out = optimize(&m, &history, &policy, register, &mut SeededRng::new(4));
        let warning = out.warning.unwrap();
        assert_eq!(warning.max_similarity, 1.0);
        assert_eq!(out.melody, m);
    }

    #[test]
    fn test_optimizer_is_deterministic() {
        let (m, register) = melody(8);
        let history = History::from_fingerprints([&Fingerprint::of(&m)]);
        let policy = UniquenessPolicy::default();
        let a = optimize(&m, &history, &policy, register, &mut SeededRng::new(99));
        let b = optimize(&m, &history, &policy, register, &mut SeededRng::new(99));
        assert_eq!(a.melody, b.melody);
        assert_eq!(a.iterations, b.iterations);
    }

    #[test]
    fn test_metropolis_always_accepts_improvement() {
        let mut rng = SeededRng::new(0);
        for _ in 0..1000 {
            assert!(metropolis_accept(-0.01, 1e-6, &mut rng));
        }
    }
}
