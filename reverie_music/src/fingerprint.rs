// Melodic fingerprints and the similarity score used for uniqueness.
//
// A fingerprint keeps only what makes a tune recognizable regardless of key
// or register: the sequence of semitone intervals between consecutive notes
// and the sequence of note lengths (quantized to thirty-seconds). Two
// fingerprints are compared by the Jaccard overlap of their trigram sets,
// weighted 3:1 in favour of intervals, so a transposed copy of a melody
// scores 1.0 and a melody sharing only its rhythm scores at most 0.25.

use crate::melody::Melody;
use crate::note::{Note, TICKS_PER_BEAT};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const GRAM: usize = 3;
const INTERVAL_WEIGHT: f64 = 0.75;
const RHYTHM_WEIGHT: f64 = 0.25;
/// Rhythm quantum: a thirty-second note.
const RHYTHM_QUANTUM: u32 = TICKS_PER_BEAT / 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub intervals: Vec<i16>,
    pub rhythm: Vec<u16>,
}

impl Fingerprint {
    pub fn of(melody: &Melody) -> Self {
        Self::from_notes(&melody.notes)
    }

    pub fn from_notes(notes: &[Note]) -> Self {
        let intervals = notes
            .windows(2)
            .map(|w| w[1].pitch as i16 - w[0].pitch as i16)
            .collect();
        let rhythm = notes
            .iter()
            .map(|n| (n.duration.div_ceil(RHYTHM_QUANTUM)).min(u16::MAX as u32) as u16)
            .collect();
        Fingerprint { intervals, rhythm }
    }

    /// Similarity in [0, 1]; 1.0 for identical fingerprints.
    pub fn similarity(&self, other: &Fingerprint) -> f64 {
        self.grams().similarity(&other.grams())
    }

    pub(crate) fn grams(&self) -> GramSets {
        GramSets {
            intervals: grams(&self.intervals),
            rhythm: grams(&self.rhythm),
        }
    }
}

/// Precomputed trigram sets, so history entries are not re-split on every
/// comparison.
#[derive(Debug, Clone)]
pub(crate) struct GramSets {
    intervals: BTreeSet<Vec<i16>>,
    rhythm: BTreeSet<Vec<u16>>,
}

impl GramSets {
    pub(crate) fn similarity(&self, other: &GramSets) -> f64 {
        INTERVAL_WEIGHT * jaccard(&self.intervals, &other.intervals)
            + RHYTHM_WEIGHT * jaccard(&self.rhythm, &other.rhythm)
    }
}

/// Trigram set; a sequence shorter than a trigram is its own single gram.
fn grams<T: Ord + Clone>(seq: &[T]) -> BTreeSet<Vec<T>> {
    let n = GRAM.min(seq.len());
    if n == 0 {
        return BTreeSet::new();
    }
    seq.windows(n).map(|w| w.to_vec()).collect()
}

fn jaccard<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let shared = a.intersection(b).count();
    let union = a.len() + b.len() - shared;
    shared as f64 / union as f64
}
