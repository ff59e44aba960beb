// Reverie composition engine
//
// Generates genre-conditioned instrumental music as structured note data:
// a motif-based melody shaped by a contour, pushed away from recently
// produced melodies, then layered into a multi-track arrangement. Audio
// rendering and persistence live in sibling crates; this crate is pure and
// deterministic given a seed.
//
// Architecture:
// - scale.rs: Keys, modes, absolute scale-degree arithmetic
// - note.rs: Note events on the 480-tick-per-beat grid
// - contour.rs: Piecewise-linear contour curves (arch, wave, ...)
// - motif.rs: Motif generation and development (inversion, augmentation, ...)
// - genre.rs: Genre profiles, validation, the registry (built-in + JSON)
// - effects.rs: Typed production effect chain with canonical-order checks
// - melody.rs: Melody engine (motif placement along a contour)
// - fingerprint.rs: Interval/rhythm fingerprints and trigram similarity
// - uniqueness.rs: Annealing optimizer against a history of fingerprints
// - arrangement.rs: Harmony, bass, and texture layering
// - midi.rs: Standard MIDI File output for checkpoints and synthesis
// - error.rs: Error type for all of the above

pub mod arrangement;
pub mod contour;
pub mod effects;
pub mod error;
pub mod fingerprint;
pub mod genre;
pub mod melody;
pub mod midi;
pub mod motif;
pub mod note;
pub mod scale;
pub mod uniqueness;

pub use arrangement::{Arrangement, Role, Track, arrange};
pub use contour::Contour;
pub use effects::{EffectIntensities, EffectStage, ProductionSettings};
pub use error::MusicError;
pub use fingerprint::Fingerprint;
pub use genre::{Genre, GenreProfile, GenreRegistry, UniquenessPolicy};
pub use melody::{DurationSpec, Melody, MelodyRequest, generate_melody};
pub use note::{Note, TICKS_PER_BEAT};
pub use scale::{Key, Mode};
pub use uniqueness::{DegradedUniqueness, History, Optimized, optimize};
