// ParameterVector: the fixed-length, [0, 1]-normalized encoding of one
// generation's settings, plus the structured parameters it is built from.
//
// Layout (index: meaning):
//   0 tempo, (bpm - 40) / 160
//   1 mode, major = 1
//   2 contour ordinal / 3
//   3 melody note density, notes per beat / 4
//   4 melody mean velocity / 127
//   5..=8 track volume for melody, harmony, bass, texture (0 when absent)
//   9 genre ordinal / 5
//   10 gain level
//   11 EQ intensity, mean |band dB| / 12
//   12 compression, (ratio - 1) / 9
//   13 reverb mix
//   14 reverb decay / 5 s
//   15 stereo width / 2
//
// Tempo and the effect intensities can be decoded back, which is what the
// history-biased sampler uses.

use crate::error::StoreError;
use reverie_music::{
    Arrangement, Contour, EffectIntensities, Genre, Mode, ProductionSettings, Role,
};
use serde::{Deserialize, Serialize};

pub const VECTOR_DIM: usize = 16;

pub const TEMPO: usize = 0;
pub const MODE: usize = 1;
pub const CONTOUR: usize = 2;
pub const DENSITY: usize = 3;
pub const VELOCITY: usize = 4;
pub const ROLE_VOLUME: usize = 5;
pub const GENRE: usize = 9;
pub const GAIN: usize = 10;
pub const EQ: usize = 11;
pub const COMPRESSION: usize = 12;
pub const REVERB_MIX: usize = 13;
pub const REVERB_DECAY: usize = 14;
pub const STEREO_WIDTH: usize = 15;

const TEMPO_MIN: f64 = 40.0;
const TEMPO_SPAN: f64 = 160.0;
const DENSITY_SPAN: f64 = 4.0;
const EQ_SPAN_DB: f64 = 12.0;
const RATIO_SPAN: f64 = 9.0;
const DECAY_SPAN_S: f64 = 5.0;
const WIDTH_SPAN: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterVector(pub [f64; VECTOR_DIM]);

impl ParameterVector {
    /// Every component must lie in [0, 1].
    pub fn new(values: [f64; VECTOR_DIM]) -> Result<Self, StoreError> {
        if let Some(i) = values.iter().position(|v| !(0.0..=1.0).contains(v)) {
            return Err(StoreError::InvalidVector(format!(
                "component {i} is {}, outside [0, 1]",
                values[i]
            )));
        }
        Ok(Self(values))
    }

    pub fn from_slice(values: &[f64]) -> Result<Self, StoreError> {
        let array: [f64; VECTOR_DIM] = values.try_into().map_err(|_| {
            StoreError::InvalidVector(format!(
                "expected {VECTOR_DIM} components, got {}",
                values.len()
            ))
        })?;
        Self::new(array)
    }

    pub fn values(&self) -> &[f64; VECTOR_DIM] {
        &self.0
    }

    /// Cosine similarity in [-1, 1]; 0 if either vector is all zeros.
    pub fn cosine(&self, other: &ParameterVector) -> f64 {
        let mut dot = 0.0;
        let mut na = 0.0;
        let mut nb = 0.0;
        for (a, b) in self.0.iter().zip(&other.0) {
            dot += a * b;
            na += a * a;
            nb += b * b;
        }
        if na == 0.0 || nb == 0.0 {
            return 0.0;
        }
        (dot / (na.sqrt() * nb.sqrt())).clamp(-1.0, 1.0)
    }

    pub fn tempo_bpm(&self) -> f64 {
        TEMPO_MIN + self.0[TEMPO] * TEMPO_SPAN
    }

    pub fn intensities(&self) -> EffectIntensities {
        EffectIntensities {
            gain: self.0[GAIN],
            eq_db: self.0[EQ] * EQ_SPAN_DB,
            compression_ratio: 1.0 + self.0[COMPRESSION] * RATIO_SPAN,
            reverb_mix: self.0[REVERB_MIX],
            reverb_decay_s: self.0[REVERB_DECAY] * DECAY_SPAN_S,
            stereo_width: self.0[STEREO_WIDTH] * WIDTH_SPAN,
        }
    }

    pub(crate) fn to_blob(self) -> Vec<u8> {
        self.0.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    pub(crate) fn from_blob(blob: &[u8]) -> Option<Self> {
        if blob.len() != VECTOR_DIM * 8 {
            return None;
        }
        let mut values = [0.0; VECTOR_DIM];
        for (slot, chunk) in values.iter_mut().zip(blob.chunks_exact(8)) {
            let bytes: [u8; 8] = chunk.try_into().ok()?;
            *slot = f64::from_le_bytes(bytes);
        }
        Some(Self(values))
    }
}

/// The settings of one finished generation, before normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParameters {
    pub genre: Genre,
    pub tempo_bpm: f64,
    pub mode: Mode,
    pub contour: Contour,
    pub note_density: f64,
    pub mean_velocity: f64,
    /// Indexed like `Role::ALL`; `None` for roles the arrangement lacks.
    pub role_volumes: [Option<f64>; 4],
    pub intensities: EffectIntensities,
}

impl GenerationParameters {
    pub fn from_generation(arrangement: &Arrangement, settings: &ProductionSettings) -> Self {
        let melody = &arrangement.melody;
        let mut role_volumes = [None; 4];
        for (slot, role) in role_volumes.iter_mut().zip(Role::ALL) {
            *slot = arrangement.track(role).map(|t| t.volume);
        }
        Self {
            genre: arrangement.genre,
            tempo_bpm: melody.tempo_bpm,
            mode: melody.key.mode,
            contour: melody.contour,
            note_density: melody.note_density(),
            mean_velocity: melody.average_velocity(),
            role_volumes,
            intensities: settings.intensities(),
        }
    }

    pub fn to_vector(&self) -> ParameterVector {
        let unit = |v: f64| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
        let last_contour = (Contour::ALL.len() - 1) as f64;
        let last_genre = (Genre::ALL.len() - 1) as f64;
        let fx = &self.intensities;

        let mut v = [0.0; VECTOR_DIM];
        v[TEMPO] = unit((self.tempo_bpm - TEMPO_MIN) / TEMPO_SPAN);
        v[MODE] = match self.mode {
            Mode::Major => 1.0,
            Mode::Minor => 0.0,
        };
        v[CONTOUR] = unit(self.contour.index() as f64 / last_contour);
        v[DENSITY] = unit(self.note_density / DENSITY_SPAN);
        v[VELOCITY] = unit(self.mean_velocity / 127.0);
        for (i, volume) in self.role_volumes.iter().enumerate() {
            v[ROLE_VOLUME + i] = unit(volume.unwrap_or(0.0));
        }
        v[GENRE] = unit(self.genre.index() as f64 / last_genre);
        v[GAIN] = unit(fx.gain);
        v[EQ] = unit(fx.eq_db / EQ_SPAN_DB);
        v[COMPRESSION] = unit((fx.compression_ratio - 1.0) / RATIO_SPAN);
        v[REVERB_MIX] = unit(fx.reverb_mix);
        v[REVERB_DECAY] = unit(fx.reverb_decay_s / DECAY_SPAN_S);
        v[STEREO_WIDTH] = unit(fx.stereo_width / WIDTH_SPAN);
        ParameterVector(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reverie_music::{DurationSpec, GenreRegistry, MelodyRequest, arrange, generate_melody};
    use reverie_prng::SeededRng;

    fn unit(i: usize) -> ParameterVector {
        let mut v = [0.0; VECTOR_DIM];
        v[i] = 1.0;
        ParameterVector(v)
    }

    #[test]
    fn test_cosine_basics() {
        assert!((unit(0).cosine(&unit(0)) - 1.0).abs() < 1e-12);
        assert_eq!(unit(0).cosine(&unit(1)), 0.0);
        assert_eq!(ParameterVector([0.0; VECTOR_DIM]).cosine(&unit(3)), 0.0);
        let mut neg = [0.0; VECTOR_DIM];
        neg[0] = -2.0;
        assert!((unit(0).cosine(&ParameterVector(neg)) + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_non_finite_out_of_range_and_wrong_length() {
        let mut v = [0.5; VECTOR_DIM];
        v[7] = f64::NAN;
        assert!(matches!(ParameterVector::new(v), Err(StoreError::InvalidVector(_))));
        v[7] = 1.0;
        assert!(ParameterVector::new(v).is_ok());
        for bad in [1.0 + 1e-9, -0.25, 5.0] {
            v[2] = bad;
            assert!(
                matches!(ParameterVector::new(v), Err(StoreError::InvalidVector(_))),
                "{bad} accepted"
            );
        }
        assert!(matches!(
            ParameterVector::from_slice(&[0.1, 0.2]),
            Err(StoreError::InvalidVector(_))
        ));
    }

    #[test]
    fn test_blob_is_lossless() {
        let mut rng = SeededRng::new(4);
        let mut v = [0.0; VECTOR_DIM];
        v.iter_mut().for_each(|x| *x = rng.next_f64());
        let vector = ParameterVector(v);
        assert_eq!(ParameterVector::from_blob(&vector.to_blob()), Some(vector));
        assert_eq!(ParameterVector::from_blob(&[0u8; 12]), None);
    }

    #[test]
    fn test_generation_vector_is_normalized_and_decodable() {
        let registry = GenreRegistry::builtin();
        for genre in Genre::ALL {
            let profile = registry.get(genre).unwrap();
            let melody = generate_melody(
                profile,
                &MelodyRequest::new(DurationSpec::Bars(4), 21),
                &mut SeededRng::new(21),
            )
            .unwrap();
            let arr = arrange(&melody, profile, &mut SeededRng::new(22)).unwrap();
            let settings = profile.production_settings();
            let params = GenerationParameters::from_generation(&arr, &settings);
            let v = params.to_vector();
            assert!(v.values().iter().all(|x| (0.0..=1.0).contains(x)), "{genre}: {v:?}");

            assert!((v.tempo_bpm() - melody.tempo_bpm).abs() < 1e-9);
            let fx = settings.intensities();
            let decoded = v.intensities();
            assert!((decoded.reverb_mix - fx.reverb_mix).abs() < 1e-9);
            assert!((decoded.compression_ratio - fx.compression_ratio).abs() < 1e-9);
            assert!((decoded.stereo_width - fx.stereo_width).abs() < 1e-9);

            let texture = arr.track(Role::Texture).map(|t| t.volume).unwrap_or(0.0);
            assert_eq!(v.values()[ROLE_VOLUME + 3], texture);
        }
    }
}
