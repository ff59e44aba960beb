// History-biased parameter sampling.
//
// Takes the highest-rated past records of a genre, computes a weighted
// centroid of their parameter vectors, and samples tempo and effect
// intensities near it with seeded gaussian jitter. Weights rise linearly
// with rating from 0.5 (lowest of the set) to 1.5 (highest); a record that
// carried quality warnings counts half.

use crate::config::BiasConfig;
use reverie_music::{EffectIntensities, ProductionSettings};
use reverie_prng::SeededRng;
use reverie_store::{EmbeddingRecord, ParameterVector, VECTOR_DIM};

const WARNING_DISCOUNT: f64 = 0.5;
const MIN_TEMPO: f64 = 20.0;
const MAX_TEMPO: f64 = 300.0;

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterBias {
    centroid: ParameterVector,
    support: usize,
}

/// Parameters drawn from a bias for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct BiasedChoice {
    pub tempo_bpm: f64,
    pub settings: ProductionSettings,
}

impl ParameterBias {
    /// `None` if no record has a rating.
    pub fn from_records(records: &[EmbeddingRecord]) -> Option<Self> {
        let rated: Vec<(&EmbeddingRecord, f64)> = records
            .iter()
            .filter_map(|r| r.rating.map(|rating| (r, rating)))
            .collect();
        if rated.is_empty() {
            return None;
        }
        let low = rated.iter().map(|(_, r)| *r).fold(f64::INFINITY, f64::min);
        let high = rated.iter().map(|(_, r)| *r).fold(f64::NEG_INFINITY, f64::max);
        let spread = high - low;

        let mut sum = [0.0; VECTOR_DIM];
        let mut total = 0.0;
        for (record, rating) in &rated {
            let mut weight = if spread > 0.0 {
                0.5 + (rating - low) / spread
            } else {
                1.0
            };
            if record.has_warnings() {
                weight *= WARNING_DISCOUNT;
            }
            for (acc, v) in sum.iter_mut().zip(record.vector.values()) {
                *acc += weight * v;
            }
            total += weight;
        }
        sum.iter_mut().for_each(|v| *v /= total);
        Some(Self {
            centroid: ParameterVector(sum),
            support: rated.len(),
        })
    }

    pub fn centroid(&self) -> &ParameterVector {
        &self.centroid
    }

    /// Number of rated records behind the centroid.
    pub fn support(&self) -> usize {
        self.support
    }

    /// Sample tempo and effect intensities near the centroid. Stage order
    /// and the limiter of `base` are kept.
    pub fn sample(
        &self,
        base: &ProductionSettings,
        spread: &BiasConfig,
        rng: &mut SeededRng,
    ) -> BiasedChoice {
        let center = self.centroid.intensities();
        let tempo_bpm = (self.centroid.tempo_bpm() + rng.gaussian() * spread.tempo_bpm)
            .clamp(MIN_TEMPO, MAX_TEMPO);
        let target = EffectIntensities {
            reverb_mix: center.reverb_mix + rng.gaussian() * spread.reverb_mix,
            compression_ratio: center.compression_ratio
                + rng.gaussian() * spread.compression_ratio,
            stereo_width: center.stereo_width + rng.gaussian() * spread.stereo_width,
            ..center
        };
        BiasedChoice {
            tempo_bpm,
            settings: base.with_intensities(&target),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use reverie_music::{Genre, GenreRegistry};
    use reverie_store::RecordMetadata;
    use reverie_store::vector::{COMPRESSION, REVERB_MIX, STEREO_WIDTH, TEMPO};

    fn record(id: i64, rating: Option<f64>, tempo: f64, mix: f64, warned: bool) -> EmbeddingRecord {
        let mut v = [0.5; VECTOR_DIM];
        v[TEMPO] = tempo;
        v[REVERB_MIX] = mix;
        v[COMPRESSION] = 0.25;
        v[STEREO_WIDTH] = 0.6;
        EmbeddingRecord {
            id,
            genre: Genre::Ambient,
            vector: ParameterVector(v),
            metadata: RecordMetadata {
                warnings: if warned {
                    vec!["clipping".into()]
                } else {
                    Vec::new()
                },
                ..RecordMetadata::default()
            },
            rating,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_no_rated_records_no_bias() {
        assert!(ParameterBias::from_records(&[]).is_none());
        assert!(ParameterBias::from_records(&[record(1, None, 0.2, 0.3, false)]).is_none());
    }

    #[test]
    fn test_centroid_leans_toward_higher_rating() {
        let records = [
            record(1, Some(1.0), 0.0, 0.0, false),
            record(2, Some(5.0), 1.0, 1.0, false),
        ];
        let bias = ParameterBias::from_records(&records).unwrap();
        // weights 0.5 and 1.5
        assert!((bias.centroid().values()[TEMPO] - 0.75).abs() < 1e-12);
        assert_eq!(bias.support(), 2);
    }

    #[test]
    fn test_warned_records_count_half() {
        let records = [
            record(1, Some(3.0), 0.0, 0.0, false),
            record(2, Some(3.0), 1.0, 1.0, true),
        ];
        let bias = ParameterBias::from_records(&records).unwrap();
        assert!((bias.centroid().values()[REVERB_MIX] - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_sample_stays_near_centroid_and_valid() {
        let records = [record(1, Some(1.0), 0.15, 0.4, false)];
        let bias = ParameterBias::from_records(&records).unwrap();
        let base = GenreRegistry::builtin()
            .get(Genre::Ambient)
            .unwrap()
            .production_settings();
        let spread = BiasConfig::default();
        let mut rng = SeededRng::new(31);
        for _ in 0..1000 {
            let choice = bias.sample(&base, &spread, &mut rng);
            choice.settings.validate().unwrap();
            assert!((choice.tempo_bpm - 64.0).abs() < 8.0 * spread.tempo_bpm);
            let fx = choice.settings.intensities();
            assert!((fx.reverb_mix - 0.4).abs() < 8.0 * spread.reverb_mix);
            assert_eq!(choice.settings.limiter_ceiling(), base.limiter_ceiling());
        }
    }
}
