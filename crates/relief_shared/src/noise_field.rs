//! Seeded fractal (fBm) noise over a rectangular grid.

use glam::Vec2;
use noise::{NoiseFn, Perlin};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

const MIN_SCALE: f64 = 0.0001;
const OCTAVE_OFFSET_RANGE: i32 = 100_000;
const PERLIN_TABLE_SEED: u32 = 0;
// Summed octaves rarely approach the theoretical peak, so leave some headroom.
const GLOBAL_HEADROOM: f64 = 0.9;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizeMode {
    /// Rescale by this grid's own min/max. Only meaningful for a single, standalone grid.
    Local,
    /// Rescale by the maximum possible amplitude so independently generated tiles match.
    #[default]
    Global,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoiseSettings {
    #[serde(default)]
    pub seed: u64,
    #[serde(default = "default_scale")]
    pub scale: f32,
    #[serde(default = "default_octaves")]
    pub octaves: u32,
    #[serde(default = "default_persistence")]
    pub persistence: f32,
    #[serde(default = "default_lacunarity")]
    pub lacunarity: f32,
    #[serde(default)]
    pub offset: Vec2,
    #[serde(default)]
    pub normalize_mode: NormalizeMode,
}

impl Default for NoiseSettings {
    fn default() -> Self {
        Self {
            seed: 0,
            scale: default_scale(),
            octaves: default_octaves(),
            persistence: default_persistence(),
            lacunarity: default_lacunarity(),
            offset: Vec2::ZERO,
            normalize_mode: NormalizeMode::default(),
        }
    }
}

impl NoiseSettings {
    /// Clamps parameters into the ranges [`generate_noise_map`] expects.
    pub fn sanitize(mut self) -> Self {
        self.scale = self.scale.max(0.01);
        self.octaves = self.octaves.max(1);
        self.lacunarity = self.lacunarity.max(1.0);
        self.persistence = self.persistence.clamp(0.0, 1.0);
        self
    }
}

fn default_scale() -> f32 {
    50.0
}

fn default_octaves() -> u32 {
    6
}

fn default_persistence() -> f32 {
    0.6
}

fn default_lacunarity() -> f32 {
    2.0
}

/// Generates a `width x height` noise grid sampled around `sample_center`.
///
/// The only randomness is the per-octave offset drawn from a PRNG seeded with
/// `settings.seed`; the same arguments always produce bit-identical output.
///
/// `octaves >= 1` and `lacunarity >= 1` are preconditions (see
/// [`NoiseSettings::sanitize`]). A non-positive scale is coerced to a tiny epsilon.
pub fn generate_noise_map(
    width: usize,
    height: usize,
    settings: &NoiseSettings,
    sample_center: Vec2,
) -> crate::grid::HeightGrid {
    let perlin = Perlin::new(PERLIN_TABLE_SEED);
    let mut rng = ChaCha8Rng::seed_from_u64(settings.seed);

    let scale = if settings.scale <= 0.0 {
        MIN_SCALE
    } else {
        f64::from(settings.scale)
    };
    let persistence = f64::from(settings.persistence);
    let lacunarity = f64::from(settings.lacunarity);
    let offset = settings.offset + sample_center;

    let mut max_possible_height = 0.0;
    let mut amplitude = 1.0;
    let octave_offsets: Vec<[f64; 2]> = (0..settings.octaves)
        .map(|_| {
            let offset_x = f64::from(rng.random_range(-OCTAVE_OFFSET_RANGE..OCTAVE_OFFSET_RANGE))
                + f64::from(offset.x);
            let offset_y = f64::from(rng.random_range(-OCTAVE_OFFSET_RANGE..OCTAVE_OFFSET_RANGE))
                - f64::from(offset.y);
            max_possible_height += amplitude;
            amplitude *= persistence;
            [offset_x, offset_y]
        })
        .collect();

    let half_width = width as f64 / 2.0;
    let half_height = height as f64 / 2.0;
    let mut raw = Vec::with_capacity(width * height);
    let mut min_height = f64::MAX;
    let mut max_height = f64::MIN;

    for y in 0..height {
        for x in 0..width {
            let mut amplitude = 1.0;
            let mut frequency = 1.0;
            let mut noise_height = 0.0;

            for octave_offset in &octave_offsets {
                let sample_x = (x as f64 - half_width + octave_offset[0]) / scale * frequency;
                let sample_y = (y as f64 - half_height + octave_offset[1]) / scale * frequency;
                noise_height += perlin.get([sample_x, sample_y]) * amplitude;

                amplitude *= persistence;
                frequency *= lacunarity;
            }

            min_height = min_height.min(noise_height);
            max_height = max_height.max(noise_height);
            raw.push(noise_height);
        }
    }

    let mut grid = crate::grid::HeightGrid::new(width, height);
    let span = max_height - min_height;
    for (cell, &value) in grid.values_mut().iter_mut().zip(&raw) {
        let normalized = match settings.normalize_mode {
            NormalizeMode::Local => {
                if span > 0.0 {
                    (value - min_height) / span
                } else {
                    0.0
                }
            }
            NormalizeMode::Global => {
                let estimate = (value + 1.0) / (max_possible_height / GLOBAL_HEADROOM);
                estimate.max(0.0)
            }
        };
        *cell = normalized as f32;
    }

    grid
}

#[cfg(test)]
mod tests {
    use glam::Vec2;

    use super::{generate_noise_map, NoiseSettings, NormalizeMode};

    fn settings(mode: NormalizeMode) -> NoiseSettings {
        NoiseSettings {
            seed: 1337,
            scale: 25.0,
            octaves: 4,
            persistence: 0.5,
            lacunarity: 2.0,
            offset: Vec2::new(3.0, -7.0),
            normalize_mode: mode,
        }
    }

    #[test]
    fn same_inputs_produce_bit_identical_grids() {
        let params = settings(NormalizeMode::Global);
        let first = generate_noise_map(33, 21, &params, Vec2::new(40.0, 80.0));
        let second = generate_noise_map(33, 21, &params, Vec2::new(40.0, 80.0));

        let first_bits: Vec<u32> = first.values().iter().map(|v| v.to_bits()).collect();
        let second_bits: Vec<u32> = second.values().iter().map(|v| v.to_bits()).collect();
        assert_eq!(first_bits, second_bits);
    }

    #[test]
    fn different_seeds_produce_different_terrain() {
        let a = settings(NormalizeMode::Global);
        let b = NoiseSettings { seed: 7, ..a.clone() };
        let grid_a = generate_noise_map(16, 16, &a, Vec2::ZERO);
        let grid_b = generate_noise_map(16, 16, &b, Vec2::ZERO);
        assert_ne!(grid_a, grid_b);
    }

    #[test]
    fn local_normalization_spans_exactly_zero_to_one() {
        let grid = generate_noise_map(48, 48, &settings(NormalizeMode::Local), Vec2::ZERO);
        let (min, max) = grid.min_max().expect("non-empty grid");
        assert!(min.abs() <= 1e-6, "min was {min}");
        assert!((max - 1.0).abs() <= 1e-6, "max was {max}");
    }

    #[test]
    fn global_normalization_is_clamped_at_zero_only() {
        let grid = generate_noise_map(48, 48, &settings(NormalizeMode::Global), Vec2::ZERO);
        assert!(grid.values().iter().all(|&value| value >= 0.0));
        assert!(grid.is_finite());
    }

    #[test]
    fn zero_or_negative_scale_still_returns_a_finite_grid() {
        for scale in [0.0, -4.0] {
            let params = NoiseSettings {
                scale,
                ..settings(NormalizeMode::Local)
            };
            let grid = generate_noise_map(12, 12, &params, Vec2::ZERO);
            assert_eq!(grid.values().len(), 144);
            assert!(grid.is_finite());
        }
    }

    #[test]
    fn globally_normalized_neighbours_sample_a_continuous_field() {
        // Two 11-wide grids whose centers are 8 cells apart overlap in 3 columns.
        let params = settings(NormalizeMode::Global);
        let left = generate_noise_map(11, 11, &params, Vec2::new(0.0, 0.0));
        let right = generate_noise_map(11, 11, &params, Vec2::new(8.0, 0.0));

        for y in 0..11 {
            for overlap in 0..3 {
                let a = left.get(8 + overlap, y);
                let b = right.get(overlap, y);
                assert!((a - b).abs() < 1e-5, "mismatch at column {overlap}, row {y}: {a} vs {b}");
            }
        }
    }

    #[test]
    fn sanitize_clamps_caller_side_preconditions() {
        let params = NoiseSettings {
            scale: -1.0,
            octaves: 0,
            persistence: 1.5,
            lacunarity: 0.5,
            ..NoiseSettings::default()
        }
        .sanitize();
        assert_eq!(params.octaves, 1);
        assert_eq!(params.lacunarity, 1.0);
        assert_eq!(params.persistence, 1.0);
        assert!(params.scale > 0.0);
    }
}
