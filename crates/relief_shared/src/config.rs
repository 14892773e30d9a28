use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::curve::HeightCurve;
use crate::lod::{LodLevel, LodTable};
use crate::noise_field::NoiseSettings;

const MIN_CHUNK_RESOLUTION: usize = 3;
const MAX_CHUNK_RESOLUTION: usize = 1025;

#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read { path, source } => {
                write!(f, "failed to read terrain config {}: {source}", path.display())
            }
            Self::Parse { path, source } => {
                write!(f, "failed to parse terrain config {}: {source}", path.display())
            }
            Self::Invalid(reason) => write!(f, "invalid terrain config: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Read { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
            Self::Invalid(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerrainSettings {
    /// World units per mesh unit; applied to meshes and divides observer positions.
    #[serde(default = "default_uniform_scale")]
    pub uniform_scale: f32,
    #[serde(default = "default_height_multiplier")]
    pub height_multiplier: f32,
    #[serde(default)]
    pub height_curve: HeightCurve,
    #[serde(default)]
    pub flat_shading: bool,
    #[serde(default)]
    pub use_falloff: bool,
}

impl Default for TerrainSettings {
    fn default() -> Self {
        Self {
            uniform_scale: default_uniform_scale(),
            height_multiplier: default_height_multiplier(),
            height_curve: HeightCurve::default(),
            flat_shading: false,
            use_falloff: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSettings {
    /// Observer travel (world units) before visibility is recomputed.
    #[serde(default = "default_move_threshold")]
    pub move_threshold: f32,
    /// Hidden chunks beyond this count are evicted oldest-first; 0 disables eviction.
    #[serde(default = "default_max_cached_chunks")]
    pub max_cached_chunks: usize,
    #[serde(default)]
    pub worker_threads: Option<usize>,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            move_threshold: default_move_threshold(),
            max_cached_chunks: default_max_cached_chunks(),
            worker_threads: None,
        }
    }
}

/// Color band used by preview textures: heights up to `height` take `color`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerrainRegion {
    pub name: String,
    pub height: f32,
    pub color: [u8; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerrainConfig {
    #[serde(default)]
    pub noise: NoiseSettings,
    #[serde(default)]
    pub terrain: TerrainSettings,
    #[serde(default = "default_lods")]
    pub lods: Vec<LodLevel>,
    /// Usable samples per tile side; odd, so `chunk_resolution - 1` is the tile span.
    #[serde(default = "default_chunk_resolution")]
    pub chunk_resolution: usize,
    #[serde(default)]
    pub stream: StreamSettings,
    #[serde(default = "default_regions")]
    pub regions: Vec<TerrainRegion>,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            noise: NoiseSettings::default(),
            terrain: TerrainSettings::default(),
            lods: default_lods(),
            chunk_resolution: default_chunk_resolution(),
            stream: StreamSettings::default(),
            regions: default_regions(),
        }
    }
}

impl TerrainConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let parsed = toml::from_str::<Self>(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let config = parsed.sanitize();
        config.lod_table()?;
        Ok(config)
    }

    /// Clamps tunables into usable ranges. Structural problems are left for
    /// [`TerrainConfig::lod_table`] to report.
    pub fn sanitize(mut self) -> Self {
        self.noise = self.noise.sanitize();
        self.terrain.uniform_scale = sanitize_positive(self.terrain.uniform_scale, 1.0);
        if !self.terrain.height_multiplier.is_finite() {
            self.terrain.height_multiplier = default_height_multiplier();
        }
        self.stream.move_threshold =
            sanitize_positive(self.stream.move_threshold, default_move_threshold());
        self.stream.worker_threads = self.stream.worker_threads.map(|count| count.max(1));
        self.regions
            .sort_by(|a, b| a.height.total_cmp(&b.height));
        self
    }

    /// Builds the validated LOD table, checking it against the tile span.
    pub fn lod_table(&self) -> Result<LodTable, ConfigError> {
        let resolution = self.chunk_resolution;
        if resolution % 2 == 0
            || !(MIN_CHUNK_RESOLUTION..=MAX_CHUNK_RESOLUTION).contains(&resolution)
        {
            return Err(ConfigError::Invalid(format!(
                "chunk_resolution {resolution} must be odd and within {MIN_CHUNK_RESOLUTION}..={MAX_CHUNK_RESOLUTION}"
            )));
        }

        let table = LodTable::new(self.lods.clone()).map_err(ConfigError::Invalid)?;
        table
            .fits_tile_span(self.tile_span())
            .map_err(ConfigError::Invalid)?;
        Ok(table)
    }

    /// Samples between opposite tile edges, in mesh units.
    pub fn tile_span(&self) -> usize {
        self.chunk_resolution - 1
    }

    pub fn chunk_size(&self) -> f32 {
        self.tile_span() as f32
    }

    /// Side of the height grid including its border ring.
    pub fn bordered_size(&self) -> usize {
        self.chunk_resolution + 2
    }
}

fn sanitize_positive(value: f32, fallback: f32) -> f32 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        fallback
    }
}

fn default_uniform_scale() -> f32 {
    2.5
}

fn default_height_multiplier() -> f32 {
    30.0
}

fn default_move_threshold() -> f32 {
    25.0
}

fn default_max_cached_chunks() -> usize {
    1024
}

fn default_chunk_resolution() -> usize {
    241
}

fn default_lods() -> Vec<LodLevel> {
    vec![
        LodLevel {
            level: 0,
            visible_distance: 200.0,
            use_for_collider: true,
        },
        LodLevel {
            level: 1,
            visible_distance: 400.0,
            use_for_collider: false,
        },
        LodLevel {
            level: 4,
            visible_distance: 600.0,
            use_for_collider: false,
        },
    ]
}

fn default_regions() -> Vec<TerrainRegion> {
    [
        ("deep water", 0.3, [30, 60, 150]),
        ("shallow water", 0.4, [54, 103, 199]),
        ("sand", 0.45, [210, 208, 125]),
        ("grass", 0.55, [86, 152, 23]),
        ("forest", 0.6, [62, 107, 18]),
        ("rock", 0.7, [90, 69, 60]),
        ("high rock", 0.9, [75, 60, 53]),
        ("snow", 1.0, [255, 255, 255]),
    ]
    .into_iter()
    .map(|(name, height, color)| TerrainRegion {
        name: name.to_string(),
        height,
        color,
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{ConfigError, TerrainConfig};
    use crate::noise_field::NormalizeMode;

    #[test]
    fn default_config_is_valid() {
        let config = TerrainConfig::default();
        let table = config.lod_table().expect("default LODs fit default resolution");
        assert_eq!(table.view_distance(), 600.0);
        assert_eq!(config.chunk_size(), 240.0);
        assert_eq!(config.bordered_size(), 243);
    }

    #[test]
    fn partial_toml_fills_in_defaults_and_sanitizes() {
        let parsed: TerrainConfig = toml::from_str(
            r#"
chunk_resolution = 97

[noise]
seed = 42
octaves = 0
lacunarity = 0.2
normalize_mode = "local"

[terrain]
flat_shading = true
height_curve = [{ time = 0.0, value = 0.0 }, { time = 0.3, value = 0.0 }, { time = 1.0, value = 1.0 }]

[[lods]]
level = 0
visible_distance = 100.0
use_for_collider = true

[[lods]]
level = 2
visible_distance = 250.0

[stream]
move_threshold = -3.0
worker_threads = 0
"#,
        )
        .expect("parse config");
        let config = parsed.sanitize();

        assert_eq!(config.noise.seed, 42);
        assert_eq!(config.noise.octaves, 1);
        assert_eq!(config.noise.lacunarity, 1.0);
        assert_eq!(config.noise.normalize_mode, NormalizeMode::Local);
        assert!(config.terrain.flat_shading);
        assert_eq!(config.terrain.height_curve.keys().len(), 3);
        assert_eq!(config.stream.move_threshold, 25.0);
        assert_eq!(config.stream.worker_threads, Some(1));
        assert_eq!(config.stream.max_cached_chunks, 1024);

        let table = config.lod_table().expect("valid table");
        assert_eq!(table.len(), 2);
        assert_eq!(table.collider_index(), 0);
    }

    #[test]
    fn resolution_that_lods_cannot_divide_is_rejected() {
        let mut config = TerrainConfig::default();
        config.chunk_resolution = 243;
        let err = config.lod_table().expect_err("242 is not divisible by 8");
        assert!(err.to_string().contains("does not evenly divide"));

        config.chunk_resolution = 240;
        assert!(matches!(config.lod_table(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn missing_file_reports_the_path() {
        let err = TerrainConfig::load(Path::new("definitely/not/here.toml"))
            .expect_err("missing file must fail");
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().contains("definitely/not/here.toml"));
    }
}
