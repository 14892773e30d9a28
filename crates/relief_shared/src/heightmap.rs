use std::sync::Arc;

use glam::Vec2;

use crate::config::TerrainConfig;
use crate::falloff::{apply_falloff, generate_falloff_map};
use crate::grid::HeightGrid;
use crate::noise_field::{generate_noise_map, NoiseSettings};

/// Produces bordered height grids for tiles. Cheap to clone into worker jobs; the
/// falloff mask is computed once and shared.
#[derive(Debug, Clone)]
pub struct HeightMapGenerator {
    noise: NoiseSettings,
    bordered_size: usize,
    falloff: Option<Arc<HeightGrid>>,
}

impl HeightMapGenerator {
    pub fn from_config(config: &TerrainConfig) -> Self {
        let bordered_size = config.bordered_size();
        let falloff = config
            .terrain
            .use_falloff
            .then(|| Arc::new(generate_falloff_map(bordered_size)));
        Self {
            noise: config.noise.clone(),
            bordered_size,
            falloff,
        }
    }

    pub fn bordered_size(&self) -> usize {
        self.bordered_size
    }

    /// Height grid for the tile centered on `center` (mesh units, streaming plane).
    pub fn generate(&self, center: Vec2) -> HeightGrid {
        let mut heights =
            generate_noise_map(self.bordered_size, self.bordered_size, &self.noise, center);
        if let Some(falloff) = self.falloff.as_deref() {
            apply_falloff(&mut heights, falloff);
        }
        heights
    }
}
