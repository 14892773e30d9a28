use std::sync::Arc;

use glam::Vec2;
use relief_shared::config::TerrainSettings;
use relief_shared::curve::HeightCurve;
use relief_shared::grid::HeightGrid;
use relief_shared::heightmap::HeightMapGenerator;
use relief_shared::mesh::{build_terrain_mesh, MeshData};

/// Everything a worker needs to produce one tile's height grid.
pub struct HeightRequest {
    pub center: Vec2,
    pub generator: HeightMapGenerator,
}

impl HeightRequest {
    pub fn run(self) -> Arc<HeightGrid> {
        Arc::new(self.generator.generate(self.center))
    }
}

/// Mesh build for one tile and LOD. Terrain settings are copied at dispatch so
/// later edits cannot race the worker.
pub struct MeshRequest {
    pub lod: u32,
    pub heights: Arc<HeightGrid>,
    pub height_multiplier: f32,
    pub curve: HeightCurve,
    pub flat_shading: bool,
}

impl MeshRequest {
    pub fn snapshot(
        lod: u32,
        heights: Arc<HeightGrid>,
        terrain: &TerrainSettings,
    ) -> Self {
        Self {
            lod,
            heights,
            height_multiplier: terrain.height_multiplier,
            curve: terrain.height_curve.clone(),
            flat_shading: terrain.flat_shading,
        }
    }

    pub fn run(self) -> Arc<MeshData> {
        Arc::new(build_terrain_mesh(
            &self.heights,
            self.height_multiplier,
            &self.curve,
            self.lod,
            self.flat_shading,
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use glam::Vec2;
    use relief_shared::config::TerrainConfig;
    use relief_shared::curve::{CurveKey, HeightCurve};
    use relief_shared::heightmap::HeightMapGenerator;

    use super::{HeightRequest, MeshRequest};

    fn small_config() -> TerrainConfig {
        let mut config = TerrainConfig::default();
        config.chunk_resolution = 17;
        config
    }

    #[test]
    fn height_request_produces_bordered_grid() {
        let config = small_config();
        let request = HeightRequest {
            center: Vec2::new(16.0, 0.0),
            generator: HeightMapGenerator::from_config(&config),
        };
        let heights = request.run();
        assert_eq!(heights.width(), 19);
        assert_eq!(heights.height(), 19);
        assert!(heights.is_finite());
    }

    #[test]
    fn mesh_request_keeps_curve_snapshot() {
        let mut config = small_config();
        let heights = Arc::new(relief_shared::grid::HeightGrid::filled(19, 19, 0.5));
        let request = MeshRequest::snapshot(0, heights, &config.terrain);

        config.terrain.height_curve = HeightCurve::new(vec![CurveKey { time: 0.0, value: 0.0 }]);
        config.terrain.height_multiplier = 1000.0;

        let mesh = request.run();
        let expected = 0.5 * 30.0;
        assert!(mesh
            .positions
            .iter()
            .all(|position| (position.y - expected).abs() < 1e-4));
        assert_eq!(mesh.lod, 0);
    }
}
