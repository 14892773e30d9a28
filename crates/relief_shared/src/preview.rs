use glam::Vec2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{ConfigError, TerrainConfig};
use crate::falloff::generate_falloff_map;
use crate::grid::HeightGrid;
use crate::heightmap::HeightMapGenerator;
use crate::lod::{LodLevel, LodTable};
use crate::mesh::{build_terrain_mesh, MeshData};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawMode {
    #[default]
    NoiseMap,
    FalloffMap,
    Mesh,
}

pub struct PreviewTile {
    /// Bordered grid the tile was built from.
    pub heights: HeightGrid,
    pub mesh: Option<MeshData>,
}

/// Regenerates a single tile on the calling thread, outside any streaming.
pub fn regenerate_preview(
    config: &TerrainConfig,
    mode: DrawMode,
    lod: u32,
    center: Vec2,
) -> Result<PreviewTile, ConfigError> {
    let table = config.lod_table()?;
    if !table.levels().iter().any(|level| level.level == lod) {
        // Any LOD whose increment divides the span is still drawable in a preview.
        let single = LodTable::new(vec![LodLevel {
            level: lod,
            visible_distance: 1.0,
            use_for_collider: false,
        }])
        .map_err(ConfigError::Invalid)?;
        single
            .fits_tile_span(config.tile_span())
            .map_err(ConfigError::Invalid)?;
    }

    let tile = match mode {
        DrawMode::FalloffMap => PreviewTile {
            heights: generate_falloff_map(config.bordered_size()),
            mesh: None,
        },
        DrawMode::NoiseMap => PreviewTile {
            heights: HeightMapGenerator::from_config(config).generate(center),
            mesh: None,
        },
        DrawMode::Mesh => {
            let heights = HeightMapGenerator::from_config(config).generate(center);
            let terrain = &config.terrain;
            let mesh = build_terrain_mesh(
                &heights,
                terrain.height_multiplier,
                &terrain.height_curve,
                lod,
                terrain.flat_shading,
            );
            PreviewTile {
                heights,
                mesh: Some(mesh),
            }
        }
    };

    debug!(
        "Regenerated {:?} preview at {} (lod {}, {} vertices)",
        mode,
        center,
        lod,
        tile.mesh.as_ref().map_or(0, MeshData::vertex_count)
    );
    Ok(tile)
}
