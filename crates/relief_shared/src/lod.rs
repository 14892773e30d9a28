use serde::{Deserialize, Serialize};

use crate::mesh::mesh_simplification_increment;

pub const MAX_LOD: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LodLevel {
    pub level: u32,
    pub visible_distance: f32,
    #[serde(default)]
    pub use_for_collider: bool,
}

/// Distance-ordered LOD steps. The last step's distance is the view distance.
#[derive(Debug, Clone, PartialEq)]
pub struct LodTable {
    levels: Vec<LodLevel>,
    collider_index: usize,
}

impl LodTable {
    /// Validates `levels`: non-empty, `level <= MAX_LOD`, strictly increasing
    /// positive distances. The collider LOD is the first flagged entry, or the first
    /// entry when none is flagged.
    pub fn new(levels: Vec<LodLevel>) -> Result<Self, String> {
        if levels.is_empty() {
            return Err("LOD table must contain at least one level".to_string());
        }

        let mut previous = 0.0;
        for (index, level) in levels.iter().enumerate() {
            if level.level > MAX_LOD {
                return Err(format!(
                    "LOD entry {index} uses level {}; maximum is {MAX_LOD}",
                    level.level
                ));
            }
            if !level.visible_distance.is_finite() || level.visible_distance <= previous {
                return Err(format!(
                    "LOD entry {index} distance {} must be finite and greater than {previous}",
                    level.visible_distance
                ));
            }
            previous = level.visible_distance;
        }

        let collider_index = levels
            .iter()
            .position(|level| level.use_for_collider)
            .unwrap_or(0);
        Ok(Self {
            levels,
            collider_index,
        })
    }

    pub fn levels(&self) -> &[LodLevel] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&LodLevel> {
        self.levels.get(index)
    }

    pub fn view_distance(&self) -> f32 {
        self.levels
            .last()
            .map(|level| level.visible_distance)
            .unwrap_or(0.0)
    }

    /// Inclusive: a tile exactly at the view distance is still drawn.
    pub fn is_visible(&self, distance: f32) -> bool {
        distance <= self.view_distance()
    }

    /// Index of the entry to draw at `distance`: the first entry whose threshold the
    /// distance does not exceed, never past the last entry.
    pub fn select(&self, distance: f32) -> usize {
        let mut index = 0;
        for (i, level) in self.levels.iter().enumerate().take(self.levels.len() - 1) {
            if distance > level.visible_distance {
                index = i + 1;
            } else {
                break;
            }
        }
        index
    }

    pub fn collider_index(&self) -> usize {
        self.collider_index
    }

    /// True when every step's increment divides `span`, the usable tile width minus one.
    pub fn fits_tile_span(&self, span: usize) -> Result<(), String> {
        for level in &self.levels {
            let increment = mesh_simplification_increment(level.level);
            if span % increment != 0 {
                return Err(format!(
                    "LOD level {} (increment {increment}) does not evenly divide tile span {span}",
                    level.level
                ));
            }
        }
        Ok(())
    }
}
