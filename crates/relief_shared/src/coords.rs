use std::ops::{Add, AddAssign, Sub, SubAssign};

use glam::Vec2;
use serde::{Deserialize, Serialize};

/// Integer tile coordinate; tile `(x, y)` is centered on `(x, y) * chunk_size`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileCoord {
    pub x: i32,
    pub y: i32,
}

impl TileCoord {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Chebyshev ring index relative to `other`.
    pub fn ring_distance(self, other: TileCoord) -> i32 {
        (self.x - other.x).abs().max((self.y - other.y).abs())
    }
}

impl Add for TileCoord {
    type Output = TileCoord;

    fn add(self, rhs: Self) -> Self::Output {
        TileCoord {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
        }
    }
}

impl AddAssign for TileCoord {
    fn add_assign(&mut self, rhs: Self) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl Sub for TileCoord {
    type Output = TileCoord;

    fn sub(self, rhs: Self) -> Self::Output {
        TileCoord {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
        }
    }
}

impl SubAssign for TileCoord {
    fn sub_assign(&mut self, rhs: Self) {
        self.x -= rhs.x;
        self.y -= rhs.y;
    }
}

pub fn tile_center(coord: TileCoord, chunk_size: f32) -> Vec2 {
    Vec2::new(coord.x as f32 * chunk_size, coord.y as f32 * chunk_size)
}

/// Tile whose footprint contains `position` (ties round away from zero).
pub fn position_to_tile(position: Vec2, chunk_size: f32) -> TileCoord {
    TileCoord {
        x: (position.x / chunk_size).round() as i32,
        y: (position.y / chunk_size).round() as i32,
    }
}

/// Axis-aligned footprint of a tile in the streaming plane.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TileBounds {
    pub min: Vec2,
    pub max: Vec2,
}

impl TileBounds {
    pub fn from_center(center: Vec2, size: f32) -> Self {
        let half = Vec2::splat(size * 0.5);
        Self {
            min: center - half,
            max: center + half,
        }
    }

    pub fn for_tile(coord: TileCoord, chunk_size: f32) -> Self {
        Self::from_center(tile_center(coord, chunk_size), chunk_size)
    }

    pub fn center(&self) -> Vec2 {
        (self.min + self.max) * 0.5
    }

    pub fn contains(&self, point: Vec2) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// Euclidean distance from `point` to the nearest point of the box; zero inside.
    pub fn distance_to(&self, point: Vec2) -> f32 {
        self.sqr_distance_to(point).sqrt()
    }

    pub fn sqr_distance_to(&self, point: Vec2) -> f32 {
        let outside = (self.min - point).max(point - self.max).max(Vec2::ZERO);
        outside.length_squared()
    }
}
