use std::sync::Arc;

use glam::{Vec2, Vec3};
use relief_shared::coords::{TileBounds, TileCoord};
use relief_shared::grid::HeightGrid;
use relief_shared::mesh::MeshData;

/// Where a chunk is in its height-data lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkPhase {
    Empty,
    AwaitingHeightData,
    HasHeightData,
    HeightDataFailed,
}

#[derive(Debug, Clone)]
enum HeightState {
    Empty,
    Awaiting,
    Ready(Arc<HeightGrid>),
    Failed,
}

/// Memoized mesh slot for one LOD entry.
#[derive(Debug, Clone)]
pub enum LodMesh {
    Requested,
    Ready(Arc<MeshData>),
    Failed,
}

pub struct TerrainChunk {
    coord: TileCoord,
    bounds: TileBounds,
    height: HeightState,
    lod_meshes: Vec<Option<LodMesh>>,
    current_lod: Option<usize>,
    collision_mesh: Option<Arc<MeshData>>,
    visible: bool,
    last_visible_tick: u64,
    mesh_requests: u32,
}

impl TerrainChunk {
    pub fn new(coord: TileCoord, chunk_size: f32, lod_count: usize, tick: u64) -> Self {
        Self {
            coord,
            bounds: TileBounds::for_tile(coord, chunk_size),
            height: HeightState::Empty,
            lod_meshes: vec![None; lod_count],
            current_lod: None,
            collision_mesh: None,
            visible: false,
            last_visible_tick: tick,
            mesh_requests: 0,
        }
    }

    pub fn coord(&self) -> TileCoord {
        self.coord
    }

    pub fn bounds(&self) -> &TileBounds {
        &self.bounds
    }

    pub fn center(&self) -> Vec2 {
        self.bounds.center()
    }

    /// Placement of the chunk's mesh origin in world space.
    pub fn world_origin(&self, uniform_scale: f32) -> Vec3 {
        let center = self.center();
        Vec3::new(center.x, 0.0, center.y) * uniform_scale
    }

    pub fn phase(&self) -> ChunkPhase {
        match self.height {
            HeightState::Empty => ChunkPhase::Empty,
            HeightState::Awaiting => ChunkPhase::AwaitingHeightData,
            HeightState::Ready(_) => ChunkPhase::HasHeightData,
            HeightState::Failed => ChunkPhase::HeightDataFailed,
        }
    }

    pub fn height_data(&self) -> Option<&Arc<HeightGrid>> {
        match &self.height {
            HeightState::Ready(heights) => Some(heights),
            _ => None,
        }
    }

    pub fn lod_mesh(&self, lod_index: usize) -> Option<&LodMesh> {
        self.lod_meshes.get(lod_index).and_then(Option::as_ref)
    }

    pub fn mesh(&self, lod_index: usize) -> Option<&Arc<MeshData>> {
        match self.lod_mesh(lod_index) {
            Some(LodMesh::Ready(mesh)) => Some(mesh),
            _ => None,
        }
    }

    /// Mesh currently on display, if any LOD has been shown yet.
    pub fn displayed_mesh(&self) -> Option<&Arc<MeshData>> {
        self.current_lod.and_then(|lod_index| self.mesh(lod_index))
    }

    pub fn current_lod(&self) -> Option<usize> {
        self.current_lod
    }

    pub fn collision_mesh(&self) -> Option<&Arc<MeshData>> {
        self.collision_mesh.as_ref()
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn last_visible_tick(&self) -> u64 {
        self.last_visible_tick
    }

    /// Mesh builds issued for this chunk over its lifetime, across all LODs.
    pub fn mesh_requests(&self) -> u32 {
        self.mesh_requests
    }

    pub(crate) fn mark_height_requested(&mut self) {
        self.height = HeightState::Awaiting;
    }

    /// Returns false when data had already arrived; the first delivery wins.
    pub(crate) fn store_height_data(&mut self, heights: Arc<HeightGrid>) -> bool {
        if matches!(self.height, HeightState::Ready(_)) {
            return false;
        }
        self.height = HeightState::Ready(heights);
        true
    }

    pub(crate) fn mark_height_failed(&mut self) {
        if !matches!(self.height, HeightState::Ready(_)) {
            self.height = HeightState::Failed;
        }
    }

    pub(crate) fn mark_mesh_requested(&mut self, lod_index: usize) {
        self.lod_meshes[lod_index] = Some(LodMesh::Requested);
        self.mesh_requests += 1;
    }

    pub(crate) fn store_mesh(&mut self, lod_index: usize, mesh: Option<Arc<MeshData>>) {
        self.lod_meshes[lod_index] = Some(match mesh {
            Some(mesh) => LodMesh::Ready(mesh),
            None => LodMesh::Failed,
        });
    }

    pub(crate) fn show_lod(&mut self, lod_index: usize) {
        self.current_lod = Some(lod_index);
    }

    pub(crate) fn set_collision_mesh(&mut self, mesh: Arc<MeshData>) {
        self.collision_mesh = Some(mesh);
    }

    /// Returns true when the flag actually changed.
    pub(crate) fn set_visible(&mut self, visible: bool, tick: u64) -> bool {
        if visible {
            self.last_visible_tick = tick;
        }
        if self.visible == visible {
            return false;
        }
        self.visible = visible;
        true
    }
}
