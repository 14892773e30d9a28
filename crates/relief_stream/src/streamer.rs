//! Observer-driven chunk streaming.
//!
//! The streamer owns every chunk and is the only thing that mutates them. Height
//! and mesh builds run on the worker pool; their results come back through the
//! pipeline and are applied when [`ChunkStreamer::drain_completed`] runs, normally
//! once per [`ChunkStreamer::update`].

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use glam::{Vec2, Vec3};
use relief_core::events::EventSender;
use relief_core::jobs::JobSystem;
use relief_core::pipeline::{DataPipeline, JobError};
use relief_shared::config::{ConfigError, TerrainConfig};
use relief_shared::coords::{position_to_tile, tile_center, TileCoord};
use relief_shared::grid::HeightGrid;
use relief_shared::heightmap::HeightMapGenerator;
use relief_shared::lod::LodTable;
use relief_shared::mesh::MeshData;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info, warn};

use crate::chunk::{LodMesh, TerrainChunk};
use crate::workers::{HeightRequest, MeshRequest};

pub type TerrainPipeline = DataPipeline<ChunkStreamer, Arc<HeightGrid>, Arc<MeshData>>;

/// Changes a render target has to mirror.
#[derive(Debug, Clone)]
pub enum ChunkEvent {
    MeshChanged {
        coord: TileCoord,
        lod: u32,
        /// World-space placement; the mesh is drawn scaled by `scale`.
        origin: Vec3,
        scale: f32,
        mesh: Arc<MeshData>,
    },
    VisibilityChanged {
        coord: TileCoord,
        visible: bool,
    },
    CollisionMeshChanged {
        coord: TileCoord,
        mesh: Arc<MeshData>,
    },
    Evicted {
        coord: TileCoord,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub visibility_passes: u64,
    pub height_requests: u64,
    pub mesh_requests: u64,
    pub heights_received: u64,
    pub meshes_received: u64,
    pub failed_jobs: u64,
    pub evicted: u64,
    pub visible_chunks: usize,
    pub cached_chunks: usize,
    pub pending_jobs: usize,
}

pub struct ChunkStreamer {
    config: TerrainConfig,
    lods: LodTable,
    chunk_size: f32,
    chunks_in_view: i32,
    generator: HeightMapGenerator,
    chunks: FxHashMap<TileCoord, TerrainChunk>,
    visible_last_update: FxHashSet<TileCoord>,
    pipeline: TerrainPipeline,
    viewer: Vec2,
    viewer_world_at_last_pass: Option<Vec2>,
    tick: u64,
    events: Option<EventSender<ChunkEvent>>,
    stats: StreamStats,
}

impl ChunkStreamer {
    pub fn new(config: TerrainConfig, jobs: JobSystem) -> Result<Self, ConfigError> {
        let config = config.sanitize();
        let lods = config.lod_table()?;
        let chunk_size = config.chunk_size();
        let chunks_in_view = (lods.view_distance() / chunk_size).ceil() as i32;
        let generator = HeightMapGenerator::from_config(&config);
        let pipeline = TerrainPipeline::new(jobs);

        info!(
            "Terrain streamer ready: chunk size {chunk_size}, {} LODs, view distance {}, {chunks_in_view} rings, {} workers",
            lods.len(),
            lods.view_distance(),
            pipeline.worker_threads()
        );

        Ok(Self {
            config,
            lods,
            chunk_size,
            chunks_in_view,
            generator,
            chunks: FxHashMap::default(),
            visible_last_update: FxHashSet::default(),
            pipeline,
            viewer: Vec2::ZERO,
            viewer_world_at_last_pass: None,
            tick: 0,
            events: None,
            stats: StreamStats::default(),
        })
    }

    pub fn with_events(mut self, events: EventSender<ChunkEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// One observer tick: applies finished jobs, then recomputes the visible window
    /// if the observer travelled far enough since the last pass (always on the first
    /// tick). `viewer_world` is in world units. Returns the number of callbacks run.
    pub fn update(&mut self, viewer_world: Vec2) -> usize {
        self.tick += 1;
        self.viewer = viewer_world / self.config.terrain.uniform_scale;

        let delivered = self.drain_completed();

        let threshold = self.config.stream.move_threshold;
        let should_update = self
            .viewer_world_at_last_pass
            .map_or(true, |last| last.distance_squared(viewer_world) > threshold * threshold);
        if should_update {
            self.viewer_world_at_last_pass = Some(viewer_world);
            self.update_visible_chunks();
        }

        delivered
    }

    pub fn drain_completed(&mut self) -> usize {
        let drained = self.pipeline.drain();
        if drained.is_empty() {
            return 0;
        }
        drained.deliver(self)
    }

    /// Drains until no job is in flight or `timeout` passes. Returns true when idle.
    pub fn settle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.pipeline.is_idle() {
            if Instant::now() >= deadline {
                return false;
            }
            if self.drain_completed() == 0 {
                thread::sleep(Duration::from_millis(1));
            }
        }
        true
    }

    /// Visibility pass around the current observer tile.
    pub fn update_visible_chunks(&mut self) {
        self.stats.visibility_passes += 1;
        let previously_visible = std::mem::take(&mut self.visible_last_update);

        let current = position_to_tile(self.viewer, self.chunk_size);
        let rings = self.chunks_in_view;
        let mut created = 0usize;
        for dy in -rings..=rings {
            for dx in -rings..=rings {
                let coord = current + TileCoord::new(dx, dy);
                if !self.chunks.contains_key(&coord) {
                    self.spawn_chunk(coord);
                    created += 1;
                }
                self.update_chunk(coord);
            }
        }

        // Chunks shown last pass and not re-shown by this one.
        for coord in previously_visible {
            if !self.visible_last_update.contains(&coord) {
                self.set_chunk_visible(coord, false);
            }
        }

        debug!(
            "Visibility pass around {current:?}: {created} new chunks, {} visible",
            self.visible_last_update.len()
        );

        self.evict_stale(current);
    }

    fn spawn_chunk(&mut self, coord: TileCoord) {
        let mut chunk = TerrainChunk::new(coord, self.chunk_size, self.lods.len(), self.tick);
        chunk.mark_height_requested();
        self.chunks.insert(coord, chunk);

        let request = HeightRequest {
            center: tile_center(coord, self.chunk_size),
            generator: self.generator.clone(),
        };
        self.stats.height_requests += 1;
        self.pipeline.request_height(
            move || request.run(),
            move |streamer: &mut ChunkStreamer, result| streamer.on_height_data(coord, result),
        );
    }

    /// LOD-update step for one chunk. Chunks without height data are left alone.
    fn update_chunk(&mut self, coord: TileCoord) {
        let Some(chunk) = self.chunks.get(&coord) else {
            return;
        };
        let Some(heights) = chunk.height_data().cloned() else {
            return;
        };

        let distance = chunk.bounds().distance_to(self.viewer);
        let visible = self.lods.is_visible(distance);
        if visible {
            let lod_index = self.lods.select(distance);
            self.show_lod(coord, lod_index, &heights);
            if lod_index == 0 {
                self.ensure_collision_mesh(coord, &heights);
            }
        }
        self.set_chunk_visible(coord, visible);
    }

    fn show_lod(&mut self, coord: TileCoord, lod_index: usize, heights: &Arc<HeightGrid>) {
        let scale = self.config.terrain.uniform_scale;
        let Some(chunk) = self.chunks.get_mut(&coord) else {
            return;
        };
        if chunk.current_lod() == Some(lod_index) {
            return;
        }

        match chunk.lod_mesh(lod_index).cloned() {
            Some(LodMesh::Ready(mesh)) => {
                chunk.show_lod(lod_index);
                let origin = chunk.world_origin(scale);
                self.emit(ChunkEvent::MeshChanged {
                    coord,
                    lod: mesh.lod,
                    origin,
                    scale,
                    mesh,
                });
            }
            Some(LodMesh::Requested) | Some(LodMesh::Failed) => {}
            None => self.request_mesh(coord, lod_index, heights.clone()),
        }
    }

    fn ensure_collision_mesh(&mut self, coord: TileCoord, heights: &Arc<HeightGrid>) {
        let collider_index = self.lods.collider_index();
        let Some(chunk) = self.chunks.get_mut(&coord) else {
            return;
        };
        if chunk.collision_mesh().is_some() {
            return;
        }

        match chunk.lod_mesh(collider_index).cloned() {
            Some(LodMesh::Ready(mesh)) => {
                chunk.set_collision_mesh(mesh.clone());
                self.emit(ChunkEvent::CollisionMeshChanged { coord, mesh });
            }
            Some(LodMesh::Requested) | Some(LodMesh::Failed) => {}
            None => self.request_mesh(coord, collider_index, heights.clone()),
        }
    }

    fn request_mesh(&mut self, coord: TileCoord, lod_index: usize, heights: Arc<HeightGrid>) {
        let Some(level) = self.lods.get(lod_index).map(|entry| entry.level) else {
            return;
        };
        let Some(chunk) = self.chunks.get_mut(&coord) else {
            return;
        };
        chunk.mark_mesh_requested(lod_index);
        self.stats.mesh_requests += 1;

        let request = MeshRequest::snapshot(level, heights, &self.config.terrain);
        self.pipeline.request_mesh(
            move || request.run(),
            move |streamer: &mut ChunkStreamer, result| {
                streamer.on_mesh_data(coord, lod_index, result)
            },
        );
    }

    fn on_height_data(&mut self, coord: TileCoord, result: Result<Arc<HeightGrid>, JobError>) {
        let Some(chunk) = self.chunks.get_mut(&coord) else {
            debug!("Dropping height data for evicted chunk {coord:?}");
            return;
        };

        match result {
            Ok(heights) => {
                if chunk.store_height_data(heights) {
                    self.stats.heights_received += 1;
                    self.update_chunk(coord);
                }
            }
            Err(error) => {
                warn!("Height data for chunk {coord:?} failed: {error}");
                chunk.mark_height_failed();
                self.stats.failed_jobs += 1;
            }
        }
    }

    fn on_mesh_data(
        &mut self,
        coord: TileCoord,
        lod_index: usize,
        result: Result<Arc<MeshData>, JobError>,
    ) {
        let Some(chunk) = self.chunks.get_mut(&coord) else {
            debug!("Dropping LOD {lod_index} mesh for evicted chunk {coord:?}");
            return;
        };

        match result {
            Ok(mesh) => {
                chunk.store_mesh(lod_index, Some(mesh));
                self.stats.meshes_received += 1;
                self.update_chunk(coord);
            }
            Err(error) => {
                warn!("LOD {lod_index} mesh for chunk {coord:?} failed: {error}");
                chunk.store_mesh(lod_index, None);
                self.stats.failed_jobs += 1;
            }
        }
    }

    fn set_chunk_visible(&mut self, coord: TileCoord, visible: bool) {
        let tick = self.tick;
        let Some(chunk) = self.chunks.get_mut(&coord) else {
            return;
        };
        let changed = chunk.set_visible(visible, tick);

        if visible {
            self.visible_last_update.insert(coord);
        } else {
            self.visible_last_update.remove(&coord);
        }
        if changed {
            self.emit(ChunkEvent::VisibilityChanged { coord, visible });
        }
    }

    /// Drops hidden chunks outside the current window, least recently visible first,
    /// until the cache is back under `max_cached_chunks`.
    fn evict_stale(&mut self, current: TileCoord) {
        let cap = self.config.stream.max_cached_chunks;
        if cap == 0 || self.chunks.len() <= cap {
            return;
        }

        let rings = self.chunks_in_view;
        let mut candidates: Vec<(u64, TileCoord)> = self
            .chunks
            .values()
            .filter(|chunk| !chunk.is_visible() && chunk.coord().ring_distance(current) > rings)
            .map(|chunk| (chunk.last_visible_tick(), chunk.coord()))
            .collect();
        candidates.sort_unstable();

        let excess = self.chunks.len() - cap;
        let mut evicted = 0u64;
        for (_, coord) in candidates.into_iter().take(excess) {
            if self.chunks.remove(&coord).is_some() {
                self.emit(ChunkEvent::Evicted { coord });
                evicted += 1;
            }
        }

        if evicted > 0 {
            self.stats.evicted += evicted;
            info!(
                "Evicted {evicted} stale chunks, {} remain cached",
                self.chunks.len()
            );
        }
    }

    fn emit(&self, event: ChunkEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    pub fn config(&self) -> &TerrainConfig {
        &self.config
    }

    pub fn lods(&self) -> &LodTable {
        &self.lods
    }

    pub fn chunk(&self, coord: TileCoord) -> Option<&TerrainChunk> {
        self.chunks.get(&coord)
    }

    pub fn chunks(&self) -> impl Iterator<Item = &TerrainChunk> {
        self.chunks.values()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn visible_chunks(&self) -> impl Iterator<Item = TileCoord> + '_ {
        self.visible_last_update.iter().copied()
    }

    /// Observer position in the streaming plane (world position / uniform scale).
    pub fn viewer(&self) -> Vec2 {
        self.viewer
    }

    pub fn pending_jobs(&self) -> usize {
        self.pipeline.in_flight()
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn stats(&self) -> StreamStats {
        StreamStats {
            visible_chunks: self.visible_last_update.len(),
            cached_chunks: self.chunks.len(),
            pending_jobs: self.pipeline.in_flight(),
            ..self.stats
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use glam::Vec2;
    use relief_core::events;
    use relief_core::jobs::JobSystem;
    use relief_shared::config::TerrainConfig;
    use relief_shared::coords::TileCoord;
    use relief_shared::lod::LodLevel;

    use super::{ChunkEvent, ChunkStreamer};
    use crate::chunk::ChunkPhase;

    const SETTLE_TIMEOUT: Duration = Duration::from_secs(30);

    fn lod(level: u32, visible_distance: f32, use_for_collider: bool) -> LodLevel {
        LodLevel {
            level,
            visible_distance,
            use_for_collider,
        }
    }

    // 16-unit tiles, view distance 48 => 3 rings, 7x7 window.
    fn test_config() -> TerrainConfig {
        let mut config = TerrainConfig::default();
        config.chunk_resolution = 17;
        config.lods = vec![lod(0, 16.0, true), lod(1, 32.0, false), lod(2, 48.0, false)];
        config.terrain.uniform_scale = 1.0;
        config.stream.max_cached_chunks = 0;
        config.stream.worker_threads = Some(2);
        config
    }

    fn streamer(config: TerrainConfig) -> ChunkStreamer {
        let jobs = JobSystem::new(config.stream.worker_threads).expect("job system");
        ChunkStreamer::new(config, jobs).expect("valid config")
    }

    fn settled(streamer: &mut ChunkStreamer) {
        assert!(streamer.settle(SETTLE_TIMEOUT), "pipeline did not go idle");
    }

    #[test]
    fn rejects_invalid_lod_table() {
        let mut config = test_config();
        config.lods = vec![lod(0, 32.0, false), lod(1, 16.0, false)];
        let jobs = JobSystem::new(Some(1)).expect("job system");
        assert!(ChunkStreamer::new(config, jobs).is_err());
    }

    #[test]
    fn first_update_requests_height_for_whole_window() {
        let mut streamer = streamer(test_config());
        streamer.update(Vec2::ZERO);

        let stats = streamer.stats();
        assert_eq!(stats.visibility_passes, 1);
        assert_eq!(stats.height_requests, 49);
        assert_eq!(stats.mesh_requests, 0);
        assert_eq!(streamer.chunk_count(), 49);
        assert!(streamer.chunk(TileCoord::new(3, -3)).is_some());
        assert!(streamer.chunk(TileCoord::new(4, 0)).is_none());

        let center = streamer.chunk(TileCoord::default()).expect("center chunk");
        assert_eq!(center.phase(), ChunkPhase::AwaitingHeightData);
        assert_eq!(center.current_lod(), None);
        settled(&mut streamer);
    }

    #[test]
    fn settled_window_selects_lods_by_distance() {
        let mut streamer = streamer(test_config());
        streamer.update(Vec2::ZERO);
        settled(&mut streamer);

        assert!(streamer
            .chunks()
            .all(|chunk| chunk.phase() == ChunkPhase::HasHeightData));
        // Only the four window corners lie beyond the view distance.
        assert_eq!(streamer.stats().visible_chunks, 45);
        assert!(!streamer.chunk(TileCoord::new(3, 3)).expect("corner").is_visible());
        assert!(streamer.chunk(TileCoord::new(3, 2)).expect("edge").is_visible());

        let center = streamer.chunk(TileCoord::default()).expect("center chunk");
        assert_eq!(center.current_lod(), Some(0));
        assert_eq!(center.displayed_mesh().expect("center mesh").lod, 0);
        assert_eq!(center.collision_mesh().expect("collision mesh").lod, 0);
        assert_eq!(center.mesh_requests(), 1);

        let middle = streamer.chunk(TileCoord::new(2, 0)).expect("middle chunk");
        assert_eq!(middle.current_lod(), Some(1));
        assert!(middle.collision_mesh().is_none());

        let far = streamer.chunk(TileCoord::new(3, 0)).expect("far chunk");
        assert_eq!(far.current_lod(), Some(2));
        assert_eq!(far.displayed_mesh().expect("far mesh").lod, 2);
    }

    #[test]
    fn revisiting_a_lod_reuses_the_memoized_mesh() {
        let mut streamer = streamer(test_config());
        streamer.update(Vec2::ZERO);
        settled(&mut streamer);

        let requests = streamer.stats().mesh_requests;
        streamer.update_visible_chunks();
        settled(&mut streamer);
        assert_eq!(streamer.stats().mesh_requests, requests);

        // From x = 40 the center chunk's nearest edge is 32 away: LOD index 1.
        streamer.update(Vec2::new(40.0, 0.0));
        settled(&mut streamer);
        let center = streamer.chunk(TileCoord::default()).expect("center chunk");
        assert_eq!(center.current_lod(), Some(1));
        assert_eq!(center.mesh_requests(), 2);

        let before_return = streamer.stats().mesh_requests;
        streamer.update(Vec2::ZERO);
        let center = streamer.chunk(TileCoord::default()).expect("center chunk");
        assert_eq!(center.current_lod(), Some(0));
        assert_eq!(center.mesh_requests(), 2);

        settled(&mut streamer);
        assert_eq!(streamer.stats().mesh_requests, before_return);
    }

    #[test]
    fn small_moves_do_not_trigger_a_pass() {
        let mut streamer = streamer(test_config());
        streamer.update(Vec2::ZERO);
        streamer.update(Vec2::new(20.0, 0.0));
        assert_eq!(streamer.stats().visibility_passes, 1);
        streamer.update(Vec2::new(30.0, 0.0));
        assert_eq!(streamer.stats().visibility_passes, 2);
        assert_eq!(streamer.tick(), 3);
        settled(&mut streamer);
    }

    #[test]
    fn observer_position_is_divided_by_uniform_scale() {
        let mut config = test_config();
        config.terrain.uniform_scale = 2.0;
        let mut streamer = streamer(config);
        streamer.update(Vec2::new(80.0, 0.0));

        assert_eq!(streamer.viewer(), Vec2::new(40.0, 0.0));
        assert!(streamer.chunk(TileCoord::new(6, 0)).is_some());
        assert!(streamer.chunk(TileCoord::new(-1, 0)).is_none());
        settled(&mut streamer);
    }

    #[test]
    fn leaving_an_area_hides_but_keeps_its_chunks() {
        let mut streamer = streamer(test_config());
        streamer.update(Vec2::ZERO);
        settled(&mut streamer);

        streamer.update(Vec2::new(400.0, 0.0));
        let center = streamer.chunk(TileCoord::default()).expect("cached chunk");
        assert!(!center.is_visible());
        assert_eq!(center.current_lod(), Some(0));
        assert_eq!(streamer.chunk_count(), 98);

        settled(&mut streamer);
        assert_eq!(streamer.stats().visible_chunks, 45);
        assert!(streamer
            .visible_chunks()
            .all(|coord| coord.ring_distance(TileCoord::new(25, 0)) <= 3));
    }

    #[test]
    fn evicts_least_recently_visible_chunks_over_cap() {
        let mut config = test_config();
        config.stream.max_cached_chunks = 60;
        let (tx, rx) = events::channel();
        let mut streamer = streamer(config).with_events(tx);
        streamer.update(Vec2::ZERO);
        settled(&mut streamer);
        rx.drain();

        streamer.update(Vec2::new(400.0, 0.0));
        assert_eq!(streamer.chunk_count(), 60);
        assert_eq!(streamer.stats().evicted, 38);

        let evicted = rx
            .drain()
            .into_iter()
            .filter(|event| matches!(event, ChunkEvent::Evicted { .. }))
            .count();
        assert_eq!(evicted, 38);
        assert!(streamer
            .chunks()
            .all(|chunk| chunk.coord().ring_distance(TileCoord::new(25, 0)) <= 3
                || chunk.coord().ring_distance(TileCoord::default()) <= 3));
        settled(&mut streamer);
    }

    #[test]
    fn results_for_evicted_chunks_are_dropped() {
        let mut config = test_config();
        config.stream.max_cached_chunks = 10;
        let mut streamer = streamer(config);
        streamer.update(Vec2::ZERO);
        streamer.update(Vec2::new(400.0, 0.0));
        settled(&mut streamer);

        assert_eq!(streamer.chunk_count(), 49);
        assert!(streamer
            .chunks()
            .all(|chunk| chunk.coord().ring_distance(TileCoord::new(25, 0)) <= 3));
        assert!(streamer
            .chunks()
            .all(|chunk| chunk.phase() == ChunkPhase::HasHeightData));
        assert_eq!(streamer.stats().failed_jobs, 0);
        assert_eq!(streamer.pending_jobs(), 0);
    }

    #[test]
    fn events_describe_the_settled_window() {
        let (tx, rx) = events::channel();
        let mut streamer = streamer(test_config()).with_events(tx);
        streamer.update(Vec2::ZERO);
        settled(&mut streamer);

        let events = rx.drain();
        let meshes = events
            .iter()
            .filter(|event| matches!(event, ChunkEvent::MeshChanged { .. }))
            .count();
        let shown = events
            .iter()
            .filter(|event| matches!(event, ChunkEvent::VisibilityChanged { visible: true, .. }))
            .count();
        let colliders = events
            .iter()
            .filter(|event| matches!(event, ChunkEvent::CollisionMeshChanged { .. }))
            .count();
        assert_eq!(meshes, 45);
        assert_eq!(shown, 45);
        // The 3x3 block around the observer sits at LOD index 0.
        assert_eq!(colliders, 9);
        assert!(!events
            .iter()
            .any(|event| matches!(event, ChunkEvent::Evicted { .. })));

        let placed = events.iter().find_map(|event| match event {
            ChunkEvent::MeshChanged { coord, origin, .. } if *coord == TileCoord::new(1, 0) => {
                Some(*origin)
            }
            _ => None,
        });
        assert_eq!(placed, Some(glam::Vec3::new(16.0, 0.0, 0.0)));
    }

    #[test]
    fn repeated_pass_does_not_flicker_visibility() {
        let (tx, rx) = events::channel();
        let mut streamer = streamer(test_config()).with_events(tx);
        streamer.update(Vec2::ZERO);
        settled(&mut streamer);
        rx.drain();

        streamer.update_visible_chunks();
        assert!(rx.drain().is_empty());
        assert_eq!(streamer.stats().visible_chunks, 45);
    }

    #[test]
    fn distinct_collider_lod_is_built_for_nearest_chunks() {
        let mut config = test_config();
        config.lods = vec![lod(0, 16.0, false), lod(1, 32.0, false), lod(2, 48.0, true)];
        let mut streamer = streamer(config);
        streamer.update(Vec2::ZERO);
        settled(&mut streamer);

        let center = streamer.chunk(TileCoord::default()).expect("center chunk");
        assert_eq!(center.current_lod(), Some(0));
        assert_eq!(center.collision_mesh().expect("collision mesh").lod, 2);
        assert_eq!(center.mesh_requests(), 2);

        let middle = streamer.chunk(TileCoord::new(2, 0)).expect("middle chunk");
        assert!(middle.collision_mesh().is_none());
        assert_eq!(middle.mesh_requests(), 1);
    }
}
