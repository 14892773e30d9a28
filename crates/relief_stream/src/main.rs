use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use glam::Vec2;
use relief_core::events::{self, EventReceiver};
use relief_core::jobs::JobSystem;
use relief_shared::config::TerrainConfig;
use relief_shared::coords::TileCoord;
use relief_shared::mesh::TerrainVertex;
use relief_stream::{ChunkEvent, ChunkStreamer};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{info, warn};

const FRAME_TIME: Duration = Duration::from_millis(16);
const STATS_INTERVAL: u64 = 60;

struct FlyoverOptions {
    config_path: Option<PathBuf>,
    ticks: u64,
    speed: f32,
}

/// Stand-in render target: tracks what a renderer would hold on the GPU.
#[derive(Default)]
struct SceneMirror {
    meshes: FxHashMap<TileCoord, (u32, usize)>,
    visible: FxHashSet<TileCoord>,
    colliders: FxHashSet<TileCoord>,
    uploaded_bytes: usize,
}

impl SceneMirror {
    fn apply(&mut self, receiver: &EventReceiver<ChunkEvent>) {
        for event in receiver.drain() {
            match event {
                ChunkEvent::MeshChanged { coord, lod, mesh, .. } => {
                    let vertices: Vec<TerrainVertex> = mesh.to_vertices();
                    self.uploaded_bytes += bytemuck::cast_slice::<TerrainVertex, u8>(&vertices).len();
                    self.meshes.insert(coord, (lod, vertices.len()));
                }
                ChunkEvent::VisibilityChanged { coord, visible } => {
                    if visible {
                        self.visible.insert(coord);
                    } else {
                        self.visible.remove(&coord);
                    }
                }
                ChunkEvent::CollisionMeshChanged { coord, .. } => {
                    self.colliders.insert(coord);
                }
                ChunkEvent::Evicted { coord } => {
                    self.meshes.remove(&coord);
                    self.visible.remove(&coord);
                    self.colliders.remove(&coord);
                }
            }
        }
    }

    fn drawn_vertices(&self) -> usize {
        self.visible
            .iter()
            .filter_map(|coord| self.meshes.get(coord))
            .map(|(_, vertex_count)| vertex_count)
            .sum()
    }
}

fn main() {
    let _ = tracing_subscriber::fmt().with_target(false).try_init();

    let mut options = FlyoverOptions {
        config_path: None,
        ticks: 600,
        speed: 4.0,
    };

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let Some(value) = args.next() else {
                    eprintln!("--config expects a path argument");
                    std::process::exit(2);
                };
                options.config_path = Some(PathBuf::from(value));
            }
            "--ticks" => {
                let Some(value) = args.next() else {
                    eprintln!("--ticks expects a numeric argument");
                    std::process::exit(2);
                };
                match value.parse::<u64>() {
                    Ok(parsed) => options.ticks = parsed,
                    Err(err) => {
                        eprintln!("invalid tick count '{value}': {err}");
                        std::process::exit(2);
                    }
                }
            }
            "--speed" => {
                let Some(value) = args.next() else {
                    eprintln!("--speed expects a numeric argument");
                    std::process::exit(2);
                };
                match value.parse::<f32>() {
                    Ok(parsed) if parsed.is_finite() => options.speed = parsed,
                    Ok(_) => {
                        eprintln!("invalid speed '{value}': must be finite");
                        std::process::exit(2);
                    }
                    Err(err) => {
                        eprintln!("invalid speed '{value}': {err}");
                        std::process::exit(2);
                    }
                }
            }
            "--help" | "-h" => {
                println!("Usage: relief_stream [--config <path>] [--ticks <u64>] [--speed <units per tick>]");
                return;
            }
            other => {
                eprintln!("unknown argument: {other}");
                std::process::exit(2);
            }
        }
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        eprintln!("\nShutdown signal received, stopping fly-over...");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to set Ctrl+C handler: {err}");
    }

    if let Err(err) = run(options, running) {
        eprintln!("fly-over failed: {err}");
        std::process::exit(1);
    }
}

fn run(options: FlyoverOptions, running: Arc<AtomicBool>) -> Result<(), String> {
    let config = match &options.config_path {
        Some(path) => TerrainConfig::load(path).map_err(|err| err.to_string())?,
        None => TerrainConfig::default(),
    };

    let jobs = JobSystem::new(config.stream.worker_threads)
        .map_err(|err| format!("failed to create terrain worker pool: {err}"))?;
    let (event_tx, event_rx) = events::channel();
    let mut streamer = ChunkStreamer::new(config, jobs)
        .map_err(|err| err.to_string())?
        .with_events(event_tx);
    let mut scene = SceneMirror::default();

    info!(
        "Flying {} ticks at {} units per tick",
        options.ticks, options.speed
    );

    let mut position = Vec2::ZERO;
    for tick in 0..options.ticks {
        if !running.load(Ordering::SeqCst) {
            break;
        }

        // Slow left-hand curve so the window keeps meeting fresh terrain.
        let heading = Vec2::from_angle(tick as f32 * 0.002);
        position += heading * options.speed;

        streamer.update(position);
        scene.apply(&event_rx);

        if tick % STATS_INTERVAL == 0 {
            let stats = streamer.stats();
            info!(
                "tick {tick}: observer ({:.0}, {:.0}), {} visible / {} cached chunks, {} jobs pending, {} vertices drawn",
                position.x,
                position.y,
                stats.visible_chunks,
                stats.cached_chunks,
                stats.pending_jobs,
                scene.drawn_vertices()
            );
        }

        thread::sleep(FRAME_TIME);
    }

    if !streamer.settle(Duration::from_secs(10)) {
        warn!("{} terrain jobs still pending at shutdown", streamer.pending_jobs());
    }
    scene.apply(&event_rx);

    let stats = streamer.stats();
    info!(
        "Fly-over done: {} passes, {} height / {} mesh requests, {} failed, {} evicted, {} colliders, {:.1} MiB uploaded",
        stats.visibility_passes,
        stats.height_requests,
        stats.mesh_requests,
        stats.failed_jobs,
        stats.evicted,
        scene.colliders.len(),
        scene.uploaded_bytes as f64 / (1024.0 * 1024.0)
    );
    Ok(())
}
