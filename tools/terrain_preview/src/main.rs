use std::env;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use glam::Vec2;
use image::{GrayImage, Luma, Rgb, RgbImage};
use relief_shared::config::{TerrainConfig, TerrainRegion};
use relief_shared::grid::HeightGrid;
use relief_shared::mesh::MeshData;
use relief_shared::preview::{regenerate_preview, DrawMode};
use tracing::info;

const USAGE: &str = "Usage: terrain_preview [--config <path>] [--mode noise_map|falloff_map|mesh] [--lod <0-6>] [--center <x,y>] [--out <png>] [--obj <path>]";

struct PreviewOptions {
    config_path: Option<PathBuf>,
    mode: DrawMode,
    lod: u32,
    center: Vec2,
    output: PathBuf,
    obj_output: Option<PathBuf>,
}

fn main() {
    let _ = tracing_subscriber::fmt().with_target(false).try_init();

    let options = match parse_args(env::args().skip(1)) {
        Ok(Some(options)) => options,
        Ok(None) => {
            println!("{USAGE}");
            return;
        }
        Err(err) => {
            eprintln!("{err}\n{USAGE}");
            std::process::exit(2);
        }
    };

    if let Err(err) = run(&options) {
        eprintln!("terrain_preview error: {err}");
        std::process::exit(1);
    }
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Option<PreviewOptions>, String> {
    let mut options = PreviewOptions {
        config_path: None,
        mode: DrawMode::default(),
        lod: 0,
        center: Vec2::ZERO,
        output: PathBuf::from("preview.png"),
        obj_output: None,
    };

    while let Some(arg) = args.next() {
        let mut value = |name: &str| {
            args.next()
                .ok_or_else(|| format!("{name} expects an argument"))
        };
        match arg.as_str() {
            "--config" => options.config_path = Some(PathBuf::from(value("--config")?)),
            "--mode" => options.mode = parse_mode(&value("--mode")?)?,
            "--lod" => {
                let raw = value("--lod")?;
                options.lod = raw
                    .parse()
                    .map_err(|err| format!("invalid lod '{raw}': {err}"))?;
            }
            "--center" => options.center = parse_center(&value("--center")?)?,
            "--out" => options.output = PathBuf::from(value("--out")?),
            "--obj" => options.obj_output = Some(PathBuf::from(value("--obj")?)),
            "--help" | "-h" => return Ok(None),
            other => return Err(format!("unknown argument: {other}")),
        }
    }

    Ok(Some(options))
}

fn parse_mode(raw: &str) -> Result<DrawMode, String> {
    match raw {
        "noise_map" | "noise" => Ok(DrawMode::NoiseMap),
        "falloff_map" | "falloff" => Ok(DrawMode::FalloffMap),
        "mesh" => Ok(DrawMode::Mesh),
        other => Err(format!("unknown draw mode '{other}'")),
    }
}

fn parse_center(raw: &str) -> Result<Vec2, String> {
    let (x, y) = raw
        .split_once(',')
        .ok_or_else(|| format!("center '{raw}' must look like x,y"))?;
    let parse = |part: &str| {
        part.trim()
            .parse::<f32>()
            .map_err(|err| format!("invalid center component '{part}': {err}"))
    };
    Ok(Vec2::new(parse(x)?, parse(y)?))
}

fn run(options: &PreviewOptions) -> Result<(), String> {
    let config = match &options.config_path {
        Some(path) => TerrainConfig::load(path).map_err(|err| err.to_string())?,
        None => TerrainConfig::default(),
    };

    let tile = regenerate_preview(&config, options.mode, options.lod, options.center)
        .map_err(|err| err.to_string())?;

    match options.mode {
        DrawMode::Mesh => color_image(&tile.heights, &config.regions)
            .save(&options.output)
            .map_err(|err| format!("failed to write {}: {err}", options.output.display()))?,
        DrawMode::NoiseMap | DrawMode::FalloffMap => gray_image(&tile.heights)
            .save(&options.output)
            .map_err(|err| format!("failed to write {}: {err}", options.output.display()))?,
    }
    info!("Wrote {:?} texture to {}", options.mode, options.output.display());

    if let Some(obj_path) = &options.obj_output {
        let Some(mesh) = &tile.mesh else {
            return Err("--obj needs --mode mesh".to_string());
        };
        write_obj(mesh, obj_path)?;
        info!(
            "Wrote {} vertices / {} triangles to {}",
            mesh.vertex_count(),
            mesh.triangle_count(),
            obj_path.display()
        );
    }

    Ok(())
}

/// Interior samples only; the border ring exists for normals.
fn interior_size(heights: &HeightGrid) -> u32 {
    heights.width().saturating_sub(2) as u32
}

fn gray_image(heights: &HeightGrid) -> GrayImage {
    let size = interior_size(heights);
    GrayImage::from_fn(size, size, |x, y| {
        let value = heights.get(x as usize + 1, y as usize + 1).clamp(0.0, 1.0);
        Luma([(value * 255.0).round() as u8])
    })
}

fn color_image(heights: &HeightGrid, regions: &[TerrainRegion]) -> RgbImage {
    let size = interior_size(heights);
    RgbImage::from_fn(size, size, |x, y| {
        Rgb(region_color(heights.get(x as usize + 1, y as usize + 1), regions))
    })
}

/// First band whose ceiling is at or above `height`; regions are sorted by height.
fn region_color(height: f32, regions: &[TerrainRegion]) -> [u8; 3] {
    regions
        .iter()
        .find(|region| height <= region.height)
        .or_else(|| regions.last())
        .map_or([0, 0, 0], |region| region.color)
}

fn write_obj(mesh: &MeshData, path: &Path) -> Result<(), String> {
    let mut out = String::new();
    let _ = writeln!(out, "# terrain tile, LOD {}", mesh.lod);
    for position in &mesh.positions {
        let _ = writeln!(out, "v {} {} {}", position.x, position.y, position.z);
    }
    for uv in &mesh.uvs {
        let _ = writeln!(out, "vt {} {}", uv.x, 1.0 - uv.y);
    }
    for normal in &mesh.normals {
        let _ = writeln!(out, "vn {} {} {}", normal.x, normal.y, normal.z);
    }
    for triangle in mesh.indices.chunks_exact(3) {
        let [a, b, c] = [triangle[0] + 1, triangle[1] + 1, triangle[2] + 1];
        let _ = writeln!(out, "f {a}/{a}/{a} {b}/{b}/{b} {c}/{c}/{c}");
    }

    fs::write(path, out).map_err(|err| format!("failed to write {}: {err}", path.display()))
}
