//! Height grid to triangle mesh conversion.
//!
//! The input grid carries a one-sample border ring on every side. Border samples
//! become [`VertexRef::Border`] vertices: they take part in normal accumulation so
//! that edge normals agree with the neighbouring tile, but never reach the output.

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

use crate::curve::HeightCurve;
use crate::grid::HeightGrid;

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct TerrainVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}
const _: [(); 32] = [(); std::mem::size_of::<TerrainVertex>()];

/// Slot of a vertex in either the interior or the border vertex list.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum VertexRef {
    Interior(u32),
    Border(u32),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshData {
    pub positions: Vec<Vec3>,
    pub uvs: Vec<Vec2>,
    pub normals: Vec<Vec3>,
    pub indices: Vec<u32>,
    pub lod: u32,
    pub flat_shaded: bool,
}

impl MeshData {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Interleaved vertex buffer for upload; pair with `indices`.
    pub fn to_vertices(&self) -> Vec<TerrainVertex> {
        self.positions
            .iter()
            .zip(&self.normals)
            .zip(&self.uvs)
            .map(|((position, normal), uv)| TerrainVertex {
                position: position.to_array(),
                normal: normal.to_array(),
                uv: uv.to_array(),
            })
            .collect()
    }
}

/// Grid step for a LOD index: every sample at LOD 0, then `lod * 2`.
pub fn mesh_simplification_increment(lod: u32) -> usize {
    if lod == 0 {
        1
    } else {
        lod as usize * 2
    }
}

/// Builds the mesh for one tile.
///
/// `heights` must be square with side `N + 2`, where `N - 1` is divisible by the
/// LOD increment. Violating that is a sizing bug upstream and panics.
pub fn build_terrain_mesh(
    heights: &HeightGrid,
    height_multiplier: f32,
    curve: &HeightCurve,
    lod: u32,
    flat_shading: bool,
) -> MeshData {
    let bordered_size = heights.width();
    assert!(heights.is_square(), "height grid must be square");
    assert!(bordered_size >= 3, "height grid needs a border ring around at least one sample");

    let mesh_size = bordered_size - 2;
    let increment = mesh_simplification_increment(lod);
    assert!(
        (mesh_size - 1) % increment == 0,
        "LOD {lod} increment {increment} does not divide tile span {}",
        mesh_size - 1
    );

    // Grid columns/rows that are visited: border, interior every `increment`, border.
    let samples: Vec<usize> = std::iter::once(0)
        .chain((1..=mesh_size).step_by(increment))
        .chain(std::iter::once(bordered_size - 1))
        .collect();
    let sample_count = samples.len();
    let last_sample = sample_count - 1;

    let mut builder = MeshBuilder::default();
    let mut vertex_map = Vec::with_capacity(sample_count * sample_count);
    let mut interior_count = 0u32;
    let mut border_count = 0u32;
    for sy in 0..sample_count {
        for sx in 0..sample_count {
            let is_border = sx == 0 || sy == 0 || sx == last_sample || sy == last_sample;
            let slot = if is_border {
                border_count += 1;
                VertexRef::Border(border_count - 1)
            } else {
                interior_count += 1;
                VertexRef::Interior(interior_count - 1)
            };
            vertex_map.push(slot);
        }
    }

    let half_span = (mesh_size - 1) as f32 / 2.0;
    let uv_span = (mesh_size - 1).max(1) as f32;
    for (sy, &y) in samples.iter().enumerate() {
        for (sx, &x) in samples.iter().enumerate() {
            let local_x = x as f32 - 1.0;
            let local_y = y as f32 - 1.0;
            let height = curve.evaluate(heights.get(x, y)) * height_multiplier;
            let position = Vec3::new(local_x - half_span, height, half_span - local_y);
            let uv = Vec2::new(local_x / uv_span, local_y / uv_span);
            builder.add_vertex(vertex_map[sx + sy * sample_count], position, uv);
        }
    }

    for sy in 0..last_sample {
        for sx in 0..last_sample {
            let a = vertex_map[sx + sy * sample_count];
            let b = vertex_map[sx + 1 + sy * sample_count];
            let c = vertex_map[sx + (sy + 1) * sample_count];
            let d = vertex_map[sx + 1 + (sy + 1) * sample_count];
            builder.add_triangle(a, d, c);
            builder.add_triangle(d, a, b);
        }
    }

    if flat_shading {
        builder.finish_flat(lod)
    } else {
        builder.finish_smooth(lod)
    }
}

#[derive(Default)]
struct MeshBuilder {
    vertices: Vec<Vec3>,
    uvs: Vec<Vec2>,
    triangles: Vec<u32>,
    border_vertices: Vec<Vec3>,
    border_triangles: Vec<[VertexRef; 3]>,
}

impl MeshBuilder {
    fn add_vertex(&mut self, slot: VertexRef, position: Vec3, uv: Vec2) {
        match slot {
            VertexRef::Interior(index) => {
                debug_assert_eq!(index as usize, self.vertices.len());
                self.vertices.push(position);
                self.uvs.push(uv);
            }
            VertexRef::Border(index) => {
                debug_assert_eq!(index as usize, self.border_vertices.len());
                self.border_vertices.push(position);
            }
        }
    }

    fn add_triangle(&mut self, a: VertexRef, b: VertexRef, c: VertexRef) {
        match (a, b, c) {
            (VertexRef::Interior(a), VertexRef::Interior(b), VertexRef::Interior(c)) => {
                self.triangles.extend_from_slice(&[a, b, c]);
            }
            _ => self.border_triangles.push([a, b, c]),
        }
    }

    fn position(&self, slot: VertexRef) -> Vec3 {
        match slot {
            VertexRef::Interior(index) => self.vertices[index as usize],
            VertexRef::Border(index) => self.border_vertices[index as usize],
        }
    }

    fn surface_normal(&self, a: VertexRef, b: VertexRef, c: VertexRef) -> Vec3 {
        let point_a = self.position(a);
        let side_ab = self.position(b) - point_a;
        let side_ac = self.position(c) - point_a;
        side_ab.cross(side_ac).normalize_or_zero()
    }

    fn smooth_normals(&self) -> Vec<Vec3> {
        let mut normals = vec![Vec3::ZERO; self.vertices.len()];

        for triangle in self.triangles.chunks_exact(3) {
            let [a, b, c] = [triangle[0], triangle[1], triangle[2]];
            let normal = self.surface_normal(
                VertexRef::Interior(a),
                VertexRef::Interior(b),
                VertexRef::Interior(c),
            );
            normals[a as usize] += normal;
            normals[b as usize] += normal;
            normals[c as usize] += normal;
        }

        for &[a, b, c] in &self.border_triangles {
            let normal = self.surface_normal(a, b, c);
            for slot in [a, b, c] {
                if let VertexRef::Interior(index) = slot {
                    normals[index as usize] += normal;
                }
            }
        }

        for normal in &mut normals {
            *normal = normal.normalize_or_zero();
        }
        normals
    }

    fn finish_smooth(self, lod: u32) -> MeshData {
        let normals = self.smooth_normals();
        MeshData {
            positions: self.vertices,
            uvs: self.uvs,
            normals,
            indices: self.triangles,
            lod,
            flat_shaded: false,
        }
    }

    fn finish_flat(self, lod: u32) -> MeshData {
        let corner_count = self.triangles.len();
        let mut positions = Vec::with_capacity(corner_count);
        let mut uvs = Vec::with_capacity(corner_count);
        let mut normals = Vec::with_capacity(corner_count);

        for triangle in self.triangles.chunks_exact(3) {
            let corners = [triangle[0], triangle[1], triangle[2]];
            let a = self.vertices[corners[0] as usize];
            let face = (self.vertices[corners[1] as usize] - a)
                .cross(self.vertices[corners[2] as usize] - a)
                .normalize_or_zero();
            for corner in corners {
                positions.push(self.vertices[corner as usize]);
                uvs.push(self.uvs[corner as usize]);
                normals.push(face);
            }
        }

        MeshData {
            positions,
            uvs,
            normals,
            indices: (0..corner_count as u32).collect(),
            lod,
            flat_shaded: true,
        }
    }
}
