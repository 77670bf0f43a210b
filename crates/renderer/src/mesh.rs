//! Procedural meshes and their GPU buffers.

use std::sync::Arc;

use glam::{Vec2, Vec3};
use tracing::{debug, warn};

use lumen_rhi::RhiResult;
use lumen_rhi::buffer::{Buffer, BufferUsage};
use lumen_rhi::device::Device;
use lumen_rhi::vertex::Vertex;
use lumen_scene::MeshHandle;

use crate::encoder::CommandEncoder;

/// CPU-side indexed triangle list.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    /// Unit cube centered on the origin, four vertices per face so every
    /// face has a flat normal.
    pub fn cube(color: Vec3) -> Self {
        // (normal, u axis, v axis) per face.
        let faces = [
            (Vec3::X, Vec3::NEG_Z, Vec3::Y),
            (Vec3::NEG_X, Vec3::Z, Vec3::Y),
            (Vec3::Y, Vec3::X, Vec3::NEG_Z),
            (Vec3::NEG_Y, Vec3::X, Vec3::Z),
            (Vec3::Z, Vec3::X, Vec3::Y),
            (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
        ];

        let mut mesh = Self::default();
        for (normal, u, v) in faces {
            mesh.push_quad(normal * 0.5, u * 0.5, v * 0.5, normal, color);
        }
        mesh
    }

    /// Unit square in the XZ plane facing up (`-Y`).
    pub fn plane(color: Vec3) -> Self {
        let mut mesh = Self::default();
        mesh.push_quad(Vec3::ZERO, Vec3::X * 0.5, Vec3::Z * 0.5, Vec3::NEG_Y, color);
        mesh
    }

    fn push_quad(&mut self, center: Vec3, half_u: Vec3, half_v: Vec3, normal: Vec3, color: Vec3) {
        let base = self.vertices.len() as u32;
        let corners = [
            (-1.0, -1.0, Vec2::new(0.0, 0.0)),
            (1.0, -1.0, Vec2::new(1.0, 0.0)),
            (1.0, 1.0, Vec2::new(1.0, 1.0)),
            (-1.0, 1.0, Vec2::new(0.0, 1.0)),
        ];
        for (su, sv, uv) in corners {
            let position = center + half_u * su + half_v * sv;
            self.vertices.push(Vertex::new(position, color, normal, uv));
        }
        self.indices
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }
}

/// Device-local vertex and index buffers of one mesh.
pub struct GpuMesh {
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    index_count: u32,
}

impl GpuMesh {
    /// Uploads `data` through staging buffers.
    pub fn upload(device: Arc<Device>, data: &MeshData) -> RhiResult<Self> {
        let vertex_buffer = Buffer::new_device_local(
            device.clone(),
            BufferUsage::Vertex,
            bytemuck::cast_slice(&data.vertices),
        )?;
        let index_buffer = Buffer::new_device_local(
            device,
            BufferUsage::Index,
            bytemuck::cast_slice(&data.indices),
        )?;

        debug!(
            "Uploaded mesh: {} vertices, {} indices",
            data.vertices.len(),
            data.indices.len()
        );

        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count: data.index_count(),
        })
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn record_draw(&self, encoder: &mut dyn CommandEncoder) {
        encoder.bind_vertex_buffer(self.vertex_buffer.handle());
        encoder.bind_index_buffer(self.index_buffer.handle());
        encoder.draw_indexed(self.index_count);
    }
}

/// Anything that can draw a mesh by handle.
pub trait MeshSource {
    fn contains(&self, handle: MeshHandle) -> bool;

    /// Records the bind and draw commands for `handle`. Returns `false` if
    /// the handle is unknown and nothing was recorded.
    fn record_draw(&self, handle: MeshHandle, encoder: &mut dyn CommandEncoder) -> bool;
}

/// Meshes uploaded for the lifetime of the renderer, indexed by handle.
#[derive(Default)]
pub struct MeshLibrary {
    meshes: Vec<GpuMesh>,
}

impl MeshLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, mesh: GpuMesh) -> MeshHandle {
        self.meshes.push(mesh);
        MeshHandle((self.meshes.len() - 1) as u32)
    }

    pub fn get(&self, handle: MeshHandle) -> Option<&GpuMesh> {
        self.meshes.get(handle.0 as usize)
    }

    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }
}

impl MeshSource for MeshLibrary {
    fn contains(&self, handle: MeshHandle) -> bool {
        self.get(handle).is_some()
    }

    fn record_draw(&self, handle: MeshHandle, encoder: &mut dyn CommandEncoder) -> bool {
        match self.get(handle) {
            Some(mesh) => {
                mesh.record_draw(encoder);
                true
            }
            None => {
                warn!("Skipping draw of unknown mesh {:?}", handle);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube_counts() {
        let cube = MeshData::cube(Vec3::ONE);
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.index_count(), 36);
        assert!(cube.indices.iter().all(|&i| (i as usize) < cube.vertices.len()));
    }

    #[test]
    fn test_cube_faces_lie_on_their_planes() {
        let cube = MeshData::cube(Vec3::ONE);
        for vertex in &cube.vertices {
            assert!((vertex.normal.length() - 1.0).abs() < 1e-6);
            assert!((vertex.position.dot(vertex.normal) - 0.5).abs() < 1e-6);
            assert!(vertex.position.abs().max_element() <= 0.5 + 1e-6);
        }
    }

    #[test]
    fn test_cube_triangles_face_outward() {
        let cube = MeshData::cube(Vec3::ONE);
        for triangle in cube.indices.chunks_exact(3) {
            let [a, b, c] = [0, 1, 2].map(|i| cube.vertices[triangle[i] as usize]);
            let winding = (b.position - a.position).cross(c.position - a.position);
            assert!(winding.dot(a.normal) > 0.0);
        }
    }

    #[test]
    fn test_plane_is_flat() {
        let plane = MeshData::plane(Vec3::splat(0.5));
        assert_eq!(plane.vertices.len(), 4);
        assert_eq!(plane.index_count(), 6);
        assert!(plane.vertices.iter().all(|v| v.position.y == 0.0));
        assert!(plane.vertices.iter().all(|v| v.normal == Vec3::NEG_Y));
        assert!(plane.vertices.iter().all(|v| v.color == Vec3::splat(0.5)));
    }

    #[test]
    fn test_empty_library_skips_unknown_handle() {
        let library = MeshLibrary::new();
        let mut encoder = crate::encoder::RecordingEncoder::new();
        assert!(!library.record_draw(MeshHandle(0), &mut encoder));
        assert!(encoder.commands().is_empty());
    }
}
