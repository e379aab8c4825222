//! Triangle mesh data.

use crate::error::{Error, Result};
use glam::Vec3;

/// Indexed triangle mesh held in host memory.
///
/// Positions are tightly packed `[f32; 3]` and indices are 32-bit, which
/// is the layout uploaded for acceleration structure builds.
#[derive(Clone, Debug, Default)]
pub struct MeshData {
    /// Vertex positions
    pub positions: Vec<Vec3>,
    /// Triangle list indices
    pub indices: Vec<u32>,
}

impl MeshData {
    /// Create a mesh, validating the index buffer.
    pub fn new(positions: Vec<Vec3>, indices: Vec<u32>) -> Result<Self> {
        let mesh = Self { positions, indices };
        mesh.validate()?;
        Ok(mesh)
    }

    /// Check that the mesh describes at least one well-formed triangle.
    pub fn validate(&self) -> Result<()> {
        if self.positions.is_empty() || self.indices.is_empty() {
            return Err(Error::InvalidMesh("mesh has no geometry".to_string()));
        }
        if self.indices.len() % 3 != 0 {
            return Err(Error::InvalidMesh(format!(
                "index count {} is not a multiple of 3",
                self.indices.len()
            )));
        }
        let vertex_count = self.positions.len();
        if let Some(&bad) = self.indices.iter().find(|&&i| i as usize >= vertex_count) {
            return Err(Error::InvalidMesh(format!(
                "index {bad} out of range for {vertex_count} vertices"
            )));
        }
        Ok(())
    }

    /// Number of vertices.
    #[inline]
    pub fn vertex_count(&self) -> u32 {
        self.positions.len() as u32
    }

    /// Number of triangles.
    #[inline]
    pub fn primitive_count(&self) -> u32 {
        (self.indices.len() / 3) as u32
    }

    /// Vertex positions as raw bytes.
    pub fn position_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.positions)
    }

    /// Indices as raw bytes.
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    /// A single triangle in the XY plane.
    pub fn triangle() -> Self {
        Self {
            positions: vec![
                Vec3::new(-0.5, -0.5, 0.0),
                Vec3::new(0.5, -0.5, 0.0),
                Vec3::new(0.0, 0.5, 0.0),
            ],
            indices: vec![0, 1, 2],
        }
    }

    /// A square in the XZ plane centered at the origin.
    pub fn quad(size: f32) -> Self {
        let h = size * 0.5;
        Self {
            positions: vec![
                Vec3::new(-h, 0.0, -h),
                Vec3::new(h, 0.0, -h),
                Vec3::new(h, 0.0, h),
                Vec3::new(-h, 0.0, h),
            ],
            indices: vec![0, 1, 2, 0, 2, 3],
        }
    }

    /// An axis-aligned cube centered at the origin.
    pub fn cube(size: f32) -> Self {
        let h = size * 0.5;
        let positions = (0..8)
            .map(|i| {
                Vec3::new(
                    if i & 1 == 0 { -h } else { h },
                    if i & 2 == 0 { -h } else { h },
                    if i & 4 == 0 { -h } else { h },
                )
            })
            .collect();

        #[rustfmt::skip]
        let indices = vec![
            0, 2, 1, 1, 2, 3, // -Z
            4, 5, 6, 5, 7, 6, // +Z
            0, 1, 4, 1, 5, 4, // -Y
            2, 6, 3, 3, 6, 7, // +Y
            0, 4, 2, 2, 4, 6, // -X
            1, 3, 5, 3, 7, 5, // +X
        ];

        Self { positions, indices }
    }
}
