//! Mesh buffers on the GPU.

use ash::vk;
use prism_core::MeshData;
use prism_gpu::{GpuBuffer, GpuContext, GpuError, Result};

/// Usage for buffers read by acceleration structure builds and shaders.
const BUILD_INPUT_USAGE: vk::BufferUsageFlags = vk::BufferUsageFlags::from_raw(
    vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR.as_raw()
        | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS.as_raw()
        | vk::BufferUsageFlags::STORAGE_BUFFER.as_raw(),
);

const HOST_MEMORY: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw()
        | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

/// Vertex and index buffers of one mesh, ready to be described as
/// triangle geometry.
pub struct GpuMesh {
    /// Tightly packed `R32G32B32_SFLOAT` positions.
    pub vertex_buffer: GpuBuffer,
    /// `u32` triangle list indices.
    pub index_buffer: GpuBuffer,
    vertex_count: u32,
    primitive_count: u32,
}

impl GpuMesh {
    /// Upload mesh data into host-visible, device-addressable buffers.
    pub fn upload(ctx: &GpuContext, mesh: &MeshData, name: &str) -> Result<Self> {
        mesh.validate()?;

        let positions = mesh.position_bytes();
        let indices = mesh.index_bytes();

        let mut vertex_buffer = GpuBuffer::new(
            ctx,
            positions.len() as u64,
            BUILD_INPUT_USAGE,
            HOST_MEMORY,
            &format!("{name}_vertices"),
        )?;
        upload_exact(&mut vertex_buffer, positions)?;

        let mut index_buffer = GpuBuffer::new(
            ctx,
            indices.len() as u64,
            BUILD_INPUT_USAGE,
            HOST_MEMORY,
            &format!("{name}_indices"),
        )?;
        upload_exact(&mut index_buffer, indices)?;

        tracing::debug!(
            "Uploaded mesh {name}: {} vertices, {} triangles",
            mesh.vertex_count(),
            mesh.primitive_count()
        );

        Ok(Self {
            vertex_buffer,
            index_buffer,
            vertex_count: mesh.vertex_count(),
            primitive_count: mesh.primitive_count(),
        })
    }

    /// Number of vertices.
    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    /// Number of triangles.
    pub fn primitive_count(&self) -> u32 {
        self.primitive_count
    }
}

fn upload_exact(buffer: &mut GpuBuffer, data: &[u8]) -> Result<()> {
    let written = buffer.upload_data(data, 0)?;
    if written != data.len() {
        return Err(GpuError::AllocationFailed(format!(
            "{}: wrote {written} of {} bytes",
            buffer.name(),
            data.len()
        )));
    }
    Ok(())
}
