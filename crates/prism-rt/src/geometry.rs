//! Address-based geometry descriptions for acceleration structure builds.
//!
//! Geometry is referenced by device address rather than by descriptor
//! binding. Descriptions are plain values; the Vulkan structs are produced
//! on demand because they must not outlive the build call that reads them.

use crate::mesh::GpuMesh;
use ash::vk;
use prism_gpu::Result;

/// Byte stride of one `R32G32B32_SFLOAT` vertex.
pub const VERTEX_STRIDE: u64 = 12;

/// Triangle geometry of one mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriangleGeometry {
    pub vertex_address: vk::DeviceAddress,
    pub vertex_stride: u64,
    pub vertex_count: u32,
    pub index_address: vk::DeviceAddress,
    pub index_type: vk::IndexType,
    pub primitive_count: u32,
}

impl TriangleGeometry {
    /// Describe the triangles of an uploaded mesh.
    pub fn from_mesh(mesh: &GpuMesh) -> Result<Self> {
        Ok(Self {
            vertex_address: mesh.vertex_buffer.device_address()?,
            vertex_stride: VERTEX_STRIDE,
            vertex_count: mesh.vertex_count(),
            index_address: mesh.index_buffer.device_address()?,
            index_type: vk::IndexType::UINT32,
            primitive_count: mesh.primitive_count(),
        })
    }

    /// Highest vertex index the build may read.
    pub fn max_vertex(&self) -> u32 {
        self.vertex_count.saturating_sub(1)
    }
}

/// Input of one acceleration structure build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryInput {
    /// Bottom-level triangle geometry.
    Triangles(TriangleGeometry),
    /// Top-level instance array of `count` tightly packed records.
    Instances {
        address: vk::DeviceAddress,
        count: u32,
    },
}

impl GeometryInput {
    /// Primitive count passed to size queries and build ranges.
    pub fn primitive_count(&self) -> u32 {
        match self {
            Self::Triangles(triangles) => triangles.primitive_count,
            Self::Instances { count, .. } => *count,
        }
    }

    /// Produce the Vulkan geometry description.
    pub fn describe(&self, flags: vk::GeometryFlagsKHR) -> vk::AccelerationStructureGeometryKHR<'static> {
        match self {
            Self::Triangles(triangles) => vk::AccelerationStructureGeometryKHR::default()
                .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
                .flags(flags)
                .geometry(vk::AccelerationStructureGeometryDataKHR {
                    triangles: vk::AccelerationStructureGeometryTrianglesDataKHR::default()
                        .vertex_format(vk::Format::R32G32B32_SFLOAT)
                        .vertex_data(vk::DeviceOrHostAddressConstKHR {
                            device_address: triangles.vertex_address,
                        })
                        .vertex_stride(triangles.vertex_stride)
                        .max_vertex(triangles.max_vertex())
                        .index_type(triangles.index_type)
                        .index_data(vk::DeviceOrHostAddressConstKHR {
                            device_address: triangles.index_address,
                        }),
                }),
            Self::Instances { address, .. } => vk::AccelerationStructureGeometryKHR::default()
                .geometry_type(vk::GeometryTypeKHR::INSTANCES)
                .flags(flags)
                .geometry(vk::AccelerationStructureGeometryDataKHR {
                    instances: vk::AccelerationStructureGeometryInstancesDataKHR::default()
                        .array_of_pointers(false)
                        .data(vk::DeviceOrHostAddressConstKHR {
                            device_address: *address,
                        }),
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangles() -> TriangleGeometry {
        TriangleGeometry {
            vertex_address: 0x1000,
            vertex_stride: VERTEX_STRIDE,
            vertex_count: 8,
            index_address: 0x2000,
            index_type: vk::IndexType::UINT32,
            primitive_count: 12,
        }
    }

    #[test]
    fn max_vertex_is_last_index() {
        assert_eq!(triangles().max_vertex(), 7);
        let empty = TriangleGeometry {
            vertex_count: 0,
            ..triangles()
        };
        assert_eq!(empty.max_vertex(), 0);
    }

    #[test]
    fn triangle_description_carries_addresses() {
        let geometry = GeometryInput::Triangles(triangles()).describe(vk::GeometryFlagsKHR::OPAQUE);
        assert_eq!(geometry.geometry_type, vk::GeometryTypeKHR::TRIANGLES);
        assert_eq!(geometry.flags, vk::GeometryFlagsKHR::OPAQUE);

        let data = unsafe { geometry.geometry.triangles };
        assert_eq!(data.vertex_format, vk::Format::R32G32B32_SFLOAT);
        assert_eq!(data.vertex_stride, 12);
        assert_eq!(data.max_vertex, 7);
        assert_eq!(data.index_type, vk::IndexType::UINT32);
        assert_eq!(unsafe { data.vertex_data.device_address }, 0x1000);
        assert_eq!(unsafe { data.index_data.device_address }, 0x2000);
    }

    #[test]
    fn instance_description_is_flat_array() {
        let input = GeometryInput::Instances {
            address: 0x4000,
            count: 3,
        };
        assert_eq!(input.primitive_count(), 3);

        let geometry = input.describe(vk::GeometryFlagsKHR::empty());
        assert_eq!(geometry.geometry_type, vk::GeometryTypeKHR::INSTANCES);
        let data = unsafe { geometry.geometry.instances };
        assert_eq!(data.array_of_pointers, vk::FALSE);
        assert_eq!(unsafe { data.data.device_address }, 0x4000);
    }

    #[test]
    fn primitive_count_follows_input() {
        assert_eq!(GeometryInput::Triangles(triangles()).primitive_count(), 12);
    }
}
