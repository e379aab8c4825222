//! Two-level acceleration structure for a whole scene.

use crate::acceleration::{AccelerationBuilder, AccelerationStructure, BuildOptions};
use crate::geometry::TriangleGeometry;
use crate::instance::InstanceRecord;
use crate::mesh::GpuMesh;
use ash::vk;
use glam::Mat4;
use prism_gpu::{GpuContext, GpuError, Result};

/// One bottom-level structure per mesh and a top-level structure with one
/// instance per mesh.
pub struct SceneAccelerationStructure {
    // Declared first so it is dropped before the structures it references.
    top_level: AccelerationStructure,
    bottom_levels: Vec<AccelerationStructure>,
}

impl SceneAccelerationStructure {
    /// Build the scene with every mesh at the identity transform.
    pub fn build(ctx: &GpuContext, meshes: &[GpuMesh], options: BuildOptions) -> Result<Self> {
        Self::build_with_transforms(ctx, meshes, &[], options)
    }

    /// Build the scene, placing mesh `i` with `transforms[i]`.
    ///
    /// Meshes without a transform use the identity. Instance `i` gets custom
    /// index `i`.
    pub fn build_with_transforms(
        ctx: &GpuContext,
        meshes: &[GpuMesh],
        transforms: &[Mat4],
        options: BuildOptions,
    ) -> Result<Self> {
        if meshes.is_empty() {
            return Err(GpuError::CapacityViolation(
                "scene needs at least one mesh".to_string(),
            ));
        }
        if transforms.len() > meshes.len() {
            return Err(GpuError::CapacityViolation(format!(
                "{} transforms for {} meshes",
                transforms.len(),
                meshes.len()
            )));
        }

        let builder = AccelerationBuilder::new(ctx)?.with_options(options);

        let geometries = meshes
            .iter()
            .map(TriangleGeometry::from_mesh)
            .collect::<Result<Vec<_>>>()?;
        let bottom_levels = builder.build_bottom_level(&geometries)?;

        let instances = bottom_levels
            .iter()
            .enumerate()
            .map(|(index, blas)| {
                let custom_index = u32::try_from(index).map_err(|_| {
                    GpuError::CapacityViolation(format!("mesh index {index} out of range"))
                })?;
                let record = InstanceRecord::referencing(blas)?.with_custom_index(custom_index)?;
                Ok::<_, GpuError>(match transforms.get(index) {
                    Some(transform) => record.with_transform(transform),
                    None => record,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let top_level = builder.build_top_level(&instances)?;
        drop(instances);

        Ok(Self {
            top_level,
            bottom_levels,
        })
    }

    pub fn top_level(&self) -> &AccelerationStructure {
        &self.top_level
    }

    pub fn bottom_levels(&self) -> &[AccelerationStructure] {
        &self.bottom_levels
    }

    /// Handle bound as the scene-traversal resource.
    pub fn top_level_handle(&self) -> vk::AccelerationStructureKHR {
        self.top_level.handle()
    }

    pub fn top_level_address(&self) -> Result<vk::DeviceAddress> {
        self.top_level.device_address()
    }

    /// Address of every bottom-level structure, in mesh order.
    pub fn bottom_level_addresses(&self) -> Result<Vec<vk::DeviceAddress>> {
        self.bottom_levels
            .iter()
            .map(AccelerationStructure::device_address)
            .collect()
    }

    /// Destroy the top level, then every bottom level.
    pub fn destroy(&mut self) {
        self.top_level.destroy();
        for blas in &mut self.bottom_levels {
            blas.destroy();
        }
    }
}
