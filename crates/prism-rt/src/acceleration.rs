//! Acceleration structure management for hardware ray tracing.
//!
//! Structures move through a fixed sequence of states:
//! `Unbuilt -> SizesQueried -> Allocated -> Built -> AddressResolved`.
//!
//! Builds happen in batches. A batch queries sizes for every structure,
//! allocates each structure's backing buffer, allocates one scratch buffer
//! sized to the largest scratch requirement in the batch, records every build
//! into one command buffer with a barrier after each build, submits once,
//! blocks until the queue is idle and finally resolves device addresses.
//!
//! Bottom-level structures for all meshes form one batch. The top-level
//! structure forms its own batch and may only reference resolved
//! bottom-level addresses.

use crate::geometry::{GeometryInput, TriangleGeometry};
use crate::instance::InstanceRecord;
use ash::vk;
use prism_core::align_up;
use prism_gpu::{
    submit_and_wait, GpuBuffer, GpuContext, GpuError, RayTracingCapabilities, Result,
};

/// Which level of the two-level hierarchy a structure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccelerationLevel {
    /// Per-mesh structure over triangles.
    Bottom,
    /// Scene-wide structure over instances.
    Top,
}

impl AccelerationLevel {
    /// Vulkan structure type.
    pub fn vk_type(self) -> vk::AccelerationStructureTypeKHR {
        match self {
            Self::Bottom => vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
            Self::Top => vk::AccelerationStructureTypeKHR::TOP_LEVEL,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Bottom => "blas",
            Self::Top => "tlas",
        }
    }
}

/// Build progress of one structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BuildState {
    Unbuilt,
    SizesQueried,
    Allocated,
    Built,
    AddressResolved,
}

impl BuildState {
    /// The state that follows this one, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Unbuilt => Some(Self::SizesQueried),
            Self::SizesQueried => Some(Self::Allocated),
            Self::Allocated => Some(Self::Built),
            Self::Built => Some(Self::AddressResolved),
            Self::AddressResolved => None,
        }
    }

    /// Move to `target`, which must be the immediate successor.
    pub fn advance_to(&mut self, target: Self) -> Result<()> {
        if self.next() != Some(target) {
            return Err(GpuError::InvalidState(format!(
                "acceleration structure cannot go from {self:?} to {target:?}"
            )));
        }
        *self = target;
        Ok(())
    }
}

/// Memory requirements reported by the driver for one build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildSizes {
    /// Size of the structure's backing storage.
    pub structure_size: u64,
    /// Transient scratch needed during the build.
    pub scratch_size: u64,
}

/// Size of the scratch buffer shared by every build in a batch.
pub fn shared_scratch_size(sizes: &[BuildSizes]) -> u64 {
    sizes.iter().map(|s| s.scratch_size).max().unwrap_or(0)
}

/// One step of a recorded batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStep {
    /// Record the build of structure `n` in the batch.
    Build(usize),
    /// Make the previous build's writes visible before scratch is reused.
    ScratchBarrier,
}

/// Command order for a batch of `count` builds sharing one scratch buffer.
pub fn build_sequence(count: usize) -> Vec<BuildStep> {
    (0..count)
        .flat_map(|index| [BuildStep::Build(index), BuildStep::ScratchBarrier])
        .collect()
}

/// Barrier between consecutive builds that reuse the same scratch memory.
pub fn scratch_barrier() -> vk::MemoryBarrier2<'static> {
    vk::MemoryBarrier2::default()
        .src_stage_mask(vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR)
        .src_access_mask(vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR)
        .dst_stage_mask(vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR)
        .dst_access_mask(
            vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR
                | vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR,
        )
}

/// Reject a build whose primitive count exceeds the device limit for its
/// level: triangles per bottom-level structure, instances per top-level one.
pub fn check_primitive_limit(
    level: AccelerationLevel,
    primitive_count: u32,
    caps: &RayTracingCapabilities,
) -> Result<()> {
    let limit = match level {
        AccelerationLevel::Bottom => caps.max_primitive_count,
        AccelerationLevel::Top => caps.max_instance_count,
    };
    if u64::from(primitive_count) > limit {
        return Err(GpuError::CapacityViolation(format!(
            "{} with {primitive_count} primitives exceeds the device limit of {limit}",
            level.label()
        )));
    }
    Ok(())
}

/// Trace/build trade-off for structure builds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BuildPreference {
    #[default]
    FastTrace,
    FastBuild,
}

/// Options applied to every structure in a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOptions {
    pub preference: BuildPreference,
    /// Mark geometry opaque so any-hit shaders are skipped.
    pub opaque: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            preference: BuildPreference::FastTrace,
            opaque: true,
        }
    }
}

impl BuildOptions {
    /// Set the build preference.
    pub fn with_preference(mut self, preference: BuildPreference) -> Self {
        self.preference = preference;
        self
    }

    /// Set whether geometry is opaque.
    pub fn with_opaque(mut self, opaque: bool) -> Self {
        self.opaque = opaque;
        self
    }

    /// Vulkan build flags.
    pub fn build_flags(&self) -> vk::BuildAccelerationStructureFlagsKHR {
        match self.preference {
            BuildPreference::FastTrace => vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE,
            BuildPreference::FastBuild => vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_BUILD,
        }
    }

    /// Vulkan geometry flags.
    pub fn geometry_flags(&self) -> vk::GeometryFlagsKHR {
        if self.opaque {
            vk::GeometryFlagsKHR::OPAQUE
        } else {
            vk::GeometryFlagsKHR::empty()
        }
    }
}

/// An acceleration structure together with its backing buffer and resolved
/// device address.
pub struct AccelerationStructure {
    level: AccelerationLevel,
    handle: vk::AccelerationStructureKHR,
    buffer: Option<GpuBuffer>,
    sizes: BuildSizes,
    primitive_count: u32,
    state: BuildState,
    device_address: Option<vk::DeviceAddress>,
    loader: Option<ash::khr::acceleration_structure::Device>,
}

impl AccelerationStructure {
    /// A structure that has not started building.
    pub fn unbuilt(level: AccelerationLevel) -> Self {
        Self {
            level,
            handle: vk::AccelerationStructureKHR::null(),
            buffer: None,
            sizes: BuildSizes::default(),
            primitive_count: 0,
            state: BuildState::Unbuilt,
            device_address: None,
            loader: None,
        }
    }

    /// Hierarchy level.
    pub fn level(&self) -> AccelerationLevel {
        self.level
    }

    /// Current build state.
    pub fn state(&self) -> BuildState {
        self.state
    }

    /// Raw structure handle, for binding as a scene-traversal resource.
    pub fn handle(&self) -> vk::AccelerationStructureKHR {
        self.handle
    }

    /// Sizes reported by the driver.
    pub fn sizes(&self) -> BuildSizes {
        self.sizes
    }

    /// Triangles (bottom level) or instances (top level) in the build.
    pub fn primitive_count(&self) -> u32 {
        self.primitive_count
    }

    /// Backing storage buffer.
    pub fn buffer(&self) -> Option<&GpuBuffer> {
        self.buffer.as_ref()
    }

    /// Resolved device address.
    ///
    /// Fails until the structure has been built and its address queried.
    pub fn device_address(&self) -> Result<vk::DeviceAddress> {
        match (self.state, self.device_address) {
            (BuildState::AddressResolved, Some(address)) => Ok(address),
            (state, _) => Err(GpuError::CapacityViolation(format!(
                "{} address requested in state {state:?}",
                self.level.label()
            ))),
        }
    }

    /// Destroy the structure object, then its buffer.
    ///
    /// Safe to call more than once. The GPU must no longer use the structure.
    pub fn destroy(&mut self) {
        if let Some(loader) = &self.loader {
            if self.handle != vk::AccelerationStructureKHR::null() {
                unsafe { loader.destroy_acceleration_structure(self.handle, None) };
            }
        }
        self.handle = vk::AccelerationStructureKHR::null();
        self.buffer = None;
        self.device_address = None;
        self.state = BuildState::Unbuilt;
    }

    #[cfg(test)]
    pub(crate) fn resolved_for_test(level: AccelerationLevel, address: vk::DeviceAddress) -> Self {
        let mut structure = Self::unbuilt(level);
        structure.state = BuildState::AddressResolved;
        structure.device_address = Some(address);
        structure
    }
}

impl Drop for AccelerationStructure {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn build_geometry_info<'a>(
    level: AccelerationLevel,
    flags: vk::BuildAccelerationStructureFlagsKHR,
    geometry: &'a vk::AccelerationStructureGeometryKHR<'static>,
) -> vk::AccelerationStructureBuildGeometryInfoKHR<'a> {
    vk::AccelerationStructureBuildGeometryInfoKHR::default()
        .ty(level.vk_type())
        .flags(flags)
        .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
        .geometries(std::slice::from_ref(geometry))
}

/// Builds batches of acceleration structures on the context's queue.
pub struct AccelerationBuilder<'a> {
    ctx: &'a GpuContext,
    loader: &'a ash::khr::acceleration_structure::Device,
    options: BuildOptions,
    caps: RayTracingCapabilities,
    scratch_alignment: u64,
}

impl<'a> AccelerationBuilder<'a> {
    /// Create a builder for the given context.
    pub fn new(ctx: &'a GpuContext) -> Result<Self> {
        let loader = ctx.acceleration_structure_loader()?;
        let caps = *ctx.ray_tracing_capabilities()?;
        let scratch_alignment = u64::from(caps.min_scratch_offset_alignment.max(1));

        Ok(Self {
            ctx,
            loader,
            options: BuildOptions::default(),
            caps,
            scratch_alignment,
        })
    }

    /// Use different build options.
    pub fn with_options(mut self, options: BuildOptions) -> Self {
        self.options = options;
        self
    }

    /// Build one bottom-level structure per geometry in a single batch.
    pub fn build_bottom_level(
        &self,
        geometries: &[TriangleGeometry],
    ) -> Result<Vec<AccelerationStructure>> {
        let inputs: Vec<GeometryInput> = geometries
            .iter()
            .map(|g| GeometryInput::Triangles(*g))
            .collect();

        let structures = self.build_batch(AccelerationLevel::Bottom, &inputs)?;

        tracing::info!(
            "Built {} bottom-level acceleration structures",
            structures.len()
        );
        Ok(structures)
    }

    /// Build the top-level structure over `instances`.
    ///
    /// Every instance must reference a resolved bottom-level address.
    pub fn build_top_level(
        &self,
        instances: &[InstanceRecord<'_>],
    ) -> Result<AccelerationStructure> {
        if instances.is_empty() {
            return Err(GpuError::CapacityViolation(
                "top-level build needs at least one instance".to_string(),
            ));
        }
        let count = u32::try_from(instances.len()).map_err(|_| {
            GpuError::CapacityViolation(format!("{} instances", instances.len()))
        })?;
        check_primitive_limit(AccelerationLevel::Top, count, &self.caps)?;

        let records = instances
            .iter()
            .enumerate()
            .map(|(index, instance)| {
                instance.to_vk().map_err(|e| {
                    GpuError::CapacityViolation(format!("instance {index}: {e}"))
                })
            })
            .collect::<Result<Vec<vk::AccelerationStructureInstanceKHR>>>()?;
        let bytes = unsafe {
            std::slice::from_raw_parts(
                records.as_ptr().cast::<u8>(),
                std::mem::size_of_val(records.as_slice()),
            )
        };

        let mut instance_buffer = GpuBuffer::new(
            self.ctx,
            bytes.len() as u64,
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            "tlas_instance_buffer",
        )?;
        let written = instance_buffer.upload_data(bytes, 0)?;
        if written != bytes.len() {
            return Err(GpuError::AllocationFailed(format!(
                "instance upload wrote {written} of {} bytes",
                bytes.len()
            )));
        }

        let input = GeometryInput::Instances {
            address: instance_buffer.device_address()?,
            count,
        };

        // The instance buffer is only read during the build, which has
        // completed once build_batch returns.
        let mut structures = self.build_batch(AccelerationLevel::Top, &[input])?;
        let tlas = structures.pop().ok_or_else(|| {
            GpuError::BuildSubmission("top-level batch produced no structure".to_string())
        })?;

        tracing::info!(
            "Built top-level acceleration structure over {} instances",
            instances.len()
        );
        Ok(tlas)
    }

    fn build_batch(
        &self,
        level: AccelerationLevel,
        inputs: &[GeometryInput],
    ) -> Result<Vec<AccelerationStructure>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        for input in inputs {
            check_primitive_limit(level, input.primitive_count(), &self.caps)?;
        }

        let build_flags = self.options.build_flags();
        let geometry_flags = self.options.geometry_flags();
        let geometries: Vec<vk::AccelerationStructureGeometryKHR<'static>> =
            inputs.iter().map(|input| input.describe(geometry_flags)).collect();

        // Query sizes
        let mut structures = Vec::with_capacity(inputs.len());
        for (input, geometry) in inputs.iter().zip(&geometries) {
            let mut structure = AccelerationStructure::unbuilt(level);
            structure.primitive_count = input.primitive_count();
            structure.sizes = self.query_sizes(level, build_flags, geometry, structure.primitive_count)?;
            structure.state.advance_to(BuildState::SizesQueried)?;
            structures.push(structure);
        }

        // Allocate storage and create structure objects
        for (index, structure) in structures.iter_mut().enumerate() {
            self.allocate(structure, index)?;
        }

        let sizes: Vec<BuildSizes> = structures.iter().map(|s| s.sizes).collect();
        let scratch_size = shared_scratch_size(&sizes);
        let scratch_buffer = GpuBuffer::new(
            self.ctx,
            scratch_size + self.scratch_alignment,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            &format!("{}_scratch_buffer", level.label()),
        )?;
        let scratch_address = align_up(scratch_buffer.device_address()?, self.scratch_alignment);

        tracing::debug!(
            "{} batch: {} structures, shared scratch {} bytes",
            level.label(),
            structures.len(),
            scratch_size
        );

        // Record and submit
        let device = self.ctx.device();
        let pool = self.ctx.command_pool().lock();
        unsafe {
            submit_and_wait(device, &pool, self.ctx.queue(), |cmd| {
                self.record_batch(cmd, level, &geometries, &structures, scratch_address);
                Ok(())
            })?;
        }
        drop(pool);

        for structure in &mut structures {
            structure.state.advance_to(BuildState::Built)?;
        }

        // Resolve addresses
        for structure in &mut structures {
            let info = vk::AccelerationStructureDeviceAddressInfoKHR::default()
                .acceleration_structure(structure.handle);
            let address = unsafe { self.loader.get_acceleration_structure_device_address(&info) };
            if address == 0 {
                return Err(GpuError::BuildSubmission(format!(
                    "{} resolved to a null device address",
                    level.label()
                )));
            }
            structure.device_address = Some(address);
            structure.state.advance_to(BuildState::AddressResolved)?;
        }

        Ok(structures)
    }

    fn query_sizes(
        &self,
        level: AccelerationLevel,
        flags: vk::BuildAccelerationStructureFlagsKHR,
        geometry: &vk::AccelerationStructureGeometryKHR<'static>,
        primitive_count: u32,
    ) -> Result<BuildSizes> {
        let build_info = build_geometry_info(level, flags, geometry);
        let mut build_sizes = vk::AccelerationStructureBuildSizesInfoKHR::default();
        unsafe {
            self.loader.get_acceleration_structure_build_sizes(
                vk::AccelerationStructureBuildTypeKHR::DEVICE,
                &build_info,
                &[primitive_count],
                &mut build_sizes,
            );
        }

        if build_sizes.acceleration_structure_size == 0 {
            return Err(GpuError::SizeQuery(format!(
                "{} with {primitive_count} primitives reported zero size",
                level.label()
            )));
        }

        let sizes = BuildSizes {
            structure_size: build_sizes.acceleration_structure_size,
            scratch_size: build_sizes.build_scratch_size,
        };
        tracing::debug!(
            "{} sizes: structure {} bytes, scratch {} bytes",
            level.label(),
            sizes.structure_size,
            sizes.scratch_size
        );
        Ok(sizes)
    }

    fn allocate(&self, structure: &mut AccelerationStructure, index: usize) -> Result<()> {
        let level = structure.level;
        let buffer = GpuBuffer::new(
            self.ctx,
            structure.sizes.structure_size,
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            &format!("{}_buffer_{index}", level.label()),
        )?;

        let create_info = vk::AccelerationStructureCreateInfoKHR::default()
            .buffer(buffer.handle())
            .offset(0)
            .size(structure.sizes.structure_size)
            .ty(level.vk_type());

        let handle = unsafe { self.loader.create_acceleration_structure(&create_info, None) }
            .map_err(|e| {
                GpuError::AllocationFailed(format!("{} {index}: create structure: {e}", level.label()))
            })?;

        structure.handle = handle;
        structure.buffer = Some(buffer);
        structure.loader = Some(self.loader.clone());
        structure.state.advance_to(BuildState::Allocated)
    }

    /// Record one build per structure, each followed by a scratch barrier.
    fn record_batch(
        &self,
        cmd: vk::CommandBuffer,
        level: AccelerationLevel,
        geometries: &[vk::AccelerationStructureGeometryKHR<'static>],
        structures: &[AccelerationStructure],
        scratch_address: vk::DeviceAddress,
    ) {
        let device = self.ctx.device();
        let build_flags = self.options.build_flags();
        let barrier = scratch_barrier();
        let dependency_info =
            vk::DependencyInfo::default().memory_barriers(std::slice::from_ref(&barrier));

        for step in build_sequence(structures.len()) {
            match step {
                BuildStep::Build(index) => {
                    let structure = &structures[index];
                    let build_info = build_geometry_info(level, build_flags, &geometries[index])
                        .dst_acceleration_structure(structure.handle)
                        .scratch_data(vk::DeviceOrHostAddressKHR {
                            device_address: scratch_address,
                        });

                    let build_range = vk::AccelerationStructureBuildRangeInfoKHR::default()
                        .primitive_count(structure.primitive_count)
                        .primitive_offset(0)
                        .first_vertex(0)
                        .transform_offset(0);

                    unsafe {
                        self.loader.cmd_build_acceleration_structures(
                            cmd,
                            std::slice::from_ref(&build_info),
                            &[std::slice::from_ref(&build_range)],
                        );
                    }
                }
                BuildStep::ScratchBarrier => unsafe {
                    device.cmd_pipeline_barrier2(cmd, &dependency_info);
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_advances_in_order() {
        let mut state = BuildState::Unbuilt;
        for next in [
            BuildState::SizesQueried,
            BuildState::Allocated,
            BuildState::Built,
            BuildState::AddressResolved,
        ] {
            state.advance_to(next).unwrap();
            assert_eq!(state, next);
        }
        assert_eq!(state.next(), None);
    }

    #[test]
    fn state_machine_rejects_skips() {
        let mut state = BuildState::SizesQueried;
        assert!(state.advance_to(BuildState::Built).is_err());
        assert_eq!(state, BuildState::SizesQueried);

        let mut state = BuildState::Built;
        assert!(state.advance_to(BuildState::Allocated).is_err());
    }

    #[test]
    fn scratch_is_max_of_batch() {
        let sizes = [
            BuildSizes {
                structure_size: 4096,
                scratch_size: 1024,
            },
            BuildSizes {
                structure_size: 512,
                scratch_size: 8192,
            },
            BuildSizes {
                structure_size: 1024,
                scratch_size: 256,
            },
        ];
        assert_eq!(shared_scratch_size(&sizes), 8192);
        assert_eq!(shared_scratch_size(&[]), 0);
    }

    #[test]
    fn every_build_is_followed_by_barrier() {
        assert_eq!(
            build_sequence(3),
            vec![
                BuildStep::Build(0),
                BuildStep::ScratchBarrier,
                BuildStep::Build(1),
                BuildStep::ScratchBarrier,
                BuildStep::Build(2),
                BuildStep::ScratchBarrier,
            ]
        );
        assert!(build_sequence(0).is_empty());
    }

    #[test]
    fn barrier_orders_build_writes_before_next_build() {
        let barrier = scratch_barrier();
        assert_eq!(
            barrier.src_stage_mask,
            vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR
        );
        assert_eq!(
            barrier.dst_stage_mask,
            vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR
        );
        assert!(barrier
            .src_access_mask
            .contains(vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR));
        assert!(barrier
            .dst_access_mask
            .contains(vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR));
    }

    #[test]
    fn unresolved_structure_has_no_address() {
        let blas = AccelerationStructure::unbuilt(AccelerationLevel::Bottom);
        assert!(matches!(
            blas.device_address(),
            Err(GpuError::CapacityViolation(_))
        ));
    }

    #[test]
    fn resolved_structure_reports_address() {
        let blas = AccelerationStructure::resolved_for_test(AccelerationLevel::Bottom, 0xABC0);
        assert_eq!(blas.device_address().unwrap(), 0xABC0);
    }

    #[test]
    fn destroy_is_idempotent() {
        let mut blas = AccelerationStructure::resolved_for_test(AccelerationLevel::Bottom, 0x100);
        blas.destroy();
        blas.destroy();
        assert_eq!(blas.state(), BuildState::Unbuilt);
        assert!(blas.device_address().is_err());
    }

    #[test]
    fn primitive_counts_are_checked_against_device_limits() {
        let caps = RayTracingCapabilities {
            max_primitive_count: 1000,
            max_instance_count: 4,
            ..Default::default()
        };

        assert!(check_primitive_limit(AccelerationLevel::Bottom, 1000, &caps).is_ok());
        assert!(matches!(
            check_primitive_limit(AccelerationLevel::Bottom, 1001, &caps),
            Err(GpuError::CapacityViolation(_))
        ));

        assert!(check_primitive_limit(AccelerationLevel::Top, 4, &caps).is_ok());
        assert!(matches!(
            check_primitive_limit(AccelerationLevel::Top, 5, &caps),
            Err(GpuError::CapacityViolation(_))
        ));
        // Instance limit does not apply to triangles
        assert!(check_primitive_limit(AccelerationLevel::Bottom, 5, &caps).is_ok());
    }

    #[test]
    fn options_map_to_flags() {
        let options = BuildOptions::default();
        assert_eq!(
            options.build_flags(),
            vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE
        );
        assert_eq!(options.geometry_flags(), vk::GeometryFlagsKHR::OPAQUE);

        let options = options
            .with_preference(BuildPreference::FastBuild)
            .with_opaque(false);
        assert_eq!(
            options.build_flags(),
            vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_BUILD
        );
        assert!(options.geometry_flags().is_empty());
    }
}
