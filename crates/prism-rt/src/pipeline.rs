//! Ray tracing pipeline creation and dispatch.

use crate::registry::ShaderStageRegistry;
use crate::sbt::{SbtLayout, ShaderBindingTable};
use ash::vk;
use prism_gpu::{GpuContext, GpuError, RayTracingCapabilities, Result};
use std::sync::Arc;

/// A ray tracing pipeline and the binding table written from its groups.
///
/// The pipeline layout is borrowed from the caller and must outlive the
/// pipeline.
pub struct RayTracePipeline {
    device: Arc<ash::Device>,
    loader: ash::khr::ray_tracing_pipeline::Device,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    sbt: ShaderBindingTable,
    max_recursion_depth: u32,
}

impl RayTracePipeline {
    /// Create the pipeline from the registry's stages and groups, then
    /// write its binding table.
    pub fn new(
        ctx: &GpuContext,
        layout: vk::PipelineLayout,
        registry: &ShaderStageRegistry,
        max_recursion_depth: u32,
    ) -> Result<Self> {
        let loader = ctx.ray_tracing_pipeline_loader()?.clone();
        let caps = ctx.ray_tracing_capabilities()?;
        let sbt_layout = registry.layout()?;
        check_limits(caps, &sbt_layout, max_recursion_depth)?;

        let stage_layout = registry.finalize()?;
        let stages = stage_layout.stage_create_infos();
        let groups = stage_layout.group_create_infos();

        let pipeline_info = vk::RayTracingPipelineCreateInfoKHR::default()
            .stages(&stages)
            .groups(&groups)
            .max_pipeline_ray_recursion_depth(max_recursion_depth)
            .layout(layout);

        let pipelines = unsafe {
            loader.create_ray_tracing_pipelines(
                vk::DeferredOperationKHR::null(),
                vk::PipelineCache::null(),
                std::slice::from_ref(&pipeline_info),
                None,
            )
        }
        .map_err(|e| GpuError::PipelineCreation(format!("ray tracing pipeline: {e:?}")))?;

        let pipeline = pipelines.first().copied().ok_or_else(|| {
            GpuError::PipelineCreation("driver returned no pipeline".to_string())
        })?;

        let sbt = match ShaderBindingTable::new(ctx, pipeline, sbt_layout) {
            Ok(sbt) => sbt,
            Err(e) => {
                unsafe { ctx.device().destroy_pipeline(pipeline, None) };
                return Err(e);
            }
        };

        tracing::info!(
            "Created ray tracing pipeline: {} stages, {} groups, recursion depth {}",
            stages.len(),
            groups.len(),
            max_recursion_depth
        );

        Ok(Self {
            device: ctx.device_arc(),
            loader,
            pipeline,
            layout,
            sbt,
            max_recursion_depth,
        })
    }

    /// Raw pipeline handle.
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Layout the pipeline was created with. Owned by the caller.
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    /// Binding table filled from this pipeline's group handles.
    pub fn sbt(&self) -> &ShaderBindingTable {
        &self.sbt
    }

    /// Mutable access to the binding table, for reading it back.
    pub fn sbt_mut(&mut self) -> &mut ShaderBindingTable {
        &mut self.sbt
    }

    /// Recursion depth requested at creation.
    pub fn max_recursion_depth(&self) -> u32 {
        self.max_recursion_depth
    }

    /// Bind the pipeline and dispatch `width * height` rays.
    ///
    /// # Safety
    /// The command buffer must be recording, and any descriptor sets the
    /// shaders read must already be bound.
    pub unsafe fn record_trace(&self, cmd: vk::CommandBuffer, width: u32, height: u32) {
        self.device
            .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::RAY_TRACING_KHR, self.pipeline);
        self.sbt
            .regions()
            .trace_rays(&self.loader, cmd, width, height, 1);
    }
}

impl Drop for RayTracePipeline {
    fn drop(&mut self) {
        self.sbt.destroy();
        unsafe { self.device.destroy_pipeline(self.pipeline, None) };
    }
}

fn check_limits(
    caps: &RayTracingCapabilities,
    layout: &SbtLayout,
    max_recursion_depth: u32,
) -> Result<()> {
    if max_recursion_depth > caps.max_ray_recursion_depth {
        return Err(GpuError::CapacityViolation(format!(
            "recursion depth {max_recursion_depth} exceeds device limit {}",
            caps.max_ray_recursion_depth
        )));
    }
    if layout.handle_size() != caps.shader_group_handle_size {
        return Err(GpuError::CapacityViolation(format!(
            "registry handle size {} does not match device handle size {}",
            layout.handle_size(),
            caps.shader_group_handle_size
        )));
    }
    let base_alignment = u64::from(caps.shader_group_base_alignment.max(1));
    if layout.group_alignment() % base_alignment != 0 {
        return Err(GpuError::CapacityViolation(format!(
            "group alignment {} is not a multiple of base alignment {base_alignment}",
            layout.group_alignment()
        )));
    }
    Ok(())
}

/// Create a shader module from SPIR-V words.
///
/// # Safety
/// The device must be valid and `code` must be valid SPIR-V.
pub unsafe fn create_shader_module(device: &ash::Device, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::default().code(code);
    device
        .create_shader_module(&create_info, None)
        .map_err(|e| GpuError::PipelineCreation(format!("Failed to create shader module: {e}")))
}

/// Read SPIR-V bytes into aligned words.
pub fn load_spirv(bytes: &[u8]) -> Result<Vec<u32>> {
    ash::util::read_spv(&mut std::io::Cursor::new(bytes))
        .map_err(|e| GpuError::PipelineCreation(format!("Invalid SPIR-V: {e}")))
}
