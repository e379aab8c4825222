//! Pipeline over the shaders embedded by `prism-shaders`.

use crate::pipeline::{create_shader_module, RayTracePipeline};
use crate::registry::{ShaderStage, ShaderStageRegistry, StageKind};
use ash::vk;
use prism_gpu::{GpuContext, GpuError, RayTracingCapabilities, Result};
use prism_shaders::{HIT_GROUP_COUNT, MISS_GROUP_COUNT};
use std::sync::Arc;

/// Shader modules for the embedded raygen, hit and miss shaders, plus the
/// empty pipeline layout they run under.
///
/// Must outlive every pipeline created from it.
pub struct EmbeddedShaderSet {
    device: Arc<ash::Device>,
    raygen: vk::ShaderModule,
    closest_hits: Vec<vk::ShaderModule>,
    misses: Vec<vk::ShaderModule>,
    pipeline_layout: vk::PipelineLayout,
}

impl EmbeddedShaderSet {
    /// Create a module per embedded shader and an empty pipeline layout.
    pub fn load(ctx: &GpuContext) -> Result<Self> {
        let device = ctx.device();
        let mut set = Self {
            device: ctx.device_arc(),
            raygen: vk::ShaderModule::null(),
            closest_hits: Vec::new(),
            misses: Vec::new(),
            pipeline_layout: vk::PipelineLayout::null(),
        };

        // Partially loaded sets are cleaned up by Drop
        unsafe {
            set.raygen = create_shader_module(device, prism_shaders::raygen_shader())?;
            for code in prism_shaders::closest_hit_shaders() {
                set.closest_hits.push(create_shader_module(device, code)?);
            }
            for code in prism_shaders::miss_shaders() {
                set.misses.push(create_shader_module(device, code)?);
            }
            set.pipeline_layout = device
                .create_pipeline_layout(&vk::PipelineLayoutCreateInfo::default(), None)
                .map_err(|e| GpuError::PipelineCreation(format!("empty pipeline layout: {e}")))?;
        }

        tracing::debug!(
            "Loaded embedded shaders: {} hit, {} miss",
            set.closest_hits.len(),
            set.misses.len()
        );
        Ok(set)
    }

    /// Registry with raygen, one closest-hit per hit group and one miss per
    /// miss group.
    pub fn registry(&self, caps: &RayTracingCapabilities) -> Result<ShaderStageRegistry> {
        let mut registry = ShaderStageRegistry::for_device(HIT_GROUP_COUNT, MISS_GROUP_COUNT, caps);
        registry.set_raygen_stage(ShaderStage::new(self.raygen, StageKind::Raygen))?;
        for (index, &module) in (0..).zip(&self.closest_hits) {
            registry
                .add_stage_to_hit_group(&[ShaderStage::new(module, StageKind::ClosestHit)], index)?;
        }
        for (index, &module) in (0..).zip(&self.misses) {
            registry.add_stage_to_miss_group(ShaderStage::new(module, StageKind::Miss), index)?;
        }
        Ok(registry)
    }

    /// Layout with no descriptor sets and no push constants.
    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }

    /// Build a pipeline and binding table over the embedded shaders.
    pub fn create_pipeline(
        &self,
        ctx: &GpuContext,
        max_recursion_depth: u32,
    ) -> Result<RayTracePipeline> {
        let registry = self.registry(ctx.ray_tracing_capabilities()?)?;
        RayTracePipeline::new(ctx, self.pipeline_layout, &registry, max_recursion_depth)
    }
}

impl Drop for EmbeddedShaderSet {
    fn drop(&mut self) {
        unsafe {
            if self.pipeline_layout != vk::PipelineLayout::null() {
                self.device.destroy_pipeline_layout(self.pipeline_layout, None);
            }
            for &module in self.closest_hits.iter().chain(&self.misses) {
                self.device.destroy_shader_module(module, None);
            }
            if self.raygen != vk::ShaderModule::null() {
                self.device.destroy_shader_module(self.raygen, None);
            }
        }
    }
}
