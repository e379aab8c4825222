//! GPU context management.
//!
//! A [`GpuContext`] is passed by reference to everything that creates GPU
//! objects. It carries the device, the memory properties used for memory
//! type selection, the queue and command pool used for blocking builds and
//! the ray tracing extension loaders.

use crate::capabilities::{GpuCapabilities, RayTracingCapabilities};
use crate::command::CommandPool;
use crate::error::{GpuError, Result};
use crate::instance::{create_instance, select_physical_device};
use ash::vk;
use parking_lot::Mutex;
use std::ffi::{c_char, CStr};
use std::sync::Arc;

/// Main GPU context holding Vulkan resources.
pub struct GpuContext {
    // Entry must be kept alive for the lifetime of the context
    #[allow(dead_code)]
    pub(crate) entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) device: Arc<ash::Device>,
    pub(crate) capabilities: GpuCapabilities,
    pub(crate) ray_tracing: Option<RayTracingCapabilities>,
    pub(crate) memory_properties: vk::PhysicalDeviceMemoryProperties,

    pub(crate) queue_family: u32,
    pub(crate) queue: vk::Queue,
    pub(crate) command_pool: Mutex<CommandPool>,

    pub(crate) acceleration_structure: Option<ash::khr::acceleration_structure::Device>,
    pub(crate) ray_tracing_pipeline: Option<ash::khr::ray_tracing_pipeline::Device>,
}

impl GpuContext {
    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get a shared handle to the device.
    pub fn device_arc(&self) -> Arc<ash::Device> {
        Arc::clone(&self.device)
    }

    /// Get the Vulkan instance handle.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the physical device handle.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get GPU capabilities.
    pub fn capabilities(&self) -> &GpuCapabilities {
        &self.capabilities
    }

    /// Get the memory properties used for memory type selection.
    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    /// Get ray tracing limits.
    pub fn ray_tracing_capabilities(&self) -> Result<&RayTracingCapabilities> {
        self.ray_tracing
            .as_ref()
            .ok_or_else(|| GpuError::ExtensionNotSupported("ray tracing".to_string()))
    }

    /// Get the queue used for build submissions.
    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    /// Get the queue family index of [`queue`](Self::queue).
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Get the command pool for one-shot command buffers.
    pub fn command_pool(&self) -> &Mutex<CommandPool> {
        &self.command_pool
    }

    /// Get the `VK_KHR_acceleration_structure` loader.
    pub fn acceleration_structure_loader(
        &self,
    ) -> Result<&ash::khr::acceleration_structure::Device> {
        self.acceleration_structure.as_ref().ok_or_else(|| {
            GpuError::ExtensionNotSupported(
                ash::khr::acceleration_structure::NAME
                    .to_string_lossy()
                    .into_owned(),
            )
        })
    }

    /// Get the `VK_KHR_ray_tracing_pipeline` loader.
    pub fn ray_tracing_pipeline_loader(&self) -> Result<&ash::khr::ray_tracing_pipeline::Device> {
        self.ray_tracing_pipeline.as_ref().ok_or_else(|| {
            GpuError::ExtensionNotSupported(
                ash::khr::ray_tracing_pipeline::NAME
                    .to_string_lossy()
                    .into_owned(),
            )
        })
    }

    /// Wait for device to be idle.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            self.command_pool.lock().destroy(&self.device);

            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

/// Builder for creating a GPU context.
pub struct GpuContextBuilder {
    app_name: String,
    enable_validation: bool,
    require_ray_tracing: bool,
}

impl Default for GpuContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "Prism".to_string(),
            enable_validation: cfg!(debug_assertions),
            require_ray_tracing: true,
        }
    }
}

impl GpuContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Require (default) or skip the ray tracing extensions.
    pub fn require_ray_tracing(mut self, require: bool) -> Self {
        self.require_ray_tracing = require;
        self
    }

    /// Build the GPU context.
    pub fn build(self) -> Result<GpuContext> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GpuError::Other(format!("Failed to load Vulkan: {e}")))?;

        let instance = unsafe { create_instance(&entry, &self.app_name, self.enable_validation) }?;

        let physical_device =
            match unsafe { select_physical_device(&instance, self.require_ray_tracing) } {
                Ok(device) => device,
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            };

        let capabilities = unsafe { GpuCapabilities::query(&instance, physical_device) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };
        let ray_tracing_enabled = self.require_ray_tracing
            || (capabilities.supports_acceleration_structure
                && capabilities.supports_ray_tracing_pipeline);

        tracing::info!("Selected GPU: {}", capabilities.summary());

        let device_and_queue = unsafe {
            find_queue_family(&instance, physical_device).and_then(|queue_family| {
                create_device(&instance, physical_device, queue_family, ray_tracing_enabled)
                    .map(|(device, queue)| (device, queue, queue_family))
            })
        };
        let (device, queue, queue_family) = match device_and_queue {
            Ok(created) => created,
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        };

        let command_pool = match unsafe {
            CommandPool::new(
                &device,
                queue_family,
                vk::CommandPoolCreateFlags::TRANSIENT
                    | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            )
        } {
            Ok(pool) => pool,
            Err(e) => {
                unsafe {
                    device.destroy_device(None);
                    instance.destroy_instance(None);
                }
                return Err(e);
            }
        };

        let (ray_tracing, acceleration_structure, ray_tracing_pipeline) = if ray_tracing_enabled {
            let rt = unsafe { RayTracingCapabilities::query(&instance, physical_device) };
            tracing::info!(
                "Ray tracing: handle size {}, base alignment {}, max recursion {}",
                rt.shader_group_handle_size,
                rt.shader_group_base_alignment,
                rt.max_ray_recursion_depth
            );
            (
                Some(rt),
                Some(ash::khr::acceleration_structure::Device::new(
                    &instance, &device,
                )),
                Some(ash::khr::ray_tracing_pipeline::Device::new(
                    &instance, &device,
                )),
            )
        } else {
            (None, None, None)
        };

        Ok(GpuContext {
            entry,
            instance,
            physical_device,
            device: Arc::new(device),
            capabilities,
            ray_tracing,
            memory_properties,
            queue_family,
            queue,
            command_pool: Mutex::new(command_pool),
            acceleration_structure,
            ray_tracing_pipeline,
        })
    }
}

/// Find a queue family that can record acceleration structure builds and
/// trace dispatches.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn find_queue_family(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<u32> {
    let queue_families = instance.get_physical_device_queue_family_properties(physical_device);

    queue_families
        .iter()
        .position(|family| {
            family
                .queue_flags
                .contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
        })
        .or_else(|| {
            queue_families
                .iter()
                .position(|family| family.queue_flags.contains(vk::QueueFlags::COMPUTE))
        })
        .map(|index| index as u32)
        .ok_or(GpuError::NoSuitableDevice)
}

/// Device extensions needed for the ray tracing path.
fn ray_tracing_device_extensions() -> Vec<&'static CStr> {
    vec![
        ash::khr::acceleration_structure::NAME,
        ash::khr::ray_tracing_pipeline::NAME,
        ash::khr::deferred_host_operations::NAME,
    ]
}

/// Create the logical device and retrieve the build queue.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_family: u32,
    ray_tracing: bool,
) -> Result<(ash::Device, vk::Queue)> {
    let queue_priority = 1.0_f32;
    let queue_create_info = vk::DeviceQueueCreateInfo::default()
        .queue_family_index(queue_family)
        .queue_priorities(std::slice::from_ref(&queue_priority));

    let extensions = if ray_tracing {
        ray_tracing_device_extensions()
    } else {
        Vec::new()
    };
    let extension_names: Vec<*const c_char> = extensions.iter().map(|ext| ext.as_ptr()).collect();

    let mut vulkan_1_3_features = vk::PhysicalDeviceVulkan13Features::default()
        .synchronization2(true)
        .maintenance4(true);

    let mut vulkan_1_2_features =
        vk::PhysicalDeviceVulkan12Features::default().buffer_device_address(true);

    let mut acceleration_structure_features =
        vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default()
            .acceleration_structure(true);
    let mut ray_tracing_features =
        vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::default().ray_tracing_pipeline(true);

    let features = vk::PhysicalDeviceFeatures::default().shader_int64(true);

    let mut features2 = vk::PhysicalDeviceFeatures2::default()
        .features(features)
        .push_next(&mut vulkan_1_3_features)
        .push_next(&mut vulkan_1_2_features);
    if ray_tracing {
        features2 = features2
            .push_next(&mut acceleration_structure_features)
            .push_next(&mut ray_tracing_features);
    }

    let queue_create_infos = [queue_create_info];
    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names)
        .push_next(&mut features2);

    let device = instance
        .create_device(physical_device, &device_create_info, None)
        .map_err(GpuError::from)?;

    let queue = device.get_device_queue(queue_family, 0);

    Ok((device, queue))
}
