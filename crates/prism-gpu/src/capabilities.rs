//! GPU capability detection.

use ash::vk;
use prism_core::align_up;
use std::collections::HashSet;
use std::ffi::CStr;

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

/// Detected GPU capabilities.
#[derive(Debug, Clone)]
pub struct GpuCapabilities {
    /// GPU vendor
    pub vendor: GpuVendor,
    /// Device name
    pub device_name: String,
    /// Vulkan API version
    pub api_version: u32,
    /// Driver version
    pub driver_version: u32,

    /// Buffer device address support
    pub supports_buffer_device_address: bool,
    /// `VK_KHR_acceleration_structure` present
    pub supports_acceleration_structure: bool,
    /// `VK_KHR_ray_tracing_pipeline` present
    pub supports_ray_tracing_pipeline: bool,

    /// Device-local memory in MB
    pub device_local_memory_mb: u64,

    // Available extensions
    pub available_extensions: HashSet<String>,
}

impl GpuCapabilities {
    /// Query capabilities from a physical device.
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let properties = instance.get_physical_device_properties(physical_device);
        let memory_properties = instance.get_physical_device_memory_properties(physical_device);

        let extensions = instance
            .enumerate_device_extension_properties(physical_device)
            .unwrap_or_default();

        let available_extensions: HashSet<String> = extensions
            .iter()
            .filter_map(|ext| {
                CStr::from_ptr(ext.extension_name.as_ptr())
                    .to_str()
                    .ok()
                    .map(String::from)
            })
            .collect();

        let vendor = GpuVendor::from_vendor_id(properties.vendor_id);
        let device_name = CStr::from_ptr(properties.device_name.as_ptr())
            .to_string_lossy()
            .into_owned();

        let device_local_memory_mb: u64 = memory_properties
            .memory_heaps
            .iter()
            .take(memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size / (1024 * 1024))
            .sum();

        let api_version = properties.api_version;

        Self {
            vendor,
            device_name,
            api_version,
            driver_version: properties.driver_version,

            supports_buffer_device_address: has_vulkan_1_2(api_version)
                || available_extensions.contains("VK_KHR_buffer_device_address"),
            supports_acceleration_structure: available_extensions
                .contains("VK_KHR_acceleration_structure"),
            supports_ray_tracing_pipeline: available_extensions
                .contains("VK_KHR_ray_tracing_pipeline"),

            device_local_memory_mb,
            available_extensions,
        }
    }

    /// Check if the GPU can run the ray tracing build path.
    pub fn meets_requirements(&self, require_ray_tracing: bool) -> bool {
        if !has_vulkan_1_3(self.api_version) {
            return false;
        }

        // Geometry and instance descriptions are address based
        if !self.supports_buffer_device_address {
            return false;
        }

        if require_ray_tracing {
            return self.supports_acceleration_structure && self.supports_ray_tracing_pipeline;
        }

        true
    }

    /// Get a human-readable summary of capabilities.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}) - Vulkan {}.{}.{} - {} MB VRAM",
            self.device_name,
            self.vendor,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
            self.device_local_memory_mb,
        )
    }
}

/// Ray tracing limits that drive table layout and build sizing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RayTracingCapabilities {
    /// Size in bytes of one opaque shader group handle.
    pub shader_group_handle_size: u32,
    /// Required alignment of each handle inside a table record.
    pub shader_group_handle_alignment: u32,
    /// Required alignment of each table region base address.
    pub shader_group_base_alignment: u32,
    /// Maximum trace recursion depth.
    pub max_ray_recursion_depth: u32,
    /// Required alignment of scratch buffer addresses.
    pub min_scratch_offset_alignment: u32,
    /// Maximum primitives in one bottom-level structure.
    pub max_primitive_count: u64,
    /// Maximum instances in one top-level structure.
    pub max_instance_count: u64,
}

impl RayTracingCapabilities {
    /// Query ray tracing properties from a physical device.
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let mut pipeline_props = vk::PhysicalDeviceRayTracingPipelinePropertiesKHR::default();
        let mut as_props = vk::PhysicalDeviceAccelerationStructurePropertiesKHR::default();
        let mut properties2 = vk::PhysicalDeviceProperties2::default()
            .push_next(&mut pipeline_props)
            .push_next(&mut as_props);
        instance.get_physical_device_properties2(physical_device, &mut properties2);

        Self {
            shader_group_handle_size: pipeline_props.shader_group_handle_size,
            shader_group_handle_alignment: pipeline_props.shader_group_handle_alignment,
            shader_group_base_alignment: pipeline_props.shader_group_base_alignment,
            max_ray_recursion_depth: pipeline_props.max_ray_recursion_depth,
            min_scratch_offset_alignment: as_props
                .min_acceleration_structure_scratch_offset_alignment,
            max_primitive_count: as_props.max_primitive_count,
            max_instance_count: as_props.max_instance_count,
        }
    }

    /// Byte stride of one shader binding table record.
    ///
    /// Every record starts on a base-aligned boundary so each group can be
    /// addressed as the start of its own region.
    pub fn group_stride(&self) -> u32 {
        let handle = align_up(
            u64::from(self.shader_group_handle_size),
            u64::from(self.shader_group_handle_alignment),
        );
        align_up(handle, u64::from(self.shader_group_base_alignment)) as u32
    }
}

fn has_vulkan_1_2(api_version: u32) -> bool {
    let major = vk::api_version_major(api_version);
    major > 1 || (major == 1 && vk::api_version_minor(api_version) >= 2)
}

fn has_vulkan_1_3(api_version: u32) -> bool {
    let major = vk::api_version_major(api_version);
    major > 1 || (major == 1 && vk::api_version_minor(api_version) >= 3)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(api_version: u32, rt: bool) -> GpuCapabilities {
        GpuCapabilities {
            vendor: GpuVendor::Nvidia,
            device_name: "test".to_string(),
            api_version,
            driver_version: 0,
            supports_buffer_device_address: true,
            supports_acceleration_structure: rt,
            supports_ray_tracing_pipeline: rt,
            device_local_memory_mb: 4096,
            available_extensions: HashSet::new(),
        }
    }

    #[test]
    fn vendor_identification() {
        assert_eq!(GpuVendor::from_vendor_id(0x10DE), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from_vendor_id(0x1002), GpuVendor::Amd);
        assert_eq!(GpuVendor::from_vendor_id(0x8086), GpuVendor::Intel);
        assert_eq!(GpuVendor::from_vendor_id(0x1234), GpuVendor::Other(0x1234));
    }

    #[test]
    fn ray_tracing_requirement() {
        let v13 = vk::make_api_version(0, 1, 3, 0);
        assert!(caps(v13, true).meets_requirements(true));
        assert!(!caps(v13, false).meets_requirements(true));
        assert!(caps(v13, false).meets_requirements(false));
        assert!(!caps(vk::make_api_version(0, 1, 2, 0), true).meets_requirements(true));
    }

    #[test]
    fn group_stride_uses_base_alignment() {
        let rt = RayTracingCapabilities {
            shader_group_handle_size: 32,
            shader_group_handle_alignment: 32,
            shader_group_base_alignment: 64,
            ..Default::default()
        };
        assert_eq!(rt.group_stride(), 64);
    }

    #[test]
    fn group_stride_fits_oversized_handle() {
        let rt = RayTracingCapabilities {
            shader_group_handle_size: 80,
            shader_group_handle_alignment: 16,
            shader_group_base_alignment: 64,
            ..Default::default()
        };
        assert_eq!(rt.group_stride(), 128);
    }
}
