//! Device-memory-backed buffers.
//!
//! Buffers here own a dedicated `VkDeviceMemory` allocation bound at offset
//! zero. Memory type selection, the device-address allocate flag and cleanup
//! on every failure path are handled in [`GpuBuffer::new`].

use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use ash::vk;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::Arc;

/// Find the first memory type allowed by `type_bits` whose property flags
/// are a superset of `required`.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..memory_properties.memory_type_count).find(|&index| {
        type_bits & (1 << index) != 0
            && memory_properties.memory_types[index as usize]
                .property_flags
                .contains(required)
    })
}

/// Clamp a mapping request to the bounds of a resource.
///
/// Returns the length that may be mapped starting at `offset`, or `None`
/// when the offset lies outside the resource or nothing would be mapped.
pub fn clamp_map_range(resource_size: u64, offset: u64, requested: u64) -> Option<u64> {
    if offset >= resource_size || requested == 0 {
        return None;
    }
    Some(requested.min(resource_size - offset))
}

/// A buffer with its own device memory.
///
/// The buffer is exclusively owned by whatever created it (a mesh, an
/// acceleration structure or a binding table) and is released on drop.
/// All buffers must be dropped before the [`GpuContext`] they came from.
pub struct GpuBuffer {
    device: Arc<ash::Device>,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    /// Requested size in bytes.
    size: u64,
    /// Size the driver actually required, may exceed `size`.
    allocation_size: u64,
    usage: vk::BufferUsageFlags,
    properties: vk::MemoryPropertyFlags,
    device_address: Option<vk::DeviceAddress>,
    name: String,
}

impl GpuBuffer {
    /// Create a buffer, allocate memory for it and bind at offset 0.
    ///
    /// Nothing is leaked if any step fails: partially created objects are
    /// destroyed before the error is returned.
    pub fn new(
        ctx: &GpuContext,
        size: u64,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
        name: &str,
    ) -> Result<Self> {
        if size == 0 {
            return Err(GpuError::AllocationFailed(format!(
                "{name}: zero-sized buffer"
            )));
        }

        let device = ctx.device_arc();

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.create_buffer(&buffer_info, None) }
            .map_err(|e| GpuError::AllocationFailed(format!("{name}: create buffer: {e}")))?;

        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let Some(memory_type_index) =
            find_memory_type(ctx.memory_properties(), requirements.memory_type_bits, properties)
        else {
            unsafe { device.destroy_buffer(buffer, None) };
            return Err(GpuError::AllocationFailed(format!(
                "{name}: no memory type with {properties:?}"
            )));
        };

        let wants_address = usage.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS);
        let mut flags_info =
            vk::MemoryAllocateFlagsInfo::default().flags(vk::MemoryAllocateFlags::DEVICE_ADDRESS);
        let mut alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);
        if wants_address {
            alloc_info = alloc_info.push_next(&mut flags_info);
        }

        let memory = match unsafe { device.allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(GpuError::AllocationFailed(format!(
                    "{name}: allocate {} bytes: {e}",
                    requirements.size
                )));
            }
        };

        if let Err(e) = unsafe { device.bind_buffer_memory(buffer, memory, 0) } {
            unsafe {
                device.free_memory(memory, None);
                device.destroy_buffer(buffer, None);
            }
            return Err(GpuError::AllocationFailed(format!(
                "{name}: bind memory: {e}"
            )));
        }

        let device_address = wants_address.then(|| {
            let info = vk::BufferDeviceAddressInfo::default().buffer(buffer);
            unsafe { device.get_buffer_device_address(&info) }
        });

        tracing::trace!(
            "Created buffer {name}: {size} bytes ({} allocated), type {memory_type_index}",
            requirements.size
        );

        Ok(Self {
            device,
            buffer,
            memory,
            size,
            allocation_size: requirements.size,
            usage,
            properties,
            device_address,
            name: name.to_string(),
        })
    }

    /// Raw buffer handle.
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Requested size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Size of the backing allocation in bytes.
    pub fn allocation_size(&self) -> u64 {
        self.allocation_size
    }

    /// Usage flags the buffer was created with.
    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    /// Memory property flags that were requested.
    pub fn memory_properties(&self) -> vk::MemoryPropertyFlags {
        self.properties
    }

    /// Debug name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether [`destroy`](Self::destroy) has already run.
    pub fn is_destroyed(&self) -> bool {
        self.buffer == vk::Buffer::null()
    }

    /// GPU virtual address of the buffer.
    ///
    /// Only buffers created with `SHADER_DEVICE_ADDRESS` usage have one.
    pub fn device_address(&self) -> Result<vk::DeviceAddress> {
        self.device_address.ok_or_else(|| {
            GpuError::InvalidState(format!(
                "{}: buffer was not created with SHADER_DEVICE_ADDRESS usage",
                self.name
            ))
        })
    }

    /// Map `size` bytes starting at `offset` for host access.
    ///
    /// The size is clamped to the requested buffer size so the mapping never
    /// extends past the resource. Pass `vk::WHOLE_SIZE` to map everything
    /// from `offset`. The view is unmapped when the guard drops.
    pub fn map_memory(&mut self, size: u64, offset: u64) -> Result<MappedMemory<'_>> {
        if !self
            .properties
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
        {
            return Err(GpuError::InvalidState(format!(
                "{}: buffer is not host visible",
                self.name
            )));
        }
        if self.is_destroyed() {
            return Err(GpuError::InvalidState(format!(
                "{}: buffer already destroyed",
                self.name
            )));
        }

        let len = clamp_map_range(self.size, offset, size).ok_or_else(|| {
            GpuError::InvalidState(format!(
                "{}: cannot map {size} bytes at offset {offset} of {}",
                self.name, self.size
            ))
        })?;
        if len < size && size != vk::WHOLE_SIZE {
            tracing::warn!(
                "{}: mapping clamped from {size} to {len} bytes at offset {offset}",
                self.name
            );
        }

        let ptr = unsafe {
            self.device
                .map_memory(self.memory, offset, len, vk::MemoryMapFlags::empty())?
        };
        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| GpuError::InvalidState(format!("{}: null mapping", self.name)))?;

        Ok(MappedMemory {
            device: &self.device,
            memory: self.memory,
            ptr,
            len: len as usize,
            _buffer: PhantomData,
        })
    }

    /// Copy `data` into the buffer at `offset`.
    ///
    /// Bytes that would land past the end of the buffer are dropped, never
    /// written. Returns how many bytes were copied.
    pub fn upload_data(&mut self, data: &[u8], offset: u64) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }

        let mut mapped = self.map_memory(data.len() as u64, offset)?;
        let written = mapped.len();
        mapped.as_mut_slice().copy_from_slice(&data[..written]);
        mapped.unmap();

        if written < data.len() {
            tracing::warn!(
                "{}: upload truncated from {} to {written} bytes",
                self.name,
                data.len()
            );
        }

        Ok(written)
    }

    /// Copy a slice of plain data to the start of the buffer.
    pub fn upload<T: bytemuck::Pod>(&mut self, data: &[T]) -> Result<usize> {
        self.upload_data(bytemuck::cast_slice(data), 0)
    }

    /// Release the memory, then the buffer handle.
    ///
    /// Safe to call more than once; later calls do nothing. The caller must
    /// ensure the GPU no longer uses the buffer.
    pub fn destroy(&mut self) {
        unsafe {
            if self.memory != vk::DeviceMemory::null() {
                self.device.free_memory(self.memory, None);
                self.memory = vk::DeviceMemory::null();
            }
            if self.buffer != vk::Buffer::null() {
                self.device.destroy_buffer(self.buffer, None);
                self.buffer = vk::Buffer::null();
            }
        }
        self.device_address = None;
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Host view of a mapped buffer range, unmapped on drop.
pub struct MappedMemory<'a> {
    device: &'a ash::Device,
    memory: vk::DeviceMemory,
    ptr: NonNull<u8>,
    len: usize,
    _buffer: PhantomData<&'a mut GpuBuffer>,
}

impl MappedMemory<'_> {
    /// Mapped length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the mapping is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Mapped bytes.
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Mapped bytes, writable.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// End host access explicitly.
    pub fn unmap(self) {
        drop(self);
    }
}

impl Drop for MappedMemory<'_> {
    fn drop(&mut self) {
        unsafe { self.device.unmap_memory(self.memory) };
    }
}
