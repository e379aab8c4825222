//! Shader Binding Table (SBT) layout and buffer.
//!
//! The table is one buffer of fixed-size records, one per shader group:
//!
//! ```text
//! offset:  0        A          (1+H)A        (1+H+M)A
//!          | raygen | hit 0..H | miss 0..M   |
//! ```
//!
//! Record `g` starts at `g * A` where `A` is the group alignment. Each
//! record holds the driver's opaque group handle followed by padding.
//! Callable shaders are not used.

use ash::vk;
use prism_core::align_up;
use prism_gpu::{GpuBuffer, GpuContext, GpuError, Result};

/// Byte layout of a binding table with one raygen, `H` hit and `M` miss
/// records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbtLayout {
    hit_group_count: u32,
    miss_group_count: u32,
    handle_size: u32,
    group_alignment: u32,
}

impl SbtLayout {
    /// Validate and build a layout. The alignment must hold at least one handle.
    pub fn new(
        hit_group_count: u32,
        miss_group_count: u32,
        handle_size: u32,
        group_alignment: u32,
    ) -> Result<Self> {
        if handle_size == 0 {
            return Err(GpuError::CapacityViolation(
                "shader group handle size is zero".to_string(),
            ));
        }
        if group_alignment < handle_size {
            return Err(GpuError::CapacityViolation(format!(
                "group alignment {group_alignment} smaller than handle size {handle_size}"
            )));
        }

        Ok(Self {
            hit_group_count,
            miss_group_count,
            handle_size,
            group_alignment,
        })
    }

    /// Number of hit records.
    pub fn hit_group_count(&self) -> u32 {
        self.hit_group_count
    }

    /// Number of miss records.
    pub fn miss_group_count(&self) -> u32 {
        self.miss_group_count
    }

    /// Bytes of driver handle at the start of each record.
    pub fn handle_size(&self) -> u32 {
        self.handle_size
    }

    /// Record stride.
    pub fn group_alignment(&self) -> u64 {
        u64::from(self.group_alignment)
    }

    /// Records in the table: raygen, hits, misses.
    pub fn group_count(&self) -> u32 {
        1 + self.hit_group_count + self.miss_group_count
    }

    /// Bytes spanned by all records.
    pub fn table_size(&self) -> u64 {
        u64::from(self.group_count()) * self.group_alignment()
    }

    /// Byte offset of the record for `group_index`.
    pub fn record_offset(&self, group_index: u32) -> u64 {
        u64::from(group_index) * self.group_alignment()
    }

    /// The raygen record always comes first.
    pub fn raygen_offset(&self) -> u64 {
        0
    }

    /// Bytes of the raygen region, one record.
    pub fn raygen_size(&self) -> u64 {
        self.group_alignment()
    }

    /// Start of the hit region.
    pub fn hit_offset(&self) -> u64 {
        self.record_offset(1)
    }

    /// Bytes of the hit region.
    pub fn hit_size(&self) -> u64 {
        u64::from(self.hit_group_count) * self.group_alignment()
    }

    /// Start of the miss region, right after the last hit record.
    pub fn miss_offset(&self) -> u64 {
        self.record_offset(1 + self.hit_group_count)
    }

    /// Bytes of the miss region.
    pub fn miss_size(&self) -> u64 {
        u64::from(self.miss_group_count) * self.group_alignment()
    }

    /// Size of the handle blob the driver returns for every group.
    pub fn handle_data_size(&self) -> usize {
        self.group_count() as usize * self.handle_size as usize
    }

    /// Copy each group's handle from the packed `handles` blob into its
    /// record in `table`. Padding bytes are zeroed.
    pub fn write_records(&self, handles: &[u8], table: &mut [u8]) -> Result<()> {
        if handles.len() != self.handle_data_size() {
            return Err(GpuError::HandleQuery(format!(
                "expected {} handle bytes for {} groups, got {}",
                self.handle_data_size(),
                self.group_count(),
                handles.len()
            )));
        }
        let table_size = self.table_size() as usize;
        if table.len() < table_size {
            return Err(GpuError::CapacityViolation(format!(
                "table of {} bytes cannot hold {table_size} bytes of records",
                table.len()
            )));
        }

        let stride = self.group_alignment() as usize;
        let handle_size = self.handle_size as usize;
        table[..table_size].fill(0);
        for (handle, record) in handles
            .chunks_exact(handle_size)
            .zip(table.chunks_exact_mut(stride))
        {
            record[..handle_size].copy_from_slice(handle);
        }
        Ok(())
    }

    /// The handle bytes of record `group_index` within a written `table`.
    pub fn record_handle<'t>(&self, table: &'t [u8], group_index: u32) -> Option<&'t [u8]> {
        if group_index >= self.group_count() {
            return None;
        }
        let start = usize::try_from(self.record_offset(group_index)).ok()?;
        table.get(start..start + self.handle_size as usize)
    }

    /// Dispatch regions for a table starting at `base`.
    pub fn regions(&self, base: vk::DeviceAddress) -> SbtRegions {
        let stride = self.group_alignment();
        SbtRegions {
            raygen: vk::StridedDeviceAddressRegionKHR {
                device_address: base + self.raygen_offset(),
                stride,
                size: self.raygen_size(),
            },
            hit: vk::StridedDeviceAddressRegionKHR {
                device_address: base + self.hit_offset(),
                stride,
                size: self.hit_size(),
            },
            miss: vk::StridedDeviceAddressRegionKHR {
                device_address: base + self.miss_offset(),
                stride,
                size: self.miss_size(),
            },
            callable: vk::StridedDeviceAddressRegionKHR::default(),
        }
    }
}

/// Strided address regions passed to a trace dispatch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SbtRegions {
    pub raygen: vk::StridedDeviceAddressRegionKHR,
    pub hit: vk::StridedDeviceAddressRegionKHR,
    pub miss: vk::StridedDeviceAddressRegionKHR,
    /// Always empty.
    pub callable: vk::StridedDeviceAddressRegionKHR,
}

impl SbtRegions {
    /// Record a trace dispatch of `width * height * depth` rays.
    ///
    /// # Safety
    /// The command buffer must be recording with the owning ray tracing
    /// pipeline bound, and the table must outlive its execution.
    pub unsafe fn trace_rays(
        &self,
        loader: &ash::khr::ray_tracing_pipeline::Device,
        cmd: vk::CommandBuffer,
        width: u32,
        height: u32,
        depth: u32,
    ) {
        loader.cmd_trace_rays(
            cmd,
            &self.raygen,
            &self.miss,
            &self.hit,
            &self.callable,
            width,
            height,
            depth,
        );
    }
}

/// A binding table written from a pipeline's group handles.
pub struct ShaderBindingTable {
    buffer: GpuBuffer,
    layout: SbtLayout,
    base_address: vk::DeviceAddress,
    // Bytes between the buffer start and record 0
    base_offset: u64,
    regions: SbtRegions,
}

impl ShaderBindingTable {
    /// Query every group handle of `pipeline` and write the table.
    ///
    /// The pipeline's groups must be in `layout` order.
    pub fn new(ctx: &GpuContext, pipeline: vk::Pipeline, layout: SbtLayout) -> Result<Self> {
        let loader = ctx.ray_tracing_pipeline_loader()?;

        let handles = unsafe {
            loader.get_ray_tracing_shader_group_handles(
                pipeline,
                0,
                layout.group_count(),
                layout.handle_data_size(),
            )
        }
        .map_err(|e| GpuError::HandleQuery(format!("{} groups: {e}", layout.group_count())))?;

        // Over-allocate so the start can be moved up to a record boundary.
        let alignment = layout.group_alignment();
        let mut buffer = GpuBuffer::new(
            ctx,
            layout.table_size() + alignment,
            vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            "shader_binding_table",
        )?;

        let buffer_address = buffer.device_address()?;
        let base_address = align_up(buffer_address, alignment);
        let base_offset = base_address - buffer_address;

        let mut mapped = buffer.map_memory(layout.table_size(), base_offset)?;
        layout.write_records(&handles, mapped.as_mut_slice())?;
        mapped.unmap();

        let regions = layout.regions(base_address);

        tracing::info!(
            "Created shader binding table: {} groups, stride {}, {} bytes",
            layout.group_count(),
            alignment,
            layout.table_size()
        );
        tracing::debug!(
            "SBT regions: raygen 0x{:x}, hit 0x{:x} ({} bytes), miss 0x{:x} ({} bytes)",
            regions.raygen.device_address,
            regions.hit.device_address,
            regions.hit.size,
            regions.miss.device_address,
            regions.miss.size
        );

        Ok(Self {
            buffer,
            layout,
            base_address,
            base_offset,
            regions,
        })
    }

    /// Record layout of the table.
    pub fn layout(&self) -> &SbtLayout {
        &self.layout
    }

    /// Dispatch regions over this table.
    pub fn regions(&self) -> &SbtRegions {
        &self.regions
    }

    /// Address of record 0.
    pub fn base_address(&self) -> vk::DeviceAddress {
        self.base_address
    }

    /// Backing buffer, including the leading alignment padding.
    pub fn buffer(&self) -> &GpuBuffer {
        &self.buffer
    }

    /// Copy the table back from device memory, starting at record 0.
    ///
    /// The result is `table_size` bytes long, so record `g` starts at
    /// `g * group_alignment`.
    pub fn read_records(&mut self) -> Result<Vec<u8>> {
        let table_size = self.layout.table_size();
        let mapped = self.buffer.map_memory(table_size, self.base_offset)?;
        let records = mapped.as_slice().to_vec();
        mapped.unmap();

        if records.len() as u64 != table_size {
            return Err(GpuError::CapacityViolation(format!(
                "read {} of {table_size} table bytes",
                records.len()
            )));
        }
        Ok(records)
    }

    /// Release the table buffer. The GPU must no longer read it.
    pub fn destroy(&mut self) {
        self.buffer.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HANDLE: u32 = 32;
    const ALIGN: u32 = 64;

    fn layout(hits: u32, misses: u32) -> SbtLayout {
        SbtLayout::new(hits, misses, HANDLE, ALIGN).unwrap()
    }

    #[test]
    fn table_size_covers_every_record() {
        assert_eq!(layout(2, 2).table_size(), 5 * 64);
        assert_eq!(layout(0, 1).table_size(), 2 * 64);
        assert_eq!(layout(3, 1).group_count(), 5);
    }

    #[test]
    fn region_offsets_and_sizes() {
        let layout = layout(2, 2);
        assert_eq!(layout.raygen_offset(), 0);
        assert_eq!(layout.raygen_size(), 64);
        assert_eq!(layout.hit_offset(), 64);
        assert_eq!(layout.hit_size(), 128);
        assert_eq!(layout.miss_offset(), 64 + 128);
        assert_eq!(layout.miss_size(), 128);
        assert_eq!(layout.record_offset(4), 256);
    }

    #[test]
    fn regions_are_strided_from_base() {
        let base = 0x10_0000;
        let regions = layout(2, 1).regions(base);

        assert_eq!(regions.raygen.device_address, base);
        assert_eq!(regions.raygen.stride, 64);
        assert_eq!(regions.raygen.size, regions.raygen.stride);

        assert_eq!(regions.hit.device_address, base + 64);
        assert_eq!(regions.hit.stride, 64);
        assert_eq!(regions.hit.size, 2 * 64);

        assert_eq!(regions.miss.device_address, base + 64 + 2 * 64);
        assert_eq!(regions.miss.stride, 64);
        assert_eq!(regions.miss.size, 64);

        assert_eq!(regions.callable.device_address, 0);
        assert_eq!(regions.callable.size, 0);
    }

    #[test]
    fn handles_read_back_at_record_offsets() {
        let layout = layout(2, 1);
        let handles: Vec<u8> = (0..layout.group_count())
            .flat_map(|group| (0..HANDLE).map(move |byte| (group * 40 + byte) as u8))
            .collect();
        let mut table = vec![0xAA_u8; layout.table_size() as usize];

        layout.write_records(&handles, &mut table).unwrap();

        for group in 0..layout.group_count() {
            let offset = layout.record_offset(group) as usize;
            let expected = &handles[(group * HANDLE) as usize..((group + 1) * HANDLE) as usize];
            assert_eq!(&table[offset..offset + HANDLE as usize], expected);
            assert!(table[offset + HANDLE as usize..offset + ALIGN as usize]
                .iter()
                .all(|&b| b == 0));
        }
    }

    #[test]
    fn record_handle_slices_each_record() {
        let layout = layout(1, 1);
        let handles: Vec<u8> = (0..layout.group_count())
            .flat_map(|group| std::iter::repeat(group as u8 + 1).take(HANDLE as usize))
            .collect();
        let mut table = vec![0_u8; layout.table_size() as usize];
        layout.write_records(&handles, &mut table).unwrap();

        for group in 0..layout.group_count() {
            let handle = layout.record_handle(&table, group).unwrap();
            assert_eq!(handle.len(), HANDLE as usize);
            assert!(handle.iter().all(|&b| b == group as u8 + 1));
        }
        assert!(layout.record_handle(&table, layout.group_count()).is_none());
        assert!(layout.record_handle(&table[..64], 1).is_none());
    }

    #[test]
    fn wrong_handle_blob_is_rejected() {
        let layout = layout(1, 1);
        let mut table = vec![0_u8; layout.table_size() as usize];
        assert!(matches!(
            layout.write_records(&[0; 10], &mut table),
            Err(GpuError::HandleQuery(_))
        ));

        let handles = vec![0_u8; layout.handle_data_size()];
        let mut short = vec![0_u8; 64];
        assert!(matches!(
            layout.write_records(&handles, &mut short),
            Err(GpuError::CapacityViolation(_))
        ));
    }

    #[test]
    fn alignment_must_fit_handle() {
        assert!(SbtLayout::new(1, 1, 32, 16).is_err());
        assert!(SbtLayout::new(1, 1, 0, 64).is_err());
        assert!(SbtLayout::new(1, 1, 32, 32).is_ok());
    }
}
