//! Top-level instance records.

use crate::acceleration::{AccelerationLevel, AccelerationStructure};
use ash::vk;
use glam::Mat4;
use prism_core::{transform_rows, IDENTITY_ROWS};
use prism_gpu::{GpuError, Result};
use std::fmt;

/// Largest value that fits the 24-bit custom index and record offset fields.
pub const MAX_PACKED_24: u32 = 0x00FF_FFFF;

/// One placement of a bottom-level structure in the top-level structure.
///
/// A record borrows the bottom-level structure it places, so the structure
/// cannot be destroyed or moved while the record is alive:
///
/// ```compile_fail
/// use prism_rt::{AccelerationLevel, AccelerationStructure, InstanceRecord};
///
/// let mut blas = AccelerationStructure::unbuilt(AccelerationLevel::Bottom);
/// let record = InstanceRecord::referencing(&blas);
/// blas.destroy();
/// drop(record);
/// ```
///
/// Records can only be created from a structure whose address has been
/// resolved:
///
/// ```
/// use prism_rt::{AccelerationLevel, AccelerationStructure, InstanceRecord};
///
/// let blas = AccelerationStructure::unbuilt(AccelerationLevel::Bottom);
/// assert!(InstanceRecord::referencing(&blas).is_err());
/// ```
#[derive(Clone, Copy)]
pub struct InstanceRecord<'a> {
    /// Row-major 3x4 object-to-world transform.
    pub transform: [f32; 12],
    /// Visibility mask tested against the ray mask.
    pub mask: u8,
    pub flags: vk::GeometryInstanceFlagsKHR,
    custom_index: u32,
    sbt_record_offset: u32,
    blas: &'a AccelerationStructure,
}

impl<'a> InstanceRecord<'a> {
    /// Identity-transformed, fully visible, culling disabled.
    pub fn referencing(blas: &'a AccelerationStructure) -> Result<Self> {
        check_reference(blas)?;

        Ok(Self {
            transform: IDENTITY_ROWS,
            mask: 0xFF,
            flags: vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE,
            custom_index: 0,
            sbt_record_offset: 0,
            blas,
        })
    }

    /// Place the instance with `transform`.
    pub fn with_transform(mut self, transform: &Mat4) -> Self {
        self.transform = transform_rows(transform);
        self
    }

    /// Set the value shaders read as the instance custom index.
    ///
    /// Fails if `custom_index` does not fit in 24 bits.
    pub fn with_custom_index(mut self, custom_index: u32) -> Result<Self> {
        self.custom_index = check_packed_24("custom index", custom_index)?;
        Ok(self)
    }

    /// Set the offset added to the hit group index for this instance.
    ///
    /// Fails if `offset` does not fit in 24 bits.
    pub fn with_sbt_record_offset(mut self, offset: u32) -> Result<Self> {
        self.sbt_record_offset = check_packed_24("binding table record offset", offset)?;
        Ok(self)
    }

    pub fn with_mask(mut self, mask: u8) -> Self {
        self.mask = mask;
        self
    }

    pub fn with_flags(mut self, flags: vk::GeometryInstanceFlagsKHR) -> Self {
        self.flags = flags;
        self
    }

    pub fn custom_index(&self) -> u32 {
        self.custom_index
    }

    pub fn sbt_record_offset(&self) -> u32 {
        self.sbt_record_offset
    }

    /// The referenced bottom-level structure.
    pub fn blas(&self) -> &'a AccelerationStructure {
        self.blas
    }

    /// Address of the referenced bottom-level structure.
    ///
    /// Fails if the structure no longer has a resolved address.
    pub fn blas_address(&self) -> Result<vk::DeviceAddress> {
        self.blas.device_address()
    }

    /// The packed record consumed by the top-level build.
    ///
    /// The referenced structure is checked again, so a record never packs a
    /// stale address.
    pub fn to_vk(&self) -> Result<vk::AccelerationStructureInstanceKHR> {
        let address = check_reference(self.blas)?;

        // Flag bits above 8 are not representable in the packed record
        let flags = (self.flags.as_raw() & 0xFF) as u8;

        Ok(vk::AccelerationStructureInstanceKHR {
            transform: vk::TransformMatrixKHR {
                matrix: self.transform,
            },
            instance_custom_index_and_mask: vk::Packed24_8::new(self.custom_index, self.mask),
            instance_shader_binding_table_record_offset_and_flags: vk::Packed24_8::new(
                self.sbt_record_offset,
                flags,
            ),
            acceleration_structure_reference: vk::AccelerationStructureReferenceKHR {
                device_handle: address,
            },
        })
    }
}

impl fmt::Debug for InstanceRecord<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceRecord")
            .field("transform", &self.transform)
            .field("mask", &self.mask)
            .field("flags", &self.flags)
            .field("custom_index", &self.custom_index)
            .field("sbt_record_offset", &self.sbt_record_offset)
            .field("blas_state", &self.blas.state())
            .finish()
    }
}

fn check_reference(blas: &AccelerationStructure) -> Result<vk::DeviceAddress> {
    if blas.level() != AccelerationLevel::Bottom {
        return Err(GpuError::CapacityViolation(
            "instances must reference a bottom-level structure".to_string(),
        ));
    }
    match blas.device_address()? {
        0 => Err(GpuError::CapacityViolation(
            "instance references a null bottom-level address".to_string(),
        )),
        address => Ok(address),
    }
}

fn check_packed_24(what: &str, value: u32) -> Result<u32> {
    if value > MAX_PACKED_24 {
        return Err(GpuError::CapacityViolation(format!(
            "{what} {value} does not fit in 24 bits"
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn resolved_blas() -> AccelerationStructure {
        AccelerationStructure::resolved_for_test(AccelerationLevel::Bottom, 0xDEAD_0000)
    }

    #[test]
    fn unresolved_blas_is_rejected() {
        let blas = AccelerationStructure::unbuilt(AccelerationLevel::Bottom);
        assert!(InstanceRecord::referencing(&blas).is_err());
    }

    #[test]
    fn destroyed_blas_is_rejected() {
        let mut blas = resolved_blas();
        assert!(InstanceRecord::referencing(&blas).is_ok());

        blas.destroy();
        assert!(matches!(
            InstanceRecord::referencing(&blas),
            Err(GpuError::CapacityViolation(_))
        ));
    }

    #[test]
    fn top_level_cannot_be_instanced() {
        let tlas = AccelerationStructure::resolved_for_test(AccelerationLevel::Top, 0x1000);
        assert!(matches!(
            InstanceRecord::referencing(&tlas),
            Err(GpuError::CapacityViolation(_))
        ));
    }

    #[test]
    fn defaults_match_scene_conventions() {
        let blas = resolved_blas();
        let record = InstanceRecord::referencing(&blas).unwrap();
        assert_eq!(record.transform, IDENTITY_ROWS);
        assert_eq!(record.mask, 0xFF);
        assert_eq!(record.custom_index(), 0);
        assert_eq!(record.sbt_record_offset(), 0);
        assert_eq!(record.blas_address().unwrap(), 0xDEAD_0000);
        assert_eq!(
            record.flags,
            vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE
        );
    }

    #[test]
    fn packs_index_mask_and_address() {
        let blas = resolved_blas();
        let record = InstanceRecord::referencing(&blas)
            .unwrap()
            .with_custom_index(7)
            .unwrap()
            .with_sbt_record_offset(2)
            .unwrap()
            .with_mask(0x0F);
        let packed = record.to_vk().unwrap();

        assert_eq!(packed.instance_custom_index_and_mask.low_24(), 7);
        assert_eq!(packed.instance_custom_index_and_mask.high_8(), 0x0F);
        assert_eq!(
            packed
                .instance_shader_binding_table_record_offset_and_flags
                .low_24(),
            2
        );
        assert_eq!(
            u32::from(
                packed
                    .instance_shader_binding_table_record_offset_and_flags
                    .high_8()
            ),
            vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE.as_raw()
        );
        assert_eq!(
            unsafe { packed.acceleration_structure_reference.device_handle },
            0xDEAD_0000
        );
    }

    #[test]
    fn packed_fields_reject_values_above_24_bits() {
        let blas = resolved_blas();
        let record = InstanceRecord::referencing(&blas).unwrap();

        let largest = record.with_custom_index(MAX_PACKED_24).unwrap();
        assert_eq!(
            largest.to_vk().unwrap().instance_custom_index_and_mask.low_24(),
            MAX_PACKED_24
        );

        assert!(matches!(
            record.with_custom_index(1 << 24),
            Err(GpuError::CapacityViolation(_))
        ));
        assert!(matches!(
            record.with_sbt_record_offset(1 << 24),
            Err(GpuError::CapacityViolation(_))
        ));
        assert!(record.with_sbt_record_offset(MAX_PACKED_24).is_ok());
    }

    #[test]
    fn transform_is_row_major() {
        let blas = resolved_blas();
        let record = InstanceRecord::referencing(&blas)
            .unwrap()
            .with_transform(&Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)));
        let matrix = record.to_vk().unwrap().transform.matrix;
        assert_eq!(matrix[3], 1.0);
        assert_eq!(matrix[7], 2.0);
        assert_eq!(matrix[11], 3.0);
        assert_eq!(matrix[0], 1.0);
    }
}
