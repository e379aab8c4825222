//! Shader stage registry.
//!
//! Pipeline creation consumes one flat stage array and one parallel group
//! array whose entries point at stage positions. The group order must match
//! the binding table record order exactly:
//!
//! ```text
//! group:  0        1 .. H            H+1 .. H+M
//! kind:   raygen   hit 0 .. H-1      miss 0 .. M-1
//! ```
//!
//! Stages are collected per group index and flattened in that order by
//! [`ShaderStageRegistry::finalize`], so hit and miss groups may be filled
//! in any order.

use crate::sbt::SbtLayout;
use ash::vk;
use prism_gpu::{GpuError, RayTracingCapabilities, Result};
use std::ffi::CStr;

/// Pipeline stage a shader module is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Raygen,
    ClosestHit,
    AnyHit,
    Miss,
}

impl StageKind {
    pub fn vk_stage(self) -> vk::ShaderStageFlags {
        match self {
            Self::Raygen => vk::ShaderStageFlags::RAYGEN_KHR,
            Self::ClosestHit => vk::ShaderStageFlags::CLOSEST_HIT_KHR,
            Self::AnyHit => vk::ShaderStageFlags::ANY_HIT_KHR,
            Self::Miss => vk::ShaderStageFlags::MISS_KHR,
        }
    }
}

/// One shader module bound to one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderStage {
    pub module: vk::ShaderModule,
    pub kind: StageKind,
    pub entry_point: &'static CStr,
}

impl ShaderStage {
    /// Stage with the `main` entry point.
    pub fn new(module: vk::ShaderModule, kind: StageKind) -> Self {
        Self {
            module,
            kind,
            entry_point: c"main",
        }
    }

    pub fn with_entry_point(mut self, entry_point: &'static CStr) -> Self {
        self.entry_point = entry_point;
        self
    }

    /// Vulkan stage description.
    pub fn create_info(&self) -> vk::PipelineShaderStageCreateInfo<'static> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.kind.vk_stage())
            .module(self.module)
            .name(self.entry_point)
    }
}

/// Kind of a shader group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupKind {
    /// General group holding the raygen stage.
    Raygen,
    /// Triangles hit group with closest-hit and/or any-hit stages.
    Hit,
    /// General group holding one miss stage.
    Miss,
}

/// One shader group, referencing stages by their position in the flat
/// stage array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderGroup {
    pub kind: GroupKind,
    pub general: Option<u32>,
    pub closest_hit: Option<u32>,
    pub any_hit: Option<u32>,
}

impl ShaderGroup {
    fn general(kind: GroupKind, stage: u32) -> Self {
        Self {
            kind,
            general: Some(stage),
            closest_hit: None,
            any_hit: None,
        }
    }

    /// Vulkan group description. Absent roles are marked unused.
    pub fn to_vk(&self) -> vk::RayTracingShaderGroupCreateInfoKHR<'static> {
        let ty = match self.kind {
            GroupKind::Raygen | GroupKind::Miss => vk::RayTracingShaderGroupTypeKHR::GENERAL,
            GroupKind::Hit => vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP,
        };

        vk::RayTracingShaderGroupCreateInfoKHR::default()
            .ty(ty)
            .general_shader(self.general.unwrap_or(vk::SHADER_UNUSED_KHR))
            .closest_hit_shader(self.closest_hit.unwrap_or(vk::SHADER_UNUSED_KHR))
            .any_hit_shader(self.any_hit.unwrap_or(vk::SHADER_UNUSED_KHR))
            .intersection_shader(vk::SHADER_UNUSED_KHR)
    }
}

/// Flattened stages and groups, in pipeline order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageLayout {
    pub stages: Vec<ShaderStage>,
    pub groups: Vec<ShaderGroup>,
}

impl StageLayout {
    pub fn stage_create_infos(&self) -> Vec<vk::PipelineShaderStageCreateInfo<'static>> {
        self.stages.iter().map(ShaderStage::create_info).collect()
    }

    pub fn group_create_infos(&self) -> Vec<vk::RayTracingShaderGroupCreateInfoKHR<'static>> {
        self.groups.iter().map(ShaderGroup::to_vk).collect()
    }
}

/// Collects shader stages per group and fixes their pipeline order.
#[derive(Debug, Clone, Default)]
pub struct ShaderStageRegistry {
    hit_group_count: u32,
    miss_group_count: u32,
    handle_size: u32,
    group_alignment: u32,
    raygen: Option<ShaderStage>,
    hit_groups: Vec<Option<Vec<ShaderStage>>>,
    miss_groups: Vec<Option<ShaderStage>>,
}

impl ShaderStageRegistry {
    /// Registry with fixed hit and miss group capacities.
    pub fn new(
        hit_group_count: u32,
        miss_group_count: u32,
        handle_size: u32,
        group_alignment: u32,
    ) -> Self {
        let mut registry = Self::default();
        registry.initialize(hit_group_count, miss_group_count, handle_size, group_alignment);
        registry
    }

    /// Registry sized for the device's handle size and record stride.
    pub fn for_device(
        hit_group_count: u32,
        miss_group_count: u32,
        caps: &RayTracingCapabilities,
    ) -> Self {
        Self::new(
            hit_group_count,
            miss_group_count,
            caps.shader_group_handle_size,
            caps.group_stride(),
        )
    }

    /// Fix capacities and alignment and drop every registered stage.
    pub fn initialize(
        &mut self,
        hit_group_count: u32,
        miss_group_count: u32,
        handle_size: u32,
        group_alignment: u32,
    ) {
        self.hit_group_count = hit_group_count;
        self.miss_group_count = miss_group_count;
        self.handle_size = handle_size;
        self.group_alignment = group_alignment;
        self.raygen = None;
        self.hit_groups = vec![None; hit_group_count as usize];
        self.miss_groups = vec![None; miss_group_count as usize];
    }

    /// Register the raygen stage. Must come before any hit or miss stage.
    pub fn set_raygen_stage(&mut self, stage: ShaderStage) -> Result<()> {
        if stage.kind != StageKind::Raygen {
            return Err(GpuError::CapacityViolation(format!(
                "raygen slot given a {:?} stage",
                stage.kind
            )));
        }
        if self.raygen.is_some() {
            return Err(GpuError::CapacityViolation(
                "raygen stage already set".to_string(),
            ));
        }
        if self.filled_hit_groups() + self.filled_miss_groups() > 0 {
            return Err(GpuError::CapacityViolation(
                "raygen stage must be registered first".to_string(),
            ));
        }
        self.raygen = Some(stage);
        Ok(())
    }

    /// Fill hit group `group_index` with one or two stages.
    ///
    /// Each stage plays the closest-hit or the any-hit role; a role may
    /// appear at most once.
    pub fn add_stage_to_hit_group(&mut self, stages: &[ShaderStage], group_index: u32) -> Result<()> {
        self.require_raygen()?;
        if !(1..=2).contains(&stages.len()) {
            return Err(GpuError::CapacityViolation(format!(
                "hit group {group_index} needs one or two stages, got {}",
                stages.len()
            )));
        }
        if let Some(stage) = stages
            .iter()
            .find(|s| !matches!(s.kind, StageKind::ClosestHit | StageKind::AnyHit))
        {
            return Err(GpuError::CapacityViolation(format!(
                "hit group {group_index} given a {:?} stage",
                stage.kind
            )));
        }
        if stages.len() == 2 && stages[0].kind == stages[1].kind {
            return Err(GpuError::CapacityViolation(format!(
                "hit group {group_index} has two {:?} stages",
                stages[0].kind
            )));
        }

        let slot = self
            .hit_groups
            .get_mut(group_index as usize)
            .ok_or_else(|| {
                GpuError::CapacityViolation(format!(
                    "hit group {group_index} out of range ({} groups)",
                    self.hit_group_count
                ))
            })?;
        if slot.is_some() {
            return Err(GpuError::CapacityViolation(format!(
                "hit group {group_index} already filled"
            )));
        }
        *slot = Some(stages.to_vec());
        Ok(())
    }

    /// Fill miss group `group_index` with its single stage.
    pub fn add_stage_to_miss_group(&mut self, stage: ShaderStage, group_index: u32) -> Result<()> {
        self.require_raygen()?;
        if stage.kind != StageKind::Miss {
            return Err(GpuError::CapacityViolation(format!(
                "miss group {group_index} given a {:?} stage",
                stage.kind
            )));
        }

        let slot = self
            .miss_groups
            .get_mut(group_index as usize)
            .ok_or_else(|| {
                GpuError::CapacityViolation(format!(
                    "miss group {group_index} out of range ({} groups)",
                    self.miss_group_count
                ))
            })?;
        if slot.is_some() {
            return Err(GpuError::CapacityViolation(format!(
                "miss group {group_index} already filled"
            )));
        }
        *slot = Some(stage);
        Ok(())
    }

    /// Flatten into pipeline order: raygen, hit groups by index, miss
    /// groups by index. Every group must be filled.
    pub fn finalize(&self) -> Result<StageLayout> {
        let raygen = self.require_raygen()?;

        let group_count = 1 + self.hit_groups.len() + self.miss_groups.len();
        let mut stages = vec![raygen];
        let mut groups = Vec::with_capacity(group_count);
        groups.push(ShaderGroup::general(GroupKind::Raygen, 0));

        for (index, group) in self.hit_groups.iter().enumerate() {
            let group_stages = group.as_ref().ok_or_else(|| {
                GpuError::CapacityViolation(format!("hit group {index} has no stages"))
            })?;

            let mut hit = ShaderGroup {
                kind: GroupKind::Hit,
                general: None,
                closest_hit: None,
                any_hit: None,
            };
            for stage in group_stages {
                let position = stages.len() as u32;
                match stage.kind {
                    StageKind::ClosestHit => hit.closest_hit = Some(position),
                    StageKind::AnyHit => hit.any_hit = Some(position),
                    StageKind::Raygen | StageKind::Miss => {}
                }
                stages.push(*stage);
            }
            groups.push(hit);
        }

        for (index, group) in self.miss_groups.iter().enumerate() {
            let stage = group.ok_or_else(|| {
                GpuError::CapacityViolation(format!("miss group {index} has no stage"))
            })?;
            groups.push(ShaderGroup::general(GroupKind::Miss, stages.len() as u32));
            stages.push(stage);
        }

        Ok(StageLayout { stages, groups })
    }

    /// Binding table layout matching this registry's groups.
    pub fn layout(&self) -> Result<SbtLayout> {
        SbtLayout::new(
            self.hit_group_count,
            self.miss_group_count,
            self.handle_size,
            self.group_alignment,
        )
    }

    /// Hit groups the registry was initialized with.
    pub fn hit_group_count(&self) -> u32 {
        self.hit_group_count
    }

    /// Miss groups the registry was initialized with.
    pub fn miss_group_count(&self) -> u32 {
        self.miss_group_count
    }

    /// Shader group handle size of the target device.
    pub fn handle_size(&self) -> u32 {
        self.handle_size
    }

    /// Record stride the binding table will use.
    pub fn group_alignment(&self) -> u32 {
        self.group_alignment
    }

    /// Total groups once every group is filled.
    pub fn group_count(&self) -> u32 {
        1 + self.hit_group_count + self.miss_group_count
    }

    /// Stages registered so far.
    pub fn stage_count(&self) -> usize {
        usize::from(self.raygen.is_some())
            + self.hit_groups.iter().flatten().map(Vec::len).sum::<usize>()
            + self.filled_miss_groups()
    }

    /// Whether every group has its stages.
    pub fn is_complete(&self) -> bool {
        self.raygen.is_some()
            && self.filled_hit_groups() == self.hit_groups.len()
            && self.filled_miss_groups() == self.miss_groups.len()
    }

    fn filled_hit_groups(&self) -> usize {
        self.hit_groups.iter().filter(|g| g.is_some()).count()
    }

    fn filled_miss_groups(&self) -> usize {
        self.miss_groups.iter().filter(|g| g.is_some()).count()
    }

    fn require_raygen(&self) -> Result<ShaderStage> {
        self.raygen.ok_or_else(|| {
            GpuError::CapacityViolation("raygen stage has not been set".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn stage(id: u64, kind: StageKind) -> ShaderStage {
        ShaderStage::new(vk::ShaderModule::from_raw(id), kind)
    }

    fn module_ids(layout: &StageLayout) -> Vec<u64> {
        layout.stages.iter().map(|s| s.module.as_raw()).collect()
    }

    #[test]
    fn groups_flatten_in_index_order() {
        let mut registry = ShaderStageRegistry::new(2, 1, 32, 64);
        registry.set_raygen_stage(stage(1, StageKind::Raygen)).unwrap();

        // Filled out of order on purpose.
        registry
            .add_stage_to_miss_group(stage(5, StageKind::Miss), 0)
            .unwrap();
        registry
            .add_stage_to_hit_group(
                &[stage(3, StageKind::ClosestHit), stage(4, StageKind::AnyHit)],
                1,
            )
            .unwrap();
        registry
            .add_stage_to_hit_group(&[stage(2, StageKind::ClosestHit)], 0)
            .unwrap();

        let layout = registry.finalize().unwrap();
        assert_eq!(module_ids(&layout), vec![1, 2, 3, 4, 5]);

        let kinds: Vec<GroupKind> = layout.groups.iter().map(|g| g.kind).collect();
        assert_eq!(
            kinds,
            vec![
                GroupKind::Raygen,
                GroupKind::Hit,
                GroupKind::Hit,
                GroupKind::Miss
            ]
        );

        assert_eq!(layout.groups[0].general, Some(0));
        assert_eq!(layout.groups[1].closest_hit, Some(1));
        assert_eq!(layout.groups[1].any_hit, None);
        assert_eq!(layout.groups[2].closest_hit, Some(2));
        assert_eq!(layout.groups[2].any_hit, Some(3));
        assert_eq!(layout.groups[3].general, Some(4));
    }

    #[test]
    fn absent_roles_are_unused() {
        let group = ShaderGroup {
            kind: GroupKind::Hit,
            general: None,
            closest_hit: Some(1),
            any_hit: None,
        };
        let info = group.to_vk();
        assert_eq!(info.ty, vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP);
        assert_eq!(info.general_shader, vk::SHADER_UNUSED_KHR);
        assert_eq!(info.closest_hit_shader, 1);
        assert_eq!(info.any_hit_shader, vk::SHADER_UNUSED_KHR);
        assert_eq!(info.intersection_shader, vk::SHADER_UNUSED_KHR);

        let miss = ShaderGroup::general(GroupKind::Miss, 4).to_vk();
        assert_eq!(miss.ty, vk::RayTracingShaderGroupTypeKHR::GENERAL);
        assert_eq!(miss.general_shader, 4);
        assert_eq!(miss.closest_hit_shader, vk::SHADER_UNUSED_KHR);
    }

    #[test]
    fn refilling_a_group_is_rejected() {
        let mut registry = ShaderStageRegistry::new(1, 1, 32, 64);
        registry.set_raygen_stage(stage(1, StageKind::Raygen)).unwrap();
        registry
            .add_stage_to_hit_group(&[stage(2, StageKind::ClosestHit)], 0)
            .unwrap();
        registry
            .add_stage_to_miss_group(stage(3, StageKind::Miss), 0)
            .unwrap();

        assert!(matches!(
            registry.add_stage_to_hit_group(&[stage(4, StageKind::ClosestHit)], 0),
            Err(GpuError::CapacityViolation(_))
        ));
        assert!(matches!(
            registry.add_stage_to_miss_group(stage(5, StageKind::Miss), 0),
            Err(GpuError::CapacityViolation(_))
        ));
        assert_eq!(registry.stage_count(), 3);
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let mut registry = ShaderStageRegistry::new(2, 1, 32, 64);
        registry.set_raygen_stage(stage(1, StageKind::Raygen)).unwrap();
        assert!(registry
            .add_stage_to_hit_group(&[stage(2, StageKind::ClosestHit)], 2)
            .is_err());
        assert!(registry
            .add_stage_to_miss_group(stage(3, StageKind::Miss), 1)
            .is_err());
    }

    #[test]
    fn raygen_must_come_first() {
        let mut registry = ShaderStageRegistry::new(1, 1, 32, 64);
        assert!(registry
            .add_stage_to_hit_group(&[stage(2, StageKind::ClosestHit)], 0)
            .is_err());
        assert!(registry
            .add_stage_to_miss_group(stage(3, StageKind::Miss), 0)
            .is_err());
        assert!(registry.finalize().is_err());

        registry.set_raygen_stage(stage(1, StageKind::Raygen)).unwrap();
        assert!(registry.set_raygen_stage(stage(9, StageKind::Raygen)).is_err());
    }

    #[test]
    fn stage_kinds_are_checked() {
        let mut registry = ShaderStageRegistry::new(1, 1, 32, 64);
        assert!(registry.set_raygen_stage(stage(1, StageKind::Miss)).is_err());
        registry.set_raygen_stage(stage(1, StageKind::Raygen)).unwrap();

        assert!(registry
            .add_stage_to_hit_group(&[stage(2, StageKind::Miss)], 0)
            .is_err());
        assert!(registry
            .add_stage_to_hit_group(
                &[stage(2, StageKind::AnyHit), stage(3, StageKind::AnyHit)],
                0
            )
            .is_err());
        assert!(registry.add_stage_to_hit_group(&[], 0).is_err());
        assert!(registry
            .add_stage_to_miss_group(stage(4, StageKind::ClosestHit), 0)
            .is_err());
    }

    #[test]
    fn incomplete_registry_does_not_finalize() {
        let mut registry = ShaderStageRegistry::new(2, 1, 32, 64);
        registry.set_raygen_stage(stage(1, StageKind::Raygen)).unwrap();
        registry
            .add_stage_to_hit_group(&[stage(2, StageKind::ClosestHit)], 0)
            .unwrap();
        registry
            .add_stage_to_miss_group(stage(3, StageKind::Miss), 0)
            .unwrap();
        assert!(!registry.is_complete());
        assert!(registry.finalize().is_err());
    }

    #[test]
    fn initialize_clears_stages() {
        let mut registry = ShaderStageRegistry::new(1, 1, 32, 64);
        registry.set_raygen_stage(stage(1, StageKind::Raygen)).unwrap();
        registry.initialize(3, 2, 32, 64);
        assert_eq!(registry.stage_count(), 0);
        assert_eq!(registry.group_count(), 6);
        registry.set_raygen_stage(stage(1, StageKind::Raygen)).unwrap();
    }

    #[test]
    fn layout_uses_registry_alignment() {
        let registry = ShaderStageRegistry::new(2, 2, 32, 64);
        let layout = registry.layout().unwrap();
        assert_eq!(layout.table_size(), 5 * 64);
    }

    #[test]
    fn default_entry_point_is_main() {
        let info = stage(1, StageKind::Raygen).create_info();
        assert_eq!(info.stage, vk::ShaderStageFlags::RAYGEN_KHR);
        assert_eq!(unsafe { CStr::from_ptr(info.p_name) }, c"main");
    }
}
