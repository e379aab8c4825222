//! End-to-end acceleration structure builds on real hardware.
//!
//! Run with `cargo test -- --ignored` on a machine with a ray tracing
//! capable device. Each test also returns early when none is present.

use glam::{Mat4, Vec3};
use prism_core::MeshData;
use prism_gpu::{GpuBuffer, GpuContext, GpuContextBuilder};
use prism_rt::{
    AccelerationLevel, BuildOptions, BuildPreference, BuildState, GpuMesh,
    SceneAccelerationStructure, ShaderStageRegistry,
};

fn context() -> Option<GpuContext> {
    match GpuContextBuilder::new()
        .app_name("prism-rt-tests")
        .validation(false)
        .require_ray_tracing(true)
        .build()
    {
        Ok(ctx) => Some(ctx),
        Err(e) => {
            eprintln!("skipping: no ray tracing device ({e})");
            None
        }
    }
}

#[test]
#[ignore = "Requires ray tracing GPU hardware"]
fn builds_scene_over_several_meshes() {
    let Some(ctx) = context() else { return };

    let meshes = vec![
        GpuMesh::upload(&ctx, &MeshData::triangle(), "triangle").unwrap(),
        GpuMesh::upload(&ctx, &MeshData::quad(2.0), "quad").unwrap(),
        GpuMesh::upload(&ctx, &MeshData::cube(1.0), "cube").unwrap(),
    ];
    let transforms = [
        Mat4::IDENTITY,
        Mat4::from_translation(Vec3::new(3.0, 0.0, 0.0)),
    ];

    let scene = SceneAccelerationStructure::build_with_transforms(
        &ctx,
        &meshes,
        &transforms,
        BuildOptions::default(),
    )
    .unwrap();

    let addresses = scene.bottom_level_addresses().unwrap();
    assert_eq!(addresses.len(), 3);
    assert!(addresses.iter().all(|&a| a != 0));

    for blas in scene.bottom_levels() {
        assert_eq!(blas.level(), AccelerationLevel::Bottom);
        assert_eq!(blas.state(), BuildState::AddressResolved);
    }
    assert_eq!(scene.bottom_levels()[2].primitive_count(), 12);

    assert_eq!(scene.top_level().level(), AccelerationLevel::Top);
    assert_eq!(scene.top_level().primitive_count(), 3);
    assert_ne!(scene.top_level_address().unwrap(), 0);

    drop(scene);
    ctx.wait_idle().unwrap();
}

#[test]
#[ignore = "Requires ray tracing GPU hardware"]
fn fast_build_preference_also_builds() {
    let Some(ctx) = context() else { return };

    let meshes = vec![GpuMesh::upload(&ctx, &MeshData::cube(0.5), "cube").unwrap()];
    let options = BuildOptions::default()
        .with_preference(BuildPreference::FastBuild)
        .with_opaque(false);

    let mut scene = SceneAccelerationStructure::build(&ctx, &meshes, options).unwrap();
    assert_ne!(scene.top_level_address().unwrap(), 0);

    scene.destroy();
    assert!(scene.top_level_address().is_err());
    scene.destroy();
}

#[test]
#[ignore = "Requires ray tracing GPU hardware"]
fn empty_scene_is_rejected() {
    let Some(ctx) = context() else { return };
    assert!(SceneAccelerationStructure::build(&ctx, &[], BuildOptions::default()).is_err());
}

#[test]
#[ignore = "Requires ray tracing GPU hardware"]
fn registry_layout_fits_device() {
    let Some(ctx) = context() else { return };
    let caps = *ctx.ray_tracing_capabilities().unwrap();

    let registry = ShaderStageRegistry::for_device(2, 2, &caps);
    let layout = registry.layout().unwrap();
    assert_eq!(layout.table_size(), 5 * u64::from(caps.group_stride()));
    assert_eq!(
        layout.group_alignment() % u64::from(caps.shader_group_base_alignment.max(1)),
        0
    );
}

#[test]
#[ignore = "Requires ray tracing GPU hardware"]
fn host_buffer_round_trips_through_mapping() {
    let Some(ctx) = context() else { return };

    let mut buffer = GpuBuffer::new(
        &ctx,
        16,
        ash::vk::BufferUsageFlags::STORAGE_BUFFER
            | ash::vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
        ash::vk::MemoryPropertyFlags::HOST_VISIBLE | ash::vk::MemoryPropertyFlags::HOST_COHERENT,
        "round_trip",
    )
    .unwrap();
    assert_ne!(buffer.device_address().unwrap(), 0);

    // Oversized upload is truncated to the buffer.
    let written = buffer.upload_data(&[7_u8; 24], 0).unwrap();
    assert_eq!(written, 16);

    let mapped = buffer.map_memory(64, 8).unwrap();
    assert_eq!(mapped.len(), 8);
    assert!(mapped.as_slice().iter().all(|&b| b == 7));
    mapped.unmap();

    buffer.destroy();
    buffer.destroy();
    assert!(buffer.is_destroyed());
}

#[cfg(feature = "shaders")]
#[test]
#[ignore = "Requires ray tracing GPU hardware"]
fn binding_table_records_match_group_handles() {
    use prism_rt::EmbeddedShaderSet;

    let Some(ctx) = context() else { return };

    let shaders = EmbeddedShaderSet::load(&ctx).unwrap();
    let mut pipeline = shaders.create_pipeline(&ctx, 1).unwrap();
    let layout = *pipeline.sbt().layout();
    assert_eq!(layout.group_count(), 5);

    let handles = unsafe {
        ctx.ray_tracing_pipeline_loader()
            .unwrap()
            .get_ray_tracing_shader_group_handles(
                pipeline.handle(),
                0,
                layout.group_count(),
                layout.handle_data_size(),
            )
    }
    .unwrap();

    let base = pipeline.sbt().base_address();
    assert_eq!(base % layout.group_alignment(), 0);
    assert_eq!(pipeline.sbt().regions().raygen.device_address, base);

    let table = pipeline.sbt_mut().read_records().unwrap();
    assert_eq!(table.len() as u64, layout.table_size());

    let handle_size = layout.handle_size() as usize;
    for (group, expected) in (0..).zip(handles.chunks_exact(handle_size)) {
        let offset = layout.record_offset(group) as usize;
        assert_eq!(
            &table[offset..offset + handle_size],
            expected,
            "record {group} differs from its group handle"
        );
    }

    drop(pipeline);
    drop(shaders);
    ctx.wait_idle().unwrap();
}
