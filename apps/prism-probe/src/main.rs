//! Prism probe
//!
//! Brings up a ray tracing context, builds a scene of procedural or OBJ
//! meshes and prints the resulting structure addresses and binding table
//! layout. With the `pipeline` feature it also creates a pipeline over the
//! embedded shaders and prints the dispatch regions of its binding table.

mod config;

use anyhow::Context;
use config::{ProbeConfig, USAGE};
use glam::{Mat4, Vec3};
use prism_core::MeshData;
use prism_gpu::GpuContextBuilder;
use prism_rt::{BuildOptions, GpuMesh, SceneAccelerationStructure, ShaderStageRegistry};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn procedural_mesh(index: u32) -> MeshData {
    match index % 3 {
        0 => MeshData::triangle(),
        1 => MeshData::quad(1.0),
        _ => MeshData::cube(0.5),
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ProbeConfig::from_args()?;
    if config.show_help {
        println!("{USAGE}");
        return Ok(());
    }

    let ctx = GpuContextBuilder::new()
        .app_name("prism-probe")
        .validation(config.validation)
        .require_ray_tracing(true)
        .build()
        .context("creating ray tracing context")?;
    let caps = *ctx.ray_tracing_capabilities()?;

    let (host_meshes, transforms): (Vec<MeshData>, Vec<Mat4>) = match &config.obj_path {
        Some(path) => {
            let meshes = MeshData::load_obj(path)
                .with_context(|| format!("loading {}", path.display()))?;
            // OBJ shapes are already placed in a shared space
            (meshes, Vec::new())
        }
        None => {
            let meshes = (0..config.mesh_count).map(procedural_mesh).collect();
            let transforms = (0..config.mesh_count)
                .map(|i| Mat4::from_translation(Vec3::new(i as f32 * 2.0, 0.0, 0.0)))
                .collect();
            (meshes, transforms)
        }
    };

    info!("Prism probe: {} meshes", host_meshes.len());

    let meshes = host_meshes
        .iter()
        .enumerate()
        .map(|(i, mesh)| GpuMesh::upload(&ctx, mesh, &format!("mesh_{i}")))
        .collect::<Result<Vec<_>, _>>()
        .context("uploading meshes")?;

    let scene = SceneAccelerationStructure::build_with_transforms(
        &ctx,
        &meshes,
        &transforms,
        BuildOptions::default(),
    )
    .context("building acceleration structures")?;

    println!("Acceleration structures:");
    for (i, (blas, address)) in scene
        .bottom_levels()
        .iter()
        .zip(scene.bottom_level_addresses()?)
        .enumerate()
    {
        println!(
            "  blas[{i}]  0x{address:016x}  {} triangles, {} bytes",
            blas.primitive_count(),
            blas.sizes().structure_size
        );
    }
    println!(
        "  tlas     0x{:016x}  {} instances, {} bytes",
        scene.top_level_address()?,
        scene.top_level().primitive_count(),
        scene.top_level().sizes().structure_size
    );

    let registry = ShaderStageRegistry::for_device(config.hit_groups, config.miss_groups, &caps);
    let layout = registry.layout()?;

    println!("Shader binding table:");
    println!(
        "  handle size {}, record stride {}, {} groups, {} bytes",
        layout.handle_size(),
        layout.group_alignment(),
        layout.group_count(),
        layout.table_size()
    );
    println!("  raygen  offset {:>6}  size {:>6}", layout.raygen_offset(), layout.raygen_size());
    println!("  hit     offset {:>6}  size {:>6}", layout.hit_offset(), layout.hit_size());
    println!("  miss    offset {:>6}  size {:>6}", layout.miss_offset(), layout.miss_size());

    #[cfg(feature = "pipeline")]
    print_pipeline_regions(&ctx)?;

    drop(scene);
    drop(meshes);
    ctx.wait_idle()?;

    Ok(())
}

#[cfg(feature = "pipeline")]
fn print_pipeline_regions(ctx: &prism_gpu::GpuContext) -> anyhow::Result<()> {
    let shaders = prism_rt::EmbeddedShaderSet::load(ctx).context("loading embedded shaders")?;
    let pipeline = shaders
        .create_pipeline(ctx, 1)
        .context("creating ray tracing pipeline")?;
    let regions = pipeline.sbt().regions();

    println!("Pipeline binding table at 0x{:016x}:", pipeline.sbt().base_address());
    for (name, region) in [
        ("raygen", &regions.raygen),
        ("hit", &regions.hit),
        ("miss", &regions.miss),
    ] {
        println!(
            "  {name:<7} 0x{:016x}  stride {:>4}  size {:>6}",
            region.device_address, region.stride, region.size
        );
    }

    drop(pipeline);
    drop(shaders);
    Ok(())
}
