//! Hardware ray tracing setup for the Prism toolkit.
//!
//! This crate builds the GPU-resident data a trace dispatch needs:
//! - Address-based triangle geometry descriptions for uploaded meshes
//! - Bottom-level acceleration structures (one per mesh) built in one batch
//!   with a shared scratch buffer
//! - A top-level acceleration structure over per-mesh instance records
//! - A shader stage registry that fixes stage and group order
//! - A shader binding table with raygen, hit and miss regions
//!
//! Everything is built once, synchronously, on a single device.
//!
//! With the `shaders` feature, `EmbeddedShaderSet` builds a complete
//! pipeline and binding table from the shaders in `prism-shaders`.
//!
//! # Example
//!
//! ```ignore
//! use prism_rt::{BuildOptions, GpuMesh, SceneAccelerationStructure};
//!
//! let meshes = vec![GpuMesh::upload(&ctx, &MeshData::cube(1.0), "cube")?];
//! let scene = SceneAccelerationStructure::build(&ctx, &meshes, BuildOptions::default())?;
//! let tlas = scene.top_level_handle();
//! ```

pub mod acceleration;
pub mod geometry;
pub mod instance;
pub mod mesh;
pub mod pipeline;
pub mod registry;
pub mod sbt;
pub mod scene;
#[cfg(feature = "shaders")]
pub mod shader_set;

pub use acceleration::{
    AccelerationBuilder, AccelerationLevel, AccelerationStructure, BuildOptions, BuildPreference,
    BuildSizes, BuildState,
};
pub use geometry::{GeometryInput, TriangleGeometry};
pub use instance::{InstanceRecord, MAX_PACKED_24};
pub use mesh::GpuMesh;
pub use pipeline::{create_shader_module, load_spirv, RayTracePipeline};
pub use registry::{GroupKind, ShaderGroup, ShaderStage, ShaderStageRegistry, StageKind, StageLayout};
pub use sbt::{SbtLayout, SbtRegions, ShaderBindingTable};
pub use scene::SceneAccelerationStructure;
#[cfg(feature = "shaders")]
pub use shader_set::EmbeddedShaderSet;
