//! Core types and math for the Prism ray tracing toolkit.
//!
//! This crate provides the host-side inputs used when building GPU
//! acceleration structures:
//! - Triangle mesh data and procedural primitives
//! - Wavefront OBJ loading
//! - Instance transform packing and alignment helpers
//! - Common error types

pub mod error;
pub mod math;
pub mod mesh;
pub mod obj;

pub use error::{Error, Result};
pub use math::{align_up, transform_rows, IDENTITY_ROWS};
pub use mesh::MeshData;
