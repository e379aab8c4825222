//! Vulkan abstraction layer for the Prism ray tracing toolkit.
//!
//! This crate provides:
//! - An explicit device context (no process-wide globals)
//! - GPU capability and ray tracing property detection
//! - Device-memory-backed buffers with device addresses
//! - Command pool management and blocking submission

pub mod capabilities;
pub mod command;
pub mod context;
pub mod error;
pub mod instance;
pub mod memory;

pub use capabilities::{GpuCapabilities, GpuVendor, RayTracingCapabilities};
pub use command::{submit_and_wait, CommandPool};
pub use context::{GpuContext, GpuContextBuilder};
pub use error::{GpuError, Result};
pub use memory::{find_memory_type, GpuBuffer, MappedMemory};
