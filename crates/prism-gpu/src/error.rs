//! GPU error types.

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
///
/// Driver failures are not recoverable at this layer: callers abort scene
/// or pipeline initialization when any of these reach them.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// No suitable GPU found.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// Required extension not supported.
    #[error("Required extension not supported: {0}")]
    ExtensionNotSupported(String),

    /// Buffer or device memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Acceleration structure build size query failed.
    #[error("Build size query failed: {0}")]
    SizeQuery(String),

    /// Recording, submitting or waiting on a build failed.
    #[error("Build submission failed: {0}")]
    BuildSubmission(String),

    /// Shader group handle retrieval failed.
    #[error("Shader group handle query failed: {0}")]
    HandleQuery(String),

    /// Stage registry or build ordering contract was violated by the caller.
    #[error("Capacity violation: {0}")]
    CapacityViolation(String),

    /// Pipeline creation failed.
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// Host data handed to the GPU layer was malformed.
    #[error("Invalid data: {0}")]
    Data(#[from] prism_core::Error),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vulkan_errors_convert() {
        let err: GpuError = vk::Result::ERROR_OUT_OF_DEVICE_MEMORY.into();
        assert!(matches!(err, GpuError::Vulkan(_)));
    }

    #[test]
    fn messages_name_the_failure() {
        let err = GpuError::CapacityViolation("hit group 3 out of range".to_string());
        assert_eq!(err.to_string(), "Capacity violation: hit group 3 out of range");
    }
}
