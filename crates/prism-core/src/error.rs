//! Error types for host-side data.

use thiserror::Error;

/// Host data error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid mesh data
    #[error("Invalid mesh: {0}")]
    InvalidMesh(String),

    /// OBJ file could not be read or parsed
    #[error("Failed to load OBJ: {0}")]
    ObjLoad(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
