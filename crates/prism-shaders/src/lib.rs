//! Ray tracing shaders for the Prism toolkit.
//!
//! Two ray types, each with one closest-hit and one miss shader, plus a
//! raygen shader declaring both payloads. Registered in that order they give
//! a table of one raygen, two hit and two miss records. None of the shaders
//! read descriptors, so they fit an empty pipeline layout.
//!
//! SPIR-V is compiled at build time with shaderc and only embedded when the
//! `ray_tracing` feature is enabled, since shaderc needs the Vulkan SDK or a
//! cmake toolchain.

#[cfg(feature = "ray_tracing")]
mod embedded {
    use std::sync::OnceLock;

    /// Embedded SPIR-V shader bytecode (raw bytes, may not be aligned).
    mod spirv_bytes {
        pub static RAYGEN: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/raygen.spv"));
        pub static PRIMARY_RCHIT: &[u8] =
            include_bytes!(concat!(env!("OUT_DIR"), "/primary_rchit.spv"));
        pub static SHADOW_RCHIT: &[u8] =
            include_bytes!(concat!(env!("OUT_DIR"), "/shadow_rchit.spv"));
        pub static PRIMARY_RMISS: &[u8] =
            include_bytes!(concat!(env!("OUT_DIR"), "/primary_rmiss.spv"));
        pub static SHADOW_RMISS: &[u8] =
            include_bytes!(concat!(env!("OUT_DIR"), "/shadow_rmiss.spv"));
    }

    /// Convert byte slice to aligned u32 Vec (SPIR-V requires 4-byte alignment).
    fn bytes_to_spirv(bytes: &[u8]) -> Vec<u32> {
        assert!(
            bytes.len() % 4 == 0,
            "SPIR-V bytecode must be 4-byte aligned"
        );
        bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    static RAYGEN_SPIRV: OnceLock<Vec<u32>> = OnceLock::new();
    static PRIMARY_RCHIT_SPIRV: OnceLock<Vec<u32>> = OnceLock::new();
    static SHADOW_RCHIT_SPIRV: OnceLock<Vec<u32>> = OnceLock::new();
    static PRIMARY_RMISS_SPIRV: OnceLock<Vec<u32>> = OnceLock::new();
    static SHADOW_RMISS_SPIRV: OnceLock<Vec<u32>> = OnceLock::new();

    /// Ray generation shader.
    pub fn raygen_shader() -> &'static [u32] {
        RAYGEN_SPIRV.get_or_init(|| bytes_to_spirv(spirv_bytes::RAYGEN))
    }

    /// Closest-hit shader for primary rays (payload location 0).
    pub fn primary_closest_hit_shader() -> &'static [u32] {
        PRIMARY_RCHIT_SPIRV.get_or_init(|| bytes_to_spirv(spirv_bytes::PRIMARY_RCHIT))
    }

    /// Closest-hit shader for shadow rays (payload location 1).
    pub fn shadow_closest_hit_shader() -> &'static [u32] {
        SHADOW_RCHIT_SPIRV.get_or_init(|| bytes_to_spirv(spirv_bytes::SHADOW_RCHIT))
    }

    /// Miss shader for primary rays.
    pub fn primary_miss_shader() -> &'static [u32] {
        PRIMARY_RMISS_SPIRV.get_or_init(|| bytes_to_spirv(spirv_bytes::PRIMARY_RMISS))
    }

    /// Miss shader for shadow rays.
    pub fn shadow_miss_shader() -> &'static [u32] {
        SHADOW_RMISS_SPIRV.get_or_init(|| bytes_to_spirv(spirv_bytes::SHADOW_RMISS))
    }

    /// Closest-hit shaders in hit group order.
    pub fn closest_hit_shaders() -> [&'static [u32]; 2] {
        [primary_closest_hit_shader(), shadow_closest_hit_shader()]
    }

    /// Miss shaders in miss group order.
    pub fn miss_shaders() -> [&'static [u32]; 2] {
        [primary_miss_shader(), shadow_miss_shader()]
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn shaders_load() {
            let all = [
                raygen_shader(),
                primary_closest_hit_shader(),
                shadow_closest_hit_shader(),
                primary_miss_shader(),
                shadow_miss_shader(),
            ];
            for shader in all {
                assert_eq!(shader[0], 0x0723_0203, "Invalid SPIR-V magic number");
                assert!(shader.len() > 20, "Shader too small");
            }
        }

        #[test]
        fn group_order_is_primary_then_shadow() {
            assert_eq!(closest_hit_shaders()[0], primary_closest_hit_shader());
            assert_eq!(miss_shaders()[1], shadow_miss_shader());
        }
    }
}

#[cfg(feature = "ray_tracing")]
pub use embedded::*;

/// Hit groups provided by the embedded shaders.
pub const HIT_GROUP_COUNT: u32 = 2;
/// Miss groups provided by the embedded shaders.
pub const MISS_GROUP_COUNT: u32 = 2;
