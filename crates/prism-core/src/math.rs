//! Math utilities for GPU data layout.

use glam::Mat4;

/// Round `value` up to the next multiple of `alignment`.
///
/// An alignment of zero leaves the value unchanged.
#[inline]
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}

/// Pack the upper 3x4 part of an affine matrix in row-major order.
///
/// This is the layout instance records expect: three rows, each holding
/// the rotation/scale part followed by the translation.
pub fn transform_rows(matrix: &Mat4) -> [f32; 12] {
    let mut rows = [0.0; 12];
    for row in 0..3 {
        let r = matrix.row(row);
        rows[row * 4..row * 4 + 4].copy_from_slice(&r.to_array());
    }
    rows
}

/// Identity transform in row-major 3x4 layout.
pub const IDENTITY_ROWS: [f32; 12] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
];

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::{Quat, Vec3};

    #[test]
    fn align_up_values() {
        assert_eq!(align_up(0, 64), 0);
        assert_eq!(align_up(1, 64), 64);
        assert_eq!(align_up(32, 64), 64);
        assert_eq!(align_up(64, 64), 64);
        assert_eq!(align_up(65, 64), 128);
        assert_eq!(align_up(10, 12), 12);
        assert_eq!(align_up(17, 0), 17);
    }

    #[test]
    fn identity_packs_to_identity_rows() {
        assert_eq!(transform_rows(&Mat4::IDENTITY), IDENTITY_ROWS);
    }

    #[test]
    fn translation_lands_in_last_column() {
        let m = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let rows = transform_rows(&m);
        assert_relative_eq!(rows[3], 1.0);
        assert_relative_eq!(rows[7], 2.0);
        assert_relative_eq!(rows[11], 3.0);
    }

    #[test]
    fn rotation_is_row_major() {
        let m = Mat4::from_quat(Quat::from_rotation_z(std::f32::consts::FRAC_PI_2));
        let rows = transform_rows(&m);
        // Rotating X onto Y: row 1 column 0 holds sin(90deg).
        assert_relative_eq!(rows[4], 1.0, epsilon = 1e-6);
        assert_relative_eq!(rows[1], -1.0, epsilon = 1e-6);
        assert_relative_eq!(rows[0], 0.0, epsilon = 1e-6);
    }
}
