use nalgebra::{Matrix3, Matrix4, Rotation3, Unit, UnitQuaternion, Vector3};

/// Smallest difference between two `f32` values that the bone math treats as
/// significant.
pub const EPSILON: f32 = f32::EPSILON;

const SAFE_THRESHOLD: f32 = 6.1e-3;
const CRITICAL_THRESHOLD: f32 = 2.5e-4;

/// Builds the bone-space orientation for a unit bone axis and a roll angle.
///
/// The Y column of the result is the bone axis; roll twists the X and Z
/// columns around it. Axes pointing almost exactly down -Y are handled by a
/// second-order approximation and, past the critical threshold, a fixed
/// flipped basis.
///
/// # Arguments
///
/// * `nor` - Normalized head-to-tail direction.
/// * `roll` - Twist around the bone axis, in radians.
///
/// # Returns
///
/// Orthonormal 3x3 matrix whose columns are the bone's X, Y and Z axes.
pub fn vec_roll_to_mat3_normalized(nor: &Vector3<f32>, roll: f32) -> Matrix3<f32> {
    let (x, y, z) = (nor.x, nor.y, nor.z);
    let mut theta = 1.0 + y;
    let theta_alt = x * x + z * z;

    let basis = if theta > SAFE_THRESHOLD || theta_alt > CRITICAL_THRESHOLD * CRITICAL_THRESHOLD {
        if theta <= SAFE_THRESHOLD {
            theta = theta_alt * 0.5 + theta_alt * theta_alt * 0.125;
        }
        Matrix3::from_columns(&[
            Vector3::new(1.0 - x * x / theta, -x, -x * z / theta),
            Vector3::new(x, y, z),
            Vector3::new(-x * z / theta, -z, 1.0 - z * z / theta),
        ])
    } else {
        Matrix3::from_columns(&[
            Vector3::new(-1.0, 0.0, 0.0),
            Vector3::new(0.0, -1.0, 0.0),
            Vector3::new(0.0, 0.0, 1.0),
        ])
    };

    let twist = Rotation3::from_axis_angle(&Unit::new_unchecked(*nor), roll);
    twist.matrix() * basis
}

/// Same as [`vec_roll_to_mat3_normalized`] for an arbitrary-length axis.
/// A zero-length axis falls back to +Y.
pub fn vec_roll_to_mat3(vec: &Vector3<f32>, roll: f32) -> Matrix3<f32> {
    let nor = vec.try_normalize(0.0).unwrap_or_else(Vector3::y);
    vec_roll_to_mat3_normalized(&nor, roll)
}

/// Extracts the roll of `mat` around `vec`, measured against the zero-roll
/// orientation of that axis.
///
/// # Arguments
///
/// * `mat` - Bone orientation, possibly scaled.
/// * `vec` - Bone axis the roll is measured around.
///
/// # Returns
///
/// Roll angle in radians, in `(-PI, PI]`.
pub fn mat3_vec_to_roll(mat: &Matrix3<f32>, vec: &Vector3<f32>) -> f32 {
    let zero_roll = vec_roll_to_mat3(vec, 0.0);
    let roll_mat = zero_roll.transpose() * normalized_columns(mat);
    let q = UnitQuaternion::from_matrix(&roll_mat);
    let q = q.quaternion();
    let (w, j) = if q.w < 0.0 { (-q.w, -q.j) } else { (q.w, q.j) };
    2.0 * j.atan2(w)
}

/// Splits an orientation matrix into its bone axis (the Y column) and roll.
pub fn mat3_to_vec_roll(mat: &Matrix3<f32>) -> (Vector3<f32>, f32) {
    let vec = mat.column(1).into_owned();
    let roll = mat3_vec_to_roll(mat, &vec);
    (vec, roll)
}

/// Returns a copy of `mat` with each column scaled to unit length. Zero
/// columns are left untouched.
pub fn normalized_columns(mat: &Matrix3<f32>) -> Matrix3<f32> {
    let mut out = *mat;
    for mut col in out.column_iter_mut() {
        let len = col.norm();
        if len > 0.0 {
            col /= len;
        }
    }
    out
}

/// Upper-left 3x3 block of a 4x4 transform.
pub fn mat3_of(mat: &Matrix4<f32>) -> Matrix3<f32> {
    mat.fixed_view::<3, 3>(0, 0).into_owned()
}

/// Translation column of a 4x4 transform.
pub fn translation_of(mat: &Matrix4<f32>) -> Vector3<f32> {
    mat.fixed_view::<3, 1>(0, 3).into_owned()
}

/// Assembles a 4x4 transform from a 3x3 block and a translation.
pub fn mat4_from_parts(rot: &Matrix3<f32>, translation: &Vector3<f32>) -> Matrix4<f32> {
    let mut out = rot.to_homogeneous();
    out.fixed_view_mut::<3, 1>(0, 3).copy_from(translation);
    out
}

/// Transforms a point (w = 1) by `mat`.
pub fn transform_point(mat: &Matrix4<f32>, point: &Vector3<f32>) -> Vector3<f32> {
    mat3_of(mat) * point + translation_of(mat)
}

/// Lengths of the X, Y and Z columns of the 3x3 block.
pub fn mat4_to_size(mat: &Matrix4<f32>) -> Vector3<f32> {
    let m = mat3_of(mat);
    Vector3::new(m.column(0).norm(), m.column(1).norm(), m.column(2).norm())
}

/// Signed cube root of the determinant of the 3x3 block.
pub fn mat4_to_volume_scale(mat: &Matrix4<f32>) -> f32 {
    mat3_of(mat).determinant().cbrt()
}

/// Column scale with shear removed: the per-axis sizes are rescaled so that
/// their product equals the real volume of the matrix.
pub fn mat4_to_size_fix_shear(mat: &Matrix4<f32>) -> Vector3<f32> {
    let size = mat4_to_size(mat);
    let volume = size.x * size.y * size.z;
    if volume != 0.0 {
        let real = mat3_of(mat).determinant().abs();
        size * (real / volume).abs().cbrt()
    } else {
        size
    }
}

/// Scales the X, Y and Z columns of `mat` by the matching component of
/// `scale`.
pub fn rescale_columns(mat: &mut Matrix4<f32>, scale: &Vector3<f32>) {
    for (axis, factor) in scale.iter().enumerate() {
        let mut col = mat.fixed_view_mut::<3, 1>(0, axis);
        col *= *factor;
    }
}

/// Normalizes the X, Y and Z columns in place and returns their former
/// lengths.
pub fn normalize_columns(mat: &mut Matrix4<f32>) -> Vector3<f32> {
    let size = mat4_to_size(mat);
    for axis in 0..3 {
        if size[axis] > 0.0 {
            let mut col = mat.fixed_view_mut::<3, 1>(0, axis);
            col /= size[axis];
        }
    }
    size
}

/// Multiplies only the 3x3 block of `mat` by `factor`.
pub fn scale_mat3_part(mat: &mut Matrix4<f32>, factor: f32) {
    let mut block = mat.fixed_view_mut::<3, 3>(0, 0);
    block *= factor;
}

/// Component-wise reciprocal; zero components stay zero.
pub fn invert_safe(v: &Vector3<f32>) -> Vector3<f32> {
    v.map(|c| if c != 0.0 { 1.0 / c } else { 0.0 })
}

/// Orthogonalizes the 3x3 block of `mat` around the column `axis`.
///
/// The secondary axes are first projected onto the plane perpendicular to the
/// primary one, which keeps the determinant intact, then any remaining shear
/// between them is split evenly. When `normalize` is false the column lengths
/// are restored so the volume of the matrix is preserved.
pub fn orthogonalize_stable(mat: &mut Matrix4<f32>, axis: usize, normalize: bool) {
    let (a, b) = match axis {
        0 => (1, 2),
        1 => (0, 2),
        _ => (0, 1),
    };
    let mut primary = mat.fixed_view::<3, 1>(0, axis).into_owned();
    let mut v2 = mat.fixed_view::<3, 1>(0, a).into_owned();
    let mut v3 = mat.fixed_view::<3, 1>(0, b).into_owned();

    let len_sq = primary.norm_squared();
    if len_sq > 0.0 {
        v2 -= primary * (v2.dot(&primary) / len_sq);
        v3 -= primary * (v3.dot(&primary) / len_sq);
        if normalize {
            primary /= len_sq.sqrt();
        }
    }

    let length_v2 = v2.norm();
    let length_v3 = v3.norm();
    let mut norm_v2 = if length_v2 > 0.0 { v2 / length_v2 } else { v2 };
    let mut norm_v3 = if length_v3 > 0.0 { v3 / length_v3 } else { v3 };
    let cos_angle = norm_v2.dot(&norm_v3);
    let abs_cos = cos_angle.abs();

    if abs_cos > 1e-4 && abs_cos < 1.0 - EPSILON {
        let angle = cos_angle.acos();
        let target_angle = angle + (std::f32::consts::FRAC_PI_2 - angle) / 2.0;

        let mut rotated = norm_v2 - norm_v3 * cos_angle;
        rotated *= target_angle.sin() / rotated.norm();
        rotated += norm_v3 * target_angle.cos();
        norm_v2 = rotated;

        let projected = norm_v3 - norm_v2 * norm_v3.dot(&norm_v2);
        norm_v3 = projected.try_normalize(0.0).unwrap_or(norm_v3);

        if !normalize {
            let scale_fac = angle.sin().sqrt();
            v2 = norm_v2 * length_v2 * scale_fac;
            v3 = norm_v3 * length_v3 * scale_fac;
        }
    }

    if normalize {
        v2 = norm_v2;
        v3 = norm_v3;
    }

    mat.fixed_view_mut::<3, 1>(0, axis).copy_from(&primary);
    mat.fixed_view_mut::<3, 1>(0, a).copy_from(&v2);
    mat.fixed_view_mut::<3, 1>(0, b).copy_from(&v3);
}

/// Inverts `mat`, falling back to the identity for singular input.
pub fn invert_or_identity(mat: &Matrix4<f32>) -> Matrix4<f32> {
    mat.try_inverse().unwrap_or_else(Matrix4::identity)
}

/// 3x3 counterpart of [`invert_or_identity`].
pub fn invert3_or_identity(mat: &Matrix3<f32>) -> Matrix3<f32> {
    mat.try_inverse().unwrap_or_else(Matrix3::identity)
}

/// Mirrors a point across the X = 0 plane.
pub fn mirror_x(v: &Vector3<f32>) -> Vector3<f32> {
    Vector3::new(-v.x, v.y, v.z)
}
