use nalgebra::{Matrix4, Vector3};
use serde::{Deserialize, Serialize};

use crate::armature::BoneFlags;
use crate::math::{
    invert_or_identity, invert_safe, mat3_of, mat4_from_parts, mat4_to_size, mat4_to_size_fix_shear,
    mat4_to_volume_scale, normalize_columns, orthogonalize_stable, rescale_columns,
    scale_mat3_part, transform_point, translation_of,
};

/// How a bone inherits the scale of its parent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InheritScaleMode {
    /// Inherit the full parent matrix, shear included.
    #[default]
    Full,
    /// Inherit scale but remove shear from the result.
    FixShear,
    /// Inherit only the uniform part (cube root of the volume).
    Average,
    /// Ignore parent scale.
    None,
    /// Ignore parent scale without orthogonalizing first.
    NoneLegacy,
    /// Inherit scale only along the bone's own axes.
    Aligned,
}

/// Decomposed parent-to-child transform: a rotation/scale part, a location
/// part and a post-scale applied to the result columns.
///
/// This is the only place where parent scale/shear inheritance is resolved;
/// pose evaluation and rest-pose baking both route their hierarchy math
/// through it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParentTransform {
    pub rotscale: Matrix4<f32>,
    pub location: Matrix4<f32>,
    pub post_scale: Vector3<f32>,
}

impl Default for ParentTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl ParentTransform {
    /// Transform of a bone without any parent influence.
    pub fn identity() -> Self {
        Self {
            rotscale: Matrix4::identity(),
            location: Matrix4::identity(),
            post_scale: Vector3::repeat(1.0),
        }
    }

    /// Algebraic inverse: both matrices are inverted and the post-scale is
    /// replaced by its safe reciprocal.
    pub fn invert(&self) -> Self {
        Self {
            rotscale: invert_or_identity(&self.rotscale),
            location: invert_or_identity(&self.location),
            post_scale: invert_safe(&self.post_scale),
        }
    }

    /// Composes `a` then `b`, left to right.
    pub fn combine(a: &Self, b: &Self) -> Self {
        Self {
            rotscale: a.rotscale * b.rotscale,
            location: a.location * b.location,
            post_scale: a.post_scale.component_mul(&b.post_scale),
        }
    }

    /// Applies the transform to a bone-local 4x4 matrix.
    pub fn apply(&self, input: &Matrix4<f32>) -> Matrix4<f32> {
        let mut out = self.rotscale * input;
        let location = transform_point(&self.location, &translation_of(input));
        out.fixed_view_mut::<3, 1>(0, 3).copy_from(&location);
        rescale_columns(&mut out, &self.post_scale);
        out
    }
}

/// Computes how a child bone is placed relative to its parent.
///
/// # Arguments
///
/// * `flags` - Bone flags; `HINGE` drops parent rotation and
///   `NO_LOCAL_LOCATION` keeps the location in parent space.
/// * `inherit_scale_mode` - Scale inheritance policy of the child.
/// * `offset` - Child rest matrix relative to the parent's tail.
/// * `parent_rest` - Parent rest (arm) matrix, `None` for a root bone.
/// * `parent_pose` - Parent pose matrix, `None` for a root bone.
///
/// # Returns
///
/// The parent transform to feed into [`ParentTransform::apply`].
pub fn compute_parent_transform(
    flags: BoneFlags,
    inherit_scale_mode: InheritScaleMode,
    offset: &Matrix4<f32>,
    parent_rest: Option<&Matrix4<f32>>,
    parent_pose: Option<&Matrix4<f32>>,
) -> ParentTransform {
    let mut result = ParentTransform::identity();

    let (Some(parent_rest), Some(parent_pose)) = (parent_rest, parent_pose) else {
        result.rotscale = *offset;
        result.location = if flags.contains(BoneFlags::NO_LOCAL_LOCATION) {
            mat4_from_parts(&nalgebra::Matrix3::identity(), &translation_of(offset))
        } else {
            *offset
        };
        return result;
    };

    let use_rotation = !flags.contains(BoneFlags::HINGE);
    let full_transform = use_rotation && inherit_scale_mode == InheritScaleMode::Full;

    if full_transform {
        result.rotscale = parent_pose * offset;
    } else {
        let mut tmat;
        if use_rotation {
            tmat = *parent_pose;
            match inherit_scale_mode {
                InheritScaleMode::Full | InheritScaleMode::FixShear => {}
                InheritScaleMode::None | InheritScaleMode::Average => {
                    orthogonalize_stable(&mut tmat, 1, true);
                }
                InheritScaleMode::Aligned => {
                    orthogonalize_stable(&mut tmat, 1, false);
                    result.post_scale = normalize_columns(&mut tmat);
                }
                InheritScaleMode::NoneLegacy => {
                    normalize_columns(&mut tmat);
                }
            }
        } else {
            tmat = *parent_rest;
            match inherit_scale_mode {
                InheritScaleMode::Full => {
                    rescale_columns(&mut tmat, &mat4_to_size(parent_pose));
                }
                InheritScaleMode::FixShear => {
                    rescale_columns(&mut tmat, &mat4_to_size_fix_shear(parent_pose));
                }
                InheritScaleMode::Aligned => {
                    result.post_scale = mat4_to_size_fix_shear(parent_pose);
                }
                InheritScaleMode::Average
                | InheritScaleMode::None
                | InheritScaleMode::NoneLegacy => {}
            }
        }

        if inherit_scale_mode == InheritScaleMode::Average {
            scale_mat3_part(&mut tmat, mat4_to_volume_scale(parent_pose).abs());
        }

        result.rotscale = tmat * offset;

        // Shear is removed around the Y axis; column lengths keep the volume.
        if inherit_scale_mode == InheritScaleMode::FixShear {
            orthogonalize_stable(&mut result.rotscale, 1, false);
        }
    }

    // Without local location the channel moves along the parent's posed axes
    // from the point the offset lands on.
    result.location = if flags.contains(BoneFlags::NO_LOCAL_LOCATION) {
        let bone_loc = transform_point(parent_pose, &translation_of(offset));
        mat4_from_parts(&mat3_of(parent_pose), &bone_loc)
    } else if !full_transform {
        parent_pose * offset
    } else {
        result.rotscale
    };

    result
}

/// Offset of a bone relative to its parent's tail, built from the bone's
/// local head/roll orientation.
pub fn bone_offset_matrix(
    bone_mat: &nalgebra::Matrix3<f32>,
    head: &Vector3<f32>,
    parent_length: f32,
) -> Matrix4<f32> {
    let mut offset = head.clone_owned();
    offset.y += parent_length;
    mat4_from_parts(bone_mat, &offset)
}

/// Local channel matrix from location, rotation and scale.
pub fn channel_matrix(
    location: &Vector3<f32>,
    rotation: &nalgebra::Matrix3<f32>,
    scale: &Vector3<f32>,
) -> Matrix4<f32> {
    let rot_scale = rotation * nalgebra::Matrix3::from_diagonal(scale);
    mat4_from_parts(&rot_scale, location)
}

/// 3x3 block of the location matrix, used to move location channels between
/// spaces.
pub fn location_basis(pt: &ParentTransform) -> nalgebra::Matrix3<f32> {
    mat3_of(&pt.location)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Rotation3, Translation3};

    fn scaled(x: f32, y: f32, z: f32) -> Matrix4<f32> {
        Matrix4::new_nonuniform_scaling(&Vector3::new(x, y, z))
    }

    #[test]
    fn given_root_bone_when_computing_then_offset_is_used_directly() {
        let offset = Translation3::new(1.0, 2.0, 3.0).to_homogeneous();
        let pt = compute_parent_transform(
            BoneFlags::empty(),
            InheritScaleMode::Full,
            &offset,
            None,
            None,
        );
        assert_eq!(pt.rotscale, offset);
        assert_eq!(pt.location, offset);
    }

    #[test]
    fn given_full_inheritance_when_applying_then_parent_pose_is_composed() {
        let offset = Translation3::new(0.0, 1.0, 0.0).to_homogeneous();
        let parent_pose = Rotation3::from_euler_angles(0.0, 0.0, 0.5).to_homogeneous();
        let pt = compute_parent_transform(
            BoneFlags::empty(),
            InheritScaleMode::Full,
            &offset,
            Some(&Matrix4::identity()),
            Some(&parent_pose),
        );
        let out = pt.apply(&Matrix4::identity());
        assert!((out - parent_pose * offset).norm() < 0.0001);
    }

    #[test]
    fn given_scale_none_when_parent_is_scaled_then_child_keeps_unit_scale() {
        let offset = Translation3::new(0.0, 1.0, 0.0).to_homogeneous();
        let parent_pose = scaled(2.0, 2.0, 2.0);
        let pt = compute_parent_transform(
            BoneFlags::empty(),
            InheritScaleMode::None,
            &offset,
            Some(&Matrix4::identity()),
            Some(&parent_pose),
        );
        let out = pt.apply(&Matrix4::identity());
        let size = mat4_to_size(&out);
        assert!((size - Vector3::repeat(1.0)).norm() < 0.0001);
        assert!((translation_of(&out) - Vector3::new(0.0, 2.0, 0.0)).norm() < 0.0001);
    }

    #[test]
    fn given_average_mode_when_parent_is_non_uniform_then_scale_is_volume_preserving() {
        let offset = Matrix4::identity();
        let parent_pose = scaled(1.0, 8.0, 1.0);
        let pt = compute_parent_transform(
            BoneFlags::empty(),
            InheritScaleMode::Average,
            &offset,
            Some(&Matrix4::identity()),
            Some(&parent_pose),
        );
        let size = mat4_to_size(&pt.rotscale);
        assert!((size - Vector3::repeat(2.0)).norm() < 0.0001);
    }

    #[test]
    fn given_fix_shear_when_parent_scale_is_non_uniform_then_sizes_survive_without_shear() {
        let parent_pose =
            Rotation3::from_euler_angles(0.0, 0.0, 0.7).to_homogeneous() * scaled(2.0, 1.0, 1.0);
        let pt = compute_parent_transform(
            BoneFlags::empty(),
            InheritScaleMode::FixShear,
            &Matrix4::identity(),
            Some(&Matrix4::identity()),
            Some(&parent_pose),
        );
        assert!((mat4_to_size(&pt.rotscale) - Vector3::new(2.0, 1.0, 1.0)).norm() < 0.0001);
        assert!((mat3_of(&pt.rotscale) - mat3_of(&parent_pose)).norm() < 0.0001);
    }

    #[test]
    fn given_fix_shear_when_offset_is_rotated_under_non_uniform_parent_then_shear_is_removed() {
        let offset = Rotation3::from_euler_angles(0.0, 0.0, 0.6).to_homogeneous();
        let parent_pose = scaled(3.0, 1.0, 1.0);
        let sheared = parent_pose * offset;

        let pt = compute_parent_transform(
            BoneFlags::empty(),
            InheritScaleMode::FixShear,
            &offset,
            Some(&Matrix4::identity()),
            Some(&parent_pose),
        );

        let m = mat3_of(&pt.rotscale);
        let source = mat3_of(&sheared);
        assert!((m.column(1) - source.column(1)).norm() < 0.0001);
        assert!(m.column(0).dot(&m.column(1)).abs() < 0.0001);
        assert!(m.column(1).dot(&m.column(2)).abs() < 0.0001);
        assert!(m.column(0).dot(&m.column(2)).abs() < 0.0001);
        assert!((m.determinant() - source.determinant()).abs() < 0.001);
    }

    #[test]
    fn given_no_local_location_under_non_uniform_parent_then_location_follows_parent_axes() {
        let offset = Translation3::new(0.5, 1.0, 0.0).to_homogeneous();
        let parent_pose = Translation3::new(0.0, 0.0, 2.0).to_homogeneous()
            * Rotation3::from_euler_angles(0.4, 0.0, 0.2).to_homogeneous()
            * scaled(1.0, 2.0, 0.5);

        let pt = compute_parent_transform(
            BoneFlags::NO_LOCAL_LOCATION,
            InheritScaleMode::None,
            &offset,
            Some(&Matrix4::identity()),
            Some(&parent_pose),
        );

        assert!((mat3_of(&pt.location) - mat3_of(&parent_pose)).norm() < 0.0001);
        let expected = transform_point(&parent_pose, &Vector3::new(0.5, 1.0, 0.0));
        assert!((translation_of(&pt.location) - expected).norm() < 0.0001);
    }

    #[test]
    fn given_no_local_location_on_root_when_computing_then_location_is_offset_translation() {
        let offset = Rotation3::from_euler_angles(0.0, 0.0, 0.5).to_homogeneous()
            * Translation3::new(1.0, 0.0, 0.0).to_homogeneous();
        let pt = compute_parent_transform(
            BoneFlags::NO_LOCAL_LOCATION,
            InheritScaleMode::Full,
            &offset,
            None,
            None,
        );
        assert_eq!(mat3_of(&pt.location), nalgebra::Matrix3::identity());
        assert_eq!(translation_of(&pt.location), translation_of(&offset));
    }

    #[test]
    fn given_hinge_when_parent_rotates_then_rotation_is_ignored() {
        let offset = Matrix4::identity();
        let parent_pose = Rotation3::from_euler_angles(0.3, 0.0, 0.0).to_homogeneous();
        let pt = compute_parent_transform(
            BoneFlags::HINGE,
            InheritScaleMode::Full,
            &offset,
            Some(&Matrix4::identity()),
            Some(&parent_pose),
        );
        assert!((mat3_of(&pt.rotscale) - nalgebra::Matrix3::identity()).norm() < 0.0001);
    }

    #[test]
    fn given_transform_when_combined_with_inverse_then_apply_is_identity() {
        let offset = Translation3::new(0.0, 1.0, 0.5).to_homogeneous();
        let parent_pose = Rotation3::from_euler_angles(0.2, -0.4, 0.9).to_homogeneous()
            * scaled(1.5, 1.5, 1.5);
        let pt = compute_parent_transform(
            BoneFlags::empty(),
            InheritScaleMode::Aligned,
            &offset,
            Some(&Matrix4::identity()),
            Some(&parent_pose),
        );
        let round = ParentTransform::combine(&pt.invert(), &pt);
        let input = Translation3::new(0.3, 0.1, 0.0).to_homogeneous();
        let out = round.apply(&input);
        assert!((out - input).norm() < 0.001);
    }
}
