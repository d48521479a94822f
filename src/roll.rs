use nalgebra::{Matrix4, Vector3};
use serde::{Deserialize, Serialize};

use crate::armature::{EditArmature, EditBone, EditBoneId};
use crate::error::EditError;
use crate::math::{
    EPSILON, invert_or_identity, invert3_or_identity, mat3_of, transform_point,
    vec_roll_to_mat3_normalized,
};
use crate::mirror::get_mirror_bone;
use crate::report::{ChangeKind, OpOutput};

/// Smallest tangent length accepted while walking up a chain.
const TANGENT_EPSILON: f32 = 0.00001;

/// Reference used by [`calc_roll`] to orient each bone's Z axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RollSource {
    GlobalPosX,
    GlobalPosY,
    GlobalPosZ,
    GlobalNegX,
    GlobalNegY,
    GlobalNegZ,
    /// Sum of the bone direction and the reversed parent direction.
    TangentPosX,
    /// Cross product of the bone direction and the reversed parent direction.
    TangentPosZ,
    TangentNegX,
    TangentNegZ,
    /// Z axis of the active bone.
    Active,
    /// World-space view direction.
    View { direction: Vector3<f32> },
    /// World-space cursor location.
    Cursor { location: Vector3<f32> },
}

impl RollSource {
    /// Negative variants always flip the reference.
    fn implies_flip(&self) -> bool {
        matches!(
            self,
            RollSource::GlobalNegX
                | RollSource::GlobalNegY
                | RollSource::GlobalNegZ
                | RollSource::TangentNegX
                | RollSource::TangentNegZ
        )
    }

    fn global_axis(&self) -> Option<Vector3<f32>> {
        match self {
            RollSource::GlobalPosX => Some(Vector3::x()),
            RollSource::GlobalPosY => Some(Vector3::y()),
            RollSource::GlobalPosZ => Some(Vector3::z()),
            RollSource::GlobalNegX => Some(-Vector3::x()),
            RollSource::GlobalNegY => Some(-Vector3::y()),
            RollSource::GlobalNegZ => Some(-Vector3::z()),
            _ => None,
        }
    }
}

/// Roll that brings the bone's Z axis as close as possible to `reference`.
///
/// The reference is projected onto the plane perpendicular to the bone axis
/// and the signed angle to the zero-roll Z axis is returned. With
/// `axis_only` the projected reference may be flipped so the bone rolls by
/// at most 90 degrees. A zero-length bone, or a reference parallel to the
/// bone axis, leaves the current roll unchanged.
///
/// # Arguments
///
/// * `bone` - Bone whose head/tail define the axis.
/// * `reference` - Unit reference direction in armature space.
/// * `axis_only` - Align to the reference's axis, ignoring its sign.
pub fn solve_roll(bone: &EditBone, reference: &Vector3<f32>, axis_only: bool) -> f32 {
    let axis = bone.tail - bone.head;
    let length = axis.norm();
    if length <= EPSILON {
        return bone.roll;
    }
    let nor = axis / length;
    if reference.dot(&nor).abs() >= 1.0 - EPSILON {
        return bone.roll;
    }

    let zero_roll = vec_roll_to_mat3_normalized(&nor, 0.0);
    let z_axis = zero_roll.column(2).into_owned();

    let mut projected = reference - nor * reference.dot(&nor);
    if axis_only && projected.angle(&z_axis) > std::f32::consts::FRAC_PI_2 {
        projected = -projected;
    }

    let roll = projected.angle(&z_axis);
    if z_axis.cross(&projected).dot(&nor) < 0.0 {
        -roll
    } else {
        roll
    }
}

/// Mirror images that are not editable themselves take the negated roll of
/// an editable counterpart.
fn mirror_rolls(armature: &mut EditArmature) {
    if !armature.mirror_edit {
        return;
    }
    for id in armature.ids() {
        if armature.is_editable(id) {
            continue;
        }
        let Some(mirror) = get_mirror_bone(armature, id) else {
            continue;
        };
        if !armature.is_editable(mirror) {
            continue;
        }
        let Some(roll) = armature.get(mirror).map(|bone| bone.roll) else {
            continue;
        };
        if let Some(bone) = armature.get_mut(id) {
            bone.roll = -roll;
        }
    }
}

/// Solves and stores the roll of one bone. Returns false for a stale handle.
fn roll_towards(
    armature: &mut EditArmature,
    id: EditBoneId,
    reference: &Vector3<f32>,
    axis_only: bool,
) -> bool {
    let Some(bone) = armature.get_mut(id) else {
        return false;
    };
    let roll = solve_roll(bone, reference, axis_only);
    bone.roll = roll;
    true
}

fn editable_bones(armature: &EditArmature) -> Vec<EditBoneId> {
    armature
        .ids()
        .into_iter()
        .filter(|id| armature.is_editable(*id))
        .collect()
}

/// Direction used by the tangent sources, walking up from the bone's parent
/// until the combined direction is non-degenerate.
fn tangent_reference(armature: &EditArmature, id: EditBoneId, cross: bool) -> Option<Vector3<f32>> {
    let bone = armature.get(id)?;
    let dir_a = (bone.tail - bone.head).try_normalize(0.0).unwrap_or_else(Vector3::zeros);
    let mut other = bone.parent;
    while let Some(other_id) = other {
        let other_bone = armature.get(other_id)?;
        let dir_b = (other_bone.head - other_bone.tail)
            .try_normalize(0.0)
            .unwrap_or_else(Vector3::zeros);
        let vec = if cross { dir_a.cross(&dir_b) } else { dir_a + dir_b };
        let length = vec.norm();
        if length >= TANGENT_EPSILON {
            return Some(vec / length);
        }
        other = other_bone.parent;
    }
    None
}

/// Recalculates the roll of every editable bone from a reference source.
///
/// Global axes, the view direction and the cursor are given in world space
/// and brought into armature space through `object_to_world`. Negative
/// sources imply `axis_flip`, which is ignored for the active-bone source.
///
/// # Errors
///
/// [`EditError::NoActiveBone`] for [`RollSource::Active`] without an active
/// bone.
pub fn calc_roll(
    armature: &mut EditArmature,
    source: &RollSource,
    axis_flip: bool,
    axis_only: bool,
    object_to_world: &Matrix4<f32>,
) -> Result<OpOutput, EditError> {
    let axis_flip = match source {
        RollSource::Active => false,
        _ => axis_flip || source.implies_flip(),
    };
    let sign = if axis_flip { -1.0 } else { 1.0 };
    let world_to_object = invert_or_identity(object_to_world);
    let world_to_object_rot = invert3_or_identity(&mat3_of(object_to_world));
    let mut changed = false;

    match source {
        RollSource::Cursor { location } => {
            let cursor = transform_point(&world_to_object, location);
            for id in editable_bones(armature) {
                let Some(head) = armature.get(id).map(|bone| bone.head) else {
                    continue;
                };
                if let Some(reference) = ((cursor - head) * sign).try_normalize(0.0) {
                    changed |= roll_towards(armature, id, &reference, axis_only);
                }
            }
        }
        RollSource::TangentPosX
        | RollSource::TangentPosZ
        | RollSource::TangentNegX
        | RollSource::TangentNegZ => {
            let cross = matches!(source, RollSource::TangentPosZ | RollSource::TangentNegZ);
            for id in armature.ids() {
                let Some(parent) = armature.parent(id) else {
                    continue;
                };
                let is_edit = armature.is_editable(id);
                let is_edit_parent = armature.is_editable(parent);
                if !is_edit && !is_edit_parent {
                    continue;
                }
                let Some(reference) = tangent_reference(armature, id, cross) else {
                    continue;
                };
                let reference = reference * sign;
                if is_edit {
                    changed |= roll_towards(armature, id, &reference, axis_only);
                }
                // A root has no parent of its own to take a tangent from.
                if is_edit_parent && armature.parent(parent).is_none() {
                    changed |= roll_towards(armature, parent, &reference, axis_only);
                }
            }
        }
        _ => {
            let reference = match source {
                RollSource::Active => {
                    let active = armature.active().ok_or(EditError::NoActiveBone)?;
                    armature
                        .bone_matrix(active)
                        .ok_or(EditError::NoActiveBone)?
                        .column(2)
                        .into_owned()
                }
                RollSource::View { direction } => world_to_object_rot * direction,
                other => {
                    let axis = other.global_axis().unwrap_or_else(Vector3::z);
                    (world_to_object_rot * axis)
                        .try_normalize(0.0)
                        .unwrap_or(axis)
                }
            };
            let reference = reference * sign;
            for id in editable_bones(armature) {
                changed |= roll_towards(armature, id, &reference, axis_only);
            }
        }
    }

    mirror_rolls(armature);

    Ok(if changed {
        OpOutput::changed(&[ChangeKind::Geometry])
    } else {
        OpOutput::unchanged()
    })
}

/// Sets a fixed roll on every editable bone.
pub fn clear_roll(armature: &mut EditArmature, roll: f32) -> OpOutput {
    let bones = editable_bones(armature);
    for id in bones.iter() {
        if let Some(bone) = armature.get_mut(*id) {
            bone.roll = roll;
        }
    }
    mirror_rolls(armature);

    if bones.is_empty() {
        OpOutput::unchanged()
    } else {
        OpOutput::changed(&[ChangeKind::Geometry])
    }
}
