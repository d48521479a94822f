use nalgebra::{Matrix4, Vector3};

use crate::armature::{BoneFlags, EditArmature, EditBone, EditBoneId};
use crate::error::EditError;
use crate::math::{invert_or_identity, mirror_x, transform_point};
use crate::mirror::{find_mirror, get_mirror_bone, propagate_mirror};

/// One armature taking part in a multi-armature edit.
pub struct EditTarget<'a> {
    pub name: String,
    pub object_to_world: Matrix4<f32>,
    pub armature: &'a mut EditArmature,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FillOptions {
    /// Cursor location in world space.
    pub cursor: Vector3<f32>,
    /// Name given to the new bone, made unique on insertion.
    pub bone_name: String,
}

impl Default for FillOptions {
    fn default() -> Self {
        Self {
            cursor: Vector3::zeros(),
            bone_name: "Bone".to_string(),
        }
    }
}

/// Bone created by [`fill_between_joints`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Filled {
    /// Index of the target the bone was added to.
    pub target: usize,
    pub bone: EditBoneId,
}

/// A selected joint. Head and tail joints at the same position merge when
/// the two bones are parent and child.
#[derive(Debug, Clone)]
struct Joint {
    position: Vector3<f32>,
    head_owner: Option<EditBoneId>,
    tail_owner: Option<EditBoneId>,
}

impl Joint {
    fn owns(&self, id: EditBoneId) -> bool {
        self.head_owner == Some(id) || self.tail_owner == Some(id)
    }

    /// Tail owners take priority as parent.
    fn parent_candidate(&self) -> Option<EditBoneId> {
        self.tail_owner.or(self.head_owner)
    }
}

fn add_joint(joints: &mut Vec<Joint>, armature: &EditArmature, id: EditBoneId, tail: bool) {
    let Some(bone) = armature.get(id) else {
        return;
    };
    let position = if tail { bone.tail } else { bone.head };

    for joint in joints.iter_mut().filter(|joint| joint.position == position) {
        if tail {
            if joint.head_owner.is_some_and(|owner| armature.parent(owner) == Some(id)) {
                joint.tail_owner = Some(id);
                return;
            }
        } else if joint.tail_owner.is_some_and(|owner| bone.parent == Some(owner)) {
            joint.head_owner = Some(id);
            return;
        }
    }

    joints.push(Joint {
        position,
        head_owner: (!tail).then_some(id),
        tail_owner: tail.then_some(id),
    });
}

/// Adds a bone between the selected joints, or from one joint to the cursor.
///
/// Joints are the heads of unconnected root-selected bones and the tails of
/// tip-selected bones, among visible bones only. With two joints the head
/// end is picked by the active bone, then by distance to the cursor; a
/// head joint and a tail joint always give a bone from the tail joint to the
/// head joint. The new bone is parented to the owner of its head joint and
/// connected when its head lies exactly on that parent's tail. It becomes the
/// active bone with only its tip selected. Under mirror edit a new bone whose
/// name has a side also gets its counterpart, reflected across X = 0.
///
/// # Errors
///
/// * [`EditError::NoJointsSelected`] when no joint is selected.
/// * [`EditError::MixedSkeletons`] when joints come from several targets.
/// * [`EditError::TooManyJoints`] for more than two joints.
/// * [`EditError::SameBoneSelected`] when both joints belong to one bone.
pub fn fill_between_joints(
    targets: &mut [EditTarget<'_>],
    options: &FillOptions,
) -> Result<Option<Filled>, EditError> {
    let mut joints: Vec<Joint> = Vec::new();
    let mut owner_target: Option<usize> = None;
    let mut mixed = false;

    for (index, target) in targets.iter().enumerate() {
        let armature = &*target.armature;
        for id in armature.ids() {
            if !armature.is_visible(id) {
                continue;
            }
            let Some(flags) = armature.get(id).map(|bone| bone.flags) else {
                continue;
            };
            let mut check = false;
            if !flags.contains(BoneFlags::CONNECTED) && flags.contains(BoneFlags::ROOT_SELECTED) {
                add_joint(&mut joints, armature, id, false);
                check = true;
            }
            if flags.contains(BoneFlags::TIP_SELECTED) {
                add_joint(&mut joints, armature, id, true);
                check = true;
            }
            if check {
                if owner_target.is_some_and(|owner| owner != index) {
                    mixed = true;
                }
                owner_target = Some(index);
            }
        }
    }

    let Some(target_index) = owner_target.filter(|_| !joints.is_empty()) else {
        return Err(EditError::NoJointsSelected);
    };
    if mixed {
        return Err(EditError::MixedSkeletons);
    }

    let target = &mut targets[target_index];
    let cursor = transform_point(&invert_or_identity(&target.object_to_world), &options.cursor);
    let armature = &mut *target.armature;

    let (head, tail, parent) = match joints.as_slice() {
        [joint] => (joint.position, cursor, joint.parent_candidate()),
        [a, b] => {
            let same_bone = (a.head_owner.is_some() && a.head_owner == b.tail_owner)
                || (a.tail_owner.is_some() && a.tail_owner == b.head_owner);
            if same_bone {
                return Err(EditError::SameBoneSelected);
            }

            let both_heads = a.head_owner.is_some() && b.head_owner.is_some();
            let both_tails = a.tail_owner.is_some() && b.tail_owner.is_some();
            // true: a is the head end of the new bone.
            let a_first = if both_heads || both_tails {
                match armature.active() {
                    Some(active) if a.owns(active) => false,
                    Some(active) if b.owns(active) => true,
                    _ => {
                        let dist_a = (a.position - cursor).norm_squared();
                        let dist_b = (b.position - cursor).norm_squared();
                        dist_a < dist_b
                    }
                }
            } else if a.head_owner.is_some() {
                false
            } else if b.head_owner.is_some() {
                true
            } else {
                return Ok(None);
            };

            if a_first {
                (a.position, b.position, a.parent_candidate())
            } else {
                (b.position, a.position, b.parent_candidate())
            }
        }
        _ => {
            return Err(EditError::TooManyJoints {
                count: joints.len(),
            });
        }
    };

    let mut bone = EditBone::new(options.bone_name.as_str(), head, tail);
    bone.parent = parent;
    if parent.and_then(|p| armature.get(p)).is_some_and(|p| p.tail == head) {
        bone.flags |= BoneFlags::CONNECTED;
    }
    if let Some(collection) = armature.active_collection.clone() {
        bone.props.collections.push(collection);
    }

    armature.deselect_all();
    let id = armature.insert(bone);
    if let Some(bone) = armature.get_mut(id) {
        bone.flags |= BoneFlags::TIP_SELECTED;
    }
    armature.set_active(Some(id));
    if armature.mirror_edit {
        add_mirror_counterpart(armature, id);
    }
    armature.sync_selection();
    propagate_mirror(armature);

    Ok(Some(Filled {
        target: target_index,
        bone: id,
    }))
}

/// Adds the counterpart of a filled bone when its name has a side and no
/// bone carries the flipped name yet. The counterpart hangs from the mirror
/// of the new bone's parent, or the parent itself for a centre bone.
fn add_mirror_counterpart(armature: &mut EditArmature, id: EditBoneId) -> Option<EditBoneId> {
    let bone = armature.get(id)?;
    let name = find_mirror(&bone.name).filter(|name| armature.find(name).is_none())?;
    let parent = bone
        .parent
        .map(|p| get_mirror_bone(armature, p).unwrap_or(p));

    let mut counterpart = EditBone::new(name, mirror_x(&bone.head), mirror_x(&bone.tail));
    counterpart.roll = -bone.roll;
    counterpart.props = bone.props.clone();
    counterpart.parent = parent;
    if parent
        .and_then(|p| armature.get(p))
        .is_some_and(|p| p.tail == counterpart.head)
    {
        counterpart.flags |= BoneFlags::CONNECTED;
    }
    Some(armature.insert(counterpart))
}
