//! Applying the current pose of an armature object as the armature's new
//! rest pose.

use std::collections::HashSet;

use nalgebra::{Matrix4, Vector3};

use crate::armature::{
    Armature, BBoneCurve, BoneFlags, EditArmature, EditBone, Pose, PoseChannel,
};
use crate::error::EditError;
use crate::log_info;
use crate::math::{
    invert3_or_identity, invert_or_identity, mat3_of, mat3_vec_to_roll, mat4_from_parts,
    transform_point, translation_of, vec_roll_to_mat3,
};
use crate::report::{ChangeKind, Diagnostic, OpOutput};
use crate::scene::Scene;
use crate::transform::{ParentTransform, compute_parent_transform, location_basis};

/// Result of a rest-pose bake on one armature object.
pub type BakeReport = OpOutput;

/// State handed from a baked bone to its children during a selected-only
/// bake.
#[derive(Debug, Clone, Copy)]
struct BakeState {
    /// Rest bone index of the parent that was just processed.
    bone: usize,
    new_rest_mat: Matrix4<f32>,
    new_arm_mat: Matrix4<f32>,
}

/// Applies the pose of `object` as the rest pose of its armature.
///
/// In full mode every bone takes its posed head, tail and roll and every
/// channel is cleared. With `selected_only`, only selected bones are baked;
/// the unselected bones below them get their rest moved and their location
/// re-expressed so that nothing visibly moves. Poses of every object using
/// the armature are rebuilt afterwards, and objects parented to bones keep
/// their world transform.
///
/// # Errors
///
/// Returns an error when the object is missing or not an armature, or when
/// its armature is in edit mode.
pub fn apply_pose_as_rest(
    scene: &mut Scene,
    object: &str,
    selected_only: bool,
) -> Result<BakeReport, EditError> {
    let target = scene
        .object(object)
        .ok_or_else(|| EditError::UnknownObject(object.to_string()))?;
    let armature_name = target
        .armature_name()
        .ok_or_else(|| EditError::NotAnArmature(object.to_string()))?
        .to_string();
    let armature = scene
        .armature(&armature_name)
        .ok_or_else(|| EditError::UnknownArmature(armature_name.clone()))?;
    if armature.is_editing() {
        return Err(EditError::InEditMode(armature_name));
    }

    let selected: HashSet<String> = armature
        .bones()
        .iter()
        .filter(|bone| {
            bone.flags.contains(BoneFlags::SELECTED) && bone.is_visible(&armature.collections)
        })
        .map(|bone| bone.name.clone())
        .collect();
    if selected_only && selected.is_empty() {
        return Ok(OpOutput::unchanged());
    }

    let mut output = OpOutput::changed(&[ChangeKind::Geometry, ChangeKind::Pose]);
    if target.action.is_some() {
        output = output.with_diagnostic(Diagnostic::warning(
            "ACTION_INVALIDATED",
            "Actions on this armature will be destroyed by this new rest pose as the \
             transforms stored are relative to the old rest pose",
        ));
    }

    let mut pose = target.pose().cloned().unwrap_or_default();
    pose.evaluate(armature);
    let mut edit = armature.to_edit();
    let bone_parented = scene.bone_parented_worlds(object);

    if selected_only {
        bake_selected(armature, &mut pose, &mut edit, &selected);
    } else {
        bake_all(armature, &mut pose, &mut edit);
    }

    for chan in pose.channels_mut() {
        if !selected_only || selected.contains(&chan.name) {
            for constraint in &mut chan.constraints {
                constraint.reset_rest_cache();
            }
        }
    }

    let Some(armature) = scene.armature_mut(&armature_name) else {
        return Err(EditError::UnknownArmature(armature_name));
    };
    edit.commit(armature);
    if let Some(stored) = scene.object_mut(object).and_then(|o| o.pose_mut()) {
        *stored = pose;
    }
    scene.rebuild_poses(&armature_name);
    for (name, world) in bone_parented {
        scene.reparent_in_place(&name, world);
    }

    log_info!(
        "applied pose of '{}' as rest pose of '{}'{}",
        object,
        armature_name,
        if selected_only { " (selected bones)" } else { "" }
    );
    Ok(output)
}

fn bake_all(armature: &Armature, pose: &mut Pose, edit: &mut EditArmature) {
    for (bone, chan) in armature.bones().iter().zip(pose.channels_mut()) {
        let Some(edit_bone) = edit.find(&bone.name).and_then(|id| edit.get_mut(id)) else {
            continue;
        };
        set_edit_position(edit_bone, &chan.pose_mat, &chan.pose_tail);
        transfer_props(edit_bone, chan);
    }
}

fn bake_selected(
    armature: &Armature,
    pose: &mut Pose,
    edit: &mut EditArmature,
    selected: &HashSet<String>,
) {
    let bones = armature.bones();
    let pose_mats: Vec<Matrix4<f32>> = pose.channels().iter().map(|c| c.pose_mat).collect();

    let mut stack: Vec<(usize, Option<BakeState>)> =
        armature.roots().map(|root| (root, None)).collect();
    stack.reverse();

    while let Some((index, state)) = stack.pop() {
        let bone = &bones[index];
        let chan = &mut pose.channels_mut()[index];
        let Some(edit_bone) = edit.find(&bone.name).and_then(|id| edit.get_mut(id)) else {
            continue;
        };

        let child_state = if selected.contains(&bone.name) {
            let inverse_parent = match bone.parent {
                Some(parent) => {
                    let offset = bone.offset_matrix(bones[parent].length);
                    let parent_rest = bones[parent].arm_mat;
                    let old = compute_parent_transform(
                        bone.flags,
                        bone.inherit_scale,
                        &offset,
                        Some(&parent_rest),
                        Some(&pose_mats[parent]),
                    );
                    let new_parent = state.map_or(parent_rest, |s| s.new_rest_mat);
                    let new = compute_parent_transform(
                        bone.flags,
                        bone.inherit_scale,
                        &offset,
                        Some(&parent_rest),
                        Some(&new_parent),
                    );
                    ParentTransform::combine(&new, &old.invert())
                }
                None => ParentTransform::identity(),
            };

            let new_rest_mat = inverse_parent.apply(&pose_mats[index]);
            let new_tail = transform_point(&new_rest_mat, &Vector3::new(0.0, bone.length, 0.0));
            let new_arm_mat = set_edit_position(edit_bone, &new_rest_mat, &new_tail);
            transfer_props(edit_bone, chan);

            Some(BakeState {
                bone: index,
                new_rest_mat,
                new_arm_mat,
            })
        } else if let Some(state) = state {
            let parent = &bones[state.bone];
            let offset = bone.offset_matrix(parent.length);
            let transform = compute_parent_transform(
                bone.flags,
                bone.inherit_scale,
                &offset,
                Some(&parent.arm_mat),
                Some(&state.new_rest_mat),
            );
            let new_rest_mat = transform.apply(&Matrix4::identity());
            let old_chan_loc = location_basis(&transform) * chan.location;

            let delta = new_rest_mat * invert_or_identity(&bone.arm_mat);
            let new_arm_mat = adjust_edit_position(edit_bone, &delta);

            if !bone.flags.contains(BoneFlags::CONNECTED) && old_chan_loc != Vector3::zeros() {
                let offset = invert_or_identity(&state.new_arm_mat) * new_arm_mat;
                let new_transform = compute_parent_transform(
                    bone.flags,
                    bone.inherit_scale,
                    &offset,
                    Some(&state.new_arm_mat),
                    Some(&state.new_arm_mat),
                );
                chan.location =
                    invert3_or_identity(&location_basis(&new_transform)) * old_chan_loc;
            }

            Some(BakeState {
                bone: index,
                new_rest_mat,
                new_arm_mat,
            })
        } else {
            None
        };

        for child in bone.children.iter().rev() {
            stack.push((*child, child_state));
        }
    }
}

/// Places an edit bone at a posed matrix and tail. Returns the bone's new
/// armature-space matrix.
fn set_edit_position(
    bone: &mut EditBone,
    pose_mat: &Matrix4<f32>,
    tail: &Vector3<f32>,
) -> Matrix4<f32> {
    let head = translation_of(pose_mat);
    let axis = tail - head;
    bone.head = head;
    bone.tail = *tail;
    bone.roll = mat3_vec_to_roll(&mat3_of(pose_mat), &axis);
    mat4_from_parts(&vec_roll_to_mat3(&axis, bone.roll), &head)
}

/// Moves an edit bone by an armature-space delta.
fn adjust_edit_position(bone: &mut EditBone, delta: &Matrix4<f32>) -> Matrix4<f32> {
    let rest = vec_roll_to_mat3(&(bone.tail - bone.head), bone.roll);
    let pose_mat = mat4_from_parts(&(mat3_of(delta) * rest), &transform_point(delta, &bone.head));
    let tail = transform_point(delta, &bone.tail);
    set_edit_position(bone, &pose_mat, &tail)
}

/// Folds curved-segment animation into the rest values and clears the
/// channel.
fn transfer_props(bone: &mut EditBone, chan: &mut PoseChannel) {
    if bone.props.segments > 1 {
        bone.props.bbone.accumulate(&chan.bbone);
        chan.bbone = BBoneCurve::neutral();
    }
    chan.clear_transform();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::armature::{Constraint, ConstraintKind, RotationMode, chain};
    use crate::scene::{ObjectParent, SceneObject};
    use nalgebra::Matrix3;
    use rstest::rstest;
    use std::f32::consts::FRAC_PI_2;

    fn assert_close(a: Vector3<f32>, b: Vector3<f32>) {
        assert!((a - b).norm() < 0.0001, "{a:?} != {b:?}");
    }

    fn rig(names: &[&str]) -> Scene {
        let (edit, _) = chain(names);
        rig_from(&edit)
    }

    fn rig_from(edit: &EditArmature) -> Scene {
        let armature = Armature::from_edit("Rig", edit);
        let mut scene = Scene::default();
        scene.objects.push(SceneObject::armature("RigObject", &armature));
        scene.armatures.push(armature);
        scene
    }

    fn rotate(scene: &mut Scene, bone: &str, angle: f32) {
        pose_bone(scene, bone, Vector3::new(0.0, 0.0, angle), Vector3::zeros());
    }

    fn pose_bone(scene: &mut Scene, bone: &str, euler: Vector3<f32>, location: Vector3<f32>) {
        let object = scene.object_mut("RigObject").expect("rig object");
        let chan = object.pose_mut().expect("pose").find_mut(bone).expect("channel");
        chan.rotation_mode = RotationMode::EulerXyz;
        chan.euler = euler;
        chan.location = location;
        scene.rebuild_poses("Rig");
    }

    fn assert_mat3_close(a: &Matrix3<f32>, b: &Matrix3<f32>) {
        assert!((a - b).norm() < 0.0001, "{a:?} != {b:?}");
    }

    fn pose_of<'a>(scene: &'a Scene, bone: &str) -> &'a PoseChannel {
        scene
            .object("RigObject")
            .and_then(|o| o.pose())
            .and_then(|p| p.find(bone))
            .expect("channel")
    }

    fn select(scene: &mut Scene, bone: &str) {
        let armature = scene.armature_mut("Rig").expect("armature");
        let index = armature.find(bone).expect("bone");
        armature.bones_mut()[index].flags |= BoneFlags::SELECTED;
    }

    #[test]
    fn given_rotated_root_when_baking_all_then_rest_matches_pose_and_channels_clear() {
        let mut scene = rig(&["A", "B"]);
        let mut prop = SceneObject::empty("Prop");
        prop.parent = Some(ObjectParent {
            object: "RigObject".to_string(),
            bone: Some("B".to_string()),
        });
        scene.objects.push(prop);
        rotate(&mut scene, "A", FRAC_PI_2);
        let prop_world = scene.object_world("Prop");

        let report = apply_pose_as_rest(&mut scene, "RigObject", false).expect("bake");

        assert!(!report.is_unchanged());
        let armature = scene.armature("Rig").expect("armature");
        assert_close(armature.bone("A").expect("A").arm_tail, Vector3::new(-1.0, 0.0, 0.0));
        assert_close(armature.bone("B").expect("B").arm_tail, Vector3::new(-2.0, 0.0, 0.0));
        assert_eq!(pose_of(&scene, "A").euler, Vector3::zeros());
        assert_close(pose_of(&scene, "B").pose_tail, Vector3::new(-2.0, 0.0, 0.0));
        assert!((scene.object_world("Prop") - prop_world).norm() < 0.0001);
    }

    #[test]
    fn given_selected_middle_bone_when_baking_selected_then_unselected_stay_in_place() {
        let mut scene = rig(&["A", "B", "C"]);
        select(&mut scene, "B");
        rotate(&mut scene, "B", FRAC_PI_2);
        let b_tail = pose_of(&scene, "B").pose_tail;
        let c_head = pose_of(&scene, "C").pose_head;
        let c_tail = pose_of(&scene, "C").pose_tail;

        apply_pose_as_rest(&mut scene, "RigObject", true).expect("bake");

        let armature = scene.armature("Rig").expect("armature");
        assert_close(armature.bone("B").expect("B").arm_tail, b_tail);
        assert_close(armature.bone("A").expect("A").arm_tail, Vector3::new(0.0, 1.0, 0.0));
        assert_close(pose_of(&scene, "C").pose_head, c_head);
        assert_close(pose_of(&scene, "C").pose_tail, c_tail);
        assert_eq!(pose_of(&scene, "B").euler, Vector3::zeros());
    }

    #[test]
    fn given_tilted_selected_parent_when_baking_selected_then_unselected_child_keeps_orientation() {
        let mut scene = rig(&["A", "B", "C"]);
        select(&mut scene, "B");
        pose_bone(&mut scene, "B", Vector3::new(0.3, 0.2, 0.4), Vector3::zeros());
        let before = pose_of(&scene, "C").clone();

        apply_pose_as_rest(&mut scene, "RigObject", true).expect("bake");

        let c = scene.armature("Rig").expect("armature").bone("C").expect("C");
        let rest = mat3_of(&c.arm_mat);
        assert_mat3_close(&rest, &mat3_of(&before.pose_mat));
        let row = rest.row(0).into_owned();
        assert!((row[0] - 0.9027).abs() < 0.001, "{row:?}");
        assert!((row[1] + 0.3179).abs() < 0.001, "{row:?}");
        assert!((row[2] - 0.2899).abs() < 0.001, "{row:?}");
        assert_close(c.arm_head, before.pose_head);
        assert_close(c.arm_tail, before.pose_tail);
    }

    #[rstest]
    #[case(Vector3::zeros(), Vector3::zeros(), true)]
    #[case(Vector3::new(0.1, 0.0, 0.5), Vector3::zeros(), true)]
    #[case(Vector3::new(0.1, 0.0, 0.5), Vector3::new(0.2, 0.0, 0.1), false)]
    fn given_posed_unselected_child_when_baking_selected_parent_then_child_pose_is_unchanged(
        #[case] euler: Vector3<f32>,
        #[case] location: Vector3<f32>,
        #[case] connected: bool,
    ) {
        let (mut edit, ids) = chain(&["A", "B", "C"]);
        if !connected {
            edit[ids[2]].flags.remove(BoneFlags::CONNECTED);
        }
        let mut scene = rig_from(&edit);
        select(&mut scene, "B");
        pose_bone(&mut scene, "B", Vector3::new(0.3, 0.2, 0.4), Vector3::zeros());
        pose_bone(&mut scene, "C", euler, location);
        let before = pose_of(&scene, "C").clone();

        apply_pose_as_rest(&mut scene, "RigObject", true).expect("bake");

        let after = pose_of(&scene, "C");
        assert!((after.pose_mat - before.pose_mat).norm() < 0.0001, "{:?}", after.pose_mat);
        assert_close(after.pose_head, before.pose_head);
        assert_close(after.pose_tail, before.pose_tail);
        assert_eq!(after.euler, euler);
    }

    #[test]
    fn given_nothing_selected_when_baking_selected_then_nothing_changes() {
        let mut scene = rig(&["A", "B"]);
        rotate(&mut scene, "A", FRAC_PI_2);

        let report = apply_pose_as_rest(&mut scene, "RigObject", true).expect("bake");

        assert!(report.is_unchanged());
        assert_close(
            scene.armature("Rig").expect("armature").bone("A").expect("A").arm_tail,
            Vector3::new(0.0, 1.0, 0.0),
        );
    }

    #[test]
    fn given_action_and_stretch_constraint_when_baking_then_warns_and_resets_length() {
        let mut scene = rig(&["A"]);
        let object = scene.object_mut("RigObject").expect("rig object");
        object.action = Some("Walk".to_string());
        object.pose_mut().expect("pose").find_mut("A").expect("A").constraints.push(
            Constraint {
                name: "Stretch".to_string(),
                target: None,
                subtarget: String::new(),
                kind: ConstraintKind::StretchTo {
                    original_length: 2.0,
                },
            },
        );

        let report = apply_pose_as_rest(&mut scene, "RigObject", false).expect("bake");

        assert_eq!(report.diagnostics[0].code, "ACTION_INVALIDATED");
        assert_eq!(
            pose_of(&scene, "A").constraints[0].kind,
            ConstraintKind::StretchTo {
                original_length: 0.0
            }
        );
    }

    #[test]
    fn given_armature_in_edit_mode_when_baking_then_error() {
        let mut scene = rig(&["A"]);
        scene.enter_edit_mode("Rig");

        let result = apply_pose_as_rest(&mut scene, "RigObject", false);

        assert_eq!(result, Err(EditError::InEditMode("Rig".to_string())));
    }
}
