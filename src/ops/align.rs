use crate::armature::{EditArmature, EditBoneId};
use crate::error::EditError;
use crate::mirror::{get_mirror_bone, propagate_mirror};
use crate::report::{ChangeKind, Diagnostic, OpOutput};

/// Points `bone` along `reference`, keeping its head and length, and copies
/// the reference roll. Connected descendants are moved to stay attached.
/// A stale handle on either side leaves the armature untouched.
pub fn align_bone_to(armature: &mut EditArmature, bone: EditBoneId, reference: EditBoneId) {
    let Some((reference_axis, roll)) = armature.get(reference).map(|reference| {
        let axis = (reference.tail - reference.head)
            .try_normalize(0.0)
            .unwrap_or_else(nalgebra::Vector3::zeros);
        (axis, reference.roll)
    }) else {
        return;
    };

    let Some(target) = armature.get_mut(bone) else {
        return;
    };
    let length = target.length();
    target.tail = target.head + reference_axis * length;
    target.roll = roll;

    armature.translate_connected_children(bone);
}

/// Aligns the selection to the active bone, or the active bone to its parent
/// when at most one bone is selected.
///
/// Under mirror edit the counterparts of selected bones are aligned as
/// well: a lone active bone's counterpart aligns to its own parent, and
/// mirrored images in a larger selection align to the active bone's
/// counterpart. Mirror propagation then makes each image an exact
/// reflection.
///
/// # Errors
///
/// [`EditError::NoActiveBone`] when there is no active bone.
pub fn align_bones(armature: &mut EditArmature) -> Result<OpOutput, EditError> {
    let active = armature.active().ok_or(EditError::NoActiveBone)?;
    let active_mirror = if armature.mirror_edit {
        Some(get_mirror_bone(armature, active).unwrap_or(active))
    } else {
        None
    };

    let mut selection: Vec<EditBoneId> = armature
        .ids()
        .into_iter()
        .filter(|id| armature.is_editable(*id))
        .collect();
    if armature.mirror_edit {
        let images: Vec<EditBoneId> = selection
            .iter()
            .filter_map(|id| get_mirror_bone(armature, *id))
            .filter(|mirror| armature.is_visible(*mirror) && !selection.contains(mirror))
            .collect();
        for image in images {
            if !selection.contains(&image) {
                selection.push(image);
            }
        }
    }

    if selection.len() <= 1 {
        let Some(parent) = armature.parent(active) else {
            return Ok(OpOutput::unchanged());
        };
        align_bone_to(armature, active, parent);
        if let Some(mirror) = active_mirror {
            if let Some(mirror_parent) = armature.parent(mirror) {
                align_bone_to(armature, mirror, mirror_parent);
            }
        }
        propagate_mirror(armature);
        let name = bone_name(armature, active);
        return Ok(OpOutput::changed(&[ChangeKind::Geometry]).with_diagnostic(
            Diagnostic::info("ALIGNED_TO_PARENT", format!("Aligned bone '{name}' to parent")),
        ));
    }

    let mut aligned = 0;
    for id in &selection {
        if *id == active || Some(*id) == active_mirror {
            continue;
        }
        let reference = if armature.get(*id).is_some_and(|bone| bone.is_selected()) {
            active
        } else {
            active_mirror.unwrap_or(active)
        };
        align_bone_to(armature, *id, reference);
        aligned += 1;
    }

    propagate_mirror(armature);
    let name = bone_name(armature, active);
    let count = selection.len();
    let output = if aligned > 0 {
        OpOutput::changed(&[ChangeKind::Geometry])
    } else {
        OpOutput::unchanged()
    };
    Ok(output.with_diagnostic(Diagnostic::info(
        "ALIGNED_TO_ACTIVE",
        format!("{count} bones aligned to bone '{name}'"),
    )))
}

fn bone_name(armature: &EditArmature, id: EditBoneId) -> String {
    armature.get(id).map(|bone| bone.name.clone()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::armature::{BoneFlags, chain};
    use nalgebra::Vector3;

    fn assert_close(a: Vector3<f32>, b: Vector3<f32>) {
        assert!((a - b).norm() < 0.0001, "{a:?} != {b:?}");
    }

    #[test]
    fn given_bent_bone_when_aligning_then_connected_children_follow() {
        let (mut arm, ids) = chain(&["A", "B", "C"]);
        arm[ids[1]].tail = Vector3::new(1.0, 2.0, 0.0);
        arm.translate_connected_children(ids[1]);
        arm[ids[0]].roll = 0.3;

        align_bone_to(&mut arm, ids[1], ids[0]);

        assert_close(arm[ids[1]].tail, Vector3::new(0.0, 1.0 + 2f32.sqrt(), 0.0));
        assert_eq!(arm[ids[1]].roll, 0.3);
        assert_eq!(arm[ids[2]].head, arm[ids[1]].tail);
        assert!(arm.connections_are_consistent());
        assert!(arm.is_acyclic());
    }

    #[test]
    fn given_no_active_bone_when_aligning_then_error() {
        let (mut arm, _) = chain(&["A", "B"]);
        assert_eq!(align_bones(&mut arm), Err(EditError::NoActiveBone));
    }

    #[test]
    fn given_only_active_selected_when_aligning_then_it_follows_its_parent() {
        let (mut arm, ids) = chain(&["A", "B"]);
        arm[ids[1]].tail = Vector3::new(2.0, 1.0, 0.0);
        arm.select(ids[1], true);
        arm.set_active(Some(ids[1]));

        let output = align_bones(&mut arm).expect("align");

        assert_close(arm[ids[1]].tail, Vector3::new(0.0, 3.0, 0.0));
        assert_eq!(output.diagnostics[0].code, "ALIGNED_TO_PARENT");
    }

    #[test]
    fn given_mirror_edit_when_aligning_selection_then_images_follow_active_mirror() {
        let mut arm = EditArmature::new();
        arm.mirror_edit = true;
        let ref_l = arm.add_bone("Ref.L", Vector3::new(1.0, 0.0, 0.0), Vector3::new(2.0, 0.0, 0.0));
        let ref_r =
            arm.add_bone("Ref.R", Vector3::new(-1.0, 0.0, 0.0), Vector3::new(-2.0, 0.0, 0.0));
        let hand_l = arm.add_bone("Hand.L", Vector3::new(1.0, 1.0, 0.0), Vector3::new(1.0, 2.0, 0.0));
        let hand_r =
            arm.add_bone("Hand.R", Vector3::new(-1.0, 1.0, 0.0), Vector3::new(-1.0, 2.0, 0.0));
        arm.select(ref_l, true);
        arm.select(hand_l, true);
        arm.set_active(Some(ref_l));

        align_bones(&mut arm).expect("align");

        assert_close(arm[hand_l].tail, Vector3::new(2.0, 1.0, 0.0));
        assert_close(arm[hand_r].tail, Vector3::new(-2.0, 1.0, 0.0));
        assert_eq!(arm[ref_r].tail, Vector3::new(-2.0, 0.0, 0.0));
        assert!(!arm[hand_r].flags.contains(BoneFlags::SELECTED));
    }

    #[test]
    fn given_asymmetric_image_when_aligning_under_mirror_edit_then_it_reflects_the_source() {
        let mut arm = EditArmature::new();
        arm.mirror_edit = true;
        let ref_l = arm.add_bone("Ref.L", Vector3::new(1.0, 0.0, 0.0), Vector3::new(2.0, 0.0, 0.0));
        arm.add_bone("Ref.R", Vector3::new(-1.0, 0.0, 0.0), Vector3::new(-2.0, 0.0, 0.0));
        let hand_l = arm.add_bone("Hand.L", Vector3::new(1.0, 1.0, 0.0), Vector3::new(1.0, 2.0, 0.0));
        let hand_r =
            arm.add_bone("Hand.R", Vector3::new(-1.5, 1.0, 0.0), Vector3::new(-1.5, 3.0, 0.0));
        arm.select(ref_l, true);
        arm.select(hand_l, true);
        arm.set_active(Some(ref_l));

        align_bones(&mut arm).expect("align");

        assert_close(arm[hand_l].head, Vector3::new(1.0, 1.0, 0.0));
        assert_close(arm[hand_l].tail, Vector3::new(2.0, 1.0, 0.0));
        assert_close(arm[hand_r].head, Vector3::new(-1.0, 1.0, 0.0));
        assert_close(arm[hand_r].tail, Vector3::new(-2.0, 1.0, 0.0));
        crate::mirror::tests::assert_mirrored(&arm, hand_l, hand_r);
    }
}
