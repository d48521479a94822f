use crate::armature::{BoneFlags, EditArmature};
use crate::mirror::{propagate_mirror, tag_selected_mirrored, untag_selected_mirrored};
use crate::report::{ChangeKind, OpOutput};

/// Detaches connected bones whose selection differs from their parent's.
/// Positions are left as they are. Under mirror edit the counterparts of
/// selected bones are split the same way and then re-mirrored.
pub fn split_selected(armature: &mut EditArmature) -> OpOutput {
    let tags = armature.mirror_edit.then(|| tag_selected_mirrored(armature));

    let mut changed = false;
    for id in armature.ids() {
        let Some(bone) = armature.get(id) else {
            continue;
        };
        let Some(parent) = bone.parent.filter(|_| bone.is_connected()) else {
            continue;
        };
        let selected = bone.is_selected();
        if !armature.get(parent).is_some_and(|p| p.is_selected() != selected) {
            continue;
        }
        if let Some(bone) = armature.get_mut(id) {
            bone.parent = None;
            bone.flags.remove(BoneFlags::CONNECTED);
            changed = true;
        }
    }

    if let Some(tags) = tags {
        untag_selected_mirrored(armature, tags);
    }
    if !changed {
        return OpOutput::unchanged();
    }
    for id in armature.ids() {
        let selected = armature.get(id).is_some_and(|bone| bone.is_selected());
        armature.select(id, selected);
    }
    armature.sync_selection();
    propagate_mirror(armature);
    OpOutput::changed(&[ChangeKind::Geometry, ChangeKind::Selection])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::armature::chain;
    use nalgebra::Vector3;

    #[test]
    fn given_selected_middle_bone_when_splitting_then_it_detaches_in_place() {
        let (mut arm, ids) = chain(&["A", "B", "C"]);
        arm.select(ids[1], true);
        arm[ids[0]].flags.remove(BoneFlags::TIP_SELECTED);
        arm[ids[1]].flags.remove(BoneFlags::ROOT_SELECTED);
        arm[ids[1]].flags |= BoneFlags::SELECTED;

        split_selected(&mut arm);

        assert_eq!(arm[ids[1]].parent, None);
        assert!(!arm[ids[1]].is_connected());
        assert_eq!(arm[ids[1]].head, Vector3::new(0.0, 1.0, 0.0));
        assert_eq!(arm[ids[2]].parent, None);
        assert!(arm[ids[1]].is_selected());
        assert!(!arm[ids[2]].is_selected());
        assert!(arm.connections_are_consistent());
        assert!(arm.is_acyclic());
    }

    #[test]
    fn given_mirror_edit_when_splitting_then_counterpart_chain_splits_and_reflects() {
        let mut arm = EditArmature::new();
        arm.mirror_edit = true;
        for (side, x) in [("L", 1.0), ("R", -1.4)] {
            let upper = arm.add_bone(
                &format!("Upper.{side}"),
                Vector3::new(x, 0.0, 0.0),
                Vector3::new(x, 1.0, 0.0),
            );
            let lower = arm.add_bone(
                &format!("Lower.{side}"),
                Vector3::new(x, 1.0, 0.0),
                Vector3::new(x, 2.0, 0.0),
            );
            arm[lower].parent = Some(upper);
            arm[lower].flags |= BoneFlags::CONNECTED;
        }
        let lower_l = arm.find("Lower.L").expect("Lower.L");
        let lower_r = arm.find("Lower.R").expect("Lower.R");
        arm[lower_l].flags |= BoneFlags::SELECTED | BoneFlags::TIP_SELECTED;

        split_selected(&mut arm);

        assert_eq!(arm[lower_l].parent, None);
        assert_eq!(arm[lower_r].parent, None);
        assert!(!arm[lower_r].is_selected());
        crate::mirror::tests::assert_mirrored(&arm, lower_l, lower_r);
        assert!(arm.connections_are_consistent());
        assert!(arm.is_acyclic());
    }

    #[test]
    fn given_uniform_selection_when_splitting_then_nothing_changes() {
        let (mut arm, ids) = chain(&["A", "B"]);
        assert!(split_selected(&mut arm).is_unchanged());
        assert_eq!(arm[ids[1]].parent, Some(ids[0]));
    }
}
