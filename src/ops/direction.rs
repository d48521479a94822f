use std::collections::HashSet;

use crate::armature::{BoneFlags, EditArmature, EditBoneId};
use crate::mirror::{propagate_mirror, tag_selected_mirrored, untag_selected_mirrored};
use crate::report::{ChangeKind, OpOutput};
use crate::topology::find_chain_tips;

/// Reverses the direction of the selected chains.
///
/// Each chain is walked from its tip to its root. An editable bone swaps
/// head and tail and is parented to the bone processed just before it,
/// connected only when the joints coincide. A bone that is left alone is
/// detached when its original parent was flipped. Under mirror edit the
/// counterparts of selected bones are flipped too and then re-mirrored.
pub fn switch_direction(armature: &mut EditArmature) -> OpOutput {
    let tips = find_chain_tips(armature);
    if tips.is_empty() {
        return OpOutput::unchanged();
    }

    let tags = armature.mirror_edit.then(|| tag_selected_mirrored(armature));
    let mut done: HashSet<EditBoneId> = HashSet::new();
    let mut changed = false;

    for tip in tips {
        let mut child: Option<EditBoneId> = None;
        let mut current = Some(tip);

        while let Some(id) = current {
            let parent = armature.parent(id);
            current = parent;
            if !done.insert(id) {
                continue;
            }

            if armature.is_editable(id) {
                let child_tail = child.and_then(|c| armature.get(c)).map(|c| c.tail);
                let Some(bone) = armature.get_mut(id) else {
                    continue;
                };
                std::mem::swap(&mut bone.head, &mut bone.tail);
                bone.parent = child;
                bone.flags.set(BoneFlags::CONNECTED, child_tail == Some(bone.head));
                child = Some(id);
                changed = true;
            } else {
                if parent.is_some_and(|p| armature.is_editable(p)) {
                    if let Some(bone) = armature.get_mut(id) {
                        bone.parent = None;
                        bone.flags.remove(BoneFlags::CONNECTED);
                    }
                }
                child = None;
            }
        }
    }

    if let Some(tags) = tags {
        untag_selected_mirrored(armature, tags);
    }
    armature.sync_selection();
    if changed {
        propagate_mirror(armature);
    }

    if changed {
        OpOutput::changed(&[ChangeKind::Geometry, ChangeKind::Selection])
    } else {
        OpOutput::unchanged()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::armature::chain;
    use nalgebra::Vector3;

    fn select_all(arm: &mut EditArmature) {
        for id in arm.ids() {
            arm.select(id, true);
        }
    }

    #[test]
    fn given_selected_chain_when_switching_then_order_is_reversed() {
        let (mut arm, ids) = chain(&["A", "B", "C"]);
        select_all(&mut arm);

        switch_direction(&mut arm);

        let (a, b, c) = (ids[0], ids[1], ids[2]);
        assert_eq!(arm[c].parent, None);
        assert_eq!(arm[b].parent, Some(c));
        assert_eq!(arm[a].parent, Some(b));
        assert!(arm[b].is_connected());
        assert!(arm[a].is_connected());
        assert_eq!(arm[c].head, Vector3::new(0.0, 3.0, 0.0));
        assert_eq!(arm[a].tail, Vector3::new(0.0, 0.0, 0.0));
        assert!(arm.connections_are_consistent());
        assert!(arm.is_acyclic());
    }

    #[test]
    fn given_switched_chain_when_switching_again_then_original_is_restored() {
        let (mut arm, _) = chain(&["A", "B", "C"]);
        select_all(&mut arm);
        let original = arm.clone();

        switch_direction(&mut arm);
        switch_direction(&mut arm);

        for (id, bone) in original.iter() {
            assert_eq!(arm[id].head, bone.head);
            assert_eq!(arm[id].tail, bone.tail);
            assert_eq!(arm[id].parent, bone.parent);
            assert_eq!(arm[id].is_connected(), bone.is_connected());
        }
    }

    #[test]
    fn given_partial_selection_when_switching_then_unflipped_child_is_detached() {
        let (mut arm, ids) = chain(&["A", "B", "C"]);
        arm.select(ids[0], true);
        arm.select(ids[1], true);
        arm[ids[2]].flags.remove(BoneFlags::SELECTED);

        switch_direction(&mut arm);

        assert_eq!(arm[ids[2]].parent, None);
        assert!(!arm[ids[2]].is_connected());
        assert_eq!(arm[ids[0]].parent, Some(ids[1]));
        assert_eq!(arm[ids[1]].parent, None);
        assert!(arm.connections_are_consistent());
        assert!(arm.is_acyclic());
    }

    #[test]
    fn given_mirror_edit_when_switching_then_counterpart_chain_flips_too() {
        let mut arm = EditArmature::new();
        arm.mirror_edit = true;
        let left = arm.add_bone("Arm.L", Vector3::new(1.0, 0.0, 0.0), Vector3::new(2.0, 0.0, 0.0));
        let right =
            arm.add_bone("Arm.R", Vector3::new(-1.0, 0.0, 0.0), Vector3::new(-2.0, 0.0, 0.0));
        arm.select(left, true);

        switch_direction(&mut arm);

        assert_eq!(arm[left].head, Vector3::new(2.0, 0.0, 0.0));
        assert_eq!(arm[right].head, Vector3::new(-2.0, 0.0, 0.0));
        assert!(!arm[right].is_selected());
    }

    #[test]
    fn given_asymmetric_counterpart_when_switching_under_mirror_edit_then_it_reflects() {
        let mut arm = EditArmature::new();
        arm.mirror_edit = true;
        let left = arm.add_bone("Arm.L", Vector3::new(1.0, 0.0, 0.0), Vector3::new(2.0, 1.0, 0.0));
        let right =
            arm.add_bone("Arm.R", Vector3::new(-1.2, 0.0, 0.0), Vector3::new(-2.5, 0.0, 0.0));
        arm[left].roll = 0.3;
        arm.select(left, true);

        switch_direction(&mut arm);

        assert_eq!(arm[left].head, Vector3::new(2.0, 1.0, 0.0));
        crate::mirror::tests::assert_mirrored(&arm, left, right);
        assert!(arm.is_acyclic());
    }
}
