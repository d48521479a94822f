use std::collections::HashSet;

use crate::armature::{EditArmature, EditBoneId};

/// Finds the tips of the independent bone chains of an armature.
///
/// Bones are visited in arena order. A bone already lying on the chain of a
/// known tip is skipped; a bone whose ancestors include a known tip takes
/// that tip's place; any other bone starts a new chain. Every bone is marked
/// at most once while walking up, so the pass is linear overall.
///
/// # Returns
///
/// One tip per chain, in discovery order.
pub fn find_chain_tips(armature: &EditArmature) -> Vec<EditBoneId> {
    let mut tips: Vec<EditBoneId> = Vec::new();
    let mut on_chain: HashSet<EditBoneId> = HashSet::new();

    for id in armature.ids() {
        if on_chain.contains(&id) {
            continue;
        }

        on_chain.insert(id);
        let mut joined: Option<EditBoneId> = None;
        let mut current = armature.parent(id);
        while let Some(ancestor) = current {
            if !on_chain.insert(ancestor) {
                joined = Some(ancestor);
                break;
            }
            current = armature.parent(ancestor);
        }

        match joined.and_then(|ancestor| tips.iter().position(|tip| *tip == ancestor)) {
            Some(slot) => tips[slot] = id,
            None => tips.push(id),
        }
    }

    tips
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::armature::chain;
    use nalgebra::Vector3;

    #[test]
    fn given_linear_chain_when_finding_tips_then_last_bone_is_the_only_tip() {
        let (arm, ids) = chain(&["A", "B", "C"]);
        assert_eq!(find_chain_tips(&arm), vec![ids[2]]);
    }

    #[test]
    fn given_branching_tree_when_finding_tips_then_each_branch_has_a_tip() {
        let (mut arm, ids) = chain(&["Root", "Left"]);
        let right = arm.add_bone("Right", Vector3::new(0.0, 1.0, 0.0), Vector3::new(1.0, 2.0, 0.0));
        arm[right].parent = Some(ids[0]);
        let loose = arm.add_bone("Loose", Vector3::new(3.0, 0.0, 0.0), Vector3::new(3.0, 1.0, 0.0));

        let tips = find_chain_tips(&arm);

        assert_eq!(tips, vec![ids[1], right, loose]);
    }

    #[test]
    fn given_child_inserted_before_parent_when_finding_tips_then_parent_is_skipped() {
        let mut arm = EditArmature::new();
        let child = arm.add_bone("Child", Vector3::y(), Vector3::new(0.0, 2.0, 0.0));
        let parent = arm.add_bone("Parent", Vector3::zeros(), Vector3::y());
        arm[child].parent = Some(parent);

        assert_eq!(find_chain_tips(&arm), vec![child]);
    }
}
