use crate::armature::{BoneFlags, EditArmature};
use crate::report::{ChangeKind, OpOutput};

/// Hides the visible selected bones, or the visible unselected ones when
/// `unselected` is set. Hidden bones lose their selection. With nothing
/// selected the operation is cancelled in both modes.
pub fn hide_bones(armature: &mut EditArmature, unselected: bool) -> OpOutput {
    if !armature.iter().any(|(_, bone)| bone.is_selected()) {
        return OpOutput::unchanged();
    }

    let mut changed = false;
    for id in armature.ids() {
        if !armature.is_visible(id) {
            continue;
        }
        let Some(bone) = armature.get_mut(id).filter(|bone| bone.is_selected() != unselected)
        else {
            continue;
        };
        bone.flags.remove(BoneFlags::SELECT_MASK);
        bone.flags |= BoneFlags::HIDDEN;
        changed = true;
    }

    if !changed {
        return OpOutput::unchanged();
    }
    armature.validate_active();
    armature.sync_selection();
    OpOutput::changed(&[ChangeKind::Selection])
}

/// Reveals hidden bones of visible collections, optionally selecting them.
pub fn reveal_bones(armature: &mut EditArmature, select: bool) -> OpOutput {
    let mut changed = false;
    for id in armature.ids() {
        let Some(bone) = armature.get_mut(id).filter(|b| b.flags.contains(BoneFlags::HIDDEN))
        else {
            continue;
        };
        bone.flags.remove(BoneFlags::HIDDEN);
        let visible = armature.is_visible(id);
        let Some(bone) = armature.get_mut(id) else {
            continue;
        };
        if !visible {
            bone.flags |= BoneFlags::HIDDEN;
            continue;
        }
        bone.flags.set(BoneFlags::SELECT_MASK, select);
        changed = true;
    }

    if !changed {
        return OpOutput::unchanged();
    }
    armature.validate_active();
    armature.sync_selection();
    OpOutput::changed(&[ChangeKind::Selection])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::armature::{BoneCollection, chain};
    use rstest::rstest;

    #[test]
    fn given_selected_bone_when_hiding_then_it_is_hidden_and_deselected() {
        let (mut arm, ids) = chain(&["A", "B"]);
        arm.select(ids[0], true);
        arm.set_active(Some(ids[0]));

        hide_bones(&mut arm, false);

        assert!(arm[ids[0]].flags.contains(BoneFlags::HIDDEN));
        assert!(!arm[ids[0]].is_selected());
        assert!(!arm[ids[1]].flags.contains(BoneFlags::HIDDEN));
        assert_eq!(arm.active(), None);
    }

    #[test]
    fn given_unselected_flag_when_hiding_then_selection_stays_visible() {
        let (mut arm, ids) = chain(&["A", "B"]);
        arm.select(ids[0], true);

        hide_bones(&mut arm, true);

        assert!(!arm[ids[0]].flags.contains(BoneFlags::HIDDEN));
        assert!(arm[ids[1]].flags.contains(BoneFlags::HIDDEN));
    }

    #[test]
    fn given_hidden_bones_when_revealing_then_only_visible_collections_come_back() {
        let (mut arm, ids) = chain(&["A", "B"]);
        arm.collections.push(BoneCollection {
            name: "Off".to_string(),
            visible: false,
        });
        arm[ids[1]].props.collections.push("Off".to_string());
        arm[ids[0]].flags |= BoneFlags::HIDDEN;
        arm[ids[1]].flags |= BoneFlags::HIDDEN;

        reveal_bones(&mut arm, true);

        assert!(!arm[ids[0]].flags.contains(BoneFlags::HIDDEN));
        assert!(arm[ids[0]].is_selected());
        assert!(arm[ids[1]].flags.contains(BoneFlags::HIDDEN));
    }

    #[rstest]
    #[case(false)]
    #[case(true)]
    fn given_nothing_selected_when_hiding_then_operation_is_cancelled(#[case] unselected: bool) {
        let (mut arm, ids) = chain(&["A", "B"]);

        assert!(hide_bones(&mut arm, unselected).is_unchanged());
        assert!(ids.iter().all(|id| !arm[*id].flags.contains(BoneFlags::HIDDEN)));
    }
}
