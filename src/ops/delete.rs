use crate::armature::{BoneFlags, EditArmature};
use crate::mirror::propagate_mirror;
use crate::report::{ChangeKind, OpOutput};

/// Removes every visible, selected and unlocked bone.
///
/// Children of a removed bone move to its nearest surviving ancestor and
/// lose their connection. Under mirror edit the counterparts of selected
/// bones are removed as well, and mirror propagation runs over what is left
/// selected.
pub fn delete_selected(armature: &mut EditArmature) -> OpOutput {
    if !armature.iter().any(|(_, bone)| bone.is_selected()) {
        return OpOutput::unchanged();
    }
    if armature.mirror_edit {
        armature.select_mirrored(BoneFlags::SELECTED);
    }

    let mut removed = 0;
    for id in armature.ids() {
        if armature.is_editable(id) {
            armature.remove(id, true);
            removed += 1;
        }
    }

    if removed == 0 {
        return OpOutput::unchanged();
    }
    armature.sync_selection();
    propagate_mirror(armature);
    OpOutput::changed(&[ChangeKind::Geometry, ChangeKind::Selection])
}
