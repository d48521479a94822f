use std::collections::HashMap;

use crate::armature::{BoneFlags, EditArmature, EditBoneId};
use crate::mirror::mirror_bones;
use crate::report::{ChangeKind, OpOutput};

/// Per-parent mark of the connected child that may merge into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Child(EditBoneId),
    /// More than one connected child: nothing merges.
    Ambiguous,
}

/// Merges selected connected joints away.
///
/// A bone with exactly one connected child absorbs that child when the
/// joint between them is visible and selected: the parent takes the child's
/// tail, tail radius and tip selection, and the grandchildren move up to
/// the parent with their connection kept. All marks are settled before any
/// bone is removed, and each merge goes into the child's parent as it stands
/// after the earlier merges, so a fully selected chain collapses into its
/// root. Under mirror edit the counterparts of the selection dissolve too,
/// their borrowed selection is released afterwards and every merged bone on
/// the originally selected side is reflected onto its counterpart.
pub fn dissolve_selected(armature: &mut EditArmature) -> OpOutput {
    let mut borrowed: HashMap<EditBoneId, BoneFlags> = HashMap::new();
    if armature.mirror_edit {
        let before: Vec<(EditBoneId, BoneFlags)> =
            armature.iter().map(|(id, bone)| (id, bone.flags)).collect();
        armature.select_mirrored(BoneFlags::SELECT_MASK);
        for (id, flags) in before {
            let added = armature.get(id).map_or(BoneFlags::empty(), |bone| bone.flags & !flags);
            if !added.is_empty() {
                borrowed.insert(id, added);
            }
        }
    }

    let mut marks: HashMap<EditBoneId, Mark> = HashMap::new();
    for (id, bone) in armature.iter() {
        let Some(parent) = bone.parent.filter(|_| bone.is_connected()) else {
            continue;
        };
        marks
            .entry(parent)
            .and_modify(|mark| *mark = Mark::Ambiguous)
            .or_insert(Mark::Child(id));
    }
    marks.retain(|_, mark| *mark != Mark::Ambiguous);

    for id in armature.ids() {
        let visible = armature.is_visible(id);
        let flags = armature.selection_flags(id);
        if !visible || !flags.intersects(BoneFlags::TIP_SELECTED | BoneFlags::SELECTED) {
            marks.remove(&id);
        }
        if !visible || !flags.intersects(BoneFlags::ROOT_SELECTED | BoneFlags::SELECTED) {
            let connected_parent = armature
                .get(id)
                .and_then(|bone| bone.parent.filter(|_| bone.is_connected()));
            if let Some(parent) = connected_parent {
                marks.remove(&parent);
            }
        }
    }

    let merged: Vec<EditBoneId> = armature
        .iter()
        .filter(|(id, bone)| {
            bone.parent
                .is_some_and(|parent| marks.get(&parent) == Some(&Mark::Child(*id)))
        })
        .map(|(id, _)| id)
        .collect();

    let mut targets: Vec<EditBoneId> = Vec::new();
    for child in &merged {
        let Some(removed) = armature.remove(*child, false) else {
            continue;
        };
        let Some(parent) = removed.parent else {
            continue;
        };
        if !targets.contains(&parent) {
            targets.push(parent);
        }
        let Some(target) = armature.get_mut(parent) else {
            continue;
        };
        target.tail = removed.tail;
        target.rad_tail = removed.rad_tail;
        target
            .flags
            .set(BoneFlags::TIP_SELECTED, removed.flags.contains(BoneFlags::TIP_SELECTED));
    }

    if merged.is_empty() {
        release_borrowed(armature, borrowed);
        return OpOutput::unchanged();
    }

    for id in armature.ids() {
        let rad_tail = armature.get(id).and_then(|bone| {
            let parent = bone.parent.filter(|p| bone.is_connected() && marks.contains_key(p))?;
            armature.get(parent).map(|parent| parent.rad_tail)
        });
        if let (Some(rad_tail), Some(bone)) = (rad_tail, armature.get_mut(id)) {
            bone.rad_head = rad_tail;
        }
    }

    let sources: Vec<EditBoneId> = targets
        .into_iter()
        .filter(|id| !borrowed.contains_key(id))
        .collect();
    release_borrowed(armature, borrowed);
    armature.sync_selection();
    mirror_bones(armature, &sources);

    OpOutput::changed(&[ChangeKind::Geometry, ChangeKind::Selection])
}

fn release_borrowed(armature: &mut EditArmature, borrowed: HashMap<EditBoneId, BoneFlags>) {
    for (id, flags) in borrowed {
        if let Some(bone) = armature.get_mut(id) {
            bone.flags.remove(flags);
        }
    }
}
