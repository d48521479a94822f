use std::collections::HashSet;

use crate::armature::{BoneFlags, EditArmature, EditBoneId};
use crate::math::mirror_x;

/// Name-based bone lookup used to resolve left/right counterparts.
pub trait MirrorLookup {
    fn find_bone(&self, name: &str) -> Option<EditBoneId>;
    fn bone_name(&self, id: EditBoneId) -> Option<&str>;
}

impl MirrorLookup for EditArmature {
    fn find_bone(&self, name: &str) -> Option<EditBoneId> {
        self.find(name)
    }

    fn bone_name(&self, id: EditBoneId) -> Option<&str> {
        self.get(id).map(|bone| bone.name.as_str())
    }
}

fn is_separator(c: char) -> bool {
    matches!(c, '.' | ' ' | '-' | '_')
}

fn flip_side_char(c: char) -> Option<char> {
    match c {
        'l' => Some('r'),
        'r' => Some('l'),
        'L' => Some('R'),
        'R' => Some('L'),
        _ => None,
    }
}

/// Flips the left/right token of a bone name.
///
/// Recognized forms, tried in order: a single `L`/`R`/`l`/`r` after a
/// separator at the end (`Arm.L`), a single side letter followed by a
/// separator at the start (`L_Arm`), and a `left`/`right` word at either end
/// in any case (`LeftArm`, `arm_RIGHT`). A trailing `.NNN` number is set
/// aside first and re-appended unless `strip_number` is set.
///
/// # Arguments
///
/// * `name` - Bone name to flip.
/// * `strip_number` - Drop the trailing `.NNN` number instead of keeping it.
///
/// # Returns
///
/// The flipped name, or `name` itself when it carries no side token.
pub fn flip_side_name(name: &str, strip_number: bool) -> String {
    let chars: Vec<char> = name.chars().collect();
    if chars.len() < 3 {
        return name.to_string();
    }

    let mut base: Vec<char> = chars.clone();
    let mut number = String::new();
    if chars.last().is_some_and(|c| c.is_ascii_digit()) {
        if let Some(dot) = chars.iter().rposition(|c| *c == '.') {
            if chars.get(dot + 1).is_some_and(|c| c.is_ascii_digit()) {
                if !strip_number {
                    number = chars[dot..].iter().collect();
                }
                base.truncate(dot);
            }
        }
    }
    let len = base.len();

    if len > 1 && is_separator(base[len - 2]) {
        if let Some(flipped) = flip_side_char(base[len - 1]) {
            let prefix: String = base[..len - 1].iter().collect();
            return format!("{prefix}{flipped}{number}");
        }
    }

    if len > 1 && is_separator(base[1]) {
        if let Some(flipped) = flip_side_char(base[0]) {
            let suffix: String = base[1..].iter().collect();
            return format!("{flipped}{suffix}{number}");
        }
    }

    if len > 5 {
        let lower: Vec<char> = base.iter().map(|c| c.to_ascii_lowercase()).collect();
        let find = |word: &str| -> Option<usize> {
            let word: Vec<char> = word.chars().collect();
            lower.windows(word.len()).position(|window| window == word.as_slice())
        };

        if let Some(index) = find("right").filter(|i| *i == 0 || *i == len - 5) {
            let replace = if base[index] == 'r' {
                "left"
            } else if base[index + 1] == 'I' {
                "LEFT"
            } else {
                "Left"
            };
            let prefix: String = base[..index].iter().collect();
            let suffix: String = base[index + 5..].iter().collect();
            return format!("{prefix}{replace}{suffix}{number}");
        }

        if let Some(index) = find("left").filter(|i| *i == 0 || *i == len - 4) {
            let replace = if base[index] == 'l' {
                "right"
            } else if base[index + 1] == 'E' {
                "RIGHT"
            } else {
                "Right"
            };
            let prefix: String = base[..index].iter().collect();
            let suffix: String = base[index + 4..].iter().collect();
            return format!("{prefix}{replace}{suffix}{number}");
        }
    }

    let base: String = base.into_iter().collect();
    format!("{base}{number}")
}

/// Name of the counterpart of `name`, or `None` when the name has no side.
pub fn find_mirror(name: &str) -> Option<String> {
    let flipped = flip_side_name(name, false);
    (flipped != name).then_some(flipped)
}

/// Resolves the left/right counterpart of a bone within the same armature.
pub fn get_mirror_bone<L: MirrorLookup + ?Sized>(
    lookup: &L,
    id: EditBoneId,
) -> Option<EditBoneId> {
    let name = lookup.bone_name(id)?;
    let mirror = find_mirror(name)?;
    lookup.find_bone(&mirror)
}

/// Bones whose selection was borrowed from a selected counterpart, to be
/// released by [`untag_selected_mirrored`].
#[derive(Debug, Default)]
pub struct MirrorTags {
    tagged: Vec<EditBoneId>,
}

/// Temporarily selects the unselected counterparts of selected visible
/// bones, so an operation over the selection also covers them.
pub fn tag_selected_mirrored(armature: &mut EditArmature) -> MirrorTags {
    let mut tags = MirrorTags::default();
    for id in armature.ids() {
        if !armature.is_visible(id) || !armature.get(id).is_some_and(|bone| bone.is_selected()) {
            continue;
        }
        let Some(mirror) = get_mirror_bone(armature, id) else {
            continue;
        };
        if tags.tagged.contains(&mirror) {
            continue;
        }
        let Some(bone) = armature.get_mut(mirror).filter(|bone| !bone.is_selected()) else {
            continue;
        };
        bone.flags |= BoneFlags::SELECT_MASK;
        tags.tagged.push(mirror);
    }
    tags
}

/// Deselects the bones selected by [`tag_selected_mirrored`].
pub fn untag_selected_mirrored(armature: &mut EditArmature, tags: MirrorTags) {
    for id in tags.tagged {
        if let Some(bone) = armature.get_mut(id) {
            bone.flags.remove(BoneFlags::SELECT_MASK);
        }
    }
}

/// Reflects a bone's geometry across the X = 0 plane onto its counterpart.
///
/// The counterpart gets the reflected head and tail, the negated roll and
/// the same radii. Its connected parent and children are dragged along so
/// they stay attached. With `check_select` a selected counterpart is left
/// alone, since it receives its own edit.
///
/// # Returns
///
/// The counterpart that was updated, if any.
pub fn mirror_update(
    armature: &mut EditArmature,
    id: EditBoneId,
    check_select: bool,
) -> Option<EditBoneId> {
    let mirror = get_mirror_bone(armature, id)?;
    let target = armature.get(mirror)?;
    if mirror == id || (check_select && target.is_selected()) {
        return None;
    }
    let connected_parent = target.parent.filter(|_| target.is_connected());

    let source = armature.get(id)?.clone();
    let new_head = mirror_x(&source.head);
    let new_tail = mirror_x(&source.tail);

    if let Some(parent) = connected_parent.and_then(|p| armature.get_mut(p)) {
        parent.tail = new_head;
        parent.rad_tail = source.rad_head;
    }
    for child in armature.children(mirror) {
        if let Some(child) = armature.get_mut(child).filter(|c| c.is_connected()) {
            child.head = new_tail;
            child.rad_head = source.rad_tail;
        }
    }

    let target = armature.get_mut(mirror)?;
    target.head = new_head;
    target.tail = new_tail;
    target.roll = -source.roll;
    target.rad_head = source.rad_head;
    target.rad_tail = source.rad_tail;
    target.props.dist = source.props.dist;
    target.props.xwidth = source.props.xwidth;
    target.props.zwidth = source.props.zwidth;
    Some(mirror)
}

/// Re-runs mirror propagation after an edit when mirror edit is on.
///
/// Every visible, unlocked bone with any part selected is reflected onto
/// its counterpart, unless the counterpart is selected itself. A bone that
/// was just written as a counterpart is not used as a source again.
///
/// # Returns
///
/// The counterparts that were updated.
pub fn propagate_mirror(armature: &mut EditArmature) -> Vec<EditBoneId> {
    if !armature.mirror_edit {
        return Vec::new();
    }
    let mut updated: HashSet<EditBoneId> = HashSet::new();
    let mut order = Vec::new();
    for id in armature.ids() {
        if updated.contains(&id) || !armature.is_visible(id) {
            continue;
        }
        let is_source = armature.get(id).is_some_and(|bone| {
            bone.flags.intersects(BoneFlags::SELECT_MASK) && !bone.flags.contains(BoneFlags::LOCKED)
        });
        if !is_source {
            continue;
        }
        if let Some(mirror) = mirror_update(armature, id, true) {
            if updated.insert(mirror) {
                order.push(mirror);
            }
        }
    }
    order
}

/// Reflects each of `sources` onto its counterpart when mirror edit is on,
/// whatever the counterpart's selection. A bone written as a counterpart is
/// not used as a source afterwards.
pub fn mirror_bones(armature: &mut EditArmature, sources: &[EditBoneId]) -> Vec<EditBoneId> {
    if !armature.mirror_edit {
        return Vec::new();
    }
    let mut updated: Vec<EditBoneId> = Vec::new();
    for id in sources {
        if updated.contains(id) {
            continue;
        }
        if let Some(mirror) = mirror_update(armature, *id, false) {
            if !updated.contains(&mirror) {
                updated.push(mirror);
            }
        }
    }
    updated
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use nalgebra::Vector3;
    use rstest::rstest;

    /// Asserts that `right` is the reflection of `left` across X = 0.
    pub(crate) fn assert_mirrored(arm: &EditArmature, left: EditBoneId, right: EditBoneId) {
        let (l, r) = (&arm[left], &arm[right]);
        assert!((mirror_x(&l.head) - r.head).norm() < 0.0001, "{} head not mirrored", r.name);
        assert!((mirror_x(&l.tail) - r.tail).norm() < 0.0001, "{} tail not mirrored", r.name);
        assert!((l.roll + r.roll).abs() < 0.0001, "{} roll not negated", r.name);
    }

    #[rstest]
    #[case("Arm.L", "Arm.R")]
    #[case("Arm.r", "Arm.l")]
    #[case("hand_R", "hand_L")]
    #[case("L_foot", "R_foot")]
    #[case("Arm.L.001", "Arm.R.001")]
    #[case("LeftHand", "RightHand")]
    #[case("leftHand", "rightHand")]
    #[case("LEFT_hand", "RIGHT_hand")]
    #[case("hand_right", "hand_left")]
    #[case("Spine", "Spine")]
    #[case("L", "L")]
    fn given_side_name_when_flipping_then_token_is_swapped(
        #[case] name: &str,
        #[case] expected: &str,
    ) {
        assert_eq!(flip_side_name(name, false), expected);
    }

    #[test]
    fn given_numbered_name_when_flipping_with_strip_then_number_is_dropped() {
        assert_eq!(flip_side_name("Arm.L.003", true), "Arm.R");
    }

    #[test]
    fn given_centre_bone_when_finding_mirror_then_none_is_returned() {
        assert_eq!(find_mirror("Spine"), None);
        assert_eq!(find_mirror("Leg_L").as_deref(), Some("Leg_R"));
    }

    #[test]
    fn given_pair_when_updating_mirror_then_geometry_is_reflected() {
        let mut arm = EditArmature::new();
        let left = arm.add_bone("Arm.L", Vector3::new(1.0, 0.0, 0.0), Vector3::new(2.0, 0.5, 0.0));
        let right =
            arm.add_bone("Arm.R", Vector3::new(-1.0, 0.0, 0.0), Vector3::new(-2.0, 0.0, 0.0));
        arm[left].roll = 0.25;
        arm[left].rad_tail = 0.3;

        let updated = mirror_update(&mut arm, left, true);

        assert_eq!(updated, Some(right));
        assert_eq!(arm[right].tail, Vector3::new(-2.0, 0.5, 0.0));
        assert_eq!(arm[right].roll, -0.25);
        assert_eq!(arm[right].rad_tail, 0.3);
        assert_eq!(get_mirror_bone(&arm, right), Some(left));
    }

    #[test]
    fn given_asymmetric_counterpart_when_propagating_then_it_becomes_the_reflection() {
        let mut arm = EditArmature::new();
        arm.mirror_edit = true;
        let left = arm.add_bone("Arm.L", Vector3::new(1.0, 0.0, 0.0), Vector3::new(2.0, 1.0, 0.0));
        let right =
            arm.add_bone("Arm.R", Vector3::new(-1.5, 0.0, 0.0), Vector3::new(-3.0, 0.0, 0.0));
        arm[left].roll = 0.2;
        arm.select(left, true);

        let updated = propagate_mirror(&mut arm);

        assert_eq!(updated, vec![right]);
        assert_mirrored(&arm, left, right);
        assert_eq!(arm[left].head, Vector3::new(1.0, 0.0, 0.0));
    }

    #[rstest]
    #[case(false, false)]
    #[case(true, true)]
    fn given_mirror_off_or_both_selected_when_propagating_then_nothing_moves(
        #[case] mirror_edit: bool,
        #[case] select_right: bool,
    ) {
        let mut arm = EditArmature::new();
        arm.mirror_edit = mirror_edit;
        let left = arm.add_bone("Arm.L", Vector3::new(1.0, 0.0, 0.0), Vector3::new(2.0, 0.0, 0.0));
        let right =
            arm.add_bone("Arm.R", Vector3::new(-1.5, 0.0, 0.0), Vector3::new(-3.0, 0.0, 0.0));
        arm.select(left, true);
        arm.select(right, select_right);

        assert!(propagate_mirror(&mut arm).is_empty());
        assert_eq!(arm[right].head, Vector3::new(-1.5, 0.0, 0.0));
    }

    #[test]
    fn given_selected_bone_when_tagging_mirrors_then_counterpart_is_selected_until_untagged() {
        let mut arm = EditArmature::new();
        let left = arm.add_bone("Arm.L", Vector3::zeros(), Vector3::y());
        let right = arm.add_bone("Arm.R", Vector3::zeros(), Vector3::y());
        arm.select(left, true);

        let tags = tag_selected_mirrored(&mut arm);
        assert!(arm[right].is_selected());

        untag_selected_mirrored(&mut arm, tags);
        assert!(!arm[right].is_selected());
        assert!(arm[left].is_selected());
    }
}
